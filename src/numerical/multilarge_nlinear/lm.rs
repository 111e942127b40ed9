//! Levenberg-Marquardt iteration on the normal equations with Nielsen damping
//! control and optional geodesic acceleration.
//!
//! Every trial step solves the damped system
//!
//!   (J^T J + mu * D^T D) v = -J^T f
//!
//! and, when acceleration is on, (J^T J + mu * D^T D) a = -J^T fvv with the
//! same factorization. The proposed step is dx = v + a / 2.
use super::fdf::{Fdf, NormalEquationsProblem};
use super::parameters::MultilargeNlinearParameters;
use super::scaling::{ScalingMethod, scaled_norm};
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use crate::somelinalg::eigen_rcond::symmetric_rcond;
use crate::somelinalg::scaled_cholesky::ScaledCholesky;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

/// Lower bound of the damping reduction factor on an accepted step
pub const ONE_THIRD: f64 = 0.333333333333333;
/// Consecutive rejected attempts after which an iteration gives up
pub const MAX_BAD_STEPS: usize = 15;
/// Initial damping scale
pub const MU0: f64 = 1e-3;

/// Private state of the LM method. Owned by the solver workspace; all
/// buffers are sized once in [`LmState::alloc`].
#[derive(Debug, Clone)]
pub struct LmState {
    n: usize,
    p: usize,
    /// factorization of J^T J + mu D^T D
    solver: ScaledCholesky,
    /// whether the last decomposition succeeded
    chol: bool,
    x_trial: DVector<f64>,
    f_trial: DVector<f64>,
    fvv: DVector<f64>,
    jtfvv: DVector<f64>,
    /// geodesic velocity (standard LM step)
    vel: DVector<f64>,
    /// geodesic acceleration
    acc: DVector<f64>,
    /// diag(D^T D)
    dtd: DVector<f64>,
    workp: DVector<f64>,
    mu: f64,
    mu0: f64,
    nu: i64,
    avratio: f64,
    scale: ScalingMethod,
    accel: bool,
    avmax: f64,
    h_fvv: f64,
}

impl LmState {
    pub fn alloc(params: &MultilargeNlinearParameters, n: usize, p: usize) -> Result<Self> {
        if p == 0 {
            return Err(MultilargeError::InvalidConfig(
                "p must be a positive integer".to_string(),
            ));
        }
        params.validate()?;

        Ok(Self {
            n,
            p,
            solver: ScaledCholesky::new(p),
            chol: false,
            x_trial: DVector::zeros(p),
            f_trial: DVector::zeros(n),
            fvv: DVector::zeros(n),
            jtfvv: DVector::zeros(p),
            vel: DVector::zeros(p),
            acc: DVector::zeros(p),
            dtd: DVector::zeros(p),
            workp: DVector::zeros(p),
            mu: 0.0,
            mu0: MU0,
            nu: 2,
            avratio: 0.0,
            scale: params.scale,
            accel: params.accel,
            avmax: params.avmax,
            h_fvv: params.h_fvv,
        })
    }

    pub fn name(&self) -> &'static str {
        "lm"
    }

    /// Evaluate f, J^T J and g = J^T f at x, initialize D^T D and mu.
    pub fn init<P: NormalEquationsProblem>(
        &mut self,
        fdf: &mut Fdf<P>,
        x: &DVector<f64>,
        f: &mut DVector<f64>,
        g: &mut DVector<f64>,
        jtj: &mut DMatrix<f64>,
    ) -> Result<()> {
        fdf.eval_f(x, f)?;
        fdf.eval_df(x, f, g, jtj)?;

        self.scale.init(jtj, &mut self.dtd);
        self.init_mu(jtj);
        self.nu = 2;

        self.vel.fill(0.0);
        self.acc.fill(0.0);
        self.avratio = 0.0;
        info!(
            "LM initialized: n = {}, p = {}, scaling = {}, accel = {}, mu = {}, ||f|| = {}",
            self.n,
            self.p,
            self.scale,
            self.accel,
            self.mu,
            f.norm()
        );
        Ok(())
    }

    fn init_mu(&mut self, jtj: &DMatrix<f64>) {
        self.mu = self.mu0;
        if self.scale == ScalingMethod::Levenberg {
            // D = I, so mu follows the magnitude of J^T J
            self.mu *= jtj.diagonal().max();
        }
    }

    ///////////////////////////////////////////////////////////////////////////////////////////
    ///////////////////////////////////ONE ITERATION//////////////////////////////////////////
    ///////////////////////////////////////////////////////////////////////////////////////////
    /// Search for an acceptable step and take it.
    ///
    /// On success x, f, J^T J and g describe the new point and dx holds the
    /// step taken. A rejected attempt never touches them, so on
    /// `Err(NoProgress)` they still describe the point the call started from.
    /// A failed factorization counts as a rejected attempt.
    pub fn iterate<P: NormalEquationsProblem>(
        &mut self,
        fdf: &mut Fdf<P>,
        x: &mut DVector<f64>,
        f: &mut DVector<f64>,
        jtj: &mut DMatrix<f64>,
        g: &mut DVector<f64>,
        dx: &mut DVector<f64>,
    ) -> Result<()> {
        let mut bad_steps = 0usize;

        loop {
            let accepted = if self.decompose(jtj) {
                self.trial_step(fdf, x, f, jtj, g, dx)?
            } else {
                None
            };

            if let Some(rho) = accepted {
                self.nielsen_accept(rho);

                // J^T J and J^T f at the new point
                fdf.eval_df(&self.x_trial, &self.f_trial, g, jtj)?;
                x.copy_from(&self.x_trial);
                f.copy_from(&self.f_trial);
                self.scale.update(jtj, &mut self.dtd);

                info!(
                    "step accepted after {} rejections: rho = {}, mu = {}, ||f|| = {}",
                    bad_steps,
                    rho,
                    self.mu,
                    f.norm()
                );
                return Ok(());
            }

            bad_steps += 1;
            if bad_steps >= MAX_BAD_STEPS {
                warn!(
                    "{} consecutive steps rejected (mu = {}, nu = {}), no progress",
                    bad_steps, self.mu, self.nu
                );
                return Err(MultilargeError::NoProgress);
            }
            self.nielsen_reject(jtj);
            debug!(
                "step rejected ({} in a row): mu = {}, nu = {}",
                bad_steps, self.mu, self.nu
            );
        }
    }

    fn decompose(&mut self, jtj: &DMatrix<f64>) -> bool {
        self.chol = self.solver.decompose_damped(jtj, self.mu, &self.dtd);
        self.chol
    }

    /// Compute v (and a), the trial point and f there. Returns rho if the
    /// trial step passes the acceptance checks.
    fn trial_step<P: NormalEquationsProblem>(
        &mut self,
        fdf: &mut Fdf<P>,
        x: &DVector<f64>,
        f: &DVector<f64>,
        jtj: &DMatrix<f64>,
        g: &DVector<f64>,
        dx: &mut DVector<f64>,
    ) -> Result<Option<f64>> {
        // (J^T J + mu D^T D) v = -g
        if !self.solver.solve_negated(g, &mut self.vel) {
            return Ok(None);
        }

        if self.accel {
            fdf.eval_fvv(
                self.h_fvv,
                x,
                &self.vel,
                g,
                jtj,
                &mut self.fvv,
                &mut self.jtfvv,
                &mut self.workp,
            )?;
            // (J^T J + mu D^T D) a = -J^T fvv
            if !self.solver.solve_negated(&self.jtfvv, &mut self.acc) {
                return Ok(None);
            }
        }

        for i in 0..self.p {
            dx[i] = self.vel[i] + 0.5 * self.acc[i];
            self.x_trial[i] = x[i] + dx[i];
        }

        fdf.eval_f(&self.x_trial, &mut self.f_trial)?;

        Ok(self.check_step(g, f))
    }

    /// Acceleration bound first (when on), then rho > 0
    fn check_step(&mut self, g: &DVector<f64>, f: &DVector<f64>) -> Option<f64> {
        if self.accel {
            let anorm = scaled_norm(&self.dtd, &self.acc, &mut self.workp);
            let vnorm = scaled_norm(&self.dtd, &self.vel, &mut self.workp);
            self.avratio = if vnorm > 0.0 { anorm / vnorm } else { 0.0 };
            if self.avratio > self.avmax {
                debug!("|a|/|v| = {} exceeds avmax = {}", self.avratio, self.avmax);
                return None;
            }
        }
        let rho = self.calc_rho(g, f);
        (rho > 0.0).then_some(rho)
    }

    /// Ratio of actual to predicted reduction (More, 1978, Eq. 4.4).
    ///
    /// The predicted reduction uses ||J v||^2 + 2 mu ||D v||^2 = mu ||D v||^2 - v^T g,
    /// so J itself is never needed.
    fn calc_rho(&mut self, g: &DVector<f64>, f: &DVector<f64>) -> f64 {
        let normf = f.norm();
        let normf_trial = self.f_trial.norm();

        if normf_trial >= normf {
            return -1.0;
        }

        let u = normf_trial / normf;
        let actual_reduction = 1.0 - u * u;

        let norm_dv = scaled_norm(&self.dtd, &self.vel, &mut self.workp);
        let u = norm_dv / normf;
        let pred_reduction = self.mu * u * u - self.vel.dot(g) / (normf * normf);

        if pred_reduction > 0.0 {
            actual_reduction / pred_reduction
        } else {
            -1.0
        }
    }

    fn nielsen_accept(&mut self, rho: f64) {
        let b = 2.0 * rho - 1.0;
        let b = 1.0 - b * b * b;
        self.mu *= ONE_THIRD.max(b);
        self.nu = 2;
    }

    fn nielsen_reject(&mut self, jtj: &DMatrix<f64>) {
        self.mu *= self.nu as f64;

        let nu2 = self.nu.wrapping_mul(2);
        if nu2 <= self.nu {
            // nu wrapped around: start over from the initial damping
            warn!("nu overflowed, resetting mu and nu");
            self.nu = 2;
            self.init_mu(jtj);
        } else {
            self.nu = nu2;
        }
    }

    /// sqrt(lambda_min / lambda_max) of J^T J, 0 if unreliable
    pub fn rcond(&self, jtj: &DMatrix<f64>) -> f64 {
        symmetric_rcond(jtj)
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn nu(&self) -> i64 {
        self.nu
    }

    pub fn avratio(&self) -> f64 {
        self.avratio
    }

    pub fn scaling_diag(&self) -> &DVector<f64> {
        &self.dtd
    }

    pub fn velocity(&self) -> &DVector<f64> {
        &self.vel
    }

    pub fn acceleration(&self) -> &DVector<f64> {
        &self.acc
    }

    pub fn factorization_ok(&self) -> bool {
        self.chol
    }

    pub fn scale(&self) -> ScalingMethod {
        self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::multilarge_nlinear::fdf::ClosureProblem;
    use approx::assert_relative_eq;

    fn buffers(n: usize, p: usize) -> (DVector<f64>, DVector<f64>, DMatrix<f64>, DVector<f64>, DVector<f64>) {
        (
            DVector::zeros(p),
            DVector::zeros(n),
            DMatrix::zeros(p, p),
            DVector::zeros(p),
            DVector::zeros(p),
        )
    }

    #[test]
    fn p_zero_is_invalid() {
        let params = MultilargeNlinearParameters::default();
        assert!(matches!(
            LmState::alloc(&params, 3, 0),
            Err(MultilargeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn levenberg_mu_follows_jtj() {
        let params = MultilargeNlinearParameters {
            scale: ScalingMethod::Levenberg,
            ..Default::default()
        };
        let mut state = LmState::alloc(&params, 2, 2).unwrap();
        let jtj = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 250.0]);
        state.init_mu(&jtj);
        assert_relative_eq!(state.mu(), 0.25, epsilon = 1e-15);
    }

    #[test]
    fn nielsen_updates() {
        let params = MultilargeNlinearParameters::default();
        let mut state = LmState::alloc(&params, 1, 1).unwrap();
        let jtj = DMatrix::from_element(1, 1, 1.0);
        state.mu = 1.0;
        state.nu = 2;

        state.nielsen_reject(&jtj);
        assert_eq!((state.mu, state.nu), (2.0, 4));
        state.nielsen_reject(&jtj);
        assert_eq!((state.mu, state.nu), (8.0, 8));

        // rho = 1/2 gives b = 1
        state.nielsen_accept(0.5);
        assert_eq!((state.mu, state.nu), (8.0, 2));
        // very good step: factor is clamped at one third
        state.nielsen_accept(1.0);
        assert_relative_eq!(state.mu, 8.0 * ONE_THIRD, epsilon = 1e-15);
    }

    #[test]
    fn nu_overflow_resets_damping() {
        let params = MultilargeNlinearParameters::default();
        let mut state = LmState::alloc(&params, 1, 1).unwrap();
        let jtj = DMatrix::from_element(1, 1, 7.0);
        state.mu = 5.0;
        state.nu = 1i64 << 62;
        state.nielsen_reject(&jtj);
        assert_eq!(state.nu, 2);
        assert_eq!(state.mu, MU0);
    }

    #[test]
    fn fifteen_rejections_give_no_progress_and_keep_state() {
        // f does not depend on x, so every trial is rejected
        let problem = ClosureProblem::new(
            1,
            1,
            |_x, f| {
                f[0] = 1.0;
                Ok(())
            },
            |_x, y, jty, jtj| {
                jty[0] = y[0];
                if let Some(jtj) = jtj {
                    jtj[(0, 0)] = 1.0;
                }
                Ok(())
            },
        );
        let mut fdf = Fdf::new(problem);
        let params = MultilargeNlinearParameters::default();
        let mut state = LmState::alloc(&params, 1, 1).unwrap();
        let (mut x, mut f, mut jtj, mut g, mut dx) = buffers(1, 1);
        x[0] = 0.5;
        state.init(&mut fdf, &x, &mut f, &mut g, &mut jtj).unwrap();
        let mu_init = state.mu();

        let err = state
            .iterate(&mut fdf, &mut x, &mut f, &mut jtj, &mut g, &mut dx)
            .unwrap_err();
        assert_eq!(err, MultilargeError::NoProgress);
        assert_eq!(x[0], 0.5);
        assert_eq!(f[0], 1.0);
        assert_eq!(g[0], 1.0);
        assert_eq!(jtj[(0, 0)], 1.0);
        // 14 updates mu *= nu with nu = 2, 4, ..., 2^14
        assert_relative_eq!(state.mu(), mu_init * 2f64.powi(105), max_relative = 1e-14);
        assert_eq!(state.nu(), 1i64 << 15);
        assert_eq!(fdf.nevalf, 1 + MAX_BAD_STEPS);
        assert_eq!(fdf.nevaldf, 1);
    }

    #[test]
    fn failed_factorization_is_retried_with_more_damping() {
        // f = x - 3 but the evaluator reports an indefinite J^T J = -0.5
        let problem = ClosureProblem::new(
            1,
            1,
            |x, f| {
                f[0] = x[0] - 3.0;
                Ok(())
            },
            |_x, y, jty, jtj| {
                jty[0] = y[0];
                if let Some(jtj) = jtj {
                    jtj[(0, 0)] = -0.5;
                }
                Ok(())
            },
        );
        let mut fdf = Fdf::new(problem);
        let params = MultilargeNlinearParameters {
            scale: ScalingMethod::Marquardt,
            ..Default::default()
        };
        let mut state = LmState::alloc(&params, 1, 1).unwrap();
        let (mut x, mut f, mut jtj, mut g, mut dx) = buffers(1, 1);
        state.init(&mut fdf, &x, &mut f, &mut g, &mut jtj).unwrap();
        // non-positive diagonal is floored to 1
        assert_eq!(state.scaling_diag()[0], 1.0);

        state
            .iterate(&mut fdf, &mut x, &mut f, &mut jtj, &mut g, &mut dx)
            .unwrap();

        // four failed decompositions: mu = 1e-3 * 2 * 4 * 8 * 16
        let mu = 1e-3 * 1024.0;
        let a = -0.5 + mu;
        let v = 3.0 / a;
        assert_relative_eq!(x[0], v, epsilon = 1e-12);
        assert_relative_eq!(dx[0], v, epsilon = 1e-12);
        assert_relative_eq!(f[0], v - 3.0, epsilon = 1e-12);

        let actual = 1.0 - ((v - 3.0) / 3.0).powi(2);
        let pred = mu * (v / 3.0).powi(2) + 3.0 * v / 9.0;
        let rho = actual / pred;
        let b = 2.0 * rho - 1.0;
        assert_relative_eq!(state.mu(), mu * ONE_THIRD.max(1.0 - b * b * b), epsilon = 1e-12);
        assert_eq!(state.nu(), 2);
        assert!(state.factorization_ok());
        assert_eq!(fdf.nevalf, 2);
        assert_eq!(fdf.nevaldf, 2);
    }

    #[test]
    fn evaluator_error_is_propagated() {
        let problem = ClosureProblem::new(
            1,
            1,
            |x, f| {
                if x[0] > 0.0 {
                    return Err(MultilargeError::Evaluation("x out of domain".to_string()));
                }
                f[0] = x[0] - 1.0;
                Ok(())
            },
            |_x, y, jty, jtj| {
                jty[0] = y[0];
                if let Some(jtj) = jtj {
                    jtj[(0, 0)] = 1.0;
                }
                Ok(())
            },
        );
        let mut fdf = Fdf::new(problem);
        let mut state = LmState::alloc(&MultilargeNlinearParameters::default(), 1, 1).unwrap();
        let (mut x, mut f, mut jtj, mut g, mut dx) = buffers(1, 1);
        x[0] = -1.0;
        state.init(&mut fdf, &x, &mut f, &mut g, &mut jtj).unwrap();
        let err = state
            .iterate(&mut fdf, &mut x, &mut f, &mut jtj, &mut g, &mut dx)
            .unwrap_err();
        assert_eq!(err, MultilargeError::Evaluation("x out of domain".to_string()));
        assert_eq!(x[0], -1.0);
    }
}
