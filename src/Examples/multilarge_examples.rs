use crate::Utils::logger::SolveHistory;
use crate::numerical::multilarge_errors::Result;
use crate::numerical::multilarge_linear::stdform::{genform1, wstdform1};
use crate::numerical::multilarge_linear::{MultilargeLinearMethod, MultilargeLinearWorkspace};
use crate::numerical::multilarge_nlinear::*;
use crate::somelinalg::normal_equations::NormalEquationsAccumulator;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Gaussian peak y = A exp(-(t - t0)^2 / (2 s^2)) + noise on a long grid.
/// The Jacobian is never formed in full: every call splits the data into
/// blocks and the blocks are reduced to J^T J, J^T y on the rayon pool.
pub struct GaussianPeak {
    t: Vec<f64>,
    y: Vec<f64>,
    block: usize,
    acc: NormalEquationsAccumulator,
}

impl GaussianPeak {
    pub fn new(n: usize, block: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let t: Vec<f64> = (0..n).map(|i| i as f64 / (n - 1) as f64).collect();
        let y = t
            .iter()
            .map(|ti| {
                let z = (ti - 0.4) / 0.15;
                5.0 * (-0.5 * z * z).exp() + 0.05 * rng.random_range(-1.0..1.0)
            })
            .collect();
        Self {
            t,
            y,
            block,
            acc: NormalEquationsAccumulator::new(3),
        }
    }

    fn jacobian_block(&self, x: &DVector<f64>, start: usize, rows: usize) -> DMatrix<f64> {
        DMatrix::from_fn(rows, 3, |i, k| {
            let ti = self.t[start + i];
            let z = (ti - x[1]) / x[2];
            let e = (-0.5 * z * z).exp();
            match k {
                0 => e,
                1 => x[0] * e * z / x[2],
                _ => x[0] * e * z * z / x[2],
            }
        })
    }
}

impl NormalEquationsProblem for GaussianPeak {
    fn num_residuals(&self) -> usize {
        self.t.len()
    }

    fn num_parameters(&self) -> usize {
        3
    }

    fn residual(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()> {
        for (i, ti) in self.t.iter().enumerate() {
            let z = (ti - x[1]) / x[2];
            f[i] = x[0] * (-0.5 * z * z).exp() - self.y[i];
        }
        Ok(())
    }

    fn normal_equations(
        &mut self,
        x: &DVector<f64>,
        y: &DVector<f64>,
        jty: &mut DVector<f64>,
        jtj: Option<&mut DMatrix<f64>>,
    ) -> Result<()> {
        let n = self.t.len();
        let blocks: Vec<(DMatrix<f64>, DVector<f64>)> = (0..n)
            .step_by(self.block)
            .map(|start| {
                let rows = self.block.min(n - start);
                (
                    self.jacobian_block(x, start, rows),
                    y.rows(start, rows).into_owned(),
                )
            })
            .collect();
        self.acc.reset();
        self.acc.accumulate_par(&blocks)?;
        jty.copy_from(self.acc.aty());
        if let Some(jtj) = jtj {
            jtj.copy_from(self.acc.ata());
        }
        Ok(())
    }
}

/// f = [10 (x1 - x0^2), 1 - x0]
fn rosenbrock<'a>() -> ClosureProblem<'a> {
    ClosureProblem::new(
        2,
        2,
        |x, f| {
            f[0] = 10.0 * (x[1] - x[0] * x[0]);
            f[1] = 1.0 - x[0];
            Ok(())
        },
        |x, y, jty, jtj| {
            let j = DMatrix::from_row_slice(2, 2, &[-20.0 * x[0], 10.0, -1.0, 0.0]);
            jty.copy_from(&(j.transpose() * y));
            if let Some(jtj) = jtj {
                jtj.copy_from(&(j.transpose() * &j));
            }
            Ok(())
        },
    )
}

pub fn multilarge_examples(example: usize) {
    match example {
        0 => {
            // large data fit with block-wise normal equations
            let n = 100_000;
            let peak = GaussianPeak::new(n, 5_000, 42);
            let mut w =
                MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), n, 3)
                    .unwrap();
            w.init(&DVector::from_vec(vec![1.0, 0.5, 0.3]), peak).unwrap();
            let report = solve(&mut w, &DriverConfig::default(), None).unwrap();
            println!("outcome {:?} after {} iterations", report.outcome, report.niter);
            println!("A, t0, s = {}", w.position());
            println!("rcond(J) = {}", w.rcond().unwrap());
            let fdf = w.fdf().unwrap();
            println!(
                "f evaluations {}, J^T J evaluations {}",
                fdf.nevalf, fdf.nevaldf
            );
        }
        1 => {
            // Rosenbrock with and without geodesic acceleration
            for (accel, label) in [(false, "plain LM"), (true, "geodesic acceleration")] {
                let params = MultilargeNlinearParameters {
                    accel,
                    ..Default::default()
                };
                let mut w = MultilargeNlinearWorkspace::alloc(params, 2, 2).unwrap();
                w.init(&DVector::from_vec(vec![-0.5, 1.75]), rosenbrock())
                    .unwrap();
                let mut history = SolveHistory::new();
                let mut monitor = |iter: usize, w: &MultilargeNlinearWorkspace<_>| {
                    history.record(iter, w)
                };
                let report = solve(&mut w, &DriverConfig::default(), Some(&mut monitor)).unwrap();
                let fdf = w.fdf().unwrap();
                println!(
                    "{}: {:?}, x = {:?}, nevalf = {}, nevalfvv = {}",
                    label,
                    report.outcome,
                    w.position().as_slice(),
                    fdf.nevalf,
                    fdf.nevalfvv
                );
                let path = if accel {
                    "rosenbrock_accel.csv"
                } else {
                    "rosenbrock_plain.csv"
                };
                history.save_to_csv(path).unwrap();
            }
        }
        2 => {
            // regularized exponential fit with Tikhonov penalty
            let t: Vec<f64> = (0..40).map(|i| 0.25 * i as f64).collect();
            let y: Vec<f64> = t.iter().map(|ti| 3.0 * (-0.8 * ti).exp() + 0.5).collect();
            let t2 = t.clone();
            let problem = ClosureProblem::new(
                40,
                3,
                move |x, f| {
                    for i in 0..40 {
                        f[i] = x[0] * (-x[1] * t[i]).exp() + x[2] - y[i];
                    }
                    Ok(())
                },
                move |x, r, jtr, jtj| {
                    let j = DMatrix::from_fn(40, 3, |i, k| {
                        let e = (-x[1] * t2[i]).exp();
                        match k {
                            0 => e,
                            1 => -x[0] * t2[i] * e,
                            _ => 1.0,
                        }
                    });
                    jtr.copy_from(&(j.transpose() * r));
                    if let Some(jtj) = jtj {
                        jtj.copy_from(&(j.transpose() * &j));
                    }
                    Ok(())
                },
            );
            let regularized = TikhonovProblem::identity(problem, 0.1).unwrap();
            let mut w = MultilargeNlinearWorkspace::alloc(
                MultilargeNlinearParameters {
                    scale: ScalingMethod::Levenberg,
                    ..Default::default()
                },
                43,
                3,
            )
            .unwrap();
            w.init(&DVector::from_vec(vec![1.0, 1.0, 0.0]), regularized)
                .unwrap();
            let report = solve(&mut w, &DriverConfig::default(), None).unwrap();
            println!(
                "lambda = 0.1: {:?}, x = {:?}, ||f||^2 = {}",
                report.outcome,
                w.position().as_slice(),
                w.residual().norm_squared()
            );
        }
        3 => {
            // linear least squares: normal equations against TSQR, weighted
            // general form with a diagonal L
            let (n, p) = (20_000, 50);
            let mut rng = StdRng::seed_from_u64(7);
            let x = DMatrix::from_fn(n, p, |_, _| rng.random_range(-1.0..1.0));
            let c = DVector::from_fn(p, |_, _| rng.random_range(-1.0..1.0));
            let mut y = &x * &c;
            for yi in y.iter_mut() {
                *yi += 1.0e-3 * rng.random_range(-1.0..1.0);
            }
            let weights = DVector::from_fn(n, |_, _| rng.random_range(0.5..1.0));
            let l = DVector::from_fn(p, |_, _| rng.random_range(1.0..5.0));

            let nblock = 2_000;
            let blocks: Vec<(DMatrix<f64>, DVector<f64>)> = (0..n)
                .step_by(nblock)
                .map(|start| {
                    let xb = x.rows(start, nblock).into_owned();
                    let wb = weights.rows(start, nblock).into_owned();
                    let yb = y.rows(start, nblock).into_owned();
                    wstdform1(Some(&l), &xb, Some(&wb), &yb).unwrap()
                })
                .collect();

            for method in [MultilargeLinearMethod::Normal, MultilargeLinearMethod::Tsqr] {
                let mut work = MultilargeLinearWorkspace::alloc(method, p).unwrap();
                work.accumulate_par(&blocks).unwrap();
                println!("{}: rcond = {}", method, work.rcond().unwrap());
                // L-curve points
                for lambda in [1e-3, 1e-2, 1e-1, 1.0, 10.0] {
                    let sol = work.solve(lambda).unwrap();
                    let c_fit = genform1(&l, &sol.c).unwrap();
                    println!(
                        "  lambda = {:e}: ||y - X c|| = {:.6e}, ||L c|| = {:.6e}, |c - c_true| = {:.3e}",
                        lambda,
                        sol.rnorm,
                        sol.snorm,
                        (&c_fit - &c).norm()
                    );
                }
            }
        }
        4 => {
            // solver settings read from a TOML task
            let task = SolverTask::from_toml_str(
                r#"
                [solver]
                scale = "marquardt"
                accel = true
                avmax = 0.5

                [driver]
                maxiter = 500
                xtol = 1e-10
                loglevel = "warn"
                "#,
            )
            .unwrap();
            println!("{:?}", task);
            let mut w = MultilargeNlinearWorkspace::alloc(task.parameters.clone(), 2, 2).unwrap();
            w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock())
                .unwrap();
            match solve(&mut w, &task.driver, None) {
                Ok(report) => println!(
                    "{:?} in {} iterations, x = {:?}",
                    report.info,
                    report.niter,
                    w.position().as_slice()
                ),
                Err(e) => println!("solver failed: {}", e),
            }
        }
        _ => {
            println!("no example with number {}", example);
        }
    }
}
