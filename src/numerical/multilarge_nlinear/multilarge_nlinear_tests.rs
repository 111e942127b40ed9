use super::*;
use crate::Utils::logger::SolveHistory;
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use crate::somelinalg::normal_equations::NormalEquationsAccumulator;
use approx::assert_relative_eq;
use nalgebra::{DMatrix, DVector};

/// y = 5 exp(-1.5 t) + 1 fitted with a exp(-b t) + c. J^T J and J^T r are
/// accumulated from Jacobian blocks of `block` rows, the way a problem too
/// large for a dense Jacobian would do it.
struct ExpFit {
    t: Vec<f64>,
    y: Vec<f64>,
    block: usize,
    acc: NormalEquationsAccumulator,
}

impl ExpFit {
    fn new(n: usize, block: usize) -> Self {
        let t: Vec<f64> = (0..n).map(|i| 0.1 * i as f64).collect();
        let y = t.iter().map(|ti| 5.0 * (-1.5 * ti).exp() + 1.0).collect();
        Self {
            t,
            y,
            block,
            acc: NormalEquationsAccumulator::new(3),
        }
    }
}

impl NormalEquationsProblem for ExpFit {
    fn num_residuals(&self) -> usize {
        self.t.len()
    }

    fn num_parameters(&self) -> usize {
        3
    }

    fn residual(&mut self, x: &DVector<f64>, f: &mut DVector<f64>) -> Result<()> {
        for (i, ti) in self.t.iter().enumerate() {
            f[i] = x[0] * (-x[1] * ti).exp() + x[2] - self.y[i];
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
        let with_jtj = jtj.is_some();
        self.acc.reset();
        for start in (0..n).step_by(self.block) {
            let rows = self.block.min(n - start);
            let jb = DMatrix::from_fn(rows, 3, |i, k| {
                let ti = self.t[start + i];
                let e = (-x[1] * ti).exp();
                match k {
                    0 => e,
                    1 => -x[0] * ti * e,
                    _ => 1.0,
                }
            });
            let yb = y.rows(start, rows).into_owned();
            if with_jtj {
                self.acc.accumulate(&jb, &yb)?;
            } else {
                self.acc.accumulate_rhs(&jb, &yb)?;
            }
        }
        jty.copy_from(self.acc.aty());
        if let Some(jtj) = jtj {
            jtj.copy_from(self.acc.ata());
        }
        Ok(())
    }
}

/// Rosenbrock as least squares: f = [10 (x1 - x0^2), 1 - x0]
fn rosenbrock<'a>(analytic_fvv: bool) -> ClosureProblem<'a> {
    let problem = ClosureProblem::new(
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
    );
    if analytic_fvv {
        problem.with_fvv(|_x, v, fvv| {
            fvv[0] = -20.0 * v[0] * v[0];
            fvv[1] = 0.0;
            Ok(())
        })
    } else {
        problem
    }
}

/// f = x^2 - 2
fn sqrt2<'a>() -> ClosureProblem<'a> {
    ClosureProblem::new(
        1,
        1,
        |x, f| {
            f[0] = x[0] * x[0] - 2.0;
            Ok(())
        },
        |x, y, jty, jtj| {
            jty[0] = 2.0 * x[0] * y[0];
            if let Some(jtj) = jtj {
                jtj[(0, 0)] = 4.0 * x[0] * x[0];
            }
            Ok(())
        },
    )
}

/// f does not depend on x: no step can ever be accepted
fn flat<'a>() -> ClosureProblem<'a> {
    ClosureProblem::new(
        2,
        2,
        |_x, f| {
            f.fill(1.0);
            Ok(())
        },
        |_x, y, jty, jtj| {
            jty.copy_from(y);
            if let Some(jtj) = jtj {
                jtj.fill_with_identity();
            }
            Ok(())
        },
    )
}

fn params(scale: ScalingMethod, accel: bool) -> MultilargeNlinearParameters {
    MultilargeNlinearParameters {
        scale,
        accel,
        ..Default::default()
    }
}

fn quiet(maxiter: usize) -> DriverConfig {
    DriverConfig {
        maxiter,
        loglevel: Some("off".to_string()),
        ..Default::default()
    }
}

const ALL_SCALINGS: [ScalingMethod; 3] = [
    ScalingMethod::Levenberg,
    ScalingMethod::Marquardt,
    ScalingMethod::More,
];

#[test]
fn exponential_fit_all_scalings() {
    for scale in ALL_SCALINGS {
        for accel in [false, true] {
            let mut w = MultilargeNlinearWorkspace::alloc(params(scale, accel), 40, 3).unwrap();
            w.init(&DVector::from_vec(vec![1.0, 1.0, 0.0]), ExpFit::new(40, 7))
                .unwrap();

            let mut fnorm_prev = w.residual().norm();
            let mut monitor = |_iter: usize, w: &MultilargeNlinearWorkspace<ExpFit>| {
                let fnorm = w.residual().norm();
                assert!(fnorm < fnorm_prev, "accepted step must decrease ||f||");
                assert!(w.mu() >= 0.0);
                assert_eq!(w.nu(), 2);
                fnorm_prev = fnorm;
            };
            let report = driver(&mut w, &quiet(200), Some(&mut monitor)).unwrap();

            assert!(report.converged(), "{} accel={}: {:?}", scale, accel, report);
            assert_eq!(report.niter, w.niter());
            let x = w.position();
            assert_relative_eq!(x[0], 5.0, epsilon = 1e-6);
            assert_relative_eq!(x[1], 1.5, epsilon = 1e-6);
            assert_relative_eq!(x[2], 1.0, epsilon = 1e-6);
            assert_eq!(w.status(), SolverStatus::Converged);
        }
    }
}

#[test]
fn block_size_does_not_change_the_path() {
    let mut positions = Vec::new();
    for block in [40, 13] {
        let mut w =
            MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 40, 3).unwrap();
        w.init(&DVector::from_vec(vec![1.0, 1.0, 0.0]), ExpFit::new(40, block))
            .unwrap();
        driver(&mut w, &quiet(200), None).unwrap();
        positions.push(w.position().clone());
    }
    assert_relative_eq!(positions[0], positions[1], epsilon = 1e-7);
}

#[test]
fn rosenbrock_with_analytic_and_finite_difference_fvv() {
    for analytic in [true, false] {
        let mut w =
            MultilargeNlinearWorkspace::alloc(params(ScalingMethod::More, true), 2, 2).unwrap();
        w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock(analytic))
            .unwrap();
        let report = driver(&mut w, &quiet(500), None).unwrap();
        assert!(report.converged());
        assert_relative_eq!(w.position().clone(), DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-6);

        let fdf = w.fdf().unwrap();
        if analytic {
            assert!(fdf.nevalfvv > 0);
        } else {
            assert_eq!(fdf.nevalfvv, 0);
            assert!(fdf.nevaldfu > 0);
        }
        assert!(w.avratio() <= w.parameters().avmax);
    }
}

#[test]
fn without_acceleration_avratio_stays_zero() {
    let mut w =
        MultilargeNlinearWorkspace::alloc(params(ScalingMethod::Marquardt, false), 2, 2).unwrap();
    w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock(true))
        .unwrap();
    let mut seen = 0usize;
    let mut monitor = |_iter: usize, w: &MultilargeNlinearWorkspace<_>| {
        assert_eq!(w.avratio(), 0.0);
        seen += 1;
    };
    let report = driver(&mut w, &quiet(500), Some(&mut monitor)).unwrap();
    assert!(report.converged());
    assert_eq!(seen, report.niter);
    // fvv is never needed
    assert_eq!(w.fdf().unwrap().nevalfvv, 0);
}

#[test]
fn scalar_parameter() {
    for scale in ALL_SCALINGS {
        for accel in [false, true] {
            let mut w = MultilargeNlinearWorkspace::alloc(params(scale, accel), 1, 1).unwrap();
            w.init(&DVector::from_element(1, 1.0), sqrt2()).unwrap();
            let report = driver(&mut w, &quiet(100), None).unwrap();
            assert!(report.converged());
            assert_relative_eq!(w.position()[0], 2f64.sqrt(), epsilon = 1e-8);
            let rcond = w.rcond().unwrap();
            assert_relative_eq!(rcond, 1.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn allocation_rejects_empty_problems() {
    let p0 = MultilargeNlinearWorkspace::<ClosureProblem>::alloc(Default::default(), 3, 0);
    assert!(matches!(p0, Err(MultilargeError::InvalidConfig(_))));
    let n0 = MultilargeNlinearWorkspace::<ClosureProblem>::alloc(Default::default(), 0, 3);
    assert!(matches!(n0, Err(MultilargeError::InvalidConfig(_))));
    let bad = MultilargeNlinearWorkspace::<ClosureProblem>::alloc(
        MultilargeNlinearParameters {
            avmax: -1.0,
            ..Default::default()
        },
        3,
        3,
    );
    assert!(bad.is_err());
}

#[test]
fn state_machine() {
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 2, 2).unwrap();
    assert_eq!(w.name(), "lm");
    assert_eq!(w.status(), SolverStatus::Uninitialized);
    assert!(matches!(w.iterate(), Err(MultilargeError::InvalidState(_))));
    assert!(w.rcond().is_err());
    assert!(w.restart(&DVector::zeros(2)).is_err());

    // sizes must match the allocation
    let err = w.init(&DVector::zeros(3), rosenbrock(false)).unwrap_err();
    assert!(matches!(err, MultilargeError::DimensionMismatch { .. }));
    let err = w.init(&DVector::zeros(2), sqrt2()).unwrap_err();
    assert!(matches!(err, MultilargeError::DimensionMismatch { .. }));

    w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock(false))
        .unwrap();
    assert_eq!(w.status(), SolverStatus::Initialized);
    assert_eq!(w.niter(), 0);
    assert_eq!(w.step().norm(), 0.0);
    let r = w.rcond().unwrap();
    assert!((0.0..=1.0).contains(&r));

    w.iterate().unwrap();
    assert_eq!(w.status(), SolverStatus::Iterating);
    assert_eq!(w.niter(), 1);
    assert!(w.step().norm() > 0.0);

    // restart keeps the problem and the counters
    let nevalf = w.fdf().unwrap().nevalf;
    w.restart(&DVector::from_vec(vec![0.5, 0.5])).unwrap();
    assert_eq!(w.status(), SolverStatus::Initialized);
    assert_eq!(w.niter(), 0);
    assert_eq!(w.nu(), 2);
    assert_eq!(w.fdf().unwrap().nevalf, nevalf + 1);
    assert_eq!(w.position()[0], 0.5);

    let problem = w.free();
    assert!(problem.is_some());
}

#[test]
fn no_progress_stops_the_driver_and_keeps_the_point() {
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 2, 2).unwrap();
    let x0 = DVector::from_vec(vec![0.3, -0.4]);
    w.init(&x0, flat()).unwrap();
    let jtj0 = w.jtj().clone();
    let g0 = w.gradient().clone();
    let f0 = w.residual().clone();

    let err = driver(&mut w, &quiet(10), None).unwrap_err();
    assert_eq!(err, MultilargeError::NoProgress);
    assert_eq!(w.status(), SolverStatus::NoProgress);
    assert_eq!(*w.position(), x0);
    assert_eq!(*w.residual(), f0);
    assert_eq!(*w.gradient(), g0);
    assert_eq!(*w.jtj(), jtj0);
    assert_eq!(w.niter(), 0);
    assert_eq!(w.fdf().unwrap().nevalf, 1 + 15);

    // terminal until restarted
    assert!(matches!(w.iterate(), Err(MultilargeError::InvalidState(_))));
    w.restart(&x0).unwrap();
    assert_eq!(w.status(), SolverStatus::Initialized);
}

#[test]
fn evaluator_errors_are_fatal() {
    // f = ln(x) + 2 is only defined for x >= 1 here; the first LM step from
    // x = 1.5 lands near x = -2.1
    let problem = ClosureProblem::new(
        1,
        1,
        |x, f| {
            if x[0] < 1.0 {
                return Err(MultilargeError::Evaluation("x below 1".to_string()));
            }
            f[0] = x[0].ln() + 2.0;
            Ok(())
        },
        |x, y, jty, jtj| {
            jty[0] = y[0] / x[0];
            if let Some(jtj) = jtj {
                jtj[(0, 0)] = 1.0 / (x[0] * x[0]);
            }
            Ok(())
        },
    );
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 1, 1).unwrap();
    w.init(&DVector::from_element(1, 1.5), problem).unwrap();
    let err = driver(&mut w, &quiet(10), None).unwrap_err();
    assert_eq!(err, MultilargeError::Evaluation("x below 1".to_string()));
    assert_eq!(w.status(), SolverStatus::EvaluatorError);
    assert_eq!(w.position()[0], 1.5);
    assert!(matches!(w.iterate(), Err(MultilargeError::InvalidState(_))));
}

#[test]
fn evaluator_error_at_init() {
    let problem = ClosureProblem::new(
        1,
        1,
        |_x, _f| Err(MultilargeError::Evaluation("no data".to_string())),
        |_x, _y, _jty, _jtj| Ok(()),
    );
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 1, 1).unwrap();
    let err = w.init(&DVector::zeros(1), problem).unwrap_err();
    assert_eq!(err, MultilargeError::Evaluation("no data".to_string()));
    assert_eq!(w.status(), SolverStatus::EvaluatorError);
    assert!(w.iterate().is_err());
}

#[test]
fn iteration_budget_is_reported() {
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 2, 2).unwrap();
    w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock(false))
        .unwrap();
    let report = driver(&mut w, &quiet(2), None).unwrap();
    assert_eq!(report.outcome, DriverOutcome::MaxIterations);
    assert_eq!(report.niter, 2);
    assert_eq!(report.info, ConvergenceInfo::NoConvergence);
    assert!(!report.converged());
}

#[test]
fn history_is_saved_as_csv() {
    let mut w = MultilargeNlinearWorkspace::alloc(MultilargeNlinearParameters::default(), 40, 3).unwrap();
    w.init(&DVector::from_vec(vec![1.0, 1.0, 0.0]), ExpFit::new(40, 10))
        .unwrap();
    let mut history = SolveHistory::new();
    let mut record = |iter: usize, w: &MultilargeNlinearWorkspace<ExpFit>| history.record(iter, w);
    let report = driver(&mut w, &quiet(200), Some(&mut record)).unwrap();
    assert_eq!(history.len(), report.niter);
    assert_eq!(history.positions_matrix().shape(), (report.niter, 3));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.csv");
    history.save_to_csv(&path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines = content.lines();
    assert_eq!(lines.next(), Some("iter,fnorm,mu,avratio,x0,x1,x2"));
    assert_eq!(lines.count(), report.niter);
}

#[test]
fn task_file_drives_the_solve() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("task.toml");
    std::fs::write(
        &path,
        "[solver]\nscale = \"levenberg\"\naccel = true\n\n[driver]\nmaxiter = 300\ngtol = 1e-10\nloglevel = \"none\"\n",
    )
    .unwrap();
    let task = SolverTask::from_toml_file(&path).unwrap();
    assert_eq!(task.parameters.scale, ScalingMethod::Levenberg);

    let mut w = MultilargeNlinearWorkspace::alloc(task.parameters.clone(), 2, 2).unwrap();
    w.init(&DVector::from_vec(vec![-1.2, 1.0]), rosenbrock(true))
        .unwrap();
    let report = solve(&mut w, &task.driver, None).unwrap();
    assert!(report.converged());
    assert_eq!(w.scale(), ScalingMethod::Levenberg);
}
