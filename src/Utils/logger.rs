use crate::numerical::multilarge_errors::{MultilargeError, Result};
use crate::numerical::multilarge_nlinear::fdf::NormalEquationsProblem;
use crate::numerical::multilarge_nlinear::workspace::MultilargeNlinearWorkspace;
use csv::Writer;
use nalgebra::{DMatrix, DVector};
use simplelog::{ColorChoice, CombinedLogger, Config, LevelFilter, TermLogger, TerminalMode};
use std::path::Path;

/// Map a loglevel string to a filter. `None` means logging is switched off
/// ("off" or "none"); a missing loglevel means "info".
pub fn parse_loglevel(loglevel: Option<&str>) -> Result<Option<LevelFilter>> {
    let Some(level) = loglevel else {
        return Ok(Some(LevelFilter::Info));
    };
    match level.to_lowercase().as_str() {
        "off" | "none" => Ok(None),
        "debug" => Ok(Some(LevelFilter::Debug)),
        "info" => Ok(Some(LevelFilter::Info)),
        "warn" => Ok(Some(LevelFilter::Warn)),
        "error" => Ok(Some(LevelFilter::Error)),
        other => Err(MultilargeError::InvalidConfig(format!(
            "loglevel must be debug, info, warn, error, off or none, got '{}'",
            other
        ))),
    }
}

/// Install the terminal logger. Returns false when logging is switched off
/// or a logger was already installed by an earlier call.
pub fn init_logger(loglevel: Option<&str>) -> Result<bool> {
    let Some(log_option) = parse_loglevel(loglevel)? else {
        return Ok(false);
    };
    let logger_instance = CombinedLogger::init(vec![TermLogger::new(
        log_option,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
    Ok(logger_instance.is_ok())
}

/// Per-iteration record of a nonlinear solve, saved as csv
#[derive(Debug, Clone, Default)]
pub struct SolveHistory {
    pub iterations: Vec<usize>,
    pub fnorm: Vec<f64>,
    pub mu: Vec<f64>,
    pub avratio: Vec<f64>,
    pub positions: Vec<DVector<f64>>,
}

impl SolveHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<P: NormalEquationsProblem>(
        &mut self,
        iter: usize,
        w: &MultilargeNlinearWorkspace<P>,
    ) {
        self.iterations.push(iter);
        self.fnorm.push(w.residual().norm());
        self.mu.push(w.mu());
        self.avratio.push(w.avratio());
        self.positions.push(w.position().clone());
    }

    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// rows = iterations, columns = x_0 .. x_{p-1}
    pub fn positions_matrix(&self) -> DMatrix<f64> {
        let p = self.positions.first().map_or(0, |x| x.len());
        DMatrix::from_fn(self.positions.len(), p, |i, j| self.positions[i][j])
    }

    /// columns: iter, fnorm, mu, avratio, x0, x1, ...
    pub fn save_to_csv<Q: AsRef<Path>>(&self, path: Q) -> Result<()> {
        let mut writer = Writer::from_path(path)?;
        let p = self.positions.first().map_or(0, |x| x.len());

        let mut headers = vec![
            "iter".to_string(),
            "fnorm".to_string(),
            "mu".to_string(),
            "avratio".to_string(),
        ];
        headers.extend((0..p).map(|j| format!("x{}", j)));
        writer.write_record(&headers)?;

        for (k, x) in self.positions.iter().enumerate() {
            let mut row = vec![
                self.iterations[k].to_string(),
                self.fnorm[k].to_string(),
                self.mu[k].to_string(),
                self.avratio[k].to_string(),
            ];
            row.extend(x.iter().map(|&val| val.to_string()));
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }
}
