//! Tunable parameters of the LM solver and loading them from a TOML task file
//!
//! ```toml
//! [solver]
//! scale = "more"        # levenberg | marquardt | more
//! accel = true
//! avmax = 0.75
//! h_fvv = 0.1
//!
//! [driver]
//! maxiter = 200
//! xtol = 1e-8
//! gtol = 1e-8
//! ftol = 0.0
//! loglevel = "info"     # debug | info | warn | error | off | none
//! ```
use super::driver::DriverConfig;
use super::scaling::ScalingMethod;
use crate::numerical::multilarge_errors::{MultilargeError, Result};
use std::path::Path;
use std::str::FromStr;
use toml::{Table, Value};

/// Tunable parameters, fixed for the lifetime of a workspace
#[derive(Debug, Clone, PartialEq)]
pub struct MultilargeNlinearParameters {
    pub scale: ScalingMethod,
    /// use geodesic acceleration
    pub accel: bool,
    /// maximum allowed |a| / |v|
    pub avmax: f64,
    /// step size for the finite difference fvv
    pub h_fvv: f64,
}

impl Default for MultilargeNlinearParameters {
    fn default() -> Self {
        Self {
            scale: ScalingMethod::More,
            accel: false,
            avmax: 0.75,
            h_fvv: 0.1,
        }
    }
}

impl MultilargeNlinearParameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.avmax > 0.0) || !self.avmax.is_finite() {
            return Err(MultilargeError::InvalidConfig(format!(
                "avmax must be a positive number, got {}",
                self.avmax
            )));
        }
        if !(self.h_fvv > 0.0) || !self.h_fvv.is_finite() {
            return Err(MultilargeError::InvalidConfig(format!(
                "h_fvv must be a positive number, got {}",
                self.h_fvv
            )));
        }
        Ok(())
    }
}

/// Solver parameters and driver settings read from one task file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolverTask {
    pub parameters: MultilargeNlinearParameters,
    pub driver: DriverConfig,
}

impl SolverTask {
    pub fn from_toml_file<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Missing tables or keys keep their default values; keys of the wrong
    /// type and unknown keys are reported as configuration errors.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let doc = content
            .parse::<Table>()
            .map_err(|e| MultilargeError::InvalidConfig(e.to_string()))?;
        let mut task = SolverTask::default();

        for (section, body) in doc.iter() {
            let table = body.as_table().ok_or_else(|| {
                MultilargeError::InvalidConfig(format!("[{}] must be a table", section))
            })?;
            match section.as_str() {
                "solver" => parse_solver(table, &mut task.parameters)?,
                "driver" => parse_driver(table, &mut task.driver)?,
                other => {
                    return Err(MultilargeError::InvalidConfig(format!(
                        "unknown section [{}]",
                        other
                    )));
                }
            }
        }
        task.parameters.validate()?;
        task.driver.validate()?;
        Ok(task)
    }
}

fn parse_solver(table: &Table, params: &mut MultilargeNlinearParameters) -> Result<()> {
    for (key, value) in table.iter() {
        match key.as_str() {
            "scale" => {
                let name = as_str(key, value)?;
                params.scale = ScalingMethod::from_str(name).map_err(|_| {
                    MultilargeError::InvalidConfig(format!("unknown scaling method '{}'", name))
                })?;
            }
            "accel" => params.accel = as_bool(key, value)?,
            "avmax" => params.avmax = as_float(key, value)?,
            "h_fvv" => params.h_fvv = as_float(key, value)?,
            other => {
                return Err(MultilargeError::InvalidConfig(format!(
                    "unknown key '{}' in [solver]",
                    other
                )));
            }
        }
    }
    Ok(())
}

fn parse_driver(table: &Table, driver: &mut DriverConfig) -> Result<()> {
    for (key, value) in table.iter() {
        match key.as_str() {
            "maxiter" => {
                let maxiter = value.as_integer().filter(|m| *m >= 0).ok_or_else(|| {
                    MultilargeError::InvalidConfig(format!(
                        "'{}' must be a non-negative integer",
                        key
                    ))
                })?;
                driver.maxiter = maxiter as usize;
            }
            "xtol" => driver.xtol = as_float(key, value)?,
            "gtol" => driver.gtol = as_float(key, value)?,
            "ftol" => driver.ftol = as_float(key, value)?,
            "loglevel" => driver.loglevel = Some(as_str(key, value)?.to_string()),
            other => {
                return Err(MultilargeError::InvalidConfig(format!(
                    "unknown key '{}' in [driver]",
                    other
                )));
            }
        }
    }
    Ok(())
}

fn as_str<'v>(key: &str, value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| MultilargeError::InvalidConfig(format!("'{}' must be a string", key)))
}

fn as_bool(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| MultilargeError::InvalidConfig(format!("'{}' must be a boolean", key)))
}

// integers are accepted where a float is expected ("ftol = 0")
fn as_float(key: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Float(x) => Ok(*x),
        Value::Integer(i) => Ok(*i as f64),
        _ => Err(MultilargeError::InvalidConfig(format!(
            "'{}' must be a number",
            key
        ))),
    }
}
