use std::{error::Error, f64::consts::PI, fs, path::Path};

use nonlinear::NewtonSettings;
use serde::{Deserialize, Serialize};

/// Run parameters that can be kept in a `.ron` file.
///
/// ```ron
/// (
///     steps: 400,
///     t_end: 25.132741228718345,
///     newton: (
///         tolerances: (abs_tol: 1e-12, rel_tol: 1e-12),
///         max_iterations: 30,
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub steps: usize,
    pub t_end: f64,
    pub newton: NewtonSettings,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            t_end: 4.0 * PI,
            newton: NewtonSettings::default(),
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let contents = fs::read_to_string(path)?;
        Ok(ron::from_str(&contents)?)
    }

    /// Applies the command line scale factors. Both must be positive and the
    /// scaled step count must not round down to zero.
    pub fn scaled(&self, n_factor: f64, t_end_factor: f64) -> Result<Self, Box<dyn Error>> {
        if !(n_factor > 0.0 && t_end_factor > 0.0) {
            return Err("N_factor and T_end_factor must be positive".into());
        }
        let steps = (self.steps as f64 * n_factor) as usize;
        if steps == 0 {
            return Err("resulting number of steps must be positive".into());
        }
        Ok(Self {
            steps,
            t_end: self.t_end * t_end_factor,
            newton: self.newton,
        })
    }
}
