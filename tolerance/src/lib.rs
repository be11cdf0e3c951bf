use serde::{Deserialize, Serialize};

/// Absolute and relative tolerances for iterative loops.
///
/// A quantity is considered converged when its magnitude drops below
/// `abs_tol + rel_tol * scale`, where `scale` is the magnitude of the value
/// being refined.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs_tol: 1e-10,
            rel_tol: 1e-10,
        }
    }
}

impl Tolerances {
    pub fn new(rel_tol: f64, abs_tol: f64) -> Self {
        Self { rel_tol, abs_tol }
    }

    pub fn with_abs_tol(mut self, abs_tol: f64) -> Self {
        self.abs_tol = abs_tol;
        self
    }

    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    /// True if `norm` is within tolerance of a value with magnitude `scale`.
    pub fn check(&self, norm: f64, scale: f64) -> bool {
        check_error(norm, scale, self.rel_tol, self.abs_tol)
    }

    /// True if `norm` is within the absolute tolerance alone.
    pub fn check_abs(&self, norm: f64) -> bool {
        norm <= self.abs_tol
    }
}

pub fn check_error(norm: f64, scale: f64, rel_tol: f64, abs_tol: f64) -> bool {
    // NaN never converges
    norm <= abs_tol + rel_tol * scale.abs()
}
