use std::fmt::Debug;

use nalgebra::DVector;
use nonlinear::NonlinearErrors;

use crate::StepperErrors;

/// One-step integrator for autonomous systems `y' = f(y)`.
///
/// A stepper is built once for a right hand side and then advances the
/// caller's state in place. Implicit steppers refresh the cells of their
/// residual at the start of every call and nothing else carries over between
/// calls.
pub trait TimeStepper: Debug {
    /// Advances `y` by one step of size `tau >= 0`.
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors>;
}

/// Rejects negative or non-finite steps and states of the wrong size.
pub(crate) fn validate_step(tau: f64, y: &DVector<f64>, dim: usize) -> Result<(), StepperErrors> {
    if !(tau >= 0.0 && tau.is_finite()) {
        return Err(StepperErrors::InvalidStepSize(tau));
    }
    if y.len() != dim {
        return Err(NonlinearErrors::DimensionMismatch {
            operation: "do_step",
            expected: dim,
            found: y.len(),
        }
        .into());
    }
    Ok(())
}

/// Equal steps of size `dt` covering `[0, t_end]`.
#[derive(Copy, Clone, Debug)]
pub struct FixedStepControl {
    /// Constant step size.
    pub dt: f64,
    /// Number of steps.
    pub steps: usize,
}

impl FixedStepControl {
    /// `steps` equal steps ending exactly at `t_end`.
    pub fn from_horizon(t_end: f64, steps: usize) -> Result<Self, StepperErrors> {
        if steps == 0 {
            return Err(StepperErrors::InvalidStepSize(f64::INFINITY));
        }
        let dt = t_end / steps as f64;
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(StepperErrors::InvalidStepSize(dt));
        }
        Ok(Self { dt, steps })
    }

    /// Time after `i` steps.
    pub fn time(&self, i: usize) -> f64 {
        i as f64 * self.dt
    }
}
