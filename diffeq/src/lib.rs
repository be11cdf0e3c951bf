use std::error::Error;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use nalgebra::DVector;
use nonlinear::{Function, NewtonSettings, NonlinearErrors, check_square};
use thiserror::Error;

/// Quadrature nodes and the order conditions that produce collocation tableaus.
pub mod collocation;
/// Explicit, improved and implicit Euler plus Crank-Nicolson.
pub mod euler;
/// Explicit and implicit Runge-Kutta steppers for general tableaus.
pub mod rk;
/// In-memory and csv result storage.
pub mod saving;
/// Stepper selection by name.
pub mod solvers;
/// The stepper trait and fixed step control.
pub mod stepping;
/// Butcher tableaus, tabulated and constructed.
pub mod tableau;

/// Small reference systems shared by the unit tests and the benchmark.
#[cfg(any(test, feature = "test-models"))]
pub mod test_models;

pub use collocation::{Collocation, CollocationErrors};
pub use saving::{MemoryResult, ResultStorage, SaveMethod};
pub use solvers::StepperMethods;
pub use stepping::{FixedStepControl, TimeStepper};
pub use tableau::{ButcherTableau, TabulatedTableau};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepperErrors {
    #[error(transparent)]
    Nonlinear(#[from] NonlinearErrors),
    #[error("{0}")]
    Collocation(#[from] CollocationErrors),
    #[error("step size must be finite and non-negative, got {0}")]
    InvalidStepSize(f64),
    #[error("unknown stepper '{0}'")]
    UnknownStepper(String),
}

/// An autonomous system `y' = f(y)` together with the stepper used to
/// integrate it on an equidistant grid.
#[derive(Debug)]
pub struct OdeProblem {
    rhs: Function,
    method: StepperMethods,
    newton: NewtonSettings,
    progress: bool,
}

/// Final state of a solve and whatever trajectory was saved on the way.
#[derive(Debug)]
pub struct OdeSolution {
    pub y: DVector<f64>,
    pub result: ResultStorage,
}

impl OdeProblem {
    pub fn new(rhs: Function, method: StepperMethods) -> Result<Self, StepperErrors> {
        check_square(&rhs, "ode problem")?;
        Ok(Self {
            rhs,
            method,
            newton: NewtonSettings::default(),
            progress: false,
        })
    }

    pub fn with_newton_settings(mut self, newton: NewtonSettings) -> Self {
        self.newton = newton;
        self
    }

    /// Shows an `indicatif` bar on stderr while stepping.
    pub fn with_progress_bar(mut self) -> Self {
        self.progress = true;
        self
    }

    /// Takes `steps` equal steps from `t = 0` to `t_end`, recording the
    /// initial state and the state after every step.
    pub fn solve_fixed(
        &self,
        y0: &DVector<f64>,
        t_end: f64,
        steps: usize,
        save_method: &SaveMethod,
    ) -> Result<OdeSolution, Box<dyn Error>> {
        let control = FixedStepControl::from_horizon(t_end, steps)?;
        let mut stepper = self.method.build(&self.rhs, self.newton)?;
        let mut result = ResultStorage::new(save_method, y0.len(), steps + 1)?;
        info!(
            "solving with {} over [0, {t_end}] in {steps} steps of {}",
            self.method, control.dt
        );

        let progress = if self.progress {
            let bar = ProgressBar::new(steps as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                    .progress_chars("#>-"),
            );
            Some(bar)
        } else {
            None
        };

        let mut y = y0.clone();
        result.save(0.0, &y)?;
        for i in 0..control.steps {
            stepper.do_step(control.dt, &mut y)?;
            result.save(control.time(i + 1), &y)?;
            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }
        if let Some(bar) = progress {
            bar.finish();
        }

        result.truncate()?;
        debug!("final state {:?}", y.as_slice());
        Ok(OdeSolution { y, result })
    }
}
