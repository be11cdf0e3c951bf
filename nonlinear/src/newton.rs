use std::mem;

use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tolerance::Tolerances;

use crate::{NonlinearErrors, NonlinearFunction};

/// Stopping rules for [`NewtonSolver`].
///
/// The iteration stops successfully when the residual norm is within
/// `tolerances.abs_tol`, or when the Newton update satisfies
/// `tolerances.check(|dy|, |y|)`. Reaching `max_iterations` first is a
/// `ConvergenceFailure`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub tolerances: Tolerances,
    pub max_iterations: usize,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            tolerances: Tolerances::default(),
            max_iterations: 20,
        }
    }
}

impl NewtonSettings {
    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Undamped Newton iteration for square systems `F(y) = 0`.
///
/// Residual, Jacobian and update buffers are kept between calls so a stepper
/// that owns a solver does not allocate them every step.
#[derive(Debug)]
pub struct NewtonSolver {
    settings: NewtonSettings,
    residual: DVector<f64>,
    jacobian: DMatrix<f64>,
    delta: DVector<f64>,
    iterations: usize,
}

impl NewtonSolver {
    pub fn new(n: usize) -> Self {
        Self {
            settings: NewtonSettings::default(),
            residual: DVector::zeros(n),
            jacobian: DMatrix::zeros(n, n),
            delta: DVector::zeros(n),
            iterations: 0,
        }
    }

    pub fn with_settings(mut self, settings: NewtonSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn set_settings(&mut self, settings: NewtonSettings) {
        self.settings = settings;
    }

    /// Number of Jacobian solves performed by the last successful `solve`.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Refines `y` in place until `equation(y) = 0`.
    pub fn solve<F: NonlinearFunction + ?Sized>(
        &mut self,
        equation: &F,
        y: &mut DVector<f64>,
    ) -> Result<(), NonlinearErrors> {
        let n = y.len();
        if equation.dim_x() != n {
            return Err(NonlinearErrors::DimensionMismatch {
                operation: "newton",
                expected: equation.dim_x(),
                found: n,
            });
        }
        if equation.dim_f() != n {
            return Err(NonlinearErrors::DimensionMismatch {
                operation: "newton",
                expected: n,
                found: equation.dim_f(),
            });
        }
        if self.residual.len() != n {
            self.residual = DVector::zeros(n);
            self.jacobian = DMatrix::zeros(n, n);
            self.delta = DVector::zeros(n);
        }

        let tolerances = self.settings.tolerances;
        let mut residual_norm = f64::INFINITY;
        for iteration in 0..self.settings.max_iterations {
            equation.evaluate(y, &mut self.residual);
            residual_norm = self.residual.norm();
            trace!("newton iteration {iteration}: |F| = {residual_norm:e}");
            if tolerances.check_abs(residual_norm) {
                self.iterations = iteration;
                debug!("newton converged on residual after {iteration} iterations");
                return Ok(());
            }

            equation.evaluate_deriv(y, &mut self.jacobian);
            let jacobian_norm = self.jacobian.norm();
            self.delta.copy_from(&self.residual);
            self.delta.neg_mut();
            // factor in the jacobian buffer and take the storage back afterwards
            let lu = mem::replace(&mut self.jacobian, DMatrix::zeros(0, 0)).lu();
            let solved = lu.solve_mut(&mut self.delta);
            self.jacobian = lu.l_unpack();
            if !solved || !self.is_resolvable(jacobian_norm, residual_norm) {
                warn!("singular jacobian at newton iteration {iteration}");
                return Err(NonlinearErrors::SingularJacobian { iteration });
            }

            *y += &self.delta;
            let step_norm = self.delta.norm();
            if tolerances.check(step_norm, y.norm()) {
                self.iterations = iteration + 1;
                debug!(
                    "newton converged after {} iterations, |dy| = {step_norm:e}",
                    self.iterations
                );
                return Ok(());
            }
        }

        if self.settings.max_iterations > 0 {
            equation.evaluate(y, &mut self.residual);
            residual_norm = self.residual.norm();
        }
        warn!(
            "newton did not converge in {} iterations, |F| = {residual_norm:e}",
            self.settings.max_iterations
        );
        Err(NonlinearErrors::ConvergenceFailure {
            iterations: self.settings.max_iterations,
            residual: residual_norm,
        })
    }
}

impl NewtonSolver {
    /// False when the update is not finite or `|J| |dy| / |F|` exceeds what
    /// double precision can resolve, i.e. the jacobian is numerically singular.
    fn is_resolvable(&self, jacobian_norm: f64, residual_norm: f64) -> bool {
        if self.delta.iter().any(|d| !d.is_finite()) {
            return false;
        }
        jacobian_norm * self.delta.norm() <= residual_norm / f64::EPSILON
    }
}

/// One-off solve with default buffers; steppers keep a [`NewtonSolver`] instead.
pub fn newton_solve<F: NonlinearFunction + ?Sized>(
    equation: &F,
    y: &mut DVector<f64>,
    settings: NewtonSettings,
) -> Result<(), NonlinearErrors> {
    NewtonSolver::new(y.len())
        .with_settings(settings)
        .solve(equation, y)
}
