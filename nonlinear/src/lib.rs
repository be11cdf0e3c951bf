use std::fmt::Debug;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Function algebra: primitives, sums and compositions with exact Jacobians.
pub mod function;
/// Newton iteration for square systems built from the algebra.
pub mod newton;

pub use function::{Constant, Function, Parameter};
pub use newton::{NewtonSettings, NewtonSolver};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NonlinearErrors {
    #[error("dimension mismatch in {operation}: expected {expected}, found {found}")]
    DimensionMismatch {
        operation: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("newton did not converge in {iterations} iterations (residual norm {residual:e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },
    #[error("singular jacobian at newton iteration {iteration}")]
    SingularJacobian { iteration: usize },
}

/// A vector valued function F: R^dim_x -> R^dim_f with an exact Jacobian.
///
/// Implementors write into caller provided storage so that repeated
/// evaluation does not allocate. `evaluate_deriv` must produce the true
/// `dim_f x dim_x` Jacobian; Newton's convergence rate depends on it.
pub trait NonlinearFunction: Debug {
    fn dim_x(&self) -> usize;
    fn dim_f(&self) -> usize;
    /// Writes `f = F(x)`.
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>);
    /// Writes `df = dF/dx (x)`.
    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>);
}

/// Fails with `DimensionMismatch` unless `function` maps R^n to R^n.
pub fn check_square(
    function: &impl NonlinearFunction,
    operation: &'static str,
) -> Result<usize, NonlinearErrors> {
    let n = function.dim_x();
    if function.dim_f() != n {
        return Err(NonlinearErrors::DimensionMismatch {
            operation,
            expected: n,
            found: function.dim_f(),
        });
    }
    Ok(n)
}
