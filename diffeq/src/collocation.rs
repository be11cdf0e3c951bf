//! Collocation nodes and the order conditions that turn them into a tableau.
//!
//! Nodes come from the roots of Legendre polynomials mapped from [-1, 1] to
//! (0, 1]. Given nodes `c`, the coupling matrix `a` and weights `b` follow
//! from requiring exact integration of polynomials up to degree `s - 1`:
//!
//! ```text
//! sum_j b_j   c_j^k = 1 / (k + 1)
//! sum_j a_ij  c_j^k = c_i^(k + 1) / (k + 1)      k = 0..s-1
//! ```
//!
//! Both systems share the Vandermonde matrix `V[k][j] = c_j^k`.

use legendre::{LegendreErrors, gauss_legendre, gauss_radau};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::tableau::TabulatedTableau;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollocationErrors {
    #[error("order conditions for {stages} stages are singular or ill-conditioned")]
    IllConditionedTableau { stages: usize },
    #[error("a tableau needs at least one stage")]
    ZeroStages,
    #[error("invalid tableau: {0}")]
    InvalidTableau(String),
    #[error(transparent)]
    Nodes(#[from] LegendreErrors),
}

/// Node family for collocation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collocation {
    /// Roots of P_s; order 2s, A-stable.
    GaussLegendre,
    /// Roots of P_s + P_{s-1} including the endpoint, which maps to c = 1
    /// (Radau IIA); order 2s - 1, L-stable.
    GaussRadau,
}

/// Nodes `c` in ascending order on (0, 1] and the matching quadrature
/// weights. Gauss-Legendre with two or three stages uses tabulated values.
pub fn compute_nodes_and_weights(
    family: Collocation,
    stages: usize,
) -> Result<(DVector<f64>, DVector<f64>), CollocationErrors> {
    match (family, stages) {
        (_, 0) => Err(CollocationErrors::ZeroStages),
        (Collocation::GaussLegendre, 2) => Ok(tabulated(&TabulatedTableau::GAUSS_LEGENDRE_2)),
        (Collocation::GaussLegendre, 3) => Ok(tabulated(&TabulatedTableau::GAUSS_LEGENDRE_3)),
        _ => collocation_nodes(family, stages),
    }
}

/// Root-finding path of [`compute_nodes_and_weights`] with no tabulated shortcut.
pub fn collocation_nodes(
    family: Collocation,
    stages: usize,
) -> Result<(DVector<f64>, DVector<f64>), CollocationErrors> {
    if stages == 0 {
        return Err(CollocationErrors::ZeroStages);
    }
    match family {
        Collocation::GaussLegendre => {
            let rule = gauss_legendre(stages)?;
            let c = DVector::from_iterator(stages, rule.nodes.iter().map(|x| 0.5 * (1.0 + x)));
            let w = DVector::from_iterator(stages, rule.weights.iter().map(|w| 0.5 * w));
            Ok((c, w))
        }
        Collocation::GaussRadau => {
            // x = -1 is anchored; c = (1 - x) / 2 reverses the order
            let rule = gauss_radau(stages)?;
            let c = DVector::from_iterator(stages, rule.nodes.iter().rev().map(|x| 0.5 * (1.0 - x)));
            let w = DVector::from_iterator(stages, rule.weights.iter().rev().map(|w| 0.5 * w));
            Ok((c, w))
        }
    }
}

/// Solves the order conditions for `a` and `b` given distinct nodes `c`.
pub fn compute_a_b_from_c(
    c: &DVector<f64>,
) -> Result<(DMatrix<f64>, DVector<f64>), CollocationErrors> {
    let s = c.len();
    if s == 0 {
        return Err(CollocationErrors::ZeroStages);
    }
    for i in 0..s {
        for j in 0..i {
            if !((c[i] - c[j]).abs() > 1e-12) {
                return Err(CollocationErrors::IllConditionedTableau { stages: s });
            }
        }
    }

    let vandermonde = DMatrix::from_fn(s, s, |k, j| c[j].powi(k as i32));
    let lu = vandermonde.lu();

    let mut b = DVector::from_fn(s, |k, _| 1.0 / (k as f64 + 1.0));
    // column i holds the right hand side for row i of a
    let mut a_transpose = DMatrix::from_fn(s, s, |k, i| c[i].powi(k as i32 + 1) / (k as f64 + 1.0));

    if !lu.solve_mut(&mut b) || !lu.solve_mut(&mut a_transpose) {
        return Err(CollocationErrors::IllConditionedTableau { stages: s });
    }
    if b.iter().chain(a_transpose.iter()).any(|v| !v.is_finite()) {
        return Err(CollocationErrors::IllConditionedTableau { stages: s });
    }

    Ok((a_transpose.transpose(), b))
}

fn tabulated<const STAGES: usize>(table: &TabulatedTableau<STAGES>) -> (DVector<f64>, DVector<f64>) {
    (
        DVector::from_column_slice(&table.c),
        DVector::from_column_slice(&table.b),
    )
}
