use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::collocation::{Collocation, CollocationErrors, compute_a_b_from_c, compute_nodes_and_weights};

/// Runge-Kutta coefficients `(a, b, c)` for any number of stages.
///
/// Built once per stepper and never modified afterwards. The only ways to get
/// one are [`ButcherTableau::new`] and the collocation constructors, so the
/// shapes always agree.
#[derive(Debug, Clone, PartialEq)]
pub struct ButcherTableau {
    a: DMatrix<f64>,
    b: DVector<f64>,
    c: DVector<f64>,
}

impl ButcherTableau {
    /// Validates shapes and the row-sum condition `sum_j a_ij = c_i`.
    pub fn new(a: DMatrix<f64>, b: DVector<f64>, c: DVector<f64>) -> Result<Self, CollocationErrors> {
        let s = c.len();
        if s == 0 {
            return Err(CollocationErrors::ZeroStages);
        }
        if a.nrows() != s || a.ncols() != s || b.len() != s {
            return Err(CollocationErrors::InvalidTableau(format!(
                "expected a {s}x{s}, b of length {s}; got a {}x{}, b of length {}",
                a.nrows(),
                a.ncols(),
                b.len()
            )));
        }
        for i in 0..s {
            let row_sum: f64 = a.row(i).sum();
            if (row_sum - c[i]).abs() > 1e-10 * (1.0 + c[i].abs()) {
                return Err(CollocationErrors::InvalidTableau(format!(
                    "row {i} of a sums to {row_sum}, but c[{i}] = {}",
                    c[i]
                )));
            }
        }
        Ok(Self { a, b, c })
    }

    pub fn stages(&self) -> usize {
        self.c.len()
    }

    pub fn a(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn b(&self) -> &DVector<f64> {
        &self.b
    }

    pub fn c(&self) -> &DVector<f64> {
        &self.c
    }

    pub fn into_parts(self) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
        (self.a, self.b, self.c)
    }

    /// True if `a` is strictly lower triangular.
    pub fn is_explicit(&self) -> bool {
        let s = self.stages();
        (0..s).all(|i| (i..s).all(|j| self.a[(i, j)] == 0.0))
    }

    /// Collocation tableau of the given family. Gauss-Legendre with two or
    /// three stages is read from the tabulated constants.
    pub fn collocation(family: Collocation, stages: usize) -> Result<Self, CollocationErrors> {
        match (family, stages) {
            (Collocation::GaussLegendre, 2) => Ok(Self::from(&TabulatedTableau::GAUSS_LEGENDRE_2)),
            (Collocation::GaussLegendre, 3) => Ok(Self::from(&TabulatedTableau::GAUSS_LEGENDRE_3)),
            _ => Self::from_nodes(family, stages),
        }
    }

    pub fn gauss_legendre(stages: usize) -> Result<Self, CollocationErrors> {
        Self::collocation(Collocation::GaussLegendre, stages)
    }

    pub fn gauss_radau(stages: usize) -> Result<Self, CollocationErrors> {
        Self::collocation(Collocation::GaussRadau, stages)
    }

    /// Always runs the node search and the order-condition solve.
    pub fn from_nodes(family: Collocation, stages: usize) -> Result<Self, CollocationErrors> {
        let (c, _weights) = compute_nodes_and_weights(family, stages)?;
        let (a, b) = compute_a_b_from_c(&c)?;
        debug!("built {family:?} tableau with {stages} stages, c = {:?}", c.as_slice());
        Self::new(a, b, c)
    }
}

/// Fixed-size coefficient tables for methods used often enough to hard-code.
pub struct TabulatedTableau<const STAGES: usize> {
    pub a: [[f64; STAGES]; STAGES],
    pub b: [f64; STAGES],
    pub c: [f64; STAGES],
}

impl TabulatedTableau<2> {
    // c = 1/2 -+ sqrt(3)/6
    pub const GAUSS_LEGENDRE_2: Self = Self {
        a: [
            [1. / 4., 1. / 4. - 0.28867513459481287],
            [1. / 4. + 0.28867513459481287, 1. / 4.],
        ],
        b: [1. / 2., 1. / 2.],
        c: [1. / 2. - 0.28867513459481287, 1. / 2. + 0.28867513459481287],
    };

    pub const RADAU_IIA_2: Self = Self {
        a: [[5. / 12., -1. / 12.], [3. / 4., 1. / 4.]],
        b: [3. / 4., 1. / 4.],
        c: [1. / 3., 1.],
    };
}

impl TabulatedTableau<3> {
    // sqrt(15) = 3.872983346207417
    pub const GAUSS_LEGENDRE_3: Self = Self {
        a: [
            [5. / 36., 2. / 9. - 3.872983346207417 / 15., 5. / 36. - 3.872983346207417 / 30.],
            [5. / 36. + 3.872983346207417 / 24., 2. / 9., 5. / 36. - 3.872983346207417 / 24.],
            [5. / 36. + 3.872983346207417 / 30., 2. / 9. + 3.872983346207417 / 15., 5. / 36.],
        ],
        b: [5. / 18., 4. / 9., 5. / 18.],
        c: [
            1. / 2. - 3.872983346207417 / 10.,
            1. / 2.,
            1. / 2. + 3.872983346207417 / 10.,
        ],
    };
}

impl TabulatedTableau<4> {
    // usage is TabulatedTableau::<4>::RK4
    pub const RK4: Self = Self {
        a: [
            [0., 0., 0., 0.],
            [1. / 2., 0., 0., 0.],
            [0., 1. / 2., 0., 0.],
            [0., 0., 1., 0.],
        ],
        b: [1. / 6., 1. / 3., 1. / 3., 1. / 6.],
        c: [0., 1.0 / 2.0, 1.0 / 2.0, 1.0],
    };
}

impl<const STAGES: usize> From<&TabulatedTableau<STAGES>> for ButcherTableau {
    fn from(table: &TabulatedTableau<STAGES>) -> Self {
        Self {
            a: DMatrix::from_fn(STAGES, STAGES, |i, j| table.a[i][j]),
            b: DVector::from_column_slice(&table.b),
            c: DVector::from_column_slice(&table.c),
        }
    }
}
