use std::f64::consts::PI;

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use nonlinear::{Function, NonlinearFunction};

/// Undamped mass on a linear spring, state `(x, v)`.
#[derive(Debug, Clone, Copy)]
pub struct MassSpring {
    pub mass: f64,
    pub stiffness: f64,
}

impl NonlinearFunction for MassSpring {
    fn dim_x(&self) -> usize {
        2
    }
    fn dim_f(&self) -> usize {
        2
    }
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        f[0] = x[1];
        f[1] = -self.stiffness / self.mass * x[0];
    }
    fn evaluate_deriv(&self, _x: &DVector<f64>, df: &mut DMatrix<f64>) {
        df.fill(0.0);
        df[(0, 1)] = 1.0;
        df[(1, 0)] = -self.stiffness / self.mass;
    }
}

/// Mathematical pendulum, state `(theta, omega)`.
#[derive(Debug, Clone, Copy)]
pub struct Pendulum {
    pub length: f64,
    pub gravity: f64,
}

impl Pendulum {
    pub fn new(length: f64) -> Self {
        Self {
            length,
            gravity: 9.81,
        }
    }
}

impl NonlinearFunction for Pendulum {
    fn dim_x(&self) -> usize {
        2
    }
    fn dim_f(&self) -> usize {
        2
    }
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        f[0] = x[1];
        f[1] = -self.gravity / self.length * x[0].sin();
    }
    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
        df.fill(0.0);
        df[(0, 1)] = 1.0;
        df[(1, 0)] = -self.gravity / self.length * x[0].cos();
    }
}

/// RC circuit driven by `U_0(t) = cos(100 pi t)`, state `(U_C, t)`.
///
/// Time is carried as a state with `t' = 1` so the system is autonomous.
#[derive(Debug, Clone, Copy)]
pub struct ElectricNetwork {
    pub resistance: f64,
    pub capacitance: f64,
}

impl Default for ElectricNetwork {
    fn default() -> Self {
        Self {
            resistance: 1.0,
            capacitance: 1.0,
        }
    }
}

impl ElectricNetwork {
    const FREQUENCY: f64 = 100.0 * PI;
}

impl NonlinearFunction for ElectricNetwork {
    fn dim_x(&self) -> usize {
        2
    }
    fn dim_f(&self) -> usize {
        2
    }
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        let rc = self.resistance * self.capacitance;
        f[0] = ((Self::FREQUENCY * x[1]).cos() - x[0]) / rc;
        f[1] = 1.0;
    }
    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
        let rc = self.resistance * self.capacitance;
        df.fill(0.0);
        df[(0, 0)] = -1.0 / rc;
        df[(0, 1)] = -Self::FREQUENCY * (Self::FREQUENCY * x[1]).sin() / rc;
    }
}

/// Demo systems selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Models {
    #[value(name = "mass_spring")]
    MassSpring,
    #[value(name = "pendulum")]
    Pendulum,
    #[value(name = "electric_network")]
    ElectricNetwork,
}

impl Models {
    pub fn name(&self) -> &'static str {
        match self {
            Models::MassSpring => "mass_spring",
            Models::Pendulum => "pendulum",
            Models::ElectricNetwork => "electric_network",
        }
    }

    /// Right hand side and initial state with unit parameters.
    pub fn build(&self) -> (Function, DVector<f64>) {
        match self {
            Models::MassSpring => (
                Function::leaf(MassSpring {
                    mass: 1.0,
                    stiffness: 1.0,
                }),
                DVector::from_vec(vec![1.0, 0.0]),
            ),
            Models::Pendulum => (
                Function::leaf(Pendulum::new(1.0)),
                DVector::from_vec(vec![PI / 4.0, 0.0]),
            ),
            Models::ElectricNetwork => (
                Function::leaf(ElectricNetwork::default()),
                DVector::from_vec(vec![0.0, 0.0]),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utilities::assert_equal_abstol;

    fn check_jacobian(function: &impl NonlinearFunction, x: &DVector<f64>) {
        let n = function.dim_x();
        let mut analytic = DMatrix::zeros(n, n);
        function.evaluate_deriv(x, &mut analytic);
        let h = 1e-7;
        let mut f_plus = DVector::zeros(n);
        let mut f_minus = DVector::zeros(n);
        for j in 0..n {
            let mut x_plus = x.clone();
            let mut x_minus = x.clone();
            x_plus[j] += h;
            x_minus[j] -= h;
            function.evaluate(&x_plus, &mut f_plus);
            function.evaluate(&x_minus, &mut f_minus);
            for i in 0..n {
                let numeric = (f_plus[i] - f_minus[i]) / (2.0 * h);
                assert_equal_abstol(analytic[(i, j)], numeric, 1e-5 * (1.0 + numeric.abs()));
            }
        }
    }

    #[test]
    fn test_jacobians() {
        let x = DVector::from_vec(vec![0.3, 0.0123]);
        check_jacobian(&MassSpring { mass: 2.0, stiffness: 3.0 }, &x);
        check_jacobian(&Pendulum::new(0.5), &x);
        check_jacobian(&ElectricNetwork::default(), &x);
    }

    #[test]
    fn test_electric_network_is_autonomous() {
        let network = ElectricNetwork::default();
        let mut f = DVector::zeros(2);
        network.evaluate(&DVector::from_vec(vec![0.0, 0.0]), &mut f);
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1], 1.0);
    }

    #[test]
    fn test_model_names() {
        for model in Models::value_variants() {
            let (rhs, y0) = model.build();
            assert_eq!(rhs.dim_x(), y0.len());
            assert_eq!(Models::from_str(model.name(), false).unwrap(), *model);
        }
    }
}
