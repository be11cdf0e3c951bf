use nalgebra::{DMatrix, DVector};
use nonlinear::NonlinearFunction;

/// y' = -rate y
#[derive(Debug)]
pub struct LinearDecay {
    pub n: usize,
    pub rate: f64,
}

impl NonlinearFunction for LinearDecay {
    fn dim_x(&self) -> usize {
        self.n
    }
    fn dim_f(&self) -> usize {
        self.n
    }
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        f.copy_from(x);
        *f *= -self.rate;
    }
    fn evaluate_deriv(&self, _x: &DVector<f64>, df: &mut DMatrix<f64>) {
        df.fill_with_identity();
        *df *= -self.rate;
    }
}

/// x'' = -omega^2 x as (x, v)
#[derive(Debug)]
pub struct Oscillator {
    pub omega: f64,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self { omega: 1.0 }
    }
}

impl NonlinearFunction for Oscillator {
    fn dim_x(&self) -> usize {
        2
    }
    fn dim_f(&self) -> usize {
        2
    }
    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        f[0] = x[1];
        f[1] = -self.omega * self.omega * x[0];
    }
    fn evaluate_deriv(&self, _x: &DVector<f64>, df: &mut DMatrix<f64>) {
        df.fill(0.0);
        df[(0, 1)] = 1.0;
        df[(1, 0)] = -self.omega * self.omega;
    }
}

/// Energy of the unit oscillator.
pub fn energy(y: &DVector<f64>) -> f64 {
    0.5 * (y[0] * y[0] + y[1] * y[1])
}

/// theta'' = -g/l sin(theta) as (theta, omega)
#[derive(Debug)]
pub struct Pendulum {
    pub g_over_l: f64,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self { g_over_l: 9.81 }
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
        f[1] = -self.g_over_l * x[0].sin();
    }
    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
        df.fill(0.0);
        df[(0, 1)] = 1.0;
        df[(1, 0)] = -self.g_over_l * x[0].cos();
    }
}
