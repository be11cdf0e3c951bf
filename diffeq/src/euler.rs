//! Euler family: explicit, improved (midpoint RK2), implicit and
//! Crank-Nicolson.

use nalgebra::DVector;
use nonlinear::{
    Constant, Function, NewtonSettings, NewtonSolver, NonlinearFunction, Parameter, check_square,
};

use crate::{
    StepperErrors,
    stepping::{TimeStepper, validate_step},
};

/// `y <- y + tau f(y)`
#[derive(Debug)]
pub struct ExplicitEuler {
    rhs: Function,
    f: DVector<f64>,
}

impl ExplicitEuler {
    pub fn new(rhs: Function) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "explicit euler")?;
        Ok(Self {
            rhs,
            f: DVector::zeros(n),
        })
    }
}

impl TimeStepper for ExplicitEuler {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        validate_step(tau, y, self.f.len())?;
        self.rhs.evaluate(y, &mut self.f);
        y.axpy(tau, &self.f, 1.0);
        Ok(())
    }
}

/// `y~ = y + tau/2 f(y)`, then `y <- y + tau f(y~)`
#[derive(Debug)]
pub struct ImprovedEuler {
    rhs: Function,
    f: DVector<f64>,
    y_tilde: DVector<f64>,
}

impl ImprovedEuler {
    pub fn new(rhs: Function) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "improved euler")?;
        Ok(Self {
            rhs,
            f: DVector::zeros(n),
            y_tilde: DVector::zeros(n),
        })
    }
}

impl TimeStepper for ImprovedEuler {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        validate_step(tau, y, self.f.len())?;
        self.rhs.evaluate(y, &mut self.f);
        self.y_tilde.copy_from(y);
        self.y_tilde.axpy(0.5 * tau, &self.f, 1.0);
        self.rhs.evaluate(&self.y_tilde, &mut self.f);
        y.axpy(tau, &self.f, 1.0);
        Ok(())
    }
}

/// Residual graph and cells shared by the single-stage implicit schemes.
#[derive(Debug)]
struct ImplicitResidual {
    equation: Function,
    tau: Parameter,
    y_old: Constant,
    y_new: DVector<f64>,
    newton: NewtonSolver,
}

impl ImplicitResidual {
    fn new(equation: Function, tau: Parameter, y_old: Constant, n: usize) -> Self {
        Self {
            equation,
            tau,
            y_old,
            y_new: DVector::zeros(n),
            newton: NewtonSolver::new(n),
        }
    }

    /// `y` is only written once Newton has converged.
    fn solve(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        validate_step(tau, y, self.y_old.dim())?;
        self.y_old.set(y)?;
        self.tau.set(tau);
        // the old state is the initial guess
        self.y_new.copy_from(y);
        self.newton.solve(&self.equation, &mut self.y_new)?;
        y.copy_from(&self.y_new);
        Ok(())
    }
}

/// Solves `y_new - y_old - tau f(y_new) = 0`.
#[derive(Debug)]
pub struct ImplicitEuler {
    residual: ImplicitResidual,
}

impl ImplicitEuler {
    pub fn new(rhs: Function) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "implicit euler")?;
        let tau = Parameter::new(0.0);
        let y_old = Constant::new(n);
        let y_new = Function::identity(n);
        let equation = y_new
            .minus(&Function::from(&y_old))?
            .minus(&(&tau * &rhs))?;
        Ok(Self {
            residual: ImplicitResidual::new(equation, tau, y_old, n),
        })
    }

    pub fn with_newton_settings(mut self, settings: NewtonSettings) -> Self {
        self.residual.newton.set_settings(settings);
        self
    }
}

impl TimeStepper for ImplicitEuler {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        self.residual.solve(tau, y)
    }
}

/// Solves `y_new - y_old - tau/2 (f(y_old) + f(y_new)) = 0`.
#[derive(Debug)]
pub struct CrankNicolson {
    residual: ImplicitResidual,
}

impl CrankNicolson {
    pub fn new(rhs: Function) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "crank-nicolson")?;
        let tau = Parameter::new(0.0);
        let y_old = Constant::new(n);
        let y_old_fn = Function::from(&y_old);
        let y_new = Function::identity(n);
        let average = 0.5 * &rhs.compose(&y_old_fn)?.plus(&rhs)?;
        let equation = y_new.minus(&y_old_fn)?.minus(&(&tau * &average))?;
        Ok(Self {
            residual: ImplicitResidual::new(equation, tau, y_old, n),
        })
    }

    pub fn with_newton_settings(mut self, settings: NewtonSettings) -> Self {
        self.residual.newton.set_settings(settings);
        self
    }
}

impl TimeStepper for CrankNicolson {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        self.residual.solve(tau, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::{LinearDecay, Oscillator, Pendulum, energy};
    use nonlinear::NonlinearErrors;
    use utilities::{assert_equal, assert_equal_reltol};

    fn decay() -> Function {
        Function::leaf(LinearDecay { n: 1, rate: 1.0 })
    }

    fn run(stepper: &mut dyn TimeStepper, tau: f64, steps: usize, y: &mut DVector<f64>) {
        for _ in 0..steps {
            stepper.do_step(tau, y).unwrap();
        }
    }

    #[test]
    fn test_explicit_euler_closed_form() {
        let (tau, n) = (0.1, 25);
        let mut y = DVector::from_element(1, 1.0);
        run(&mut ExplicitEuler::new(decay()).unwrap(), tau, n, &mut y);
        assert_equal(y[0], (1.0 - tau).powi(n as i32));
    }

    #[test]
    fn test_improved_euler_closed_form() {
        // one step multiplies by 1 - tau + tau^2 / 2
        let (tau, n) = (0.1, 25);
        let mut y = DVector::from_element(1, 1.0);
        run(&mut ImprovedEuler::new(decay()).unwrap(), tau, n, &mut y);
        assert_equal(y[0], (1.0 - tau + 0.5 * tau * tau).powi(n as i32));
    }

    #[test]
    fn test_implicit_euler_closed_form() {
        let (tau, n) = (0.1, 25);
        let mut y = DVector::from_element(1, 1.0);
        run(&mut ImplicitEuler::new(decay()).unwrap(), tau, n, &mut y);
        assert_equal_reltol(y[0], (1.0 / (1.0 + tau)).powi(n as i32), 1e-9);
    }

    #[test]
    fn test_crank_nicolson_closed_form() {
        let (tau, n) = (0.1, 25);
        let mut y = DVector::from_element(1, 1.0);
        run(&mut CrankNicolson::new(decay()).unwrap(), tau, n, &mut y);
        let factor: f64 = (1.0 - 0.5 * tau) / (1.0 + 0.5 * tau);
        assert_equal_reltol(y[0], factor.powi(n as i32), 1e-9);
    }

    #[test]
    fn test_zero_step_is_identity() {
        let rhs = Function::leaf(Oscillator::default());
        let y0 = DVector::from_vec(vec![0.3, -1.2]);
        let mut steppers: Vec<Box<dyn TimeStepper>> = vec![
            Box::new(ExplicitEuler::new(rhs.clone()).unwrap()),
            Box::new(ImprovedEuler::new(rhs.clone()).unwrap()),
            Box::new(ImplicitEuler::new(rhs.clone()).unwrap()),
            Box::new(CrankNicolson::new(rhs.clone()).unwrap()),
        ];
        for stepper in steppers.iter_mut() {
            let mut y = y0.clone();
            stepper.do_step(0.0, &mut y).unwrap();
            assert_eq!(y, y0);
        }
    }

    #[test]
    fn test_crank_nicolson_conserves_energy() {
        let rhs = Function::leaf(Oscillator::default());
        let tau = 4.0 * std::f64::consts::PI / 100.0;
        let y0 = DVector::from_vec(vec![1.0, 0.0]);
        let e0 = energy(&y0);

        let mut y_cn = y0.clone();
        let mut y_ee = y0.clone();
        let mut crank_nicolson = CrankNicolson::new(rhs.clone()).unwrap();
        let mut explicit = ExplicitEuler::new(rhs).unwrap();
        let mut max_drift: f64 = 0.0;
        for _ in 0..1000 {
            crank_nicolson.do_step(tau, &mut y_cn).unwrap();
            explicit.do_step(tau, &mut y_ee).unwrap();
            max_drift = max_drift.max((energy(&y_cn) - e0).abs());
        }
        assert!(max_drift < 1e-8);
        // explicit euler multiplies the energy by 1 + tau^2 every step
        assert!(energy(&y_ee) > 2.0 * e0);
    }

    #[test]
    fn test_cells_are_refreshed_each_step() {
        // alternating step sizes must not leak between calls
        let mut stepper = ImplicitEuler::new(decay()).unwrap();
        let mut y = DVector::from_element(1, 1.0);
        stepper.do_step(0.5, &mut y).unwrap();
        stepper.do_step(0.1, &mut y).unwrap();
        assert_equal(y[0], 1.0 / 1.5 / 1.1);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut stepper = CrankNicolson::new(decay()).unwrap();
        let mut y = DVector::from_element(2, 1.0);
        assert!(matches!(
            stepper.do_step(0.1, &mut y),
            Err(StepperErrors::Nonlinear(NonlinearErrors::DimensionMismatch { .. }))
        ));
        let mut y = DVector::from_element(1, 1.0);
        assert!(matches!(
            stepper.do_step(-0.1, &mut y),
            Err(StepperErrors::InvalidStepSize(_))
        ));
    }

    #[test]
    fn test_newton_failure_propagates() {
        let settings = NewtonSettings::default().with_max_iterations(0);
        let mut stepper = ImplicitEuler::new(decay())
            .unwrap()
            .with_newton_settings(settings);
        let mut y = DVector::from_element(1, 1.0);
        assert!(matches!(
            stepper.do_step(0.1, &mut y),
            Err(StepperErrors::Nonlinear(NonlinearErrors::ConvergenceFailure { .. }))
        ));
    }

    #[test]
    fn test_failed_step_keeps_state() {
        let settings = NewtonSettings::default().with_max_iterations(1);
        let rhs = Function::leaf(Pendulum::default());
        let mut steppers: Vec<Box<dyn TimeStepper>> = vec![
            Box::new(
                ImplicitEuler::new(rhs.clone())
                    .unwrap()
                    .with_newton_settings(settings),
            ),
            Box::new(
                CrankNicolson::new(rhs)
                    .unwrap()
                    .with_newton_settings(settings),
            ),
        ];
        let y0 = DVector::from_vec(vec![1.0, 0.5]);
        for stepper in steppers.iter_mut() {
            let mut y = y0.clone();
            assert!(matches!(
                stepper.do_step(0.5, &mut y),
                Err(StepperErrors::Nonlinear(NonlinearErrors::ConvergenceFailure { .. }))
            ));
            assert_eq!(y, y0);
        }
    }

    #[test]
    fn test_non_square_rhs_rejected() {
        #[derive(Debug)]
        struct Wide;
        impl NonlinearFunction for Wide {
            fn dim_x(&self) -> usize {
                2
            }
            fn dim_f(&self) -> usize {
                1
            }
            fn evaluate(&self, _x: &DVector<f64>, _f: &mut DVector<f64>) {}
            fn evaluate_deriv(&self, _x: &DVector<f64>, _df: &mut nalgebra::DMatrix<f64>) {}
        }
        assert!(ExplicitEuler::new(Function::leaf(Wide)).is_err());
        assert!(CrankNicolson::new(Function::leaf(Wide)).is_err());
    }
}
