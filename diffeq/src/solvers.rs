use std::fmt;

use nonlinear::{Function, NewtonSettings};

use crate::{
    StepperErrors,
    euler::{CrankNicolson, ExplicitEuler, ImplicitEuler, ImprovedEuler},
    rk::{ExplicitRungeKutta, ImplicitRungeKutta},
    stepping::TimeStepper,
};

/// Every stepper the crate provides, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepperMethods {
    ExplicitEuler,
    ImprovedEuler,
    ImplicitEuler,
    CrankNicolson,
    /// Classical RK4.
    ExplicitRungeKutta,
    ImplicitGaussLegendre { stages: usize },
    ImplicitGaussRadau { stages: usize },
}

impl StepperMethods {
    pub const NAMES: [&'static str; 7] = [
        "exp_euler",
        "impr_euler",
        "impl_euler",
        "crank_nicolson",
        "exp_rk",
        "impl_rk_gauss_legendre",
        "impl_rk_gauss_radau",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepperMethods::ExplicitEuler => "exp_euler",
            StepperMethods::ImprovedEuler => "impr_euler",
            StepperMethods::ImplicitEuler => "impl_euler",
            StepperMethods::CrankNicolson => "crank_nicolson",
            StepperMethods::ExplicitRungeKutta => "exp_rk",
            StepperMethods::ImplicitGaussLegendre { .. } => "impl_rk_gauss_legendre",
            StepperMethods::ImplicitGaussRadau { .. } => "impl_rk_gauss_radau",
        }
    }

    /// `stages` is only read by the implicit Runge-Kutta methods.
    pub fn from_name(name: &str, stages: usize) -> Result<Self, StepperErrors> {
        Ok(match name {
            "exp_euler" => StepperMethods::ExplicitEuler,
            "impr_euler" => StepperMethods::ImprovedEuler,
            "impl_euler" => StepperMethods::ImplicitEuler,
            "crank_nicolson" => StepperMethods::CrankNicolson,
            "exp_rk" => StepperMethods::ExplicitRungeKutta,
            "impl_rk_gauss_legendre" => StepperMethods::ImplicitGaussLegendre { stages },
            "impl_rk_gauss_radau" => StepperMethods::ImplicitGaussRadau { stages },
            _ => return Err(StepperErrors::UnknownStepper(name.to_string())),
        })
    }

    /// Stage count for the implicit Runge-Kutta methods.
    pub fn stages(&self) -> Option<usize> {
        match self {
            StepperMethods::ImplicitGaussLegendre { stages }
            | StepperMethods::ImplicitGaussRadau { stages } => Some(*stages),
            _ => None,
        }
    }

    /// Builds the stepper for `rhs`. Explicit methods ignore `newton`.
    pub fn build(
        &self,
        rhs: &Function,
        newton: NewtonSettings,
    ) -> Result<Box<dyn TimeStepper>, StepperErrors> {
        let rhs = rhs.clone();
        let stepper: Box<dyn TimeStepper> = match *self {
            StepperMethods::ExplicitEuler => Box::new(ExplicitEuler::new(rhs)?),
            StepperMethods::ImprovedEuler => Box::new(ImprovedEuler::new(rhs)?),
            StepperMethods::ImplicitEuler => {
                Box::new(ImplicitEuler::new(rhs)?.with_newton_settings(newton))
            }
            StepperMethods::CrankNicolson => {
                Box::new(CrankNicolson::new(rhs)?.with_newton_settings(newton))
            }
            StepperMethods::ExplicitRungeKutta => Box::new(ExplicitRungeKutta::rk4(rhs)?),
            StepperMethods::ImplicitGaussLegendre { stages } => {
                Box::new(ImplicitRungeKutta::gauss_legendre(rhs, stages)?.with_newton_settings(newton))
            }
            StepperMethods::ImplicitGaussRadau { stages } => {
                Box::new(ImplicitRungeKutta::radau(rhs, stages)?.with_newton_settings(newton))
            }
        };
        Ok(stepper)
    }
}

impl fmt::Display for StepperMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stages() {
            Some(stages) => write!(f, "{}_{stages}", self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_models::LinearDecay;
    use nalgebra::DVector;
    use utilities::assert_equal_abstol;

    #[test]
    fn test_names_round_trip() {
        for name in StepperMethods::NAMES {
            let method = StepperMethods::from_name(name, 3).unwrap();
            assert_eq!(method.name(), name);
        }
        assert_eq!(
            StepperMethods::from_name("impl_rk_gauss_radau", 4)
                .unwrap()
                .to_string(),
            "impl_rk_gauss_radau_4"
        );
        assert_eq!(StepperMethods::CrankNicolson.to_string(), "crank_nicolson");
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            StepperMethods::from_name("leapfrog", 1),
            Err(StepperErrors::UnknownStepper(name)) if name == "leapfrog"
        ));
    }

    #[test]
    fn test_every_method_builds_and_steps() {
        let rhs = Function::leaf(LinearDecay { n: 2, rate: 1.0 });
        for name in StepperMethods::NAMES {
            let method = StepperMethods::from_name(name, 2).unwrap();
            let mut stepper = method.build(&rhs, NewtonSettings::default()).unwrap();
            let mut y = DVector::from_element(2, 1.0);
            for _ in 0..10 {
                stepper.do_step(0.01, &mut y).unwrap();
            }
            // every method is at least first order
            assert_equal_abstol(y[0], (-0.1f64).exp(), 1e-3);
            assert_equal_abstol(y[1], y[0], 1e-12);
        }
    }

    #[test]
    fn test_zero_stages_fail_to_build() {
        let rhs = Function::leaf(LinearDecay { n: 1, rate: 1.0 });
        let method = StepperMethods::from_name("impl_rk_gauss_legendre", 0).unwrap();
        assert!(method.build(&rhs, NewtonSettings::default()).is_err());
    }
}
