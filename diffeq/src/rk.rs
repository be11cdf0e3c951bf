use std::cell::RefCell;

use log::debug;
use nalgebra::{DMatrix, DVector};
use nonlinear::{
    Constant, Function, NewtonSettings, NewtonSolver, NonlinearFunction, Parameter, check_square,
};

use crate::{
    StepperErrors,
    collocation::{Collocation, CollocationErrors},
    stepping::{TimeStepper, validate_step},
    tableau::{ButcherTableau, TabulatedTableau},
};

/// Explicit Runge-Kutta stepper for a strictly lower triangular tableau.
#[derive(Debug)]
pub struct ExplicitRungeKutta {
    rhs: Function,
    tableau: ButcherTableau,
    // preallocated buffers for intermediate calculations
    k: Vec<DVector<f64>>,
    stage: DVector<f64>,
}

impl ExplicitRungeKutta {
    pub fn new(rhs: Function, tableau: ButcherTableau) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "explicit runge-kutta")?;
        if !tableau.is_explicit() {
            return Err(CollocationErrors::InvalidTableau(
                "explicit runge-kutta needs a strictly lower triangular a".to_string(),
            )
            .into());
        }
        Ok(Self {
            k: vec![DVector::zeros(n); tableau.stages()],
            stage: DVector::zeros(n),
            rhs,
            tableau,
        })
    }

    /// Classical fourth order method.
    pub fn rk4(rhs: Function) -> Result<Self, StepperErrors> {
        Self::new(rhs, ButcherTableau::from(&TabulatedTableau::RK4))
    }
}

impl TimeStepper for ExplicitRungeKutta {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        validate_step(tau, y, self.stage.len())?;
        for i in 0..self.tableau.stages() {
            // sum previous ks with appropriate scaling from tableau
            self.stage.copy_from(y);
            for j in 0..i {
                let a = self.tableau.a()[(i, j)];
                if a != 0.0 {
                    self.stage.axpy(tau * a, &self.k[j], 1.0);
                }
            }
            self.rhs.evaluate(&self.stage, &mut self.k[i]);
        }
        for (k, b) in self.k.iter().zip(self.tableau.b().iter()) {
            y.axpy(tau * b, k, 1.0);
        }
        Ok(())
    }
}

/// Stacked stage residual `G_i(K) = K_i - f(y_old + tau sum_j a_ij K_j)`
/// over the unknowns `K = [K_1, ..., K_s]`.
///
/// The Jacobian has blocks `delta_ij I - tau a_ij Jf(Y_i)`.
#[derive(Debug)]
struct StageEquations {
    rhs: Function,
    a: DMatrix<f64>,
    y_old: Constant,
    tau: Parameter,
    n: usize,
    stage: RefCell<DVector<f64>>,
    value: RefCell<DVector<f64>>,
    jacobian: RefCell<DMatrix<f64>>,
}

impl StageEquations {
    /// Writes `Y_i = y_old + tau sum_j a_ij K_j` into `stage`.
    fn stage_point(&self, i: usize, k: &DVector<f64>, stage: &mut DVector<f64>) {
        let tau = self.tau.get();
        stage.copy_from(&*self.y_old.value());
        for j in 0..self.a.ncols() {
            let a = self.a[(i, j)];
            if a != 0.0 {
                stage.axpy(tau * a, &k.rows(j * self.n, self.n), 1.0);
            }
        }
    }
}

impl NonlinearFunction for StageEquations {
    fn dim_x(&self) -> usize {
        self.a.nrows() * self.n
    }

    fn dim_f(&self) -> usize {
        self.a.nrows() * self.n
    }

    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        let n = self.n;
        let mut stage = self.stage.borrow_mut();
        let mut value = self.value.borrow_mut();
        for i in 0..self.a.nrows() {
            self.stage_point(i, x, &mut stage);
            self.rhs.evaluate(&stage, &mut value);
            let mut block = f.rows_mut(i * n, n);
            block.copy_from(&x.rows(i * n, n));
            block -= &*value;
        }
    }

    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
        let n = self.n;
        let tau = self.tau.get();
        let mut stage = self.stage.borrow_mut();
        let mut jacobian = self.jacobian.borrow_mut();
        df.fill(0.0);
        for i in 0..self.a.nrows() {
            self.stage_point(i, x, &mut stage);
            self.rhs.evaluate_deriv(&stage, &mut jacobian);
            for j in 0..self.a.ncols() {
                let mut block = df.view_mut((i * n, j * n), (n, n));
                block.copy_from(&*jacobian);
                block *= -tau * self.a[(i, j)];
                if i == j {
                    for d in 0..n {
                        block[(d, d)] += 1.0;
                    }
                }
            }
        }
    }
}

/// Implicit Runge-Kutta stepper for a full tableau.
///
/// All stages are solved together: one Newton solve over `s * n` unknowns
/// per step, after which `y <- y + tau sum_i b_i K_i`.
#[derive(Debug)]
pub struct ImplicitRungeKutta {
    rhs: Function,
    b: DVector<f64>,
    equation: Function,
    y_old: Constant,
    tau: Parameter,
    newton: NewtonSolver,
    k: DVector<f64>,
    f: DVector<f64>,
}

impl ImplicitRungeKutta {
    pub fn new(rhs: Function, tableau: ButcherTableau) -> Result<Self, StepperErrors> {
        let n = check_square(&rhs, "implicit runge-kutta")?;
        let s = tableau.stages();
        let (a, b, _c) = tableau.into_parts();
        let y_old = Constant::new(n);
        let tau = Parameter::new(0.0);
        let equation = Function::leaf(StageEquations {
            rhs: rhs.clone(),
            a,
            y_old: y_old.clone(),
            tau: tau.clone(),
            n,
            stage: RefCell::new(DVector::zeros(n)),
            value: RefCell::new(DVector::zeros(n)),
            jacobian: RefCell::new(DMatrix::zeros(n, n)),
        });
        debug!("implicit runge-kutta with {s} stages on {n} states");
        Ok(Self {
            rhs,
            b,
            equation,
            y_old,
            tau,
            newton: NewtonSolver::new(s * n),
            k: DVector::zeros(s * n),
            f: DVector::zeros(n),
        })
    }

    /// Gauss-Legendre collocation with `stages` stages, order `2 * stages`.
    pub fn gauss_legendre(rhs: Function, stages: usize) -> Result<Self, StepperErrors> {
        Self::new(rhs, ButcherTableau::collocation(Collocation::GaussLegendre, stages)?)
    }

    /// Radau IIA collocation with `stages` stages, order `2 * stages - 1`.
    pub fn radau(rhs: Function, stages: usize) -> Result<Self, StepperErrors> {
        Self::new(rhs, ButcherTableau::collocation(Collocation::GaussRadau, stages)?)
    }

    pub fn with_newton_settings(mut self, settings: NewtonSettings) -> Self {
        self.newton.set_settings(settings);
        self
    }

    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

impl TimeStepper for ImplicitRungeKutta {
    fn do_step(&mut self, tau: f64, y: &mut DVector<f64>) -> Result<(), StepperErrors> {
        let n = self.f.len();
        validate_step(tau, y, n)?;
        self.y_old.set(y)?;
        self.tau.set(tau);

        // every stage starts from f(y_old)
        self.rhs.evaluate(y, &mut self.f);
        for i in 0..self.stages() {
            self.k.rows_mut(i * n, n).copy_from(&self.f);
        }
        self.newton.solve(&self.equation, &mut self.k)?;

        for (i, b) in self.b.iter().enumerate() {
            y.axpy(tau * b, &self.k.rows(i * n, n), 1.0);
        }
        Ok(())
    }
}
