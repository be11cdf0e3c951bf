//! Composable nonlinear functions.
//!
//! A [`Function`] is a cheap, clonable handle to a node in an expression
//! graph. Cloning shares the node, so the same sub-expression (for example
//! the previous state of an implicit step) can feed several residuals. The
//! only mutable nodes are [`Constant`] and [`Parameter`] cells, which the
//! owning stepper refreshes between evaluations.
//!
//! Handles are `Rc` based and therefore `!Send`. A graph belongs to one
//! stepper on one thread.

use std::{
    cell::{Cell, Ref, RefCell},
    ops::{Mul, Neg},
    rc::Rc,
};

use nalgebra::{DMatrix, DVector};

use crate::{NonlinearErrors, NonlinearFunction};

/// Scalar cell used as a coefficient in sums, e.g. the step size.
#[derive(Clone, Debug)]
pub struct Parameter(Rc<Cell<f64>>);

impl Parameter {
    pub fn new(value: f64) -> Self {
        Self(Rc::new(Cell::new(value)))
    }

    pub fn set(&self, value: f64) {
        self.0.set(value);
    }

    pub fn get(&self) -> f64 {
        self.0.get()
    }
}

/// Vector cell whose function `x -> value` ignores its argument.
#[derive(Clone, Debug)]
pub struct Constant(Rc<RefCell<DVector<f64>>>);

impl Constant {
    pub fn new(n: usize) -> Self {
        Self::from_vector(DVector::zeros(n))
    }

    pub fn from_vector(value: DVector<f64>) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    pub fn dim(&self) -> usize {
        self.0.borrow().len()
    }

    /// Overwrites the stored value. The length is fixed at construction.
    pub fn set(&self, value: &DVector<f64>) -> Result<(), NonlinearErrors> {
        let mut stored = self.0.borrow_mut();
        if stored.len() != value.len() {
            return Err(NonlinearErrors::DimensionMismatch {
                operation: "constant set",
                expected: stored.len(),
                found: value.len(),
            });
        }
        stored.copy_from(value);
        Ok(())
    }

    pub fn value(&self) -> Ref<'_, DVector<f64>> {
        self.0.borrow()
    }
}

/// `scale * product(parameters)`
#[derive(Clone, Debug)]
struct Coefficient {
    scale: f64,
    parameters: Vec<Parameter>,
}

impl Coefficient {
    fn fixed(scale: f64) -> Self {
        Self {
            scale,
            parameters: Vec::new(),
        }
    }

    fn parameter(parameter: &Parameter) -> Self {
        Self {
            scale: 1.0,
            parameters: vec![parameter.clone()],
        }
    }

    fn value(&self) -> f64 {
        self.parameters
            .iter()
            .fold(self.scale, |c, p| c * p.get())
    }

    fn combine(&self, other: &Coefficient) -> Self {
        let mut parameters = self.parameters.clone();
        parameters.extend(other.parameters.iter().cloned());
        Self {
            scale: self.scale * other.scale,
            parameters,
        }
    }
}

#[derive(Clone, Debug)]
struct Term {
    coefficient: Coefficient,
    function: Function,
}

#[derive(Debug)]
enum Node {
    Identity(usize),
    Constant(Constant),
    ScaledSum {
        terms: Vec<Term>,
        dim_x: usize,
        dim_f: usize,
        // scratch for one term at a time
        value: RefCell<DVector<f64>>,
        jacobian: RefCell<DMatrix<f64>>,
    },
    Composition {
        outer: Function,
        inner: Function,
        inner_value: RefCell<DVector<f64>>,
        outer_jacobian: RefCell<DMatrix<f64>>,
        inner_jacobian: RefCell<DMatrix<f64>>,
    },
    Leaf(Rc<dyn NonlinearFunction>),
}

/// Handle to a node of the function graph.
#[derive(Clone, Debug)]
pub struct Function(Rc<Node>);

impl Function {
    /// `x -> x` on R^n.
    pub fn identity(n: usize) -> Self {
        Self(Rc::new(Node::Identity(n)))
    }

    /// `x -> c` where `c` is the current value of the cell.
    pub fn constant(constant: &Constant) -> Self {
        Self(Rc::new(Node::Constant(constant.clone())))
    }

    /// Wraps a user supplied function, e.g. a physical model.
    pub fn leaf(function: impl NonlinearFunction + 'static) -> Self {
        Self(Rc::new(Node::Leaf(Rc::new(function))))
    }

    /// `self + other`
    pub fn plus(&self, other: &Function) -> Result<Function, NonlinearErrors> {
        self.check_same_shape(other, "sum")?;
        let mut terms = self.terms(&Coefficient::fixed(1.0));
        terms.extend(other.terms(&Coefficient::fixed(1.0)));
        Ok(Self::scaled_sum(terms, self.dim_x(), self.dim_f()))
    }

    /// `self - other`
    pub fn minus(&self, other: &Function) -> Result<Function, NonlinearErrors> {
        self.check_same_shape(other, "difference")?;
        let mut terms = self.terms(&Coefficient::fixed(1.0));
        terms.extend(other.terms(&Coefficient::fixed(-1.0)));
        Ok(Self::scaled_sum(terms, self.dim_x(), self.dim_f()))
    }

    /// `factor * self`
    pub fn scale(&self, factor: f64) -> Function {
        let terms = self.terms(&Coefficient::fixed(factor));
        Self::scaled_sum(terms, self.dim_x(), self.dim_f())
    }

    /// `parameter * self`, reading the parameter at evaluation time.
    pub fn scale_by(&self, parameter: &Parameter) -> Function {
        let terms = self.terms(&Coefficient::parameter(parameter));
        Self::scaled_sum(terms, self.dim_x(), self.dim_f())
    }

    /// `self(inner(x))`
    pub fn compose(&self, inner: &Function) -> Result<Function, NonlinearErrors> {
        if inner.dim_f() != self.dim_x() {
            return Err(NonlinearErrors::DimensionMismatch {
                operation: "composition",
                expected: self.dim_x(),
                found: inner.dim_f(),
            });
        }
        Ok(Self(Rc::new(Node::Composition {
            outer: self.clone(),
            inner: inner.clone(),
            inner_value: RefCell::new(DVector::zeros(inner.dim_f())),
            outer_jacobian: RefCell::new(DMatrix::zeros(self.dim_f(), self.dim_x())),
            inner_jacobian: RefCell::new(DMatrix::zeros(inner.dim_f(), inner.dim_x())),
        })))
    }

    fn check_same_shape(
        &self,
        other: &Function,
        operation: &'static str,
    ) -> Result<(), NonlinearErrors> {
        if other.dim_x() != self.dim_x() {
            return Err(NonlinearErrors::DimensionMismatch {
                operation,
                expected: self.dim_x(),
                found: other.dim_x(),
            });
        }
        if other.dim_f() != self.dim_f() {
            return Err(NonlinearErrors::DimensionMismatch {
                operation,
                expected: self.dim_f(),
                found: other.dim_f(),
            });
        }
        Ok(())
    }

    // nested sums are flattened into one term list
    fn terms(&self, coefficient: &Coefficient) -> Vec<Term> {
        match self.0.as_ref() {
            Node::ScaledSum { terms, .. } => terms
                .iter()
                .map(|term| Term {
                    coefficient: coefficient.combine(&term.coefficient),
                    function: term.function.clone(),
                })
                .collect(),
            _ => vec![Term {
                coefficient: coefficient.clone(),
                function: self.clone(),
            }],
        }
    }

    fn scaled_sum(terms: Vec<Term>, dim_x: usize, dim_f: usize) -> Function {
        Self(Rc::new(Node::ScaledSum {
            terms,
            dim_x,
            dim_f,
            value: RefCell::new(DVector::zeros(dim_f)),
            jacobian: RefCell::new(DMatrix::zeros(dim_f, dim_x)),
        }))
    }

    /// `f += c * self(x)`
    fn add_scaled_value(
        &self,
        x: &DVector<f64>,
        c: f64,
        f: &mut DVector<f64>,
        scratch: &mut DVector<f64>,
    ) {
        match self.0.as_ref() {
            Node::Identity(_) => f.axpy(c, x, 1.0),
            Node::Constant(constant) => f.axpy(c, &*constant.value(), 1.0),
            _ => {
                self.evaluate(x, scratch);
                f.axpy(c, scratch, 1.0);
            }
        }
    }

    /// `df += c * dself/dx (x)`
    fn add_scaled_deriv(
        &self,
        x: &DVector<f64>,
        c: f64,
        df: &mut DMatrix<f64>,
        scratch: &mut DMatrix<f64>,
    ) {
        match self.0.as_ref() {
            Node::Identity(n) => {
                for i in 0..*n {
                    df[(i, i)] += c;
                }
            }
            Node::Constant(_) => {}
            _ => {
                self.evaluate_deriv(x, scratch);
                df.zip_apply(&*scratch, |a, b| *a += c * b);
            }
        }
    }
}

impl NonlinearFunction for Function {
    fn dim_x(&self) -> usize {
        match self.0.as_ref() {
            Node::Identity(n) => *n,
            Node::Constant(constant) => constant.dim(),
            Node::ScaledSum { dim_x, .. } => *dim_x,
            Node::Composition { inner, .. } => inner.dim_x(),
            Node::Leaf(leaf) => leaf.dim_x(),
        }
    }

    fn dim_f(&self) -> usize {
        match self.0.as_ref() {
            Node::Identity(n) => *n,
            Node::Constant(constant) => constant.dim(),
            Node::ScaledSum { dim_f, .. } => *dim_f,
            Node::Composition { outer, .. } => outer.dim_f(),
            Node::Leaf(leaf) => leaf.dim_f(),
        }
    }

    fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
        match self.0.as_ref() {
            Node::Identity(_) => f.copy_from(x),
            Node::Constant(constant) => f.copy_from(&*constant.value()),
            Node::ScaledSum { terms, value, .. } => {
                let mut scratch = value.borrow_mut();
                f.fill(0.0);
                for term in terms {
                    let c = term.coefficient.value();
                    term.function.add_scaled_value(x, c, f, &mut scratch);
                }
            }
            Node::Composition {
                outer,
                inner,
                inner_value,
                ..
            } => {
                let mut h = inner_value.borrow_mut();
                inner.evaluate(x, &mut h);
                outer.evaluate(&h, f);
            }
            Node::Leaf(leaf) => leaf.evaluate(x, f),
        }
    }

    fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
        match self.0.as_ref() {
            Node::Identity(_) => df.fill_with_identity(),
            Node::Constant(_) => df.fill(0.0),
            Node::ScaledSum {
                terms, jacobian, ..
            } => {
                let mut scratch = jacobian.borrow_mut();
                df.fill(0.0);
                for term in terms {
                    let c = term.coefficient.value();
                    term.function.add_scaled_deriv(x, c, df, &mut scratch);
                }
            }
            Node::Composition {
                outer,
                inner,
                inner_value,
                outer_jacobian,
                inner_jacobian,
            } => {
                // chain rule: Jg(h(x)) * Jh(x)
                let mut h = inner_value.borrow_mut();
                let mut jg = outer_jacobian.borrow_mut();
                let mut jh = inner_jacobian.borrow_mut();
                inner.evaluate(x, &mut h);
                outer.evaluate_deriv(&h, &mut jg);
                inner.evaluate_deriv(x, &mut jh);
                df.fill(0.0);
                df.gemm(1.0, &*jg, &*jh, 0.0);
            }
            Node::Leaf(leaf) => leaf.evaluate_deriv(x, df),
        }
    }
}

impl From<&Constant> for Function {
    fn from(constant: &Constant) -> Self {
        Function::constant(constant)
    }
}

impl Mul<&Function> for f64 {
    type Output = Function;

    fn mul(self, rhs: &Function) -> Function {
        rhs.scale(self)
    }
}

impl Mul<&Function> for &Parameter {
    type Output = Function;

    fn mul(self, rhs: &Function) -> Function {
        rhs.scale_by(self)
    }
}

impl Neg for &Function {
    type Output = Function;

    fn neg(self) -> Function {
        self.scale(-1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use utilities::assert_equal;

    /// (x0 * sin(x1), x0^2 + cos(x1) * x2, exp(0.1 * x2) * x0)
    #[derive(Debug)]
    struct Twist;

    impl NonlinearFunction for Twist {
        fn dim_x(&self) -> usize {
            3
        }
        fn dim_f(&self) -> usize {
            3
        }
        fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
            f[0] = x[0] * x[1].sin();
            f[1] = x[0] * x[0] + x[1].cos() * x[2];
            f[2] = (0.1 * x[2]).exp() * x[0];
        }
        fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
            df.fill(0.0);
            df[(0, 0)] = x[1].sin();
            df[(0, 1)] = x[0] * x[1].cos();
            df[(1, 0)] = 2.0 * x[0];
            df[(1, 1)] = -x[1].sin() * x[2];
            df[(1, 2)] = x[1].cos();
            df[(2, 0)] = (0.1 * x[2]).exp();
            df[(2, 2)] = 0.1 * (0.1 * x[2]).exp() * x[0];
        }
    }

    /// R^3 -> R^2: (x0 * x1, x2^3)
    #[derive(Debug)]
    struct Project;

    impl NonlinearFunction for Project {
        fn dim_x(&self) -> usize {
            3
        }
        fn dim_f(&self) -> usize {
            2
        }
        fn evaluate(&self, x: &DVector<f64>, f: &mut DVector<f64>) {
            f[0] = x[0] * x[1];
            f[1] = x[2].powi(3);
        }
        fn evaluate_deriv(&self, x: &DVector<f64>, df: &mut DMatrix<f64>) {
            df.fill(0.0);
            df[(0, 0)] = x[1];
            df[(0, 1)] = x[0];
            df[(1, 2)] = 3.0 * x[2] * x[2];
        }
    }

    fn central_difference(function: &Function, x: &DVector<f64>) -> DMatrix<f64> {
        let h = 1e-5;
        let mut jacobian = DMatrix::zeros(function.dim_f(), function.dim_x());
        let mut fp = DVector::zeros(function.dim_f());
        let mut fm = DVector::zeros(function.dim_f());
        for j in 0..function.dim_x() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += h;
            xm[j] -= h;
            function.evaluate(&xp, &mut fp);
            function.evaluate(&xm, &mut fm);
            jacobian.set_column(j, &((&fp - &fm) / (2.0 * h)));
        }
        jacobian
    }

    fn check_jacobian(function: &Function, seed: u64) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut df = DMatrix::zeros(function.dim_f(), function.dim_x());
        for _ in 0..10 {
            let x = DVector::from_fn(function.dim_x(), |_, _| rng.random_range(-1.0..1.0));
            function.evaluate_deriv(&x, &mut df);
            let fd = central_difference(function, &x);
            assert_relative_eq!(df, fd, epsilon = 1e-7, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_identity_and_constant() {
        let c = Constant::from_vector(DVector::from_vec(vec![1.0, 2.0]));
        let id = Function::identity(2);
        let cf = Function::from(&c);
        let x = DVector::from_vec(vec![3.0, -4.0]);
        let mut f = DVector::zeros(2);
        let mut df = DMatrix::from_element(2, 2, 7.0);

        id.evaluate(&x, &mut f);
        assert_eq!(f, x);
        id.evaluate_deriv(&x, &mut df);
        assert_eq!(df, DMatrix::identity(2, 2));

        cf.evaluate(&x, &mut f);
        assert_eq!(f, DVector::from_vec(vec![1.0, 2.0]));
        cf.evaluate_deriv(&x, &mut df);
        assert_eq!(df, DMatrix::zeros(2, 2));

        // the graph reads the cell at evaluation time
        c.set(&DVector::from_vec(vec![5.0, 6.0])).unwrap();
        cf.evaluate(&x, &mut f);
        assert_eq!(f, DVector::from_vec(vec![5.0, 6.0]));
    }

    #[test]
    fn test_constant_set_wrong_length() {
        let c = Constant::new(3);
        let result = c.set(&DVector::zeros(2));
        assert_eq!(
            result,
            Err(NonlinearErrors::DimensionMismatch {
                operation: "constant set",
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn test_scaled_sum_with_parameter() {
        let tau = Parameter::new(0.5);
        let x_old = Constant::from_vector(DVector::from_vec(vec![1.0, 1.0, 1.0]));
        let rhs = Function::leaf(Twist);
        let residual = Function::identity(3)
            .minus(&Function::from(&x_old))
            .unwrap()
            .minus(&(&tau * &rhs))
            .unwrap();

        let x = DVector::from_vec(vec![0.3, -0.2, 0.7]);
        let mut f = DVector::zeros(3);
        let mut g = DVector::zeros(3);
        rhs.evaluate(&x, &mut g);
        residual.evaluate(&x, &mut f);
        for i in 0..3 {
            assert_equal(f[i], x[i] - 1.0 - 0.5 * g[i]);
        }

        tau.set(2.0);
        residual.evaluate(&x, &mut f);
        for i in 0..3 {
            assert_equal(f[i], x[i] - 1.0 - 2.0 * g[i]);
        }
        check_jacobian(&residual, 1);
    }

    #[test]
    fn test_nested_sums_flatten() {
        let a = Function::leaf(Twist);
        let b = Function::identity(3);
        let inner = 0.5 * &a.plus(&b).unwrap();
        let outer = inner.minus(&(-&b)).unwrap();
        // 0.5 a + 0.5 b + b
        let x = DVector::from_vec(vec![0.1, 0.2, 0.3]);
        let mut f = DVector::zeros(3);
        let mut fa = DVector::zeros(3);
        a.evaluate(&x, &mut fa);
        outer.evaluate(&x, &mut f);
        for i in 0..3 {
            assert_equal(f[i], 0.5 * fa[i] + 1.5 * x[i]);
        }
        check_jacobian(&outer, 2);
    }

    #[test]
    fn test_chain_rule() {
        let g = Function::leaf(Twist);
        let h = Function::leaf(Twist);
        let gh = g.compose(&h).unwrap();
        check_jacobian(&gh, 3);

        // non-square inner, sum inside composition
        let p = Function::leaf(Project);
        let shifted = p.compose(&h.plus(&Function::identity(3)).unwrap()).unwrap();
        assert_eq!(shifted.dim_x(), 3);
        assert_eq!(shifted.dim_f(), 2);
        check_jacobian(&shifted, 4);
    }

    #[test]
    fn test_composition_with_constant_inner() {
        // rhs(x_old): value of rhs at the stored state, zero derivative
        let x_old = Constant::from_vector(DVector::from_vec(vec![0.4, 0.1, -0.3]));
        let rhs = Function::leaf(Twist);
        let frozen = rhs.compose(&Function::from(&x_old)).unwrap();

        let x = DVector::from_vec(vec![9.0, 9.0, 9.0]);
        let mut f = DVector::zeros(3);
        let mut expected = DVector::zeros(3);
        frozen.evaluate(&x, &mut f);
        rhs.evaluate(&x_old.value(), &mut expected);
        assert_eq!(f, expected);

        let mut df = DMatrix::from_element(3, 3, 1.0);
        frozen.evaluate_deriv(&x, &mut df);
        assert_eq!(df, DMatrix::zeros(3, 3));
    }

    #[test]
    fn test_shared_subexpression() {
        // the same node reached along two paths is evaluated twice
        let rhs = Function::leaf(Twist);
        let twice = rhs.plus(&rhs).unwrap();
        let x = DVector::from_vec(vec![0.2, 0.4, 0.6]);
        let mut f = DVector::zeros(3);
        let mut g = DVector::zeros(3);
        twice.evaluate(&x, &mut f);
        rhs.evaluate(&x, &mut g);
        assert_relative_eq!(f, 2.0 * g);
        check_jacobian(&twice, 5);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Function::identity(3);
        let b = Function::identity(2);
        assert_eq!(
            a.plus(&b).unwrap_err(),
            NonlinearErrors::DimensionMismatch {
                operation: "sum",
                expected: 3,
                found: 2
            }
        );
        assert!(a.minus(&b).is_err());

        // Project maps R^3 -> R^2, so Twist(Project(x)) is invalid
        let p = Function::leaf(Project);
        let t = Function::leaf(Twist);
        assert_eq!(
            t.compose(&p).unwrap_err(),
            NonlinearErrors::DimensionMismatch {
                operation: "composition",
                expected: 3,
                found: 2
            }
        );
        assert!(p.compose(&t).is_ok());
    }
}
