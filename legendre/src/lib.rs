use std::f64::consts::PI;

use log::trace;
use thiserror::Error;
use tolerance::Tolerances;

/// Maximum Newton iterations spent on a single polynomial root.
const MAX_ROOT_ITERATIONS: usize = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum LegendreErrors {
    #[error("degree must be at least 1")]
    ZeroDegree,
    #[error("newton iteration for root {index} did not converge")]
    RootNotConverged { index: usize },
    #[error("computed roots are not separated")]
    RootsNotSeparated,
    #[error("value must be between -1 and 1 inclusive")]
    ValueOutOfRange,
}

/// Legendre polynomials P_0..P_n and their first derivatives, evaluated by
/// the three-term recurrence.
#[derive(Debug, Clone)]
pub struct Legendre {
    pub p: Vec<f64>,
    pub dp: Vec<f64>,
    degree: usize,
}

impl Legendre {
    pub fn new(degree: usize) -> Self {
        let mut p = vec![0.0; degree + 1];
        p[0] = 1.0;
        Self {
            p,
            dp: vec![0.0; degree + 1],
            degree,
        }
    }

    /// Fills `p` and `dp` with every polynomial up to `degree` at `x`.
    pub fn calculate(&mut self, x: f64) -> Result<(), LegendreErrors> {
        if !(-1.0..=1.0).contains(&x) {
            return Err(LegendreErrors::ValueOutOfRange);
        }
        let p = &mut self.p;
        let dp = &mut self.dp;
        p[0] = 1.0;
        dp[0] = 0.0;
        if self.degree == 0 {
            return Ok(());
        }
        p[1] = x;
        dp[1] = 1.0;
        for l in 2..=self.degree {
            let lf = l as f64;
            p[l] = ((2.0 * lf - 1.0) * x * p[l - 1] - (lf - 1.0) * p[l - 2]) / lf;
            // valid on the closed interval, no division by 1 - x^2
            dp[l] = dp[l - 2] + (2.0 * lf - 1.0) * p[l - 1];
        }
        Ok(())
    }
}

/// Returns `(P_n(x), P_n'(x), P_{n-1}(x), P_{n-1}'(x))` without storing the
/// lower degrees. Requires `n >= 1`.
pub fn evaluate(n: usize, x: f64) -> (f64, f64, f64, f64) {
    // (p, dp) for degree l-2 and l-1
    let (mut p0, mut dp0) = (1.0, 0.0);
    let (mut p1, mut dp1) = (x, 1.0);
    for l in 2..=n {
        let lf = l as f64;
        let p2 = ((2.0 * lf - 1.0) * x * p1 - (lf - 1.0) * p0) / lf;
        let dp2 = dp0 + (2.0 * lf - 1.0) * p1;
        (p0, dp0) = (p1, dp1);
        (p1, dp1) = (p2, dp2);
    }
    (p1, dp1, p0, dp0)
}

/// Nodes in ascending order on [-1, 1] with their quadrature weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Quadrature {
    pub nodes: Vec<f64>,
    pub weights: Vec<f64>,
}

impl Quadrature {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Integrates `f` over [-1, 1].
    pub fn integrate(&self, f: impl Fn(f64) -> f64) -> f64 {
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| w * f(*x))
            .sum()
    }

    fn check_separation(&self) -> Result<(), LegendreErrors> {
        for pair in self.nodes.windows(2) {
            if !(pair[1] - pair[0] > 1e-12) {
                return Err(LegendreErrors::RootsNotSeparated);
            }
        }
        Ok(())
    }
}

/// Gauss-Legendre rule with `n` points: the roots of P_n.
pub fn gauss_legendre(n: usize) -> Result<Quadrature, LegendreErrors> {
    if n == 0 {
        return Err(LegendreErrors::ZeroDegree);
    }
    let nf = n as f64;
    let mut nodes = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for k in 0..n {
        // chebyshev-like seed, clustered toward the ends like the roots
        let seed = -(PI * (k as f64 + 0.75) / (nf + 0.5)).cos();
        let x = newton_root(k, seed, |x| {
            let (p, dp, _, _) = evaluate(n, x);
            p / dp
        })?;
        let (_, dp, _, _) = evaluate(n, x);
        nodes.push(x);
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
    }

    let quadrature = Quadrature { nodes, weights };
    quadrature.check_separation()?;
    Ok(quadrature)
}

/// Gauss-Radau rule with `n` points anchored at the left endpoint `x = -1`:
/// the roots of P_n + P_{n-1}.
pub fn gauss_radau(n: usize) -> Result<Quadrature, LegendreErrors> {
    if n == 0 {
        return Err(LegendreErrors::ZeroDegree);
    }
    let nf = n as f64;
    let mut nodes = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    nodes.push(-1.0);
    weights.push(2.0 / (nf * nf));

    for k in 1..n {
        let seed = -(2.0 * PI * k as f64 / (2.0 * nf - 1.0)).cos();
        // newton on q(x) / (1 + x) so the anchored root is never revisited
        let x = newton_root(k, seed, |x| {
            let (pn, dpn, pm, dpm) = evaluate(n, x);
            let q = pn + pm;
            let dq = dpn + dpm;
            q / (dq - q / (1.0 + x))
        })?;
        let (_, _, pm, _) = evaluate(n, x);
        nodes.push(x);
        weights.push((1.0 - x) / (nf * nf * pm * pm));
    }

    let quadrature = Quadrature { nodes, weights };
    quadrature.check_separation()?;
    Ok(quadrature)
}

fn newton_root(
    index: usize,
    seed: f64,
    step: impl Fn(f64) -> f64,
) -> Result<f64, LegendreErrors> {
    let tolerances = Tolerances::new(0.0, 1e-14);
    let mut x = seed;
    for iteration in 0..MAX_ROOT_ITERATIONS {
        let dx = step(x);
        x -= dx;
        if tolerances.check(dx.abs(), x) {
            trace!("root {index} converged to {x} after {} iterations", iteration + 1);
            return Ok(x);
        }
    }
    Err(LegendreErrors::RootNotConverged { index })
}
