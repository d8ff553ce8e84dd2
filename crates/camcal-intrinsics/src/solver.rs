//! Damped Gauss-Newton (Levenberg-Marquardt) for small dense problems.

use log::trace;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Stopping criteria and damping for the Levenberg-Marquardt solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iters: usize,
    /// Stop when the relative decrease of the cost falls below this value.
    pub ftol: f64,
    /// Stop when the step is this small relative to the parameter norm.
    pub xtol: f64,
    pub initial_lambda: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

/// A nonlinear least-squares problem `min ½‖r(x)‖²`.
pub(crate) trait LeastSquares {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of [`Self::residuals`]. Columns of parameters with
    /// `free[j] == false` may be left at zero.
    fn jacobian(&self, x: &DVector<f64>, free: &[bool]) -> DMatrix<f64> {
        numeric_jacobian(x, free, |x| self.residuals(x))
    }
}

/// Relative step for central differences.
pub(crate) fn diff_step(v: f64) -> f64 {
    1e-6 * v.abs().max(1.0)
}

/// Central-difference Jacobian of `f`, skipping fixed parameters.
pub(crate) fn numeric_jacobian<F>(x: &DVector<f64>, free: &[bool], f: F) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let m = f(x).len();
    let mut jac = DMatrix::zeros(m, x.len());
    let mut xp = x.clone();
    for j in 0..x.len() {
        if !free[j] {
            continue;
        }
        let h = diff_step(x[j]);
        xp[j] = x[j] + h;
        let rp = f(&xp);
        xp[j] = x[j] - h;
        let rm = f(&xp);
        xp[j] = x[j];
        jac.set_column(j, &((rp - rm) / (2.0 * h)));
    }
    jac
}

#[derive(Clone, Debug)]
pub(crate) struct LmOutcome {
    pub x: DVector<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn cost_of(r: &DVector<f64>) -> f64 {
    let c = r.norm_squared();
    if c.is_finite() {
        c
    } else {
        f64::INFINITY
    }
}

/// Minimize `problem` from `x0`, keeping parameters with `free[j] == false`
/// at their initial value.
pub(crate) fn levenberg_marquardt<P: LeastSquares + ?Sized>(
    problem: &P,
    x0: DVector<f64>,
    free: &[bool],
    options: &SolverOptions,
) -> LmOutcome {
    const MAX_LAMBDA: f64 = 1e16;

    let n = x0.len();
    let mut x = x0;
    let mut r = problem.residuals(&x);
    let mut cost = cost_of(&r);
    let mut lambda = options.initial_lambda.max(1e-12);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iters && !converged {
        iterations += 1;
        let jac = problem.jacobian(&x, free);
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let g = &jt * &r;

        loop {
            let mut a = jtj.clone();
            let mut rhs = -g.clone();
            for j in 0..n {
                if free[j] {
                    let d = jtj[(j, j)].max(1e-12);
                    a[(j, j)] += lambda * d;
                } else {
                    a.row_mut(j).fill(0.0);
                    a.column_mut(j).fill(0.0);
                    a[(j, j)] = 1.0;
                    rhs[j] = 0.0;
                }
            }

            let Some(delta) = a.cholesky().map(|c| c.solve(&rhs)) else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    converged = true;
                    break;
                }
                continue;
            };

            let x_new = &x + &delta;
            let r_new = problem.residuals(&x_new);
            let cost_new = cost_of(&r_new);
            if cost_new < cost {
                let decrease = cost - cost_new;
                let small_step = delta.norm() <= options.xtol * (x.norm() + options.xtol);
                trace!("lm iter {iterations}: cost {cost_new:.6e}, lambda {lambda:.1e}");
                x = x_new;
                r = r_new;
                cost = cost_new;
                lambda = (lambda / 10.0).max(1e-12);
                if decrease <= options.ftol * cost.max(f64::MIN_POSITIVE) || small_step {
                    converged = true;
                }
                break;
            }

            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                // No descent direction left: x is a local minimum.
                converged = true;
                break;
            }
        }
    }

    LmOutcome {
        x,
        cost,
        iterations,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fit `y = a·exp(b·t)`.
    struct ExpFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquares for ExpFit {
        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(t, y)| x[0] * (x[1] * t).exp() - y),
            )
        }
    }

    #[test]
    fn fits_exponential_curve() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|t| 2.5 * (-1.3 * t).exp()).collect();
        let problem = ExpFit { t, y };
        let out = levenberg_marquardt(
            &problem,
            DVector::from_vec(vec![1.0, 0.0]),
            &[true, true],
            &SolverOptions::default(),
        );
        assert!(out.converged);
        assert_relative_eq!(out.x[0], 2.5, epsilon = 1e-6);
        assert_relative_eq!(out.x[1], -1.3, epsilon = 1e-6);
        assert!(out.cost < 1e-12);
    }

    #[test]
    fn fixed_parameters_do_not_move() {
        let t: Vec<f64> = (0..10).map(|i| i as f64 * 0.2).collect();
        let y = t.iter().map(|t| 2.0 * (0.5 * t).exp()).collect();
        let problem = ExpFit { t, y };
        let out = levenberg_marquardt(
            &problem,
            DVector::from_vec(vec![2.0, 0.1]),
            &[false, true],
            &SolverOptions::default(),
        );
        assert_eq!(out.x[0], 2.0);
        assert_relative_eq!(out.x[1], 0.5, epsilon = 1e-6);
    }
}
