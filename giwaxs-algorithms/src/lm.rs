//! Box-constrained Levenberg-Marquardt least squares.
//!
//! Minimizes `0.5 * sum((y - f(x; p))^2)` over parameters `p` restricted to
//! `lower <= p <= upper`. Parameters held at a bound by the descent
//! direction are frozen for the step, the remaining step is projected onto
//! the box, and the damping follows the ratio of actual to predicted cost
//! reduction.

use giwaxs_core::error::FitError;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1};

/// Model evaluated point by point with an analytic gradient.
pub trait Model {
    /// Number of parameters.
    fn n_params(&self) -> usize;

    /// Model value at `x`.
    fn eval(&self, x: f64, params: &[f64]) -> f64;

    /// Partial derivatives with respect to each parameter at `x`.
    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]);
}

/// Solver tolerances and budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    /// Relative cost reduction below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Projected gradient norm below which the fit has converged.
    pub gtol: f64,
    /// Maximum number of cost evaluations.
    pub max_evaluations: usize,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            max_evaluations: 2000,
        }
    }
}

/// Outcome of a converged fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LmReport {
    /// Best-fit parameters.
    pub params: Vec<f64>,
    /// Final half sum of squared residuals.
    pub cost: f64,
    /// Cost evaluations used.
    pub evaluations: usize,
    /// Accepted steps.
    pub iterations: usize,
}

/// Initial damping, relative to the diagonal of `J^T J`.
const LAMBDA_INIT: f64 = 1.0;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Box-constrained Levenberg-Marquardt solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevenbergMarquardt {
    options: LmOptions,
}

impl LevenbergMarquardt {
    /// Solver with the given tolerances.
    #[must_use]
    pub fn new(options: LmOptions) -> Self {
        Self { options }
    }

    /// Current tolerances.
    #[must_use]
    pub fn options(&self) -> &LmOptions {
        &self.options
    }

    /// Fits `model` to the samples `(x, y)` starting from `initial`.
    ///
    /// # Errors
    /// - [`FitError::AxisMismatch`] if `x` and `y` differ in length
    /// - [`FitError::Underdetermined`] with fewer samples than parameters
    /// - [`FitError::NonFinite`] if the model produces NaN or infinity
    /// - [`FitError::NotConverged`] when the evaluation budget runs out or
    ///   no damping yields a descent step while the gradient is still
    ///   above `gtol`
    pub fn fit<M: Model + ?Sized>(
        &self,
        model: &M,
        x: ArrayView1<'_, f64>,
        y: ArrayView1<'_, f64>,
        initial: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<LmReport, FitError> {
        let n = model.n_params();
        if x.len() != y.len() {
            return Err(FitError::AxisMismatch {
                profile: y.len(),
                axis: x.len(),
            });
        }
        if x.len() < n {
            return Err(FitError::Underdetermined {
                points: x.len(),
                parameters: n,
            });
        }
        debug_assert!(initial.len() == n && lower.len() == n && upper.len() == n);

        let mut params: Vec<f64> = initial
            .iter()
            .zip(lower.iter().zip(upper))
            .map(|(&p, (&lo, &hi))| clamp(p, lo, hi))
            .collect();
        let mut current = residuals(model, x, y, &params);
        let mut cost = half_sum_sq(&current);
        if !cost.is_finite() {
            return Err(FitError::NonFinite);
        }
        let mut evaluations = 1;
        let mut iterations = 0;
        let mut lambda = LAMBDA_INIT;
        let mut growth = 2.0;
        let mut trial = vec![0.0; n];

        loop {
            let (normal, gradient) = normal_equations(model, x, &current, &params);
            let free = free_parameters(&gradient, &params, lower, upper);
            let projected = gradient
                .iter()
                .zip(&free)
                .filter(|(_, &f)| f)
                .fold(0.0, |acc: f64, (g, _)| acc.max(g.abs()));
            if projected <= self.options.gtol {
                debug!("lm converged on gradient after {iterations} steps");
                break;
            }

            let mut accepted = false;
            while !accepted {
                if evaluations >= self.options.max_evaluations {
                    return Err(FitError::NotConverged { evaluations });
                }
                if lambda > LAMBDA_MAX {
                    debug!("lm damping saturated with gradient {projected:e} after {iterations} steps");
                    return Err(FitError::NotConverged { evaluations });
                }

                let Some(step) = solve(damped_system(&normal, &gradient, &free, lambda)) else {
                    lambda *= growth;
                    growth *= 2.0;
                    continue;
                };
                for i in 0..n {
                    trial[i] = clamp(params[i] + step[i], lower[i], upper[i]);
                }

                let trial_residuals = residuals(model, x, y, &trial);
                let trial_cost = half_sum_sq(&trial_residuals);
                evaluations += 1;

                let delta: Vec<f64> = trial.iter().zip(&params).map(|(t, p)| t - p).collect();
                let predicted = predicted_reduction(&normal, &gradient, &delta);
                let gain = if predicted > 0.0 {
                    (cost - trial_cost) / predicted
                } else {
                    -1.0
                };

                if trial_cost.is_finite() && trial_cost < cost && gain > 0.0 {
                    let reduction = cost - trial_cost;
                    let step_norm = norm(delta.iter().copied());
                    let param_norm = norm(params.iter().copied());

                    params.copy_from_slice(&trial);
                    current = trial_residuals;
                    cost = trial_cost;
                    iterations += 1;
                    lambda = (lambda * (1.0 / 3.0_f64).max(1.0 - (2.0 * gain - 1.0).powi(3)))
                        .max(LAMBDA_MIN);
                    growth = 2.0;
                    accepted = true;

                    let converged = reduction <= self.options.ftol * (cost + reduction)
                        || step_norm <= self.options.xtol * (self.options.xtol + param_norm);
                    if converged {
                        debug!("lm converged after {iterations} steps, cost {cost:e}");
                        return Ok(LmReport {
                            params,
                            cost,
                            evaluations,
                            iterations,
                        });
                    }
                } else {
                    lambda *= growth;
                    growth *= 2.0;
                }
            }
        }

        Ok(LmReport {
            params,
            cost,
            evaluations,
            iterations,
        })
    }
}

fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    if upper < lower {
        lower
    } else {
        value.clamp(lower, upper)
    }
}

fn residuals<M: Model + ?Sized>(
    model: &M,
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    params: &[f64],
) -> Array1<f64> {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| yi - model.eval(xi, params))
        .collect()
}

fn half_sum_sq(residuals: &Array1<f64>) -> f64 {
    0.5 * residuals.iter().map(|r| r * r).sum::<f64>()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

/// `J^T J` and `J^T r` for the model Jacobian `J`.
fn normal_equations<M: Model + ?Sized>(
    model: &M,
    x: ArrayView1<'_, f64>,
    residuals: &Array1<f64>,
    params: &[f64],
) -> (Array2<f64>, Array1<f64>) {
    let n = params.len();
    let mut jtj = Array2::zeros((n, n));
    let mut jtr = Array1::zeros(n);
    let mut row = vec![0.0; n];
    for (&xi, &ri) in x.iter().zip(residuals) {
        model.gradient(xi, params, &mut row);
        for a in 0..n {
            jtr[a] += row[a] * ri;
            for b in a..n {
                jtj[[a, b]] += row[a] * row[b];
            }
        }
    }
    for a in 0..n {
        for b in 0..a {
            jtj[[a, b]] = jtj[[b, a]];
        }
    }
    (jtj, jtr)
}

/// Parameters allowed to move: those not held at a bound by the descent
/// direction.
fn free_parameters(gradient: &Array1<f64>, params: &[f64], lower: &[f64], upper: &[f64]) -> Vec<bool> {
    gradient
        .iter()
        .enumerate()
        .map(|(i, &g)| !((params[i] <= lower[i] && g < 0.0) || (params[i] >= upper[i] && g > 0.0)))
        .collect()
}

/// `(J^T J + lambda * diag(J^T J)) d = J^T r` with held parameters pinned
/// to a zero step.
fn damped_system(
    normal: &Array2<f64>,
    gradient: &Array1<f64>,
    free: &[bool],
    lambda: f64,
) -> (Array2<f64>, Array1<f64>) {
    let mut a = normal.clone();
    let mut b = gradient.clone();
    for i in 0..free.len() {
        a[[i, i]] += lambda * normal[[i, i]].max(1e-12);
    }
    for (i, _) in free.iter().enumerate().filter(|(_, &f)| !f) {
        a.row_mut(i).fill(0.0);
        a.column_mut(i).fill(0.0);
        a[[i, i]] = 1.0;
        b[i] = 0.0;
    }
    (a, b)
}

/// Cost reduction the linear model predicts for the step `delta`.
fn predicted_reduction(normal: &Array2<f64>, gradient: &Array1<f64>, delta: &[f64]) -> f64 {
    let d = ArrayView1::from(delta);
    d.dot(gradient) - 0.5 * d.dot(&normal.dot(&d))
}

/// Solves `a * x = b` by Gaussian elimination with partial pivoting.
/// Returns `None` for a singular or non-finite system.
fn solve((mut a, mut b): (Array2<f64>, Array1<f64>)) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        let magnitude = a[[pivot, col]].abs();
        if magnitude.is_nan() || magnitude <= f64::MIN_POSITIVE {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    x.iter().all(|v: &f64| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// y = a * x + b
    struct Line;

    impl Model for Line {
        fn n_params(&self) -> usize {
            2
        }

        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * x + p[1]
        }

        fn gradient(&self, x: f64, _p: &[f64], out: &mut [f64]) {
            out[0] = x;
            out[1] = 1.0;
        }
    }

    /// y = a * exp(-k x)
    struct Decay;

    impl Model for Decay {
        fn n_params(&self) -> usize {
            2
        }

        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * (-p[1] * x).exp()
        }

        fn gradient(&self, x: f64, p: &[f64], out: &mut [f64]) {
            let e = (-p[1] * x).exp();
            out[0] = e;
            out[1] = -p[0] * x * e;
        }
    }

    /// y = a * x, with the derivative sign flipped.
    struct Uphill;

    impl Model for Uphill {
        fn n_params(&self) -> usize {
            1
        }

        fn eval(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * x
        }

        fn gradient(&self, x: f64, _p: &[f64], out: &mut [f64]) {
            out[0] = -x;
        }
    }

    const UNBOUNDED_LOW: [f64; 2] = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    const UNBOUNDED_HIGH: [f64; 2] = [f64::INFINITY, f64::INFINITY];

    #[test]
    fn test_solve_linear_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve((a, b)).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-12);
        assert!(solve((array![[1.0, 2.0], [2.0, 4.0]], array![1.0, 2.0])).is_none());
    }

    #[test]
    fn test_fits_line_exactly() {
        let x: Array1<f64> = Array1::linspace(0.0, 9.0, 10);
        let y = x.mapv(|v| 2.5 * v - 1.0);
        let report = LevenbergMarquardt::default()
            .fit(&Line, x.view(), y.view(), &[0.0, 0.0], &UNBOUNDED_LOW, &UNBOUNDED_HIGH)
            .unwrap();
        assert_relative_eq!(report.params[0], 2.5, epsilon = 1e-6);
        assert_relative_eq!(report.params[1], -1.0, epsilon = 1e-6);
        assert!(report.cost < 1e-10);
    }

    #[test]
    fn test_fits_nonlinear_decay() {
        let x: Array1<f64> = Array1::linspace(0.0, 4.0, 40);
        let y = x.mapv(|v| 3.0 * (-0.7 * v).exp());
        let report = LevenbergMarquardt::default()
            .fit(&Decay, x.view(), y.view(), &[1.0, 0.1], &UNBOUNDED_LOW, &UNBOUNDED_HIGH)
            .unwrap();
        assert_relative_eq!(report.params[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(report.params[1], 0.7, epsilon = 1e-5);
    }

    #[test]
    fn test_bounds_are_respected() {
        let x: Array1<f64> = Array1::linspace(0.0, 9.0, 10);
        let y = x.mapv(|v| 2.5 * v - 1.0);
        let report = LevenbergMarquardt::default()
            .fit(&Line, x.view(), y.view(), &[1.0, 0.0], &[0.0, 0.0], &[2.0, 10.0])
            .unwrap();
        assert_relative_eq!(report.params[0], 2.0, epsilon = 1e-9);
        assert!(report.params[1] >= 0.0);
    }

    #[test]
    fn test_underdetermined_and_mismatch() {
        let lm = LevenbergMarquardt::default();
        let x = array![1.0];
        assert!(matches!(
            lm.fit(&Line, x.view(), x.view(), &[0.0, 0.0], &UNBOUNDED_LOW, &UNBOUNDED_HIGH),
            Err(FitError::Underdetermined { points: 1, parameters: 2 })
        ));
        let y = array![1.0, 2.0];
        assert!(matches!(
            lm.fit(&Line, x.view(), y.view(), &[0.0, 0.0], &UNBOUNDED_LOW, &UNBOUNDED_HIGH),
            Err(FitError::AxisMismatch { .. })
        ));
    }

    #[test]
    fn test_budget_exhaustion() {
        let x: Array1<f64> = Array1::linspace(0.0, 4.0, 40);
        let y = x.mapv(|v| 3.0 * (-0.7 * v).exp());
        let lm = LevenbergMarquardt::new(LmOptions {
            max_evaluations: 2,
            ..LmOptions::default()
        });
        assert!(matches!(
            lm.fit(&Decay, x.view(), y.view(), &[1.0, 0.1], &UNBOUNDED_LOW, &UNBOUNDED_HIGH),
            Err(FitError::NotConverged { .. })
        ));
    }

    #[test]
    fn test_saturated_damping_is_not_converged() {
        let x: Array1<f64> = Array1::linspace(1.0, 10.0, 10);
        let y = x.mapv(|v| 2.0 * v);
        let lm = LevenbergMarquardt::default();
        match lm.fit(&Uphill, x.view(), y.view(), &[0.0], &[f64::NEG_INFINITY], &[f64::INFINITY]) {
            Err(FitError::NotConverged { evaluations }) => assert!(evaluations < 100),
            other => panic!("expected NotConverged, got {other:?}"),
        }
    }
}
