//! Asymmetric least squares (AsLS) baseline correction.
//!
//! The baseline `z` minimizes `sum(w * (y - z)^2) + lambda * sum((D z)^2)`
//! with `D` the second-difference operator. Points above the current
//! baseline get the small weight `p`, points below get `1 - p`, so the curve
//! settles under the peaks. Each iteration solves the pentadiagonal system
//! `(W + lambda * D^T D) z = W y` in O(n).

use giwaxs_core::error::BaselineError;
use giwaxs_core::BaselineConfig;
use log::{debug, warn};
use ndarray::{s, Array1, ArrayView1};

/// Points required by the second-difference operator.
pub const MIN_POINTS: usize = 3;

/// Computes the AsLS baseline of `y`.
///
/// Iterates until the weights stop changing or `max_iterations` solves have
/// been made; in the latter case the last baseline is returned with a
/// warning.
///
/// # Errors
/// - [`BaselineError::RegionTooSmall`] for fewer than 3 points
/// - [`BaselineError::InvalidParameter`] for a non-positive smoothness or an
///   asymmetry outside `(0, 1)`
/// - [`BaselineError::Singular`] if the system cannot be factorized
pub fn fit_baseline(
    y: ArrayView1<'_, f64>,
    smoothness: f64,
    asymmetry: f64,
    max_iterations: usize,
) -> Result<Array1<f64>, BaselineError> {
    let n = y.len();
    if n < MIN_POINTS {
        return Err(BaselineError::RegionTooSmall {
            len: n,
            min: MIN_POINTS,
        });
    }
    if !(smoothness.is_finite() && smoothness > 0.0) {
        return Err(BaselineError::InvalidParameter(format!(
            "smoothness must be positive, got {smoothness}"
        )));
    }
    if !(asymmetry > 0.0 && asymmetry < 1.0) {
        return Err(BaselineError::InvalidParameter(format!(
            "asymmetry must be within (0, 1), got {asymmetry}"
        )));
    }

    let penalty = SecondDifferencePenalty::new(n, smoothness);
    let mut weights = vec![1.0; n];
    let mut z = Array1::zeros(n);

    for iteration in 1..=max_iterations.max(1) {
        z = penalty.solve(&weights, y)?;
        let mut changed = false;
        for ((w, &yi), &zi) in weights.iter_mut().zip(y.iter()).zip(z.iter()) {
            let next = if yi > zi { asymmetry } else { 1.0 - asymmetry };
            if (next - *w).abs() > f64::EPSILON {
                *w = next;
                changed = true;
            }
        }
        if !changed {
            debug!("baseline converged after {iteration} iterations");
            return Ok(z);
        }
    }
    warn!("baseline did not converge within {max_iterations} iterations");
    Ok(z)
}

/// Baseline over the inclusive index range `[x1, x2]` of `y`.
///
/// The result has the length of `y` and is zero outside the range.
///
/// # Errors
/// Returns [`BaselineError::InvalidRange`] if `x1 > x2` or `x2` is out of
/// bounds, and any error of [`fit_baseline`].
pub fn baseline_in_range(
    y: ArrayView1<'_, f64>,
    x1: usize,
    x2: usize,
    config: &BaselineConfig,
) -> Result<Array1<f64>, BaselineError> {
    if x1 > x2 || x2 >= y.len() {
        return Err(BaselineError::InvalidRange { x1, x2, len: y.len() });
    }
    let region = fit_baseline(
        y.slice(s![x1..=x2]),
        config.smoothness_param,
        config.asymmetry_param,
        config.max_iterations,
    )?;
    let mut baseline = Array1::zeros(y.len());
    baseline.slice_mut(s![x1..=x2]).assign(&region);
    Ok(baseline)
}

/// Band of `lambda * D^T D`: main diagonal and the two upper diagonals.
struct SecondDifferencePenalty {
    diag: Vec<f64>,
    off1: Vec<f64>,
    off2: Vec<f64>,
}

impl SecondDifferencePenalty {
    fn new(n: usize, smoothness: f64) -> Self {
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];
        let mut diag = vec![0.0; n];
        let mut off1 = vec![0.0; n.saturating_sub(1)];
        let mut off2 = vec![0.0; n.saturating_sub(2)];
        for k in 0..n.saturating_sub(2) {
            for a in 0..3 {
                diag[k + a] += smoothness * STENCIL[a] * STENCIL[a];
                for b in a + 1..3 {
                    let value = smoothness * STENCIL[a] * STENCIL[b];
                    if b - a == 1 {
                        off1[k + a] += value;
                    } else {
                        off2[k + a] += value;
                    }
                }
            }
        }
        Self { diag, off1, off2 }
    }

    /// Solves `(diag(w) + P) z = w * y` by banded LDL^T factorization.
    fn solve(&self, weights: &[f64], y: ArrayView1<'_, f64>) -> Result<Array1<f64>, BaselineError> {
        let n = self.diag.len();
        // Unit lower factor below the diagonal: l1[i] = L[i][i-1], l2[i] = L[i][i-2].
        let mut d = vec![0.0; n];
        let mut l1 = vec![0.0; n];
        let mut l2 = vec![0.0; n];
        for i in 0..n {
            let mut pivot = self.diag[i] + weights[i];
            if i >= 2 {
                l2[i] = self.off2[i - 2] / d[i - 2];
                pivot -= l2[i] * l2[i] * d[i - 2];
            }
            if i >= 1 {
                let coupling = if i >= 2 { l2[i] * l1[i - 1] * d[i - 2] } else { 0.0 };
                l1[i] = (self.off1[i - 1] - coupling) / d[i - 1];
                pivot -= l1[i] * l1[i] * d[i - 1];
            }
            if !(pivot > 0.0 && pivot.is_finite()) {
                return Err(BaselineError::Singular);
            }
            d[i] = pivot;
        }

        let mut z = Array1::zeros(n);
        for i in 0..n {
            let mut v = weights[i] * y[i];
            if i >= 1 {
                v -= l1[i] * z[i - 1];
            }
            if i >= 2 {
                v -= l2[i] * z[i - 2];
            }
            z[i] = v;
        }
        for i in 0..n {
            z[i] /= d[i];
        }
        for i in (0..n).rev() {
            let mut v = z[i];
            if i + 1 < n {
                v -= l1[i + 1] * z[i + 1];
            }
            if i + 2 < n {
                v -= l2[i + 2] * z[i + 2];
            }
            z[i] = v;
        }
        Ok(z)
    }
}

/// Stage of a baseline correction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaselineState {
    /// Nothing computed yet, or the baseline was discarded.
    #[default]
    NoBaseline,
    /// A baseline is stored and the signal is shown as is.
    Calculated,
    /// The baseline is removed from the displayed signal.
    Subtracted,
    /// A subtraction was reverted; the baseline is still stored.
    Restored,
}

impl BaselineState {
    /// Lower-case label used in messages.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NoBaseline => "not calculated",
            Self::Calculated => "calculated",
            Self::Subtracted => "subtracted",
            Self::Restored => "restored",
        }
    }
}

/// Baseline correction of one profile view.
///
/// `calculate` is allowed without a baseline, after a calculation and after
/// a restore; `subtract` only after a calculation; `restore` only after a
/// subtraction; `discard` whenever no subtraction is active. Rejected actions
/// leave the session untouched.
#[derive(Debug, Clone, Default)]
pub struct BaselineSession {
    config: BaselineConfig,
    state: BaselineState,
    range: Option<(usize, usize)>,
    baseline: Option<Array1<f64>>,
}

impl BaselineSession {
    /// Empty session that will calculate with `config`.
    #[must_use]
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Current state of the session.
    #[must_use]
    pub fn state(&self) -> BaselineState {
        self.state
    }

    /// Configuration used by the next calculation.
    #[must_use]
    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Replaces the configuration used by the next calculation.
    pub fn set_config(&mut self, config: BaselineConfig) {
        self.config = config;
    }

    /// Inclusive index range of the last calculation.
    #[must_use]
    pub fn range(&self) -> Option<(usize, usize)> {
        self.range
    }

    /// Full-length baseline curve, zero outside the range.
    #[must_use]
    pub fn baseline(&self) -> Option<&Array1<f64>> {
        self.baseline.as_ref()
    }

    /// Computes the baseline of `signal` over `[x1, x2]`.
    ///
    /// # Errors
    /// Returns [`BaselineError::InvalidTransition`] while a subtraction is
    /// active, or the computation error; the session is unchanged on error.
    pub fn calculate(
        &mut self,
        signal: ArrayView1<'_, f64>,
        x1: usize,
        x2: usize,
    ) -> Result<&Array1<f64>, BaselineError> {
        self.check("calculate", BaselineState::Subtracted, false)?;
        let baseline = baseline_in_range(signal, x1, x2, &self.config)?;
        self.range = Some((x1, x2));
        self.state = BaselineState::Calculated;
        Ok(&*self.baseline.insert(baseline))
    }

    /// Marks the baseline as subtracted from the displayed signal.
    ///
    /// # Errors
    /// Returns [`BaselineError::InvalidTransition`] unless calculated.
    pub fn subtract(&mut self) -> Result<(), BaselineError> {
        self.check("subtract", BaselineState::Calculated, true)?;
        self.state = BaselineState::Subtracted;
        Ok(())
    }

    /// Reverts a subtraction, keeping the baseline curve.
    ///
    /// # Errors
    /// Returns [`BaselineError::InvalidTransition`] unless subtracted.
    pub fn restore(&mut self) -> Result<(), BaselineError> {
        self.check("restore", BaselineState::Subtracted, true)?;
        self.state = BaselineState::Restored;
        Ok(())
    }

    /// Drops the baseline curve.
    ///
    /// # Errors
    /// Returns [`BaselineError::InvalidTransition`] without a baseline or
    /// while a subtraction is active.
    pub fn discard(&mut self) -> Result<(), BaselineError> {
        if matches!(self.state, BaselineState::NoBaseline | BaselineState::Subtracted) {
            return Err(self.transition_error("discard"));
        }
        self.state = BaselineState::NoBaseline;
        self.range = None;
        self.baseline = None;
        Ok(())
    }

    /// The signal as it should be displayed: baseline removed while a
    /// subtraction is active, unchanged otherwise.
    #[must_use]
    pub fn corrected(&self, signal: ArrayView1<'_, f64>) -> Array1<f64> {
        match (&self.baseline, self.state) {
            (Some(baseline), BaselineState::Subtracted) if baseline.len() == signal.len() => {
                &signal - baseline
            }
            _ => signal.to_owned(),
        }
    }

    /// `required` true: the state must equal `state`; false: it must differ.
    fn check(
        &self,
        action: &'static str,
        state: BaselineState,
        required: bool,
    ) -> Result<(), BaselineError> {
        if (self.state == state) == required {
            Ok(())
        } else {
            Err(self.transition_error(action))
        }
    }

    fn transition_error(&self, action: &'static str) -> BaselineError {
        BaselineError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }
}
