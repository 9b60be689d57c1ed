//! Gaussian fitting of radial profile peaks.
//!
//! Every ROI selects a band of the profile, `[radius - width/2,
//! radius + width/2]`. A single ROI is fitted with
//! `A * exp(-(x - mu)^2 / (2 sigma^2)) + B`; several overlapping ROIs are
//! fitted jointly with a sum of such terms over the union of their bands.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use giwaxs_core::error::FitError;
use giwaxs_core::{FitConfig, GaussianParams, RoiParameters};
use log::debug;
use ndarray::{s, ArrayView1};

use crate::lm::{LevenbergMarquardt, LmOptions, Model};

/// Smallest sigma used when evaluating a term.
const SIGMA_FLOOR: f64 = 1e-9;

/// Evaluates `A * exp(-(x - mu)^2 / (2 sigma^2)) + B`.
#[must_use]
pub fn gauss(x: f64, params: &GaussianParams) -> f64 {
    params.eval(x)
}

/// Sum of Gaussians; `params` holds consecutive `(A, mu, sigma, B)` groups.
#[must_use]
pub fn multi_gauss(x: f64, params: &[f64]) -> f64 {
    params
        .chunks_exact(4)
        .map(|p| gaussian_term(x, p[0], p[1], p[2]) + p[3])
        .sum()
}

fn gaussian_term(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let sigma = sigma.max(SIGMA_FLOOR);
    let d = (x - center) / sigma;
    amplitude * (-0.5 * d * d).exp()
}

/// Sum of `peaks` Gaussians with individual offsets.
struct MultiGauss {
    peaks: usize,
}

impl Model for MultiGauss {
    fn n_params(&self) -> usize {
        4 * self.peaks
    }

    fn eval(&self, x: f64, params: &[f64]) -> f64 {
        multi_gauss(x, params)
    }

    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]) {
        for (p, g) in params.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
            let (amplitude, center, sigma) = (p[0], p[1], p[2].max(SIGMA_FLOOR));
            let d = (x - center) / sigma;
            let e = (-0.5 * d * d).exp();
            g[0] = e;
            g[1] = amplitude * e * d / sigma;
            g[2] = amplitude * e * d * d / sigma;
            g[3] = 1.0;
        }
    }
}

/// Start values and box for one ROI.
struct PeakSetup {
    range: (usize, usize),
    initial: [f64; 4],
    lower: [f64; 4],
    upper: [f64; 4],
}

/// Fits ROIs against a radial profile.
///
/// `x` is the physical axis of `y`; `scale` converts physical radii to
/// profile indices.
#[derive(Debug, Clone)]
pub struct PeakFitter<'a> {
    x: ArrayView1<'a, f64>,
    y: ArrayView1<'a, f64>,
    scale: f64,
    solver: LevenbergMarquardt,
}

impl<'a> PeakFitter<'a> {
    /// Creates a fitter for the profile `y` over the axis `x`.
    ///
    /// # Errors
    /// Returns [`FitError::AxisMismatch`] if the lengths differ.
    pub fn new(x: ArrayView1<'a, f64>, y: ArrayView1<'a, f64>, scale: f64) -> Result<Self, FitError> {
        if x.len() != y.len() {
            return Err(FitError::AxisMismatch {
                profile: y.len(),
                axis: x.len(),
            });
        }
        Ok(Self {
            x,
            y,
            scale,
            solver: LevenbergMarquardt::default(),
        })
    }

    /// Replaces the solver tolerances.
    #[must_use]
    pub fn with_options(mut self, options: LmOptions) -> Self {
        self.solver = LevenbergMarquardt::new(options);
        self
    }

    /// Index range `[x1, x2)` of the ROI band, clipped to the profile.
    #[must_use]
    pub fn index_range(&self, roi: &RoiParameters) -> (usize, usize) {
        let (lo, hi) = roi.band();
        let len = self.y.len();
        let to_index = |v: f64| ((v / self.scale).trunc().max(0.0) as usize).min(len);
        (to_index(lo), to_index(hi))
    }

    /// Spacing of the profile axis.
    fn sample_step(&self) -> f64 {
        let len = self.x.len();
        if len < 2 {
            return self.scale.abs();
        }
        ((self.x[len - 1] - self.x[0]) / (len - 1) as f64).abs()
    }

    fn setup(&self, roi: &RoiParameters) -> Result<PeakSetup, FitError> {
        let (mu_min, mu_max) = roi.band();
        let (x1, x2) = self.index_range(roi);
        if x1 >= x2 {
            return Err(FitError::EmptyRegion {
                min: mu_min,
                max: mu_max,
            });
        }
        let peak = self
            .y
            .slice(s![x1..x2])
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        if !peak.is_finite() {
            return Err(FitError::NonFinite);
        }
        let peak = peak.max(0.0);
        // Sigma stays above half a sample so no term can vanish from the data.
        let sigma_min = (0.5 * self.sample_step()).min(roi.width);
        Ok(PeakSetup {
            range: (x1, x2),
            initial: [peak, roi.radius, roi.width / 2.0, 0.0],
            lower: [0.0, mu_min, sigma_min, 0.0],
            upper: [peak, mu_max, roi.width, peak],
        })
    }

    /// Fits one ROI. The returned copy has `radius = mu`, `width = 2 sigma`
    /// and the fit parameters attached.
    ///
    /// # Errors
    /// Returns a [`FitError`] if the band is empty or the solver fails; the
    /// input ROI is never modified.
    pub fn fit_roi(&self, roi: &RoiParameters) -> Result<RoiParameters, FitError> {
        let setup = self.setup(roi)?;
        let (x1, x2) = setup.range;
        let report = self.solver.fit(
            &MultiGauss { peaks: 1 },
            self.x.slice(s![x1..x2]),
            self.y.slice(s![x1..x2]),
            &setup.initial,
            &setup.lower,
            &setup.upper,
        )?;
        debug!(
            "fitted ROI {:?} over [{x1}, {x2}) in {} evaluations",
            roi.key, report.evaluations
        );
        Ok(roi.clone().with_fit(params_at(&report.params, 0)))
    }

    /// Fits several ROIs jointly as a sum of Gaussians.
    ///
    /// ROIs whose band selects no profile points are skipped. The result
    /// holds the fitted copies of the remaining ROIs, in input order.
    ///
    /// # Errors
    /// Returns [`FitError::TooManyPeaks`] for more than
    /// [`FitConfig::MAX_JOINT_PEAKS`] ROIs without attempting a fit, or the
    /// solver error.
    pub fn fit_joint(&self, rois: &[RoiParameters]) -> Result<Vec<RoiParameters>, FitError> {
        if rois.len() > FitConfig::MAX_JOINT_PEAKS {
            return Err(FitError::TooManyPeaks {
                requested: rois.len(),
                max: FitConfig::MAX_JOINT_PEAKS,
            });
        }
        let mut used = Vec::with_capacity(rois.len());
        let (mut initial, mut lower, mut upper) = (Vec::new(), Vec::new(), Vec::new());
        let (mut x1, mut x2) = (usize::MAX, 0);
        for roi in rois {
            match self.setup(roi) {
                Ok(setup) => {
                    x1 = x1.min(setup.range.0);
                    x2 = x2.max(setup.range.1);
                    initial.extend_from_slice(&setup.initial);
                    lower.extend_from_slice(&setup.lower);
                    upper.extend_from_slice(&setup.upper);
                    used.push(roi);
                }
                Err(FitError::EmptyRegion { .. }) => {
                    debug!("skipping ROI {:?} with empty band", roi.key);
                }
                Err(err) => return Err(err),
            }
        }
        if used.is_empty() {
            return Ok(Vec::new());
        }

        let report = self.solver.fit(
            &MultiGauss { peaks: used.len() },
            self.x.slice(s![x1..x2]),
            self.y.slice(s![x1..x2]),
            &initial,
            &lower,
            &upper,
        )?;
        Ok(used
            .into_iter()
            .enumerate()
            .map(|(i, roi)| roi.clone().with_fit(params_at(&report.params, i)))
            .collect())
    }
}

fn params_at(params: &[f64], peak: usize) -> GaussianParams {
    let p = &params[4 * peak..4 * peak + 4];
    GaussianParams::new(p[0], p[1], p[2], p[3])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::cast_precision_loss)]
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    fn profile(len: usize, peaks: &[GaussianParams]) -> (Array1<f64>, Array1<f64>) {
        let x = Array1::from_shape_fn(len, |i| i as f64);
        let y = x.mapv(|v| peaks.iter().map(|p| gauss(v, p)).sum());
        (x, y)
    }

    #[test]
    fn test_multi_gauss_sums_terms() {
        let p = [2.0, 1.0, 1.0, 0.5, 1.0, 3.0, 2.0, 0.25];
        let expected = gauss(1.0, &GaussianParams::new(2.0, 1.0, 1.0, 0.5))
            + gauss(1.0, &GaussianParams::new(1.0, 3.0, 2.0, 0.25));
        assert_relative_eq!(multi_gauss(1.0, &p), expected);
    }

    /// Deterministic noise in `[-0.5, 0.5)`.
    fn jitter(i: usize) -> f64 {
        let v = (i as f64 * 12.9898).sin() * 43_758.545_3;
        v - v.floor() - 0.5
    }

    #[test]
    fn test_single_fit_recovers_parameters() {
        let truth = GaussianParams::new(10.0, 40.0, 3.0, 1.0);
        let (x, y) = profile(100, &[truth]);
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let roi = RoiParameters::new(38.0, 16.0).with_key(4);
        let fitted = fitter.fit_roi(&roi).unwrap();
        assert!(fitted.fitted);
        assert_eq!(fitted.key, Some(4));
        assert_relative_eq!(fitted.radius, 40.0, max_relative = 0.01);
        assert_relative_eq!(fitted.width, 6.0, max_relative = 0.01);
        let params = fitted.fit_r_parameters.unwrap();
        assert_relative_eq!(params.amplitude, 10.0, max_relative = 0.01);
        assert_relative_eq!(params.center, 40.0, max_relative = 0.01);
        assert_relative_eq!(params.sigma, 3.0, max_relative = 0.01);
        assert_relative_eq!(params.offset, 1.0, max_relative = 0.01);
        assert!(!roi.fitted);
    }

    #[test]
    fn test_single_fit_with_noise_within_five_percent() {
        let truth = GaussianParams::new(10.0, 40.0, 3.0, 1.0);
        let x = Array1::from_shape_fn(100, |i| i as f64);
        let y = Array1::from_shape_fn(100, |i| gauss(x[i], &truth) + 0.2 * jitter(i));
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let params = fitter
            .fit_roi(&RoiParameters::new(38.0, 16.0))
            .unwrap()
            .fit_r_parameters
            .unwrap();
        assert_relative_eq!(params.amplitude, 10.0, max_relative = 0.05);
        assert_relative_eq!(params.center, 40.0, max_relative = 0.05);
        assert_relative_eq!(params.sigma, 3.0, max_relative = 0.05);
        assert_relative_eq!(params.offset, 1.0, max_relative = 0.05);
    }

    #[test]
    fn test_sigma_stays_above_half_a_sample() {
        let (x, y) = profile(60, &[GaussianParams::new(4.0, 20.0, 2.0, 0.0)]);
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let setup = fitter.setup(&RoiParameters::new(20.0, 10.0)).unwrap();
        assert_relative_eq!(setup.lower[2], 0.5);
        let narrow = fitter.setup(&RoiParameters::new(20.0, 0.4)).unwrap();
        assert_relative_eq!(narrow.lower[2], 0.4);
        assert!(narrow.lower[2] <= narrow.upper[2]);
    }

    #[test]
    fn test_empty_band_is_an_error() {
        let (x, y) = profile(20, &[GaussianParams::new(1.0, 5.0, 1.0, 0.0)]);
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let roi = RoiParameters::new(50.0, 4.0);
        assert!(matches!(fitter.fit_roi(&roi), Err(FitError::EmptyRegion { .. })));
    }

    #[test]
    fn test_joint_fit_two_overlapping_peaks() {
        let a = GaussianParams::new(8.0, 30.0, 2.5, 0.0);
        let b = GaussianParams::new(5.0, 38.0, 2.5, 0.0);
        let (x, y) = profile(80, &[a, b]);
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let rois = [
            RoiParameters::new(31.0, 10.0).with_key(0),
            RoiParameters::new(37.0, 10.0).with_key(1),
        ];
        let fitted = fitter.fit_joint(&rois).unwrap();
        assert_eq!(fitted.len(), 2);
        assert_relative_eq!(fitted[0].radius, 30.0, max_relative = 0.01);
        assert_relative_eq!(fitted[1].radius, 38.0, max_relative = 0.01);
        for (roi, truth) in fitted.iter().zip([a, b]) {
            let params = roi.fit_r_parameters.unwrap();
            assert_relative_eq!(params.amplitude, truth.amplitude, max_relative = 0.01);
            assert_relative_eq!(params.sigma, truth.sigma, max_relative = 0.01);
            assert_relative_eq!(roi.width, 2.0 * truth.sigma, max_relative = 0.01);
        }
        assert!(fitted.iter().all(|r| r.fitted));
    }

    #[test]
    fn test_joint_fit_rejects_seven_peaks() {
        let (x, y) = profile(100, &[]);
        let fitter = PeakFitter::new(x.view(), y.view(), 1.0).unwrap();
        let rois: Vec<_> = (0..7)
            .map(|i| RoiParameters::new(10.0 + 10.0 * i as f64, 4.0))
            .collect();
        assert_eq!(
            fitter.fit_joint(&rois),
            Err(FitError::TooManyPeaks {
                requested: 7,
                max: 6
            })
        );
    }

    #[test]
    fn test_axis_mismatch() {
        let x = Array1::zeros(3);
        let y = Array1::zeros(4);
        assert!(PeakFitter::new(x.view(), y.view(), 1.0).is_err());
    }
}
