//! Radial and angular intensity profiles.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use giwaxs_core::error::{Error, Result};
use ndarray::{Array1, Array2, Zip};

use crate::smoothing::gaussian_filter1d;

/// Default number of angular bins.
pub const DEFAULT_ANGULAR_BINS: usize = 300;

/// Azimuthally averaged intensity, one bin per integer pixel radius.
///
/// Bin `k` holds the mean of pixels with `floor(rr) == k`, from `0` to
/// `floor(rr.max())`. Bins without pixels are zero. A positive `sigma`
/// smooths the result with a Gaussian of that width (in bins).
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if `image` and `rr` differ in shape.
pub fn radial_profile(image: &Array2<f64>, rr: &Array2<f64>, sigma: f64) -> Result<Array1<f64>> {
    check_shape(image, rr)?;
    if image.is_empty() {
        return Ok(Array1::zeros(0));
    }
    let max_bin = rr.iter().fold(0.0_f64, |acc, &r| acc.max(r)).floor() as usize;
    let mut sums = vec![0.0; max_bin + 1];
    let mut counts = vec![0_u64; max_bin + 1];

    Zip::from(image).and(rr).for_each(|&value, &r| {
        // rr is non-negative by construction; guard NaN and negatives anyway.
        if r >= 0.0 {
            let bin = r.floor() as usize;
            sums[bin] += value;
            counts[bin] += 1;
        }
    });

    let profile: Array1<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c == 0 { 0.0 } else { s / c as f64 })
        .collect();

    Ok(smooth(profile, sigma))
}

/// Physical x axis for a radial profile of `len` bins:
/// `linspace(rr.min, rr.max, len) * scale`.
#[must_use]
pub fn radial_axis(rr: &Array2<f64>, len: usize, scale: f64) -> Array1<f64> {
    let (lo, hi) = min_max(rr.iter().copied());
    Array1::linspace(lo, hi, len) * scale
}

/// Angular profile within a radial band.
#[derive(Debug, Clone, PartialEq)]
pub struct AngularProfile {
    /// Bin edges in radians, `bins` values over `[phi.min, phi.max]`.
    pub phi_axis: Array1<f64>,
    /// Summed intensity per bin (smoothed when sigma > 0).
    pub intensity: Array1<f64>,
    /// Number of contributing pixels per bin.
    pub counts: Array1<u64>,
}

impl AngularProfile {
    /// Mean intensity per contributing pixel; empty bins are zero.
    #[must_use]
    pub fn mean(&self) -> Array1<f64> {
        Zip::from(&self.intensity)
            .and(&self.counts)
            .map_collect(|&s, &c| if c == 0 { 0.0 } else { s / c as f64 })
    }

    /// Angle axis in degrees.
    #[must_use]
    pub fn phi_degrees(&self) -> Array1<f64> {
        self.phi_axis.mapv(f64::to_degrees)
    }
}

/// Sums intensities of pixels with `r1 <= rr <= r2` into angular bins.
///
/// The axis holds `bins` evenly spaced edges over the image's own angular
/// extent. Bin `k` collects angles in `(edge[k-1], edge[k]]`; bin 0 takes
/// angles up to and including `edge[0]`. Pixels outside the band never touch
/// the bins or the axis.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] for differing shapes and
/// [`Error::InvalidParameter`] for `bins == 0`.
pub fn angular_profile(
    image: &Array2<f64>,
    phi: &Array2<f64>,
    rr: &Array2<f64>,
    r1: f64,
    r2: f64,
    sigma: f64,
    bins: usize,
) -> Result<AngularProfile> {
    check_shape(image, phi)?;
    check_shape(image, rr)?;
    if bins == 0 {
        return Err(Error::invalid_parameter("bins", "must be at least 1"));
    }

    let (lo, hi) = min_max(phi.iter().copied());
    let phi_axis = Array1::linspace(lo, hi, bins);
    let edges = phi_axis.as_slice().unwrap_or(&[]);
    let mut sums = Array1::<f64>::zeros(bins);
    let mut counts = Array1::<u64>::zeros(bins);

    Zip::from(image)
        .and(phi)
        .and(rr)
        .for_each(|&value, &angle, &r| {
            if r < r1 || r > r2 {
                return;
            }
            // First edge >= angle; linspace guarantees the last edge is the maximum.
            let bin = edges.partition_point(|&edge| edge < angle).min(bins - 1);
            sums[bin] += value;
            counts[bin] += 1;
        });

    Ok(AngularProfile {
        phi_axis,
        intensity: smooth(sums, sigma),
        counts,
    })
}

fn smooth(profile: Array1<f64>, sigma: f64) -> Array1<f64> {
    if sigma > 0.0 {
        gaussian_filter1d(profile.view(), sigma)
    } else {
        profile
    }
}

fn check_shape(image: &Array2<f64>, other: &Array2<f64>) -> Result<()> {
    if image.dim() == other.dim() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: image.dim(),
            found: other.dim(),
        })
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo > hi {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_relative_eq;
    use giwaxs_core::{BeamCenter, Geometry};
    use ndarray::array;

    #[test]
    fn test_radial_profile_bins_by_floor() {
        let image = array![[1.0, 2.0, 3.0, 4.0]];
        let rr = array![[0.0, 0.5, 1.2, 3.9]];
        let profile = radial_profile(&image, &rr, 0.0).unwrap();
        assert_eq!(profile, array![1.5, 3.0, 0.0, 4.0]);
    }

    #[test]
    fn test_radial_profile_shape_mismatch() {
        let image = Array2::zeros((2, 2));
        let rr = Array2::zeros((2, 3));
        assert!(matches!(
            radial_profile(&image, &rr, 0.0),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_radial_profile_of_symmetric_image() {
        let geometry = Geometry::compute((61, 61), BeamCenter::new(30.0, 30.0));
        let image = geometry.rr.mapv(|r| 100.0 - r);
        let profile = radial_profile(&image, &geometry.rr, 0.0).unwrap();
        for (k, value) in profile.iter().enumerate().take(30).skip(1) {
            // Mean of 100 - r over r in [k, k + 1).
            assert!((value - (100.0 - k as f64 - 0.5)).abs() < 0.5, "bin {k}: {value}");
        }
    }

    #[test]
    fn test_radial_axis_scaled() {
        let rr = array![[0.0, 2.0], [4.0, 8.0]];
        let axis = radial_axis(&rr, 5, 0.5);
        assert_eq!(axis, array![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_angular_profile_bin_edges() {
        let image = array![[1.0, 2.0, 3.0, 4.0]];
        let phi = array![[0.0, 0.4, 0.5, 1.0]];
        let rr = Array2::ones((1, 4));
        let profile = angular_profile(&image, &phi, &rr, 0.0, 2.0, 0.0, 3).unwrap();
        assert_eq!(profile.phi_axis, array![0.0, 0.5, 1.0]);
        // (.., 0] -> 1; (0, 0.5] -> 2 + 3; (0.5, 1] -> 4
        assert_eq!(profile.intensity, array![1.0, 5.0, 4.0]);
        assert_eq!(profile.counts, array![1, 2, 1]);
    }

    #[test]
    fn test_angular_profile_excludes_outside_band() {
        let geometry = Geometry::compute((41, 41), BeamCenter::new(20.0, 20.0));
        let image = geometry
            .rr
            .mapv(|r| if (8.0..=12.0).contains(&r) { 7.0 } else { 1000.0 });
        let profile = angular_profile(&image, &geometry.phi, &geometry.rr, 8.0, 12.0, 0.0, 36)
            .unwrap();
        for (mean, &count) in profile.mean().iter().zip(&profile.counts) {
            if count > 0 {
                assert_relative_eq!(*mean, 7.0);
            }
        }
        let total: u64 = profile.counts.sum();
        let in_band = geometry
            .rr
            .iter()
            .filter(|&&r| (8.0..=12.0).contains(&r))
            .count() as u64;
        assert_eq!(total, in_band);
    }

    #[test]
    fn test_angular_profile_rejects_zero_bins() {
        let a = Array2::zeros((2, 2));
        assert!(angular_profile(&a, &a, &a, 0.0, 1.0, 0.0, 0).is_err());
    }
}
