//! Polar geometry of a detector image around the beam center.
#![allow(clippy::cast_precision_loss)]

use ndarray::Array2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Beam center in floating-point pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BeamCenter {
    /// Row (y) coordinate.
    pub row: f64,
    /// Column (x) coordinate.
    pub col: f64,
}

impl BeamCenter {
    /// Creates a beam center at (row, col).
    #[must_use]
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Returns true if both coordinates are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.row.is_finite() && self.col.is_finite()
    }
}

impl From<(f64, f64)> for BeamCenter {
    fn from((row, col): (f64, f64)) -> Self {
        Self::new(row, col)
    }
}

/// Center angle and angular extent of the image in degrees.
///
/// Used to orient full-ring ROIs to the detector's actual coverage, which is
/// less than a full circle when the beam center sits near an edge.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RingAngles {
    /// Center angle (degrees).
    pub angle: f64,
    /// Angular width (degrees).
    pub angle_std: f64,
}

/// Per-pixel offsets, radius and azimuth relative to the beam center.
///
/// All maps share the image shape `(height, width)`.
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Column offset from the beam center.
    pub xx: Array2<f64>,
    /// Row offset from the beam center.
    pub yy: Array2<f64>,
    /// Euclidean distance to the beam center (pixels).
    pub rr: Array2<f64>,
    /// `atan2(yy, xx)` in radians, within (-pi, pi].
    pub phi: Array2<f64>,
    /// Beam center the maps were computed for.
    pub beam_center: BeamCenter,
    r_range: (f64, f64),
    phi_range: (f64, f64),
}

impl Geometry {
    /// Computes the geometry maps for an image of `shape = (height, width)`.
    #[must_use]
    pub fn compute(shape: (usize, usize), beam_center: BeamCenter) -> Self {
        let xx = Array2::from_shape_fn(shape, |(_, j)| j as f64 - beam_center.col);
        let yy = Array2::from_shape_fn(shape, |(i, _)| i as f64 - beam_center.row);
        let mut rr = Array2::zeros(shape);
        let mut phi = Array2::zeros(shape);

        ndarray::Zip::from(&mut rr)
            .and(&mut phi)
            .and(&xx)
            .and(&yy)
            .for_each(|r, p, &x, &y| {
                *r = x.hypot(y);
                *p = y.atan2(x);
            });

        let r_range = min_max(&rr);
        let phi_range = min_max(&phi);

        Self {
            xx,
            yy,
            rr,
            phi,
            beam_center,
            r_range,
            phi_range,
        }
    }

    /// Image shape `(height, width)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.rr.dim()
    }

    /// Minimum and maximum radius (pixels).
    #[must_use]
    pub fn radius_range(&self) -> (f64, f64) {
        self.r_range
    }

    /// Minimum and maximum azimuth (radians).
    #[must_use]
    pub fn angle_range(&self) -> (f64, f64) {
        self.phi_range
    }

    /// Center angle and angular extent covered by the image.
    #[must_use]
    pub fn ring_angles(&self) -> RingAngles {
        let (lo, hi) = self.phi_range;
        RingAngles {
            angle: (hi + lo).to_degrees() / 2.0,
            angle_std: (hi - lo).to_degrees(),
        }
    }
}

/// Minimum and maximum of a non-empty array; `(0, 0)` when empty.
pub(crate) fn min_max(values: &Array2<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_maps_share_image_shape() {
        let geometry = Geometry::compute((7, 11), BeamCenter::new(2.5, 3.0));
        assert_eq!(geometry.shape(), (7, 11));
        assert_eq!(geometry.rr.dim(), (7, 11));
        assert_eq!(geometry.phi.dim(), (7, 11));
        assert_eq!(geometry.xx.dim(), (7, 11));
        assert_eq!(geometry.yy.dim(), (7, 11));
    }

    #[test]
    fn test_radius_zero_at_integer_center() {
        let geometry = Geometry::compute((20, 30), BeamCenter::new(5.0, 12.0));
        assert_relative_eq!(geometry.rr[[5, 12]], 0.0);
        assert_relative_eq!(geometry.rr[[5, 15]], 3.0);
        assert_relative_eq!(geometry.rr[[9, 15]], 5.0);
        assert_relative_eq!(geometry.radius_range().0, 0.0);
    }

    #[test]
    fn test_offsets_and_angles() {
        let geometry = Geometry::compute((10, 10), BeamCenter::new(4.0, 4.0));
        assert_relative_eq!(geometry.xx[[0, 9]], 5.0);
        assert_relative_eq!(geometry.yy[[0, 9]], -4.0);
        // Row below the center lies at +pi/2 (y grows downward).
        assert_relative_eq!(geometry.phi[[8, 4]], PI / 2.0);
        assert_relative_eq!(geometry.phi[[4, 0]], PI);
        assert_relative_eq!(geometry.phi[[4, 9]], 0.0);
    }

    #[test]
    fn test_ring_angles_full_circle() {
        let geometry = Geometry::compute((21, 21), BeamCenter::new(10.0, 10.0));
        let angles = geometry.ring_angles();
        assert!(angles.angle_std > 300.0);
        assert!(angles.angle.abs() < 10.0);
    }

    #[test]
    fn test_ring_angles_corner_center() {
        // Beam center at the top-left corner: only the lower-right quadrant is covered.
        let geometry = Geometry::compute((10, 10), BeamCenter::new(0.0, 0.0));
        let angles = geometry.ring_angles();
        assert_relative_eq!(angles.angle, 45.0, epsilon = 1e-9);
        assert_relative_eq!(angles.angle_std, 90.0, epsilon = 1e-9);
    }
}
