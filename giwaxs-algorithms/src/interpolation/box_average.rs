//! Box-average polar interpolation.
//!
//! Instead of sampling the image at each output cell, every source pixel is
//! pushed into all output cells whose centers lie within half a window of
//! its `(r, phi)` position. Each cell ends up holding the mean of the pixels
//! that reached it.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::f64::consts::TAU;

use giwaxs_core::error::Result;
use giwaxs_core::Geometry;
use ndarray::{Array2, ArrayView1, Zip};

use super::{check_image, InterpolationGeometry, InterpolationKernel};

/// Window used when none is configured, in output steps.
const DEFAULT_WINDOW_STEPS: f64 = 2.0;

/// Box-average kernel.
///
/// Windows are full widths in physical units: pixels for the radius axis and
/// radians for the angle axis. `None` selects two output steps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoxInterpolation {
    r_window: Option<f64>,
    phi_window: Option<f64>,
}

impl BoxInterpolation {
    /// Kernel with the default windows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the radial window (pixels).
    #[must_use]
    pub fn with_r_window(mut self, window: f64) -> Self {
        self.r_window = Some(window);
        self
    }

    /// Sets the angular window (radians).
    #[must_use]
    pub fn with_phi_window(mut self, window: f64) -> Self {
        self.phi_window = Some(window);
        self
    }

    /// Accumulates `image` onto a `(phi_size, r_size)` grid.
    ///
    /// The radius axis starts at 0 with step `rr.max / r_size`; the angle axis
    /// starts at `phi.min` with step `(phi.max - phi.min) / phi_size`. Windows
    /// crossing the +-pi seam wrap around only when the image covers the full
    /// circle; otherwise they are clipped to the axis.
    ///
    /// # Errors
    /// Returns [`giwaxs_core::Error::ShapeMismatch`] if `image` does not match `geometry`.
    pub fn accumulate(
        &self,
        image: &Array2<f64>,
        geometry: &Geometry,
        r_size: usize,
        phi_size: usize,
    ) -> Result<Array2<f64>> {
        let (_, r_max) = geometry.radius_range();
        let (p_min, p_max) = geometry.angle_range();
        let r_axis = Axis::new(0.0, r_max / r_size as f64, r_size);
        let p_axis = Axis::new(p_min, (p_max - p_min) / phi_size as f64, phi_size);
        self.accumulate_on(image, geometry, r_axis, p_axis)
    }

    fn accumulate_on(
        &self,
        image: &Array2<f64>,
        geometry: &Geometry,
        r_axis: Axis,
        p_axis: Axis,
    ) -> Result<Array2<f64>> {
        check_image(image, geometry)?;
        let (r_size, phi_size) = (r_axis.len, p_axis.len);
        let mut sums = Array2::<f64>::zeros((phi_size, r_size));
        if r_size == 0 || phi_size == 0 {
            return Ok(sums);
        }
        let mut counts = Array2::<u32>::zeros((phi_size, r_size));

        let (p_min, p_max) = geometry.angle_range();
        let r_half = self.r_window.unwrap_or(DEFAULT_WINDOW_STEPS * r_axis.step) / 2.0 / r_axis.step;
        let p_half = self.phi_window.unwrap_or(DEFAULT_WINDOW_STEPS * p_axis.step) / 2.0 / p_axis.step;
        let full_circle = TAU - (p_max - p_min) <= 2.0 * p_axis.step;

        Zip::from(image)
            .and(&geometry.rr)
            .and(&geometry.phi)
            .for_each(|&value, &r, &phi| {
                let Some((r_lo, r_hi)) = window_indices(r_axis.position(r), r_half, r_size) else {
                    return;
                };
                let p_pos = p_axis.position(phi);
                let p_range = if full_circle {
                    Some(((p_pos - p_half).ceil() as isize, (p_pos + p_half).floor() as isize))
                } else {
                    window_indices(p_pos, p_half, phi_size)
                        .map(|(lo, hi)| (lo as isize, hi as isize))
                };
                let Some((p_lo, p_hi)) = p_range else {
                    return;
                };
                for k in p_lo..=p_hi {
                    let row = k.rem_euclid(phi_size as isize) as usize;
                    for col in r_lo..=r_hi {
                        sums[[row, col]] += value;
                        counts[[row, col]] += 1;
                    }
                }
            });

        Zip::from(&mut sums).and(&counts).for_each(|s, &c| {
            if c > 0 {
                *s /= f64::from(c);
            }
        });
        Ok(sums)
    }
}

impl InterpolationKernel for BoxInterpolation {
    fn name(&self) -> &'static str {
        "Box"
    }

    /// Averages onto the cells of `grid`, so the result lines up with
    /// `grid.r` and `grid.p` like the point-sample kernels.
    fn interpolate(
        &self,
        image: &Array2<f64>,
        geometry: &Geometry,
        grid: &InterpolationGeometry,
    ) -> Result<Array2<f64>> {
        self.accumulate_on(
            image,
            geometry,
            Axis::from_samples(grid.r.view()),
            Axis::from_samples(grid.p.view()),
        )
    }
}

/// Regular output axis: cell `i` is centered at `start + i * step`.
#[derive(Debug, Clone, Copy)]
struct Axis {
    start: f64,
    step: f64,
    len: usize,
}

impl Axis {
    fn new(start: f64, step: f64, len: usize) -> Self {
        Self {
            start,
            step: positive_step(step),
            len,
        }
    }

    /// Axis through evenly spaced samples.
    fn from_samples(samples: ArrayView1<'_, f64>) -> Self {
        let len = samples.len();
        match len {
            0 => Self::new(0.0, 1.0, 0),
            1 => Self::new(samples[0], 1.0, 1),
            _ => Self::new(
                samples[0],
                (samples[len - 1] - samples[0]) / (len - 1) as f64,
                len,
            ),
        }
    }

    fn position(self, value: f64) -> f64 {
        (value - self.start) / self.step
    }
}

fn positive_step(step: f64) -> f64 {
    if step > 0.0 && step.is_finite() {
        step
    } else {
        1.0
    }
}

/// Output indices whose centers lie within `half` of `pos`, clipped to
/// `0..n`. `None` when the window misses the axis.
fn window_indices(pos: f64, half: f64, n: usize) -> Option<(usize, usize)> {
    let lo = (pos - half).ceil().max(0.0);
    let hi = (pos + half).floor().min(n as f64 - 1.0);
    if lo.is_nan() || hi.is_nan() || lo > hi {
        return None;
    }
    Some((lo as usize, hi as usize))
}
