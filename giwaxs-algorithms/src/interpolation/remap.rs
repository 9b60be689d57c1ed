//! Point-sample remapping with separable kernels.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::f64::consts::PI;

use giwaxs_core::error::Result;
use giwaxs_core::{Geometry, InterpolationMode};
use ndarray::Array2;
use rayon::prelude::*;

use super::{check_image, InterpolationGeometry, InterpolationKernel};

const CUBIC_A: f64 = -0.75;
const MAX_TAPS: usize = 8;

/// Resamples `image` at the grid's source coordinates.
///
/// Taps falling outside the image contribute zero; the result is not
/// renormalized.
#[must_use]
pub fn remap(image: &Array2<f64>, grid: &InterpolationGeometry, mode: InterpolationMode) -> Array2<f64> {
    PointRemap::new(mode).resample(image, grid)
}

/// Point-sample kernel: every output cell reads the source image around its
/// own source coordinate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointRemap {
    mode: InterpolationMode,
    parallel: bool,
}

impl PointRemap {
    /// Sequential kernel using `mode`.
    #[must_use]
    pub fn new(mode: InterpolationMode) -> Self {
        Self {
            mode,
            parallel: false,
        }
    }

    /// Distributes output rows over the rayon pool.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Kernel selected for this remap.
    #[must_use]
    pub fn mode(&self) -> InterpolationMode {
        self.mode
    }

    fn resample(&self, image: &Array2<f64>, grid: &InterpolationGeometry) -> Array2<f64> {
        let (rows, cols) = grid.shape();
        if rows == 0 || cols == 0 {
            return Array2::zeros((rows, cols));
        }
        let fill_row = |(i, row): (usize, &mut [f64])| {
            for (j, out) in row.iter_mut().enumerate() {
                *out = sample(image, grid.yy[[i, j]], grid.xx[[i, j]], self.mode);
            }
        };

        let mut data = vec![0.0; rows * cols];
        if self.parallel {
            data.par_chunks_mut(cols).enumerate().for_each(fill_row);
        } else {
            data.chunks_mut(cols).enumerate().for_each(fill_row);
        }
        Array2::from_shape_vec((rows, cols), data).unwrap_or_else(|_| Array2::zeros((rows, cols)))
    }
}

impl InterpolationKernel for PointRemap {
    fn name(&self) -> &'static str {
        self.mode.name()
    }

    fn interpolate(
        &self,
        image: &Array2<f64>,
        geometry: &Geometry,
        grid: &InterpolationGeometry,
    ) -> Result<Array2<f64>> {
        check_image(image, geometry)?;
        Ok(self.resample(image, grid))
    }
}

/// Separable tap weights along one axis.
struct Taps {
    /// Index of the first tap.
    start: isize,
    len: usize,
    weights: [f64; MAX_TAPS],
}

impl Taps {
    fn new(coord: f64, mode: InterpolationMode) -> Self {
        let mut weights = [0.0; MAX_TAPS];
        match mode {
            InterpolationMode::Nearest => {
                weights[0] = 1.0;
                Self {
                    start: coord.round() as isize,
                    len: 1,
                    weights,
                }
            }
            InterpolationMode::Bilinear => {
                let base = coord.floor();
                let t = coord - base;
                weights[0] = 1.0 - t;
                weights[1] = t;
                Self {
                    start: base as isize,
                    len: 2,
                    weights,
                }
            }
            InterpolationMode::Cubic => {
                let base = coord.floor();
                weights[..4].copy_from_slice(&cubic_weights(coord - base));
                Self {
                    start: base as isize - 1,
                    len: 4,
                    weights,
                }
            }
            InterpolationMode::Lanczos => {
                let base = coord.floor();
                weights = lanczos4_weights(coord - base);
                Self {
                    start: base as isize - 3,
                    len: MAX_TAPS,
                    weights,
                }
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = (isize, f64)> + '_ {
        self.weights[..self.len]
            .iter()
            .enumerate()
            .map(move |(k, &w)| (self.start + k as isize, w))
    }
}

fn sample(image: &Array2<f64>, row: f64, col: f64, mode: InterpolationMode) -> f64 {
    if !row.is_finite() || !col.is_finite() {
        return 0.0;
    }
    let (height, width) = image.dim();
    let row_taps = Taps::new(row, mode);
    let col_taps = Taps::new(col, mode);

    let mut value = 0.0;
    for (r, wr) in row_taps.iter() {
        if r < 0 || r as usize >= height || wr == 0.0 {
            continue;
        }
        for (c, wc) in col_taps.iter() {
            if c < 0 || c as usize >= width {
                continue;
            }
            value += wr * wc * image[[r as usize, c as usize]];
        }
    }
    value
}

/// Keys cubic convolution weights for taps at offsets -1, 0, 1, 2.
fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let w1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let u = 1.0 - t;
    let w2 = ((a + 2.0) * u - (a + 3.0)) * u * u + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

/// Normalized Lanczos-4 weights for taps at offsets -3..=4.
fn lanczos4_weights(t: f64) -> [f64; MAX_TAPS] {
    let mut weights = [0.0; MAX_TAPS];
    if t < f64::from(f32::EPSILON) {
        weights[3] = 1.0;
        return weights;
    }
    let mut total = 0.0;
    for (k, w) in weights.iter_mut().enumerate() {
        let d = t + 3.0 - k as f64;
        *w = sinc(d) * sinc(d / 4.0);
        total += *w;
    }
    for w in &mut weights {
        *w /= total;
    }
    weights
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}
