//! One-dimensional Gaussian smoothing.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use ndarray::{Array1, ArrayView1};

/// Kernel half-width in units of sigma.
const TRUNCATE: f64 = 4.0;

/// Smooths `signal` with a normalized Gaussian of standard deviation `sigma`
/// (in samples).
///
/// The kernel is truncated at `4 sigma`; samples beyond either end are
/// mirrored about the edge (`d c b a | a b c d | d c b a`). A non-positive
/// sigma returns the input unchanged.
#[must_use]
pub fn gaussian_filter1d(signal: ArrayView1<'_, f64>, sigma: f64) -> Array1<f64> {
    let n = signal.len();
    if n == 0 || sigma.is_nan() || sigma <= 0.0 {
        return signal.to_owned();
    }
    let weights = gaussian_kernel(sigma);
    let radius = (weights.len() / 2) as isize;

    Array1::from_shape_fn(n, |i| {
        weights
            .iter()
            .enumerate()
            .map(|(k, &w)| {
                let j = i as isize + k as isize - radius;
                w * signal[reflect_index(j, n)]
            })
            .sum()
    })
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let inv = -0.5 / (sigma * sigma);
    let mut weights: Vec<f64> = (-radius..=radius)
        .map(|x| (inv * (x * x) as f64).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

/// Maps any index onto `0..n` by half-sample symmetric reflection.
fn reflect_index(index: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let mut i = index.rem_euclid(period);
    if i >= n as isize {
        i = period - 1 - i;
    }
    i as usize
}
