//! Peak detection on one-dimensional profiles.

use ndarray::ArrayView1;

/// Optional filters applied after local-maximum detection.
///
/// All filters are off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeakSearch {
    /// Minimum topographic prominence of a kept peak.
    pub min_prominence: Option<f64>,
    /// Minimum index distance between kept peaks; taller peaks win.
    pub min_distance: Option<usize>,
    /// Keep at most this many peaks, the most prominent ones.
    pub max_peaks: Option<usize>,
}

impl PeakSearch {
    /// Creates a search without filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum prominence.
    #[must_use]
    pub fn with_min_prominence(mut self, prominence: f64) -> Self {
        self.min_prominence = Some(prominence);
        self
    }

    /// Sets the minimum peak distance (samples).
    #[must_use]
    pub fn with_min_distance(mut self, distance: usize) -> Self {
        self.min_distance = Some(distance);
        self
    }

    /// Caps the number of returned peaks.
    #[must_use]
    pub fn with_max_peaks(mut self, max_peaks: usize) -> Self {
        self.max_peaks = Some(max_peaks);
        self
    }
}

/// Indices of the peaks of `profile`, ascending.
///
/// A sample is a peak if both neighbours are strictly lower. A flat top
/// bounded by strictly lower samples counts once, at its middle index
/// (rounded down). Maxima touching either end of the array are never peaks.
/// Distance, prominence and count filters are applied in that order.
#[must_use]
pub fn find_peaks(profile: ArrayView1<'_, f64>, search: &PeakSearch) -> Vec<usize> {
    let mut peaks = local_maxima(profile);

    if let Some(distance) = search.min_distance.filter(|&d| d > 1) {
        peaks = select_by_distance(profile, &peaks, distance);
    }
    if let Some(min_prominence) = search.min_prominence {
        let prominences = peak_prominences(profile, &peaks);
        peaks = peaks
            .into_iter()
            .zip(prominences)
            .filter(|&(_, p)| p >= min_prominence)
            .map(|(i, _)| i)
            .collect();
    }
    if let Some(max_peaks) = search.max_peaks {
        if peaks.len() > max_peaks {
            let prominences = peak_prominences(profile, &peaks);
            let mut ranked: Vec<(usize, f64)> = peaks.into_iter().zip(prominences).collect();
            ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
            ranked.truncate(max_peaks);
            peaks = ranked.into_iter().map(|(i, _)| i).collect();
            peaks.sort_unstable();
        }
    }
    peaks
}

/// Local maxima including the middle of flat tops.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn local_maxima(profile: ArrayView1<'_, f64>) -> Vec<usize> {
    let n = profile.len();
    let mut peaks = Vec::new();
    if n < 3 {
        return peaks;
    }
    let mut i = 1;
    let last = n - 1;
    while i < last {
        if profile[i - 1] < profile[i] {
            let mut ahead = i + 1;
            while ahead < last && profile[ahead] == profile[i] {
                ahead += 1;
            }
            if profile[ahead] < profile[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence of each peak: height above the higher of the two lowest points
/// reached before a taller sample (or the array end) on either side.
#[must_use]
pub fn peak_prominences(profile: ArrayView1<'_, f64>, peaks: &[usize]) -> Vec<f64> {
    peaks
        .iter()
        .map(|&peak| {
            let height = profile[peak];
            let mut left_min = height;
            for i in (0..peak).rev() {
                if profile[i] > height {
                    break;
                }
                left_min = left_min.min(profile[i]);
            }
            let mut right_min = height;
            for i in peak + 1..profile.len() {
                if profile[i] > height {
                    break;
                }
                right_min = right_min.min(profile[i]);
            }
            height - left_min.max(right_min)
        })
        .collect()
}

fn select_by_distance(profile: ArrayView1<'_, f64>, peaks: &[usize], distance: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    // Tallest first; ties keep the later peak first.
    order.sort_by(|&a, &b| {
        profile[peaks[b]]
            .total_cmp(&profile[peaks[a]])
            .then(b.cmp(&a))
    });
    let mut keep = vec![true; peaks.len()];
    for &idx in &order {
        if !keep[idx] {
            continue;
        }
        let pos = peaks[idx];
        for (other, flag) in keep.iter_mut().enumerate() {
            if other != idx && peaks[other].abs_diff(pos) < distance {
                *flag = false;
            }
        }
    }
    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, k)| k.then_some(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_simple_maxima() {
        let y = array![0.0, 1.0, 0.0, 2.0, 3.0, 1.0, 0.0];
        assert_eq!(find_peaks(y.view(), &PeakSearch::new()), vec![1, 4]);
    }

    #[test]
    fn test_plateau_counts_once_at_middle() {
        let y = array![0.0, 2.0, 2.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(y.view()), vec![2]);
        let y = array![0.0, 2.0, 2.0, 2.0, 0.0];
        assert_eq!(local_maxima(y.view()), vec![2]);
    }

    #[test]
    fn test_boundary_and_flat_are_not_peaks() {
        assert!(local_maxima(array![3.0, 2.0, 1.0].view()).is_empty());
        assert!(local_maxima(array![1.0, 2.0, 2.0].view()).is_empty());
        assert!(local_maxima(array![1.0, 1.0, 1.0, 1.0].view()).is_empty());
        // Step up then flat to the end.
        assert!(local_maxima(array![0.0, 1.0, 2.0, 2.0].view()).is_empty());
    }

    #[test]
    fn test_prominence() {
        let y = array![0.0, 5.0, 1.0, 3.0, 0.5, 0.0];
        let peaks = local_maxima(y.view());
        assert_eq!(peaks, vec![1, 3]);
        let prom = peak_prominences(y.view(), &peaks);
        assert_relative_eq!(prom[0], 5.0);
        assert_relative_eq!(prom[1], 2.0);

        let search = PeakSearch::new().with_min_prominence(2.5);
        assert_eq!(find_peaks(y.view(), &search), vec![1]);
    }

    #[test]
    fn test_distance_keeps_taller() {
        let y = array![0.0, 2.0, 0.0, 3.0, 0.0, 1.0, 0.0];
        let search = PeakSearch::new().with_min_distance(3);
        assert_eq!(find_peaks(y.view(), &search), vec![3]);
        let search = PeakSearch::new().with_min_distance(2);
        assert_eq!(find_peaks(y.view(), &search), vec![1, 3, 5]);
    }

    #[test]
    fn test_max_peaks_keeps_most_prominent_in_order() {
        let y = array![0.0, 1.0, 0.0, 4.0, 0.0, 2.0, 0.0];
        let search = PeakSearch::new().with_max_peaks(2);
        assert_eq!(find_peaks(y.view(), &search), vec![3, 5]);
    }
}
