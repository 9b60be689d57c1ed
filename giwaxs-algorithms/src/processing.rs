//! High-level helpers that combine profile reduction, peak search and fitting.

use giwaxs_core::error::{FitError, Result};
use giwaxs_core::{
    FitConfig, ImageContext, NodeId, RoiParameters, Routing, Signal, SignalKind, SignalPayload,
};
use log::{info, warn};
use ndarray::Array1;

use crate::fit::PeakFitter;
use crate::peaks::{find_peaks, PeakSearch};
use crate::profile::{radial_axis, radial_profile};
use crate::smoothing::gaussian_filter1d;

/// Radial profile with its physical axis.
#[derive(Debug, Clone, PartialEq)]
pub struct RadialProfile {
    /// Physical radius per bin.
    pub x: Array1<f64>,
    /// Mean intensity per bin.
    pub y: Array1<f64>,
    /// Physical units per pixel.
    pub scale: f64,
}

impl RadialProfile {
    /// Radial profile of the current image, smoothed with `sigma` bins.
    ///
    /// Returns `Ok(None)` when the context has no image.
    ///
    /// # Errors
    /// Propagates [`giwaxs_core::Error::ShapeMismatch`].
    pub fn from_context(context: &ImageContext, sigma: f64) -> Result<Option<Self>> {
        let (Some(image), Some(rr)) = (context.image(), context.rr()) else {
            return Ok(None);
        };
        let y = radial_profile(image, rr, sigma)?;
        let x = radial_axis(rr, y.len(), context.scale());
        Ok(Some(Self {
            x,
            y,
            scale: context.scale(),
        }))
    }

    /// Profile values smoothed with `sigma`, or as computed when `None`.
    #[must_use]
    pub fn smoothed(&self, sigma: Option<f64>) -> Array1<f64> {
        match sigma {
            Some(sigma) => gaussian_filter1d(self.y.view(), sigma),
            None => self.y.clone(),
        }
    }
}

/// Proposes one ring ROI per peak of the profile.
///
/// The profile is smoothed with `sigma_find` first. Each ROI has radius
/// `peak * scale`, width `init_width * scale` and the name
/// `Proposed ring {i}`. At most `max_peaks_number` ROIs are returned, the most
/// prominent peaks first in line.
#[must_use]
pub fn propose_rings(profile: &RadialProfile, config: &FitConfig) -> Vec<RoiParameters> {
    let smoothed = profile.smoothed(config.sigma_find);
    let all = find_peaks(smoothed.view(), &PeakSearch::new());
    if all.len() > config.max_peaks_number {
        warn!(
            "found {} peaks, keeping the {} most prominent; increase sigma_find to suppress noise",
            all.len(),
            config.max_peaks_number
        );
    }
    let search = PeakSearch::new().with_max_peaks(config.max_peaks_number);
    let peaks = find_peaks(smoothed.view(), &search);
    info!("proposing {} rings", peaks.len());
    peaks
        .into_iter()
        .enumerate()
        .map(|(i, peak)| {
            #[allow(clippy::cast_precision_loss)]
            let radius = peak as f64 * profile.scale;
            RoiParameters::new(radius, config.init_width * profile.scale)
                .with_name(format!("Proposed ring {i}"))
        })
        .collect()
}

/// Fits each ROI on its own.
///
/// The profile is smoothed with `sigma_fit` first. ROIs that fail to fit are
/// logged and left out of the result.
#[must_use]
pub fn fit_selected(
    profile: &RadialProfile,
    rois: &[RoiParameters],
    config: &FitConfig,
) -> Vec<RoiParameters> {
    let y = profile.smoothed(config.sigma_fit);
    let fitter = match PeakFitter::new(profile.x.view(), y.view(), profile.scale) {
        Ok(fitter) => fitter,
        Err(err) => {
            warn!("cannot fit: {err}");
            return Vec::new();
        }
    };
    rois.iter()
        .filter_map(|roi| match fitter.fit_roi(roi) {
            Ok(fitted) => Some(fitted),
            Err(err) => {
                warn!("skipping ROI {:?}: {err}", roi.key);
                None
            }
        })
        .collect()
}

/// Fits all ROIs jointly as a sum of Gaussians.
///
/// # Errors
/// Returns [`FitError::TooManyPeaks`] for more than
/// [`FitConfig::MAX_JOINT_PEAKS`] ROIs, or the solver error.
pub fn fit_together(
    profile: &RadialProfile,
    rois: &[RoiParameters],
    config: &FitConfig,
) -> std::result::Result<Vec<RoiParameters>, FitError> {
    let y = profile.smoothed(config.sigma_fit);
    PeakFitter::new(profile.x.view(), y.view(), profile.scale)?.fit_joint(rois)
}

/// `SegmentCreated` signals announcing proposed ROIs.
#[must_use]
pub fn proposal_signals(rois: &[RoiParameters], sender: Option<NodeId>) -> Vec<Signal> {
    rois.iter()
        .map(|roi| Signal::new(SignalKind::SegmentCreated, SignalPayload::Roi(roi.clone()), sender))
        .collect()
}

/// Signals publishing fit results: every ROI is moved, including back to
/// the sender, then fixed.
#[must_use]
pub fn fit_signals(fitted: &[RoiParameters], sender: Option<NodeId>) -> Vec<Signal> {
    fitted
        .iter()
        .flat_map(|roi| {
            [
                Signal::new(SignalKind::SegmentMoved, SignalPayload::Roi(roi.clone()), sender)
                    .with_routing(Routing::Broadcast),
                Signal::new(SignalKind::SegmentFixed, SignalPayload::Roi(roi.clone()), sender),
            ]
        })
        .collect()
}
