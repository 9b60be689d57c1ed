//! giwaxs-algorithms: Numerical processing for GIWAXS images.
//!
//! This crate provides the algorithms operating on an image context:
//! - **Interpolation** - cartesian to polar remapping (point kernels and box average)
//! - **Profiles** - radial and angular reductions
//! - **Peaks** - local maxima with prominence and distance filters
//! - **Fitting** - bounded Levenberg-Marquardt Gaussian fits of ring ROIs
//! - **Baseline** - asymmetric least squares background estimation
//!
#![warn(missing_docs)]

pub mod baseline;
pub mod fit;
pub mod interpolation;
pub mod lm;
pub mod peaks;
mod processing;
pub mod profile;
pub mod smoothing;

pub use baseline::{baseline_in_range, fit_baseline, BaselineSession, BaselineState};
pub use fit::{gauss, multi_gauss, PeakFitter};
pub use interpolation::{
    remap, BoxInterpolation, InterpolationGeometry, InterpolationKernel, PointRemap,
    PolarInterpolator,
};
pub use lm::{LevenbergMarquardt, LmOptions, LmReport, Model};
pub use peaks::{find_peaks, PeakSearch};
pub use processing::{
    fit_selected, fit_signals, fit_together, proposal_signals, propose_rings, RadialProfile,
};
pub use profile::{angular_profile, radial_axis, radial_profile, AngularProfile};
pub use smoothing::gaussian_filter1d;

// Re-export core configuration used by the algorithms
pub use giwaxs_core::{BaselineConfig, FitConfig, InterpolationConfig, InterpolationMode};
