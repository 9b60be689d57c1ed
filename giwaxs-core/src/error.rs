//! Error types for giwaxs-core.

use thiserror::Error;

/// Result type alias for giwaxs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for giwaxs operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Arrays that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A parameter value is outside its valid domain.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Interpolation mode name not recognized.
    #[error("unknown interpolation mode: {0}")]
    UnknownInterpolationMode(String),

    /// Image transformation name not recognized.
    #[error("unknown image transformation: {0}")]
    UnknownTransformation(String),

    /// No ROI with this key is registered.
    #[error("unknown ROI key: {0}")]
    UnknownRoi(u32),

    /// Fitting error.
    #[error("fit error: {0}")]
    Fit(#[from] FitError),

    /// Baseline correction error.
    #[error("baseline error: {0}")]
    Baseline(#[from] BaselineError),
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`].
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Peak fitting errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    /// Joint fit requested for more peaks than the solver accepts.
    #[error("the maximum number of peaks for a joint fit is {max}, got {requested}")]
    TooManyPeaks { requested: usize, max: usize },

    /// The ROI band selects no profile points.
    #[error("ROI band [{min}, {max}] selects no profile points")]
    EmptyRegion { min: f64, max: f64 },

    /// Fewer data points than free parameters.
    #[error("{points} data points cannot constrain {parameters} parameters")]
    Underdetermined { points: usize, parameters: usize },

    /// Solver ran out of evaluations.
    #[error("fit did not converge after {evaluations} evaluations")]
    NotConverged { evaluations: usize },

    /// Model or residuals became non-finite.
    #[error("fit produced non-finite values")]
    NonFinite,

    /// Profile and axis lengths differ.
    #[error("profile length {profile} does not match axis length {axis}")]
    AxisMismatch { profile: usize, axis: usize },
}

/// Baseline correction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BaselineError {
    /// Region too short for the second-difference operator.
    #[error("baseline region has {len} points, at least {min} required")]
    RegionTooSmall { len: usize, min: usize },

    /// Region bounds fall outside the signal.
    #[error("baseline region [{x1}, {x2}] is invalid for a signal of length {len}")]
    InvalidRange { x1: usize, x2: usize, len: usize },

    /// Smoothness or asymmetry outside its domain.
    #[error("invalid baseline parameter: {0}")]
    InvalidParameter(String),

    /// Linear system lost positive definiteness.
    #[error("baseline system is singular")]
    Singular,

    /// Session action not allowed in the current state.
    #[error("cannot {action} while baseline is {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}
