//! giwaxs-core: Core types for GIWAXS detector image analysis.
//!
//! This crate provides the data model shared by the processing crates:
//! polar geometry, the image context, regions of interest, algorithm
//! configuration with its parameter schemas, and the signal bus.
//!

pub mod config;
pub mod error;
pub mod geometry;
pub mod image;
pub mod params;
pub mod roi;
pub mod signal;

pub use config::{BaselineConfig, FitConfig, InterpolationConfig, InterpolationMode};
pub use error::{BaselineError, Error, FitError, Result};
pub use geometry::{BeamCenter, Geometry, RingAngles};
pub use image::{ImageContext, ImageScale, Transformation};
pub use params::{ParameterKind, ParameterMap, ParameterSpec, ParameterValue};
pub use roi::{GaussianParams, RoiKey, RoiParameters, RoiRegistry, RoiType};
pub use signal::{NodeId, Routing, Signal, SignalBus, SignalKind, SignalPayload};
