//! Image context: pixels, beam center, scale and the derived geometry.
//!
//! The context is the single writer for everything that radius and angle maps
//! depend on. Every mutation that changes the image shape or the beam center
//! rebuilds the geometry before returning, so a reader never observes maps
//! that belong to a previous image.

use std::fmt;
use std::str::FromStr;

use log::{debug, error};
use ndarray::{s, Array2, Axis};

use crate::error::{Error, Result};
use crate::geometry::{BeamCenter, Geometry, RingAngles};

/// Orientation changes applied to the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformation {
    /// Mirror left/right.
    Horizontal,
    /// Mirror top/bottom.
    Vertical,
    /// Rotate 90 degrees clockwise.
    RotateRight,
    /// Rotate 90 degrees counter-clockwise.
    RotateLeft,
}

impl Transformation {
    /// Applies the transformation, returning a new array.
    #[must_use]
    pub fn apply(self, image: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Horizontal => image.slice(s![.., ..;-1]).to_owned(),
            Self::Vertical => image.slice(s![..;-1, ..]).to_owned(),
            Self::RotateRight => image.t().slice(s![.., ..;-1]).to_owned(),
            Self::RotateLeft => rot90(image),
        }
    }

    /// Name used by the configuration and history layers.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
            Self::RotateRight => "rotate_right",
            Self::RotateLeft => "rotate_left",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Transformation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "horizontal" => Ok(Self::Horizontal),
            "vertical" => Ok(Self::Vertical),
            "rotate_right" => Ok(Self::RotateRight),
            "rotate_left" => Ok(Self::RotateLeft),
            other => Err(Error::UnknownTransformation(other.to_string())),
        }
    }
}

/// Rotates an array 90 degrees counter-clockwise (first axis towards second).
#[must_use]
pub fn rot90(image: &Array2<f64>) -> Array2<f64> {
    let mut view = image.view();
    view.invert_axis(Axis(1));
    view.t().to_owned()
}

/// Physical scale of one pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageScale {
    /// Physical units per pixel.
    pub scale: f64,
    /// Unit label (display only).
    pub unit: String,
    /// Scale before the last change.
    pub previous_scale: f64,
}

impl Default for ImageScale {
    fn default() -> Self {
        Self {
            scale: 1.0,
            unit: String::new(),
            previous_scale: 1.0,
        }
    }
}

/// Owner of the current detector image and everything derived from its shape.
#[derive(Debug, Default)]
pub struct ImageContext {
    source: Option<Array2<f64>>,
    image: Option<Array2<f64>>,
    transformations: Vec<Transformation>,
    keep_transformations: bool,
    beam_center: BeamCenter,
    scale: ImageScale,
    geometry: Option<Geometry>,
    ring_angles: Option<RingAngles>,
    intensity_limits: Option<(f64, f64)>,
    keep_limits: bool,
    generation: u64,
}

impl ImageContext {
    /// Creates an empty context with the beam center at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the image.
    ///
    /// The recorded transformation history is re-applied when
    /// [`keep_transformations`](Self::set_keep_transformations) is enabled,
    /// otherwise it is cleared.
    pub fn set_image(&mut self, image: Array2<f64>) {
        if !self.keep_transformations {
            self.transformations.clear();
        }
        if !self.keep_limits {
            self.intensity_limits = None;
        }
        let transformed = self
            .transformations
            .iter()
            .fold(image.clone(), |acc, t| t.apply(&acc));
        debug!(
            "image set: source {:?}, transformed {:?}",
            image.dim(),
            transformed.dim()
        );
        self.source = Some(image);
        self.image = Some(transformed);
        self.update_geometry();
    }

    /// Sets the beam center and rebuilds the geometry.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for non-finite coordinates.
    pub fn set_beam_center(&mut self, beam_center: BeamCenter) -> Result<()> {
        if !beam_center.is_finite() {
            return Err(Error::invalid_parameter(
                "beam_center",
                format!("non-finite coordinate ({}, {})", beam_center.row, beam_center.col),
            ));
        }
        self.beam_center = beam_center;
        self.update_geometry();
        Ok(())
    }

    /// Sets the physical scale, keeping the previous value for [`scale_change`](Self::scale_change).
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] unless `scale` is positive and finite.
    pub fn set_scale(&mut self, scale: f64, unit: impl Into<String>) -> Result<()> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(Error::invalid_parameter(
                "scale",
                format!("must be positive, got {scale}"),
            ));
        }
        self.scale = ImageScale {
            scale,
            unit: unit.into(),
            previous_scale: self.scale.scale,
        };
        Ok(())
    }

    /// Applies a named transformation to the current image and records it.
    ///
    /// Does nothing when no image is loaded.
    ///
    /// # Errors
    /// Returns [`Error::UnknownTransformation`] for unrecognized names; the
    /// image and history stay untouched.
    pub fn add_transformation(&mut self, name: &str) -> Result<()> {
        let transformation = name.parse::<Transformation>().map_err(|err| {
            error!("{err}");
            err
        })?;
        let Some(image) = self.image.as_ref() else {
            return Ok(());
        };
        let transformed = transformation.apply(image);
        self.transformations.push(transformation);
        self.image = Some(transformed);
        self.update_geometry();
        Ok(())
    }

    /// Forgets the transformation history and restores the source image.
    pub fn clear_transformations(&mut self) {
        self.transformations.clear();
        if let Some(source) = self.source.clone() {
            self.image = Some(source);
            self.update_geometry();
        }
    }

    /// Keep the transformation history across [`set_image`](Self::set_image) calls.
    pub fn set_keep_transformations(&mut self, keep: bool) {
        self.keep_transformations = keep;
    }

    /// Pins display intensity limits; `None` unpins them.
    pub fn set_intensity_limits(&mut self, limits: Option<(f64, f64)>) {
        self.keep_limits = limits.is_some();
        self.intensity_limits = limits;
    }

    fn update_geometry(&mut self) {
        let Some(image) = self.image.as_ref() else {
            return;
        };
        let geometry = Geometry::compute(image.dim(), self.beam_center);
        self.ring_angles = Some(geometry.ring_angles());
        self.geometry = Some(geometry);
        self.generation += 1;
    }

    /// Current (transformed) image.
    #[must_use]
    pub fn image(&self) -> Option<&Array2<f64>> {
        self.image.as_ref()
    }

    /// Image as loaded, before transformations.
    #[must_use]
    pub fn source_image(&self) -> Option<&Array2<f64>> {
        self.source.as_ref()
    }

    /// Image shape `(height, width)`.
    #[must_use]
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.image.as_ref().map(Array2::dim)
    }

    /// Geometry of the current image, absent until an image is loaded.
    #[must_use]
    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    /// Radius map of the current image.
    #[must_use]
    pub fn rr(&self) -> Option<&Array2<f64>> {
        self.geometry.as_ref().map(|g| &g.rr)
    }

    /// Azimuth map of the current image.
    #[must_use]
    pub fn phi(&self) -> Option<&Array2<f64>> {
        self.geometry.as_ref().map(|g| &g.phi)
    }

    #[must_use]
    pub fn beam_center(&self) -> BeamCenter {
        self.beam_center
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale.scale
    }

    #[must_use]
    pub fn scale_unit(&self) -> &str {
        &self.scale.unit
    }

    /// Ratio of the current scale to the previous one.
    #[must_use]
    pub fn scale_change(&self) -> f64 {
        self.scale.scale / self.scale.previous_scale
    }

    #[must_use]
    pub fn ring_angles(&self) -> Option<RingAngles> {
        self.ring_angles
    }

    #[must_use]
    pub fn intensity_limits(&self) -> Option<(f64, f64)> {
        self.intensity_limits
    }

    /// Recorded transformations, oldest first.
    #[must_use]
    pub fn transformations(&self) -> &[Transformation] {
        &self.transformations
    }

    /// Counter bumped on every geometry rebuild.
    ///
    /// Derived caches store the generation they were built from and rebuild
    /// when it no longer matches.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
