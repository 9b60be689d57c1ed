//! Polar interpolation of detector images.
//!
//! An [`InterpolationGeometry`] maps every cell of a `(phi_size, r_size)`
//! output grid to a source coordinate in the detector image. Kernels
//! implementing [`InterpolationKernel`] turn an image and a grid into the
//! polar image. [`PolarInterpolator`] ties a configuration to the cached grid
//! of the current [`ImageContext`].

mod box_average;
mod remap;

pub use box_average::BoxInterpolation;
pub use remap::{remap, PointRemap};

use giwaxs_core::error::{Error, Result};
use giwaxs_core::{Geometry, ImageContext, InterpolationConfig, InterpolationMode, ParameterMap};
use log::{debug, error, info};
use ndarray::{Array1, Array2};

/// Output axes and source coordinate maps of a polar grid.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationGeometry {
    /// Radius axis (pixels), `r_size` samples over `[rr.min, rr.max]`.
    pub r: Array1<f64>,
    /// Angle axis (radians), `phi_size` samples over `[phi.min, phi.max]`.
    pub p: Array1<f64>,
    /// Source column per output cell, shape `(phi_size, r_size)`.
    pub xx: Array2<f64>,
    /// Source row per output cell, shape `(phi_size, r_size)`.
    pub yy: Array2<f64>,
}

impl InterpolationGeometry {
    /// Builds the grid for `geometry`. Returns `None` for a zero grid size.
    #[must_use]
    pub fn build(geometry: &Geometry, r_size: usize, phi_size: usize) -> Option<Self> {
        if r_size == 0 || phi_size == 0 {
            return None;
        }
        let (r_min, r_max) = geometry.radius_range();
        let (p_min, p_max) = geometry.angle_range();
        let r = Array1::linspace(r_min, r_max, r_size);
        let p = Array1::linspace(p_min, p_max, phi_size);
        let center = geometry.beam_center;

        let xx = Array2::from_shape_fn((phi_size, r_size), |(i, j)| center.col + r[j] * p[i].cos());
        let yy = Array2::from_shape_fn((phi_size, r_size), |(i, j)| center.row + r[j] * p[i].sin());

        Some(Self { r, p, xx, yy })
    }

    /// Output shape `(phi_size, r_size)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.p.len(), self.r.len())
    }
}

/// Strategy turning a detector image into a polar image on a grid.
pub trait InterpolationKernel {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Resamples `image` onto `grid`. The result has shape `grid.shape()`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] if `image` does not match `geometry`.
    fn interpolate(
        &self,
        image: &Array2<f64>,
        geometry: &Geometry,
        grid: &InterpolationGeometry,
    ) -> Result<Array2<f64>>;
}

pub(crate) fn check_image(image: &Array2<f64>, geometry: &Geometry) -> Result<()> {
    if image.dim() == geometry.shape() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: geometry.shape(),
            found: image.dim(),
        })
    }
}

/// Polar interpolation bound to an image context.
///
/// The grid is rebuilt lazily, only when the context's geometry generation
/// or the configured grid size changed since the last build.
#[derive(Debug, Clone, Default)]
pub struct PolarInterpolator {
    config: InterpolationConfig,
    grid: Option<InterpolationGeometry>,
    generation: Option<u64>,
}

impl PolarInterpolator {
    /// Creates an interpolator without a grid.
    #[must_use]
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            grid: None,
            generation: None,
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Cached grid, if built.
    #[must_use]
    pub fn grid(&self) -> Option<&InterpolationGeometry> {
        self.grid.as_ref()
    }

    /// Radius axis of the cached grid.
    #[must_use]
    pub fn r_axis(&self) -> Option<&Array1<f64>> {
        self.grid.as_ref().map(|g| &g.r)
    }

    /// Angle axis of the cached grid.
    #[must_use]
    pub fn phi_axis(&self) -> Option<&Array1<f64>> {
        self.grid.as_ref().map(|g| &g.p)
    }

    /// Selects the point-sample kernel.
    pub fn set_mode(&mut self, mode: InterpolationMode) {
        self.config.mode = mode;
    }

    /// Changes the grid size; zero keeps the current value.
    pub fn set_size(&mut self, r_size: usize, phi_size: usize) {
        if r_size > 0 {
            self.config.r_size = r_size;
        }
        if phi_size > 0 {
            self.config.phi_size = phi_size;
        }
    }

    /// Applies a parameter map from the config store or a form.
    ///
    /// # Errors
    /// Returns the validation error; the configuration is left untouched.
    pub fn set_parameters(&mut self, parameters: &ParameterMap) -> Result<()> {
        self.config.apply_parameters(parameters).map_err(|err| {
            error!("rejected interpolation parameters: {err}");
            err
        })
    }

    /// Brings the grid up to date with `context`. Returns true if it was rebuilt.
    pub fn sync(&mut self, context: &ImageContext) -> bool {
        let Some(geometry) = context.geometry() else {
            self.grid = None;
            self.generation = None;
            return false;
        };
        let size = (self.config.phi_size, self.config.r_size);
        let fresh = self.generation == Some(context.generation())
            && self.grid.as_ref().is_some_and(|g| g.shape() == size);
        if fresh {
            return false;
        }
        debug!(
            "rebuilding polar grid {}x{} for image {:?}",
            self.config.phi_size,
            self.config.r_size,
            geometry.shape()
        );
        self.grid = InterpolationGeometry::build(geometry, self.config.r_size, self.config.phi_size);
        self.generation = Some(context.generation());
        true
    }

    /// Polar image of the current image with the configured point-sample kernel.
    ///
    /// Returns `None` when the context has no image.
    pub fn interpolate(&mut self, context: &ImageContext) -> Option<Array2<f64>> {
        let kernel = PointRemap::new(self.config.mode).with_parallel(self.config.parallel);
        self.interpolate_with(context, &kernel)
    }

    /// Polar image of the current image with an arbitrary kernel.
    pub fn interpolate_with<K: InterpolationKernel + ?Sized>(
        &mut self,
        context: &ImageContext,
        kernel: &K,
    ) -> Option<Array2<f64>> {
        self.sync(context);
        let image = context.image()?;
        let geometry = context.geometry()?;
        let grid = self.grid.as_ref()?;
        info!("calculating {} interpolation", kernel.name());
        match kernel.interpolate(image, geometry, grid) {
            Ok(polar) => {
                info!("interpolation is calculated");
                Some(polar)
            }
            Err(err) => {
                error!("interpolation failed: {err}");
                None
            }
        }
    }
}
