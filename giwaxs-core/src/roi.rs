//! Regions of interest: rings and ring segments in (radius, angle) space.
//!
//! [`RoiParameters`] is a value type. Edits produce a new value through the
//! `with_*` methods and the holder replaces the stored value wholesale, so a
//! value handed to another component is a stable snapshot.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of a ROI within a [`RoiRegistry`].
pub type RoiKey = u32;

/// Shape of a region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoiType {
    /// Full annulus; the angle fields are ignored.
    #[default]
    Ring,
    /// Annular sector limited by `angle ± angle_std / 2`.
    Segment,
}

/// Parameters of a fitted Gaussian `A * exp(-(x - mu)^2 / (2 sigma^2)) + B`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianParams {
    pub amplitude: f64,
    pub center: f64,
    pub sigma: f64,
    pub offset: f64,
}

impl GaussianParams {
    #[must_use]
    pub fn new(amplitude: f64, center: f64, sigma: f64, offset: f64) -> Self {
        Self {
            amplitude,
            center,
            sigma,
            offset,
        }
    }

    /// Evaluates the Gaussian at `x`.
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        let d = x - self.center;
        self.amplitude * (-d * d / (2.0 * self.sigma * self.sigma)).exp() + self.offset
    }

    /// `(A, mu, sigma, B)` as a flat array.
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.amplitude, self.center, self.sigma, self.offset]
    }
}

impl From<[f64; 4]> for GaussianParams {
    fn from([amplitude, center, sigma, offset]: [f64; 4]) -> Self {
        Self::new(amplitude, center, sigma, offset)
    }
}

/// A ring or segment ROI.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoiParameters {
    /// Center radius (physical units).
    pub radius: f64,
    /// Full radial width (physical units).
    pub width: f64,
    /// Center angle (degrees).
    pub angle: f64,
    /// Angular width (degrees).
    pub angle_std: f64,
    /// Identity assigned by the owning registry.
    pub key: Option<RoiKey>,
    pub name: Option<String>,
    pub roi_type: RoiType,
    pub movable: bool,
    /// Radius and width come from a Gaussian fit.
    pub fitted: bool,
    /// Last Gaussian fit `(A, mu, sigma, B)`.
    pub fit_r_parameters: Option<GaussianParams>,
}

impl RoiParameters {
    /// Creates a movable ring covering the full circle.
    #[must_use]
    pub fn new(radius: f64, width: f64) -> Self {
        Self {
            radius,
            width,
            angle: 180.0,
            angle_std: 360.0,
            key: None,
            name: None,
            roi_type: RoiType::Ring,
            movable: true,
            fitted: false,
            fit_r_parameters: None,
        }
    }

    #[must_use]
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    #[must_use]
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    /// Sets center angle and angular width (degrees).
    #[must_use]
    pub fn with_angles(mut self, angle: f64, angle_std: f64) -> Self {
        self.angle = angle;
        self.angle_std = angle_std;
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: RoiKey) -> Self {
        self.key = Some(key);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, roi_type: RoiType) -> Self {
        self.roi_type = roi_type;
        self
    }

    #[must_use]
    pub fn with_movable(mut self, movable: bool) -> Self {
        self.movable = movable;
        self
    }

    #[must_use]
    pub fn with_fitted(mut self, fitted: bool) -> Self {
        self.fitted = fitted;
        self
    }

    /// Applies a Gaussian fit: radius becomes `mu`, width `2 sigma`.
    #[must_use]
    pub fn with_fit(mut self, params: GaussianParams) -> Self {
        self.radius = params.center;
        self.width = 2.0 * params.sigma;
        self.fitted = true;
        self.fit_r_parameters = Some(params);
        self
    }

    /// Radial band `[radius - width/2, radius + width/2]`.
    #[must_use]
    pub fn band(&self) -> (f64, f64) {
        let half = self.width / 2.0;
        (self.radius - half, self.radius + half)
    }

    /// Radial band in pixel units.
    #[must_use]
    pub fn pixel_band(&self, scale: f64) -> (f64, f64) {
        let (lo, hi) = self.band();
        (lo / scale, hi / scale)
    }

    /// Angular limits in degrees; a ring covers the full circle.
    #[must_use]
    pub fn angle_limits(&self) -> (f64, f64) {
        match self.roi_type {
            RoiType::Ring => (-180.0, 180.0),
            RoiType::Segment => {
                let half = self.angle_std / 2.0;
                (self.angle - half, self.angle + half)
            }
        }
    }
}

/// Owner of the live ROIs and the selection.
///
/// Keys are allocated from a monotonically increasing counter and are never
/// handed out twice, even after deletion.
#[derive(Debug, Default)]
pub struct RoiRegistry {
    rois: BTreeMap<RoiKey, RoiParameters>,
    selected: BTreeSet<RoiKey>,
    next_key: RoiKey,
}

impl RoiRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ROI, assigning a fresh key. Any key on `params` is replaced.
    pub fn create(&mut self, params: RoiParameters) -> RoiKey {
        let key = self.next_key;
        self.next_key += 1;
        self.rois.insert(key, params.with_key(key));
        key
    }

    /// Replaces a live ROI with a new value carrying the same key.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRoi`] if the value has no key or the key is not live.
    pub fn update(&mut self, params: RoiParameters) -> Result<()> {
        let key = params
            .key
            .ok_or_else(|| Error::invalid_parameter("key", "ROI has no key"))?;
        match self.rois.get_mut(&key) {
            Some(slot) => {
                *slot = params;
                Ok(())
            }
            None => Err(Error::UnknownRoi(key)),
        }
    }

    /// Deletes a ROI and drops it from the selection.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRoi`] if the key is not live.
    pub fn delete(&mut self, key: RoiKey) -> Result<RoiParameters> {
        let removed = self.rois.remove(&key).ok_or(Error::UnknownRoi(key))?;
        self.selected.remove(&key);
        Ok(removed)
    }

    /// Deletes every selected ROI, returning them in key order.
    pub fn delete_selected(&mut self) -> Vec<RoiParameters> {
        let keys: Vec<RoiKey> = std::mem::take(&mut self.selected).into_iter().collect();
        keys.into_iter()
            .filter_map(|key| self.rois.remove(&key))
            .collect()
    }

    #[must_use]
    pub fn get(&self, key: RoiKey) -> Option<&RoiParameters> {
        self.rois.get(&key)
    }

    /// Adds a ROI to the selection.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRoi`] if the key is not live.
    pub fn select(&mut self, key: RoiKey) -> Result<()> {
        if !self.rois.contains_key(&key) {
            return Err(Error::UnknownRoi(key));
        }
        self.selected.insert(key);
        Ok(())
    }

    pub fn deselect(&mut self, key: RoiKey) {
        self.selected.remove(&key);
    }

    /// Flips the selection state of a ROI, returning the new state.
    ///
    /// # Errors
    /// Returns [`Error::UnknownRoi`] if the key is not live.
    pub fn toggle(&mut self, key: RoiKey) -> Result<bool> {
        if !self.rois.contains_key(&key) {
            return Err(Error::UnknownRoi(key));
        }
        if self.selected.remove(&key) {
            Ok(false)
        } else {
            self.selected.insert(key);
            Ok(true)
        }
    }

    pub fn select_all(&mut self) {
        self.selected = self.rois.keys().copied().collect();
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    #[must_use]
    pub fn is_selected(&self, key: RoiKey) -> bool {
        self.selected.contains(&key)
    }

    /// Selected ROIs in key order.
    #[must_use]
    pub fn selected(&self) -> Vec<&RoiParameters> {
        self.selected
            .iter()
            .filter_map(|key| self.rois.get(key))
            .collect()
    }

    /// Multiplies every radius and width by `factor`, e.g. after a scale change.
    pub fn rescale(&mut self, factor: f64) {
        for roi in self.rois.values_mut() {
            let updated = roi
                .clone()
                .with_radius(roi.radius * factor)
                .with_width(roi.width * factor);
            *roi = updated;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoiParameters> {
        self.rois.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rois.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_builder_returns_copy() {
        let original = RoiParameters::new(10.0, 2.0);
        let moved = original.clone().with_radius(12.0).with_name("peak");
        assert_eq!(original.radius, 10.0);
        assert_eq!(moved.radius, 12.0);
        assert_eq!(moved.name.as_deref(), Some("peak"));
        assert_eq!(moved.band(), (11.0, 13.0));
    }

    #[test]
    fn test_with_fit_sets_provenance() {
        let roi = RoiParameters::new(10.0, 4.0).with_fit(GaussianParams::new(3.0, 10.5, 1.5, 0.2));
        assert_eq!(roi.radius, 10.5);
        assert_eq!(roi.width, 3.0);
        assert!(roi.fitted);
        assert_eq!(roi.fit_r_parameters.unwrap().to_array(), [3.0, 10.5, 1.5, 0.2]);
    }

    #[test]
    fn test_pixel_band_divides_by_scale() {
        let roi = RoiParameters::new(3.0, 1.0);
        assert_eq!(roi.pixel_band(0.5), (5.0, 7.0));
        assert_eq!(roi.pixel_band(1.0), roi.band());
    }

    #[test]
    fn test_angle_limits() {
        let ring = RoiParameters::new(1.0, 1.0).with_angles(30.0, 20.0);
        assert_eq!(ring.angle_limits(), (-180.0, 180.0));
        let segment = ring.with_type(RoiType::Segment);
        assert_eq!(segment.angle_limits(), (20.0, 40.0));
    }

    #[test]
    fn test_keys_never_reused() {
        let mut registry = RoiRegistry::new();
        let a = registry.create(RoiParameters::new(1.0, 1.0));
        let b = registry.create(RoiParameters::new(2.0, 1.0));
        registry.delete(b).unwrap();
        let c = registry.create(RoiParameters::new(3.0, 1.0));
        assert_ne!(c, b);
        assert_ne!(c, a);
        assert_eq!(registry.get(c).unwrap().key, Some(c));
    }

    #[test]
    fn test_delete_purges_selection() {
        let mut registry = RoiRegistry::new();
        let a = registry.create(RoiParameters::new(1.0, 1.0));
        let b = registry.create(RoiParameters::new(2.0, 1.0));
        registry.select(a).unwrap();
        registry.select(b).unwrap();
        registry.delete(a).unwrap();
        assert!(!registry.is_selected(a));
        assert_eq!(registry.selected().len(), 1);
        assert!(registry.select(a).is_err());
    }

    #[test]
    fn test_update_replaces_value() {
        let mut registry = RoiRegistry::new();
        let key = registry.create(RoiParameters::new(1.0, 1.0));
        let edited = registry.get(key).unwrap().clone().with_radius(5.0);
        registry.update(edited).unwrap();
        assert_eq!(registry.get(key).unwrap().radius, 5.0);

        let stray = RoiParameters::new(1.0, 1.0).with_key(99);
        assert_eq!(registry.update(stray), Err(Error::UnknownRoi(99)));
    }

    #[test]
    fn test_toggle_and_delete_selected() {
        let mut registry = RoiRegistry::new();
        let a = registry.create(RoiParameters::new(1.0, 1.0));
        let b = registry.create(RoiParameters::new(2.0, 1.0));
        assert!(registry.toggle(a).unwrap());
        assert!(!registry.toggle(a).unwrap());
        registry.select_all();
        let removed = registry.delete_selected();
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[1].key, Some(b));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rescale() {
        let mut registry = RoiRegistry::new();
        let key = registry.create(RoiParameters::new(10.0, 2.0));
        registry.rescale(0.5);
        let roi = registry.get(key).unwrap();
        assert_eq!(roi.radius, 5.0);
        assert_eq!(roi.width, 1.0);
    }
}
