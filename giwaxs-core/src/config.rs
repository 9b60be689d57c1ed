//! Algorithm configuration and the parameter schemas behind it.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::params::{
    non_negative, positive, unit_interval, validate, ParameterKind, ParameterMap, ParameterSpec,
    ParameterValue,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Resampling kernel for polar interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InterpolationMode {
    Nearest,
    #[default]
    Bilinear,
    /// Bicubic convolution (a = -0.75).
    Cubic,
    /// Lanczos over an 8x8 neighbourhood.
    Lanczos,
}

impl InterpolationMode {
    pub const ALL: [Self; 4] = [Self::Nearest, Self::Bilinear, Self::Cubic, Self::Lanczos];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nearest => "Nearest",
            Self::Bilinear => "Bilinear",
            Self::Cubic => "Cubic",
            Self::Lanczos => "Lanczos",
        }
    }
}

impl fmt::Display for InterpolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InterpolationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownInterpolationMode(s.to_string()))
    }
}

/// Polar interpolation configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InterpolationConfig {
    /// Number of radius samples.
    pub r_size: usize,
    /// Number of angle samples.
    pub phi_size: usize,
    pub mode: InterpolationMode,
    /// Distribute output rows over the rayon pool.
    pub parallel: bool,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            r_size: 512,
            phi_size: 512,
            mode: InterpolationMode::Bilinear,
            parallel: false,
        }
    }
}

impl InterpolationConfig {
    /// Config file / form name of this parameter group.
    pub const NAME: &'static str = "Interpolation parameters";

    pub const SCHEMA: &'static [ParameterSpec] = &[
        ParameterSpec {
            name: "r_size",
            label: "Radius axis size",
            kind: ParameterKind::Int,
            optional: false,
            description: "Number of radius samples in the polar image",
            check: Some(positive),
        },
        ParameterSpec {
            name: "phi_size",
            label: "Angle axis size",
            kind: ParameterKind::Int,
            optional: false,
            description: "Number of angle samples in the polar image",
            check: Some(positive),
        },
        ParameterSpec {
            name: "mode",
            label: "Interpolation mode",
            kind: ParameterKind::Text,
            optional: false,
            description: "Nearest, Bilinear, Cubic or Lanczos",
            check: Some(known_mode),
        },
    ];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_size(mut self, r_size: usize, phi_size: usize) -> Self {
        self.r_size = r_size;
        self.phi_size = phi_size;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: InterpolationMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Applies the entries present in `map`; nothing changes on error.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for values failing the schema.
    pub fn apply_parameters(&mut self, map: &ParameterMap) -> Result<()> {
        let checked = validate(Self::SCHEMA, map)?;
        let mut next = self.clone();
        if let Some(v) = checked.get("r_size").and_then(ParameterValue::as_i64) {
            next.r_size = to_usize("r_size", v)?;
        }
        if let Some(v) = checked.get("phi_size").and_then(ParameterValue::as_i64) {
            next.phi_size = to_usize("phi_size", v)?;
        }
        if let Some(v) = checked.get("mode").and_then(ParameterValue::as_str) {
            next.mode = v.parse()?;
        }
        *self = next;
        Ok(())
    }

    /// Flat parameter map for persistence.
    #[must_use]
    pub fn to_parameters(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        map.insert("r_size".into(), ParameterValue::Int(to_i64(self.r_size)));
        map.insert("phi_size".into(), ParameterValue::Int(to_i64(self.phi_size)));
        map.insert("mode".into(), self.mode.name().into());
        map
    }
}

/// Asymmetric least squares baseline configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BaselineConfig {
    /// Weight of the second-difference penalty (lambda).
    pub smoothness_param: f64,
    /// Weight given to points above the baseline (p).
    pub asymmetry_param: f64,
    /// Iteration cap for the reweighting loop.
    pub max_iterations: usize,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            smoothness_param: 1000.0,
            asymmetry_param: 0.01,
            max_iterations: 1000,
        }
    }
}

impl BaselineConfig {
    pub const NAME: &'static str = "Baseline correction";

    pub const SCHEMA: &'static [ParameterSpec] = &[
        ParameterSpec {
            name: "smoothness_param",
            label: "Smoothness",
            kind: ParameterKind::Float,
            optional: false,
            description: "Larger values give a stiffer baseline",
            check: Some(positive),
        },
        ParameterSpec {
            name: "asymmetry_param",
            label: "Asymmetry",
            kind: ParameterKind::Float,
            optional: false,
            description: "Weight of points above the baseline, between 0 and 1",
            check: Some(unit_interval),
        },
    ];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_smoothness(mut self, smoothness: f64) -> Self {
        self.smoothness_param = smoothness;
        self
    }

    #[must_use]
    pub fn with_asymmetry(mut self, asymmetry: f64) -> Self {
        self.asymmetry_param = asymmetry;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Applies the entries present in `map`; nothing changes on error.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for values failing the schema.
    pub fn apply_parameters(&mut self, map: &ParameterMap) -> Result<()> {
        let checked = validate(Self::SCHEMA, map)?;
        if let Some(v) = checked.get("smoothness_param").and_then(ParameterValue::as_f64) {
            self.smoothness_param = v;
        }
        if let Some(v) = checked.get("asymmetry_param").and_then(ParameterValue::as_f64) {
            self.asymmetry_param = v;
        }
        Ok(())
    }

    #[must_use]
    pub fn to_parameters(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        map.insert("smoothness_param".into(), self.smoothness_param.into());
        map.insert("asymmetry_param".into(), self.asymmetry_param.into());
        map
    }
}

/// Peak search and fit configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// Cap on the number of proposed rings.
    pub max_peaks_number: usize,
    /// Initial ROI width in pixels for proposed rings.
    pub init_width: f64,
    /// Smoothing applied before peak search; `None` keeps the current sigma.
    pub sigma_find: Option<f64>,
    /// Smoothing applied before fitting; `None` keeps the current sigma.
    pub sigma_fit: Option<f64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_peaks_number: 20,
            init_width: 30.0,
            sigma_find: Some(8.0),
            sigma_fit: None,
        }
    }
}

impl FitConfig {
    pub const NAME: &'static str = "Fitting parameters";

    /// Hard cap on peaks in one joint fit.
    pub const MAX_JOINT_PEAKS: usize = 6;

    pub const SCHEMA: &'static [ParameterSpec] = &[
        ParameterSpec {
            name: "max_peaks_number",
            label: "Maximum number of peaks",
            kind: ParameterKind::Int,
            optional: false,
            description: "High numbers are not recommended",
            check: Some(positive),
        },
        ParameterSpec {
            name: "init_width",
            label: "Peaks width",
            kind: ParameterKind::Float,
            optional: false,
            description: "Gaussian fitting will start with this number",
            check: Some(positive),
        },
        ParameterSpec {
            name: "sigma_find",
            label: "Sigma to find peaks",
            kind: ParameterKind::Float,
            optional: true,
            description: "Gaussian smoothing applied before peak search to avoid noise peaks. \
                          Leave empty to use the current sigma.",
            check: Some(non_negative),
        },
        ParameterSpec {
            name: "sigma_fit",
            label: "Sigma to fit peaks",
            kind: ParameterKind::Float,
            optional: true,
            description: "Gaussian smoothing applied before fitting found peaks. \
                          Leave empty to use the current sigma.",
            check: Some(non_negative),
        },
    ];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_peaks(mut self, max_peaks_number: usize) -> Self {
        self.max_peaks_number = max_peaks_number;
        self
    }

    #[must_use]
    pub fn with_init_width(mut self, init_width: f64) -> Self {
        self.init_width = init_width;
        self
    }

    #[must_use]
    pub fn with_sigma_find(mut self, sigma: Option<f64>) -> Self {
        self.sigma_find = sigma;
        self
    }

    #[must_use]
    pub fn with_sigma_fit(mut self, sigma: Option<f64>) -> Self {
        self.sigma_fit = sigma;
        self
    }

    /// Applies the entries present in `map`; nothing changes on error.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for values failing the schema.
    pub fn apply_parameters(&mut self, map: &ParameterMap) -> Result<()> {
        let checked = validate(Self::SCHEMA, map)?;
        let mut next = self.clone();
        if let Some(v) = checked.get("max_peaks_number").and_then(ParameterValue::as_i64) {
            next.max_peaks_number = to_usize("max_peaks_number", v)?;
        }
        if let Some(v) = checked.get("init_width").and_then(ParameterValue::as_f64) {
            next.init_width = v;
        }
        if let Some(v) = checked.get("sigma_find") {
            next.sigma_find = v.as_f64();
        }
        if let Some(v) = checked.get("sigma_fit") {
            next.sigma_fit = v.as_f64();
        }
        *self = next;
        Ok(())
    }

    #[must_use]
    pub fn to_parameters(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        map.insert(
            "max_peaks_number".into(),
            ParameterValue::Int(to_i64(self.max_peaks_number)),
        );
        map.insert("init_width".into(), self.init_width.into());
        map.insert("sigma_find".into(), self.sigma_find.into());
        map.insert("sigma_fit".into(), self.sigma_fit.into());
        map
    }
}

fn known_mode(value: &ParameterValue) -> bool {
    value
        .as_str()
        .is_some_and(|name| name.parse::<InterpolationMode>().is_ok())
}

fn to_usize(name: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|e| Error::invalid_parameter(name, e.to_string()))
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Bilinear".parse::<InterpolationMode>().unwrap(), InterpolationMode::Bilinear);
        assert_eq!("lanczos".parse::<InterpolationMode>().unwrap(), InterpolationMode::Lanczos);
        assert!(matches!(
            "Spline".parse::<InterpolationMode>(),
            Err(Error::UnknownInterpolationMode(_))
        ));
    }

    #[test]
    fn test_defaults_match_shipped_config() {
        let interpolation = InterpolationConfig::default();
        assert_eq!((interpolation.r_size, interpolation.phi_size), (512, 512));
        assert_eq!(interpolation.mode, InterpolationMode::Bilinear);

        let baseline = BaselineConfig::default();
        assert!((baseline.smoothness_param - 1000.0).abs() < f64::EPSILON);
        assert!((baseline.asymmetry_param - 0.01).abs() < f64::EPSILON);

        let fit = FitConfig::default();
        assert_eq!(fit.max_peaks_number, 20);
        assert_eq!(fit.sigma_find, Some(8.0));
        assert_eq!(fit.sigma_fit, None);
    }

    #[test]
    fn test_interpolation_apply_parameters() {
        let mut config = InterpolationConfig::default();
        let mut map = ParameterMap::new();
        map.insert("r_size".into(), ParameterValue::Int(200));
        map.insert("phi_size".into(), ParameterValue::Int(100));
        map.insert("mode".into(), "Cubic".into());
        config.apply_parameters(&map).unwrap();
        assert_eq!(config.r_size, 200);
        assert_eq!(config.phi_size, 100);
        assert_eq!(config.mode, InterpolationMode::Cubic);
        assert_eq!(config.to_parameters(), map);
    }

    #[test]
    fn test_unknown_mode_rejected_without_mutation() {
        let mut config = InterpolationConfig::default();
        let mut map = ParameterMap::new();
        map.insert("r_size".into(), ParameterValue::Int(64));
        map.insert("mode".into(), "Spline".into());
        assert!(config.apply_parameters(&map).is_err());
        assert_eq!(config, InterpolationConfig::default());
    }

    #[test]
    fn test_fit_sigma_can_be_cleared() {
        let mut config = FitConfig::default();
        let mut map = ParameterMap::new();
        map.insert("sigma_find".into(), ParameterValue::Null);
        map.insert("init_width".into(), ParameterValue::Int(12));
        config.apply_parameters(&map).unwrap();
        assert_eq!(config.sigma_find, None);
        assert!((config.init_width - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_baseline_asymmetry_bounds() {
        let mut config = BaselineConfig::default();
        let mut map = ParameterMap::new();
        map.insert("asymmetry_param".into(), ParameterValue::Float(1.5));
        assert!(config.apply_parameters(&map).is_err());
        map.insert("asymmetry_param".into(), ParameterValue::Float(0.05));
        config.apply_parameters(&map).unwrap();
        assert!((config.asymmetry_param - 0.05).abs() < f64::EPSILON);
    }
}
