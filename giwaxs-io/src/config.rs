//! Named JSON parameter groups.
//!
//! Each group is stored as `<name>.json` holding one flat JSON object. Reads
//! look in the user directory first and fall back to the defaults directory,
//! then to the built-in defaults of the matching config type.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use giwaxs_core::{BaselineConfig, FitConfig, InterpolationConfig, ParameterMap, ParameterValue};
use log::{error, warn};
use serde_json::{Map, Number, Value};

use crate::Result;

/// Built-in values of a known parameter group.
#[must_use]
pub fn builtin_defaults(name: &str) -> Option<ParameterMap> {
    match name {
        InterpolationConfig::NAME => Some(InterpolationConfig::default().to_parameters()),
        BaselineConfig::NAME => Some(BaselineConfig::default().to_parameters()),
        FitConfig::NAME => Some(FitConfig::default().to_parameters()),
        _ => None,
    }
}

/// Directory-backed config store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    user_dir: PathBuf,
    default_dir: Option<PathBuf>,
}

impl ConfigStore {
    /// Store saving into `user_dir`.
    #[must_use]
    pub fn new(user_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            default_dir: None,
        }
    }

    /// Adds a directory of shipped defaults consulted before the built-ins.
    #[must_use]
    pub fn with_default_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_dir = Some(dir.into());
        self
    }

    /// Directory saved groups are written to.
    #[must_use]
    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Reads a parameter group.
    ///
    /// With `defaults_only` the user directory is skipped. Missing, unreadable
    /// and non-object files count as absent; all but missing ones are logged.
    #[must_use]
    pub fn read_config(&self, name: &str, defaults_only: bool) -> Option<ParameterMap> {
        let file = file_name(name);
        let saved = if defaults_only {
            None
        } else {
            read_map(&self.user_dir.join(&file))
        };
        saved
            .or_else(|| {
                self.default_dir
                    .as_ref()
                    .and_then(|dir| read_map(&dir.join(&file)))
            })
            .or_else(|| builtin_defaults(name))
    }

    /// Saves a parameter group into the user directory, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub fn save_config(&self, name: &str, map: &ParameterMap) -> Result<()> {
        fs::create_dir_all(&self.user_dir)?;
        let object: Map<String, Value> = map
            .iter()
            .map(|(key, value)| (key.clone(), to_json(value)))
            .collect();
        let text = serde_json::to_string_pretty(&Value::Object(object))?;
        fs::write(self.user_dir.join(file_name(name)), text)?;
        Ok(())
    }

    /// Interpolation settings; invalid stored values fall back to defaults.
    #[must_use]
    pub fn interpolation_config(&self) -> InterpolationConfig {
        let mut config = InterpolationConfig::default();
        self.apply(InterpolationConfig::NAME, |map| config.apply_parameters(map));
        config
    }

    /// Peak search and fit settings.
    #[must_use]
    pub fn fit_config(&self) -> FitConfig {
        let mut config = FitConfig::default();
        self.apply(FitConfig::NAME, |map| config.apply_parameters(map));
        config
    }

    /// Baseline settings.
    #[must_use]
    pub fn baseline_config(&self) -> BaselineConfig {
        let mut config = BaselineConfig::default();
        self.apply(BaselineConfig::NAME, |map| config.apply_parameters(map));
        config
    }

    fn apply<F>(&self, name: &str, apply: F)
    where
        F: FnOnce(&ParameterMap) -> giwaxs_core::Result<()>,
    {
        if let Some(map) = self.read_config(name, false) {
            if let Err(err) = apply(&map) {
                warn!("ignoring stored {name}: {err}");
            }
        }
    }
}

fn file_name(name: &str) -> String {
    format!("{name}.json")
}

fn read_map(path: &Path) -> Option<ParameterMap> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            error!("cannot read {}: {err}", path.display());
            return None;
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(object)) => Some(
            object
                .into_iter()
                .filter_map(|(key, value)| from_json(&key, value).map(|v| (key, v)))
                .collect(),
        ),
        Ok(other) => {
            error!("JSON object is not a dict in {}: {other}", path.display());
            None
        }
        Err(err) => {
            error!("cannot parse {}: {err}", path.display());
            None
        }
    }
}

fn from_json(key: &str, value: Value) -> Option<ParameterValue> {
    match value {
        Value::Null => Some(ParameterValue::Null),
        Value::Number(n) => n
            .as_i64()
            .map(ParameterValue::Int)
            .or_else(|| n.as_f64().map(ParameterValue::Float)),
        Value::String(s) => Some(ParameterValue::Text(s)),
        other => {
            warn!("skipping config entry `{key}` of unsupported type: {other}");
            None
        }
    }
}

fn to_json(value: &ParameterValue) -> Value {
    match value {
        ParameterValue::Int(v) => Value::from(*v),
        ParameterValue::Float(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
        ParameterValue::Text(v) => Value::String(v.clone()),
        ParameterValue::Null => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use giwaxs_core::InterpolationMode;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_defaults() {
        let store = ConfigStore::new(tempdir().unwrap().path().join("user"));
        let fit = store.read_config(FitConfig::NAME, false).unwrap();
        assert_eq!(fit.get("max_peaks_number"), Some(&ParameterValue::Int(20)));
        assert_eq!(fit.get("sigma_fit"), Some(&ParameterValue::Null));
        let interp = store.read_config(InterpolationConfig::NAME, true).unwrap();
        assert_eq!(interp.get("mode"), Some(&ParameterValue::Text("Bilinear".into())));
        assert!(store.read_config("Unknown group", false).is_none());
    }

    #[test]
    fn test_saved_values_take_precedence() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("user"));
        let mut map = ParameterMap::new();
        map.insert("r_size".into(), ParameterValue::Int(128));
        map.insert("phi_size".into(), ParameterValue::Int(64));
        map.insert("mode".into(), "Cubic".into());
        store.save_config(InterpolationConfig::NAME, &map).unwrap();

        assert_eq!(store.read_config(InterpolationConfig::NAME, false), Some(map));
        let config = store.interpolation_config();
        assert_eq!((config.r_size, config.phi_size), (128, 64));
        assert_eq!(config.mode, InterpolationMode::Cubic);

        let defaults = store.read_config(InterpolationConfig::NAME, true).unwrap();
        assert_eq!(defaults.get("r_size"), Some(&ParameterValue::Int(512)));
    }

    #[test]
    fn test_default_dir_before_builtins() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Baseline correction.json"),
            r#"{"smoothness_param": 50.0, "asymmetry_param": 0.2}"#,
        )
        .unwrap();
        let store = ConfigStore::new(dir.path().join("user")).with_default_dir(dir.path());
        let config = store.baseline_config();
        assert_relative_eq!(config.smoothness_param, 50.0);
        assert_relative_eq!(config.asymmetry_param, 0.2);
    }

    #[test]
    fn test_non_object_json_is_absent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Fitting parameters.json"), "[1, 2, 3]").unwrap();
        let store = ConfigStore::new(dir.path());
        let map = store.read_config(FitConfig::NAME, false).unwrap();
        assert_eq!(map, FitConfig::default().to_parameters());
    }

    #[test]
    fn test_invalid_stored_values_keep_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("Fitting parameters.json"),
            r#"{"max_peaks_number": -4, "init_width": 12.0}"#,
        )
        .unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.fit_config(), FitConfig::default());
    }
}
