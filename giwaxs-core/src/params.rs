//! Declarative parameter schemas.
//!
//! Every user-editable parameter group is described by a static table of
//! [`ParameterSpec`] records. Front ends build their input forms from the
//! table, and [`validate`] turns a loosely typed [`ParameterMap`] coming from
//! a form or a config file into checked values.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Loosely typed parameter value as stored in config files.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
    /// Explicitly empty; only accepted for optional parameters.
    Null,
}

impl ParameterValue {
    /// Parses form input for a parameter of the given kind.
    ///
    /// A comma is accepted as decimal separator; empty input yields [`ParameterValue::Null`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] if the text does not parse.
    pub fn parse(kind: ParameterKind, text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::Null);
        }
        match kind {
            ParameterKind::Int => text
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| Error::invalid_parameter(text, e.to_string())),
            ParameterKind::Float => text
                .replace(',', ".")
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|e| Error::invalid_parameter(text, e.to_string())),
            ParameterKind::Text => Ok(Self::Text(text.to_string())),
        }
    }

    /// Numeric value, if any.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Null => Ok(()),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Option<f64>> for ParameterValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Float)
    }
}

/// Named parameter values, e.g. one JSON config object.
pub type ParameterMap = BTreeMap<String, ParameterValue>;

/// Expected type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Int,
    Float,
    Text,
}

/// Schema record for one parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSpec {
    /// Key in the parameter map.
    pub name: &'static str,
    /// Short form label.
    pub label: &'static str,
    pub kind: ParameterKind,
    /// Accepts [`ParameterValue::Null`].
    pub optional: bool,
    /// Tooltip text.
    pub description: &'static str,
    /// Extra validity condition on a present value.
    pub check: Option<fn(&ParameterValue) -> bool>,
}

impl ParameterSpec {
    /// Checks one value against this record, coercing integers for float parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] on a type mismatch, a null value for a
    /// required parameter, or a failed validity check.
    #[allow(clippy::cast_precision_loss)]
    pub fn check_value(&self, value: &ParameterValue) -> Result<ParameterValue> {
        let value = match (self.kind, value) {
            (_, ParameterValue::Null) if self.optional => return Ok(ParameterValue::Null),
            (_, ParameterValue::Null) => {
                return Err(Error::invalid_parameter(self.name, "value is required"))
            }
            (ParameterKind::Int, ParameterValue::Int(_))
            | (ParameterKind::Float, ParameterValue::Float(_))
            | (ParameterKind::Text, ParameterValue::Text(_)) => value.clone(),
            (ParameterKind::Float, ParameterValue::Int(v)) => ParameterValue::Float(*v as f64),
            (kind, other) => {
                return Err(Error::invalid_parameter(
                    self.name,
                    format!("expected {kind:?}, got {other:?}"),
                ))
            }
        };
        if let Some(check) = self.check {
            if !check(&value) {
                return Err(Error::invalid_parameter(
                    self.name,
                    format!("value {value} is out of range"),
                ));
            }
        }
        Ok(value)
    }
}

/// Validates the entries of `map` that the schema knows about.
///
/// Unknown keys are dropped; absent keys stay absent so callers can keep
/// their defaults.
///
/// # Errors
/// Returns the first [`Error::InvalidParameter`] encountered.
pub fn validate(specs: &[ParameterSpec], map: &ParameterMap) -> Result<ParameterMap> {
    let mut checked = ParameterMap::new();
    for spec in specs {
        if let Some(value) = map.get(spec.name) {
            checked.insert(spec.name.to_string(), spec.check_value(value)?);
        }
    }
    Ok(checked)
}

/// Looks up a schema record by name.
#[must_use]
pub fn find_spec<'a>(specs: &'a [ParameterSpec], name: &str) -> Option<&'a ParameterSpec> {
    specs.iter().find(|spec| spec.name == name)
}

pub(crate) fn positive(value: &ParameterValue) -> bool {
    value.as_f64().is_some_and(|v| v > 0.0)
}

pub(crate) fn non_negative(value: &ParameterValue) -> bool {
    value.as_f64().is_some_and(|v| v >= 0.0)
}

pub(crate) fn unit_interval(value: &ParameterValue) -> bool {
    value.as_f64().is_some_and(|v| v > 0.0 && v < 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParameterSpec] = &[
        ParameterSpec {
            name: "size",
            label: "Size",
            kind: ParameterKind::Int,
            optional: false,
            description: "",
            check: Some(positive),
        },
        ParameterSpec {
            name: "sigma",
            label: "Sigma",
            kind: ParameterKind::Float,
            optional: true,
            description: "",
            check: Some(non_negative),
        },
    ];

    #[test]
    fn test_parse_accepts_comma_decimal() {
        let value = ParameterValue::parse(ParameterKind::Float, " 2,5 ").unwrap();
        assert_eq!(value, ParameterValue::Float(2.5));
        assert!(ParameterValue::parse(ParameterKind::Int, "").unwrap().is_null());
        assert!(ParameterValue::parse(ParameterKind::Int, "2.5").is_err());
    }

    #[test]
    fn test_validate_coerces_and_drops_unknown() {
        let mut map = ParameterMap::new();
        map.insert("size".into(), ParameterValue::Int(4));
        map.insert("sigma".into(), ParameterValue::Int(2));
        map.insert("other".into(), ParameterValue::Int(1));
        let checked = validate(SPECS, &map).unwrap();
        assert_eq!(checked.len(), 2);
        assert_eq!(checked["sigma"], ParameterValue::Float(2.0));
    }

    #[test]
    fn test_validate_rejects() {
        let mut map = ParameterMap::new();
        map.insert("size".into(), ParameterValue::Null);
        assert!(validate(SPECS, &map).is_err());

        map.insert("size".into(), ParameterValue::Int(-1));
        assert!(validate(SPECS, &map).is_err());

        map.insert("size".into(), ParameterValue::Text("big".into()));
        assert!(validate(SPECS, &map).is_err());
    }

    #[test]
    fn test_optional_null_allowed() {
        let mut map = ParameterMap::new();
        map.insert("sigma".into(), ParameterValue::Null);
        let checked = validate(SPECS, &map).unwrap();
        assert!(checked["sigma"].is_null());
        assert_eq!(find_spec(SPECS, "sigma").unwrap().label, "Sigma");
    }
}
