//! Named stage parameters with explicit defaults and bounds

use crate::error::{InferenceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "number",
            ParamValue::Text(_) => "string",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
        }
    }
}

/// Declaration of one tunable: its name, default and allowed range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub default: ParamValue,
    /// Inclusive numeric lower bound
    pub min: Option<f64>,
    /// Inclusive numeric upper bound
    pub max: Option<f64>,
}

impl ParamSpec {
    pub fn new(name: &str, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            default,
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub fn bounded(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn check(&self, value: &ParamValue) -> Result<ParamValue> {
        let value = match (&self.default, value) {
            (ParamValue::Float(_), ParamValue::Int(v)) => ParamValue::Float(*v as f64),
            (ParamValue::Int(_), ParamValue::Float(v)) if v.fract() == 0.0 => {
                ParamValue::Int(*v as i64)
            }
            (d, v) if std::mem::discriminant(d) == std::mem::discriminant(v) => v.clone(),
            (d, v) => {
                return Err(InferenceError::InvalidInput(format!(
                    "{} must be a {}, got {}",
                    self.name,
                    d.type_name(),
                    v.type_name()
                )))
            }
        };

        if let Some(n) = value.as_number() {
            if !n.is_finite() {
                return Err(InferenceError::InvalidInput(format!(
                    "{} must be finite",
                    self.name
                )));
            }
            let below = self.min.is_some_and(|min| n < min);
            let above = self.max.is_some_and(|max| n > max);
            if below || above {
                return Err(InferenceError::InvalidInput(format!(
                    "{} = {} is outside [{}, {}]",
                    self.name,
                    n,
                    self.min.map_or("-inf".to_string(), |v| v.to_string()),
                    self.max.map_or("inf".to_string(), |v| v.to_string()),
                )));
            }
        }
        Ok(value)
    }
}

/// Fully resolved parameters: every declared name has a checked value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    values: BTreeMap<String, ParamValue>,
}

impl StageParams {
    /// Apply `overrides` on top of the declared defaults
    ///
    /// Unknown names, type mismatches and out-of-range values are rejected.
    pub fn resolve(specs: &[ParamSpec], overrides: &BTreeMap<String, ParamValue>) -> Result<Self> {
        if let Some(unknown) = overrides
            .keys()
            .find(|k| !specs.iter().any(|s| &s.name == *k))
        {
            return Err(InferenceError::InvalidInput(format!(
                "unknown parameter {unknown}"
            )));
        }

        let mut values = BTreeMap::new();
        for spec in specs {
            let value = match overrides.get(&spec.name) {
                Some(v) => spec.check(v)?,
                None => spec.default.clone(),
            };
            values.insert(spec.name.clone(), value);
        }
        Ok(Self { values })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(ParamValue::as_number)
    }

    #[must_use]
    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name)? {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }
}
