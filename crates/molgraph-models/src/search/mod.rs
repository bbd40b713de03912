//! Hyperparameter search spaces and a small trial-based optimizer.
mod study;

pub use study::{Direction, RandomSampler, Sampler, Study, TpeSampler, Trial, TrialState};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParameterType {
    Categorical,
    Integer,
    Float,
    LogFloat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    Choices(Vec<Value>),
    Bounds(f64, f64),
}

/// One searchable hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub param_type: ParameterType,
    pub value_range: ValueRange,
}

/// Searchable hyperparameters by name.
pub type SearchSpace = BTreeMap<String, ParameterSpec>;

impl ParameterSpec {
    pub fn categorical<I, V>(choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            param_type: ParameterType::Categorical,
            value_range: ValueRange::Choices(choices.into_iter().map(Into::into).collect()),
        }
    }

    pub fn integer(low: i64, high: i64) -> Self {
        Self {
            param_type: ParameterType::Integer,
            value_range: ValueRange::Bounds(low as f64, high as f64),
        }
    }

    pub fn float(low: f64, high: f64) -> Self {
        Self {
            param_type: ParameterType::Float,
            value_range: ValueRange::Bounds(low, high),
        }
    }

    /// Float sampled uniformly in log space.
    pub fn log_float(low: f64, high: f64) -> Self {
        Self {
            param_type: ParameterType::LogFloat,
            value_range: ValueRange::Bounds(low, high),
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Error::InvalidParameter(format!("search parameter `{name}`: {reason}"))
        };
        match (&self.param_type, &self.value_range) {
            (ParameterType::Categorical, ValueRange::Choices(choices)) => {
                if choices.is_empty() {
                    return Err(invalid("categorical choices are empty"));
                }
            }
            (ParameterType::Categorical, ValueRange::Bounds(..)) => {
                return Err(invalid("categorical parameters need a list of choices"))
            }
            (_, ValueRange::Choices(_)) => {
                return Err(invalid("numeric parameters need (low, high) bounds"))
            }
            (param_type, ValueRange::Bounds(low, high)) => {
                if !low.is_finite() || !high.is_finite() || low > high {
                    return Err(invalid("bounds must be finite with low <= high"));
                }
                if *param_type == ParameterType::LogFloat && *low <= 0.0 {
                    return Err(invalid("log-scale bounds must be positive"));
                }
                if *param_type == ParameterType::Integer
                    && (low.fract() != 0.0 || high.fract() != 0.0)
                {
                    return Err(invalid("integer bounds must be whole numbers"));
                }
            }
        }
        Ok(())
    }

    /// Human readable range, e.g. `[1e-5, 0.01]` or `["gin", "gcn"]`.
    pub fn describe(&self) -> String {
        match &self.value_range {
            ValueRange::Choices(choices) => Value::Array(choices.clone()).to_string(),
            ValueRange::Bounds(low, high) => format!("[{low}, {high}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_validation() {
        assert!(ParameterSpec::integer(1, 10).validate("n").is_ok());
        assert!(ParameterSpec::log_float(0.0, 1.0).validate("lr").is_err());
        assert!(ParameterSpec::float(2.0, 1.0).validate("x").is_err());
        assert!(ParameterSpec::categorical(Vec::<String>::new()).validate("c").is_err());
        let bad = ParameterSpec {
            param_type: ParameterType::Categorical,
            value_range: ValueRange::Bounds(0.0, 1.0),
        };
        assert!(bad.validate("c").is_err());
        assert_eq!(ParameterSpec::categorical(["gin", "gcn"]).describe(), r#"["gin","gcn"]"#);
    }
}
