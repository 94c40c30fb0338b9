//! Typed argument values for engine commands
//!
//! Every scalar argument travels as `{"type": ..., "value": ...}`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Long,
    Double,
    Boolean,
}

/// A tagged scalar argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedValue {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    pub value: Value,
}

impl TaggedValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String,
            value: Value::String(value.into()),
        }
    }

    pub fn long(value: i64) -> Self {
        Self {
            kind: ValueKind::Long,
            value: Value::from(value),
        }
    }

    pub fn double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double,
            value: Value::from(value),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean,
            value: Value::Bool(value),
        }
    }

    /// Tag an untyped JSON scalar.
    ///
    /// Integral numbers (including floats with no fractional part) become
    /// `long`, other numbers `double`. Null, arrays and objects are
    /// rejected.
    pub fn tag(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::string(s.clone())),
            Value::Bool(b) => Ok(Self::boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(Self::long(i));
                }
                match n.as_f64() {
                    Some(f) if is_integral(f) => Ok(Self::long(f as i64)),
                    Some(f) => Ok(Self::double(f)),
                    None => Err(Error::InvalidArgument(format!("Unrepresentable number {}", n))),
                }
            }
            other => Err(Error::InvalidArgument(format!(
                "Only scalar arguments can be tagged, got {}",
                other
            ))),
        }
    }
}

fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Tag every entry of an argument object
pub fn tag_arguments(
    args: &serde_json::Map<String, Value>,
) -> Result<serde_json::Map<String, Value>> {
    args.iter()
        .map(|(name, value)| {
            let tagged = TaggedValue::tag(value).map_err(|e| match e {
                Error::InvalidArgument(msg) => {
                    Error::InvalidArgument(format!("Argument '{}': {}", name, msg))
                }
                other => other,
            })?;
            Ok((name.clone(), serde_json::to_value(tagged)?))
        })
        .collect()
}
