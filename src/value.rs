use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{EvaluationContext, Provider, ResolutionDetails};

/// Type of a flag, one tag per [`FlagValue`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagValueType {
    /// `bool` flags.
    Boolean,
    /// `i64` flags.
    Integer,
    /// `f64` flags.
    Float,
    /// `String` flags.
    String,
    /// Arbitrary JSON structure.
    Struct,
}

/// A resolved flag value of any of the supported types.
///
/// # Serialization
///
/// When serialized to JSON, serialized as a two-field object with `type` and `value`:
/// ```json
/// {"type":"FLOAT","value":0.15}
/// ```
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagValue {
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A string value.
    String(String),
    /// Arbitrary JSON value.
    Struct(serde_json::Value),
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_owned())
    }
}

impl From<i32> for FlagValue {
    fn from(value: i32) -> Self {
        FlagValue::Integer(value.into())
    }
}

impl FlagValue {
    /// Type tag of the value.
    pub fn value_type(&self) -> FlagValueType {
        match self {
            FlagValue::Boolean(_) => FlagValueType::Boolean,
            FlagValue::Integer(_) => FlagValueType::Integer,
            FlagValue::Float(_) => FlagValueType::Float,
            FlagValue::String(_) => FlagValueType::String,
            FlagValue::Struct(_) => FlagValueType::Struct,
        }
    }

    /// Returns the value as a boolean if it is of type Boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is of type Integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FlagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float if it is of type Float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is of type String.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as JSON if it is of type Struct.
    pub fn as_struct(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Struct(v) => Some(v),
            _ => None,
        }
    }
}

/// Rust types that flags can be evaluated to.
///
/// Implemented for `bool`, `i64`, `f64`, `String`, and `serde_json::Value`. Conversion from
/// [`FlagValue`] is checked: a value of another type yields `None`, which the evaluation pipeline
/// reports as [`ErrorCode::TypeMismatch`](crate::ErrorCode::TypeMismatch).
pub trait FlagType: Clone + Send + Sync + Sized + 'static {
    /// Tag of the matching [`FlagValue`] variant.
    const TYPE: FlagValueType;

    /// Wrap `self` into the tagged union.
    fn into_flag_value(self) -> FlagValue;

    /// Extract a value of this type, or `None` on type mismatch.
    fn from_flag_value(value: FlagValue) -> Option<Self>;

    /// Dispatch to the provider's resolve method for this type.
    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self>;
}

impl FlagType for bool {
    const TYPE: FlagValueType = FlagValueType::Boolean;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Boolean(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        value.as_boolean()
    }

    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self> {
        provider.resolve_boolean(flag_key, default, context)
    }
}

impl FlagType for i64 {
    const TYPE: FlagValueType = FlagValueType::Integer;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Integer(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        value.as_integer()
    }

    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self> {
        provider.resolve_integer(flag_key, default, context)
    }
}

impl FlagType for f64 {
    const TYPE: FlagValueType = FlagValueType::Float;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Float(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        value.as_float()
    }

    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self> {
        provider.resolve_float(flag_key, default, context)
    }
}

impl FlagType for String {
    const TYPE: FlagValueType = FlagValueType::String;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::String(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self> {
        provider.resolve_string(flag_key, default, context)
    }
}

impl FlagType for serde_json::Value {
    const TYPE: FlagValueType = FlagValueType::Struct;

    fn into_flag_value(self) -> FlagValue {
        FlagValue::Struct(self)
    }

    fn from_flag_value(value: FlagValue) -> Option<Self> {
        match value {
            FlagValue::Struct(v) => Some(v),
            _ => None,
        }
    }

    fn resolve(
        provider: &dyn Provider,
        flag_key: &str,
        default: Self,
        context: &EvaluationContext,
    ) -> ResolutionDetails<Self> {
        provider.resolve_struct(flag_key, default, context)
    }
}
