use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::FlagValueType;

/// Why a flag resolved to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The value is static (no dynamic evaluation).
    Static,
    /// The value fell back to the caller's default.
    Default,
    /// The value was chosen by dynamic evaluation over the context.
    TargetingMatch,
    /// The value was chosen by a pseudorandom split.
    Split,
    /// The value was served from a cache.
    Cached,
    /// The flag is disabled; the caller's default was returned.
    Disabled,
    /// The provider did not say.
    Unknown,
    /// Resolution failed; the caller's default was returned.
    Error,
}

/// Classification of an evaluation failure.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The provider has not finished initializing.
    #[error("provider not ready")]
    ProviderNotReady,
    /// The provider failed irrecoverably.
    #[error("provider is in fatal state")]
    ProviderFatal,
    /// The flag is unknown to the provider.
    #[error("flag not found")]
    FlagNotFound,
    /// The flag definition could not be parsed.
    #[error("parse error")]
    ParseError,
    /// The flag value is of a different type than requested.
    #[error("type mismatch")]
    TypeMismatch,
    /// The provider needs a targeting key and the context has none.
    #[error("targeting key missing")]
    TargetingKeyMissing,
    /// The request or the evaluation context is invalid.
    #[error("invalid evaluation request")]
    Invalid,
    /// Any other failure, including failing hooks.
    #[error("general error")]
    General,
}

impl ErrorCode {
    /// Return `true` if the error is a normal running condition (e.g., a flag was not created yet)
    /// rather than something that needs developer's attention.
    pub(crate) fn is_normal(self) -> bool {
        match self {
            ErrorCode::ProviderNotReady | ErrorCode::FlagNotFound => true,

            ErrorCode::ProviderFatal
            | ErrorCode::ParseError
            | ErrorCode::TypeMismatch
            | ErrorCode::TargetingKeyMissing
            | ErrorCode::Invalid
            | ErrorCode::General => false,
        }
    }
}

/// Value stored in [`FlagMetadata`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_owned())
    }
}

/// Arbitrary provider-supplied information about a flag (e.g., owning team, version).
pub type FlagMetadata = HashMap<String, MetadataValue>;

/// What a [`Provider`](crate::Provider) reports for a single resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDetails<T> {
    /// Resolved value. Equal to the caller's default on error.
    pub value: T,
    /// Name of the selected variant, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Why the flag resolved to `value`.
    pub reason: Reason,
    /// Set if resolution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Human-readable description of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Provider-supplied metadata about the flag.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub flag_metadata: FlagMetadata,
}

impl<T> ResolutionDetails<T> {
    /// A successful resolution with no variant name.
    pub fn new(value: T, reason: Reason) -> ResolutionDetails<T> {
        ResolutionDetails {
            value,
            variant: None,
            reason,
            error_code: None,
            error_message: None,
            flag_metadata: FlagMetadata::new(),
        }
    }

    /// A failed resolution returning `default`.
    pub fn error(default: T, code: ErrorCode, message: impl Into<String>) -> ResolutionDetails<T> {
        ResolutionDetails {
            value: default,
            variant: None,
            reason: Reason::Error,
            error_code: Some(code),
            error_message: Some(message.into()),
            flag_metadata: FlagMetadata::new(),
        }
    }

    /// Set the variant name.
    pub fn with_variant(mut self, variant: impl Into<String>) -> ResolutionDetails<T> {
        self.variant = Some(variant.into());
        self
    }

    /// Set flag metadata.
    pub fn with_metadata(mut self, flag_metadata: FlagMetadata) -> ResolutionDetails<T> {
        self.flag_metadata = flag_metadata;
        self
    }

    /// Returns `true` if resolution failed.
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Map the value using the `f` function.
    pub fn map<T2, F: FnOnce(T) -> T2>(self, f: F) -> ResolutionDetails<T2> {
        ResolutionDetails {
            value: f(self.value),
            variant: self.variant,
            reason: self.reason,
            error_code: self.error_code,
            error_message: self.error_message,
            flag_metadata: self.flag_metadata,
        }
    }
}

/// Full record of a flag evaluation, returned by the `*_details` methods of
/// [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails<T> {
    /// Key of the evaluated flag.
    pub flag_key: String,
    /// Type requested by the caller.
    pub flag_type: FlagValueType,
    /// What the provider (or the client, on failure) reported.
    #[serde(flatten)]
    pub resolution: ResolutionDetails<T>,
}

impl<T> EvaluationDetails<T> {
    /// The evaluated value (the caller's default on error).
    pub fn value(&self) -> &T {
        &self.resolution.value
    }

    /// Consume details returning the value.
    pub fn into_value(self) -> T {
        self.resolution.value
    }

    /// See [`ResolutionDetails::variant`].
    pub fn variant(&self) -> Option<&str> {
        self.resolution.variant.as_deref()
    }

    /// See [`ResolutionDetails::reason`].
    pub fn reason(&self) -> Reason {
        self.resolution.reason
    }

    /// See [`ResolutionDetails::error_code`].
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.resolution.error_code
    }

    /// See [`ResolutionDetails::error_message`].
    pub fn error_message(&self) -> Option<&str> {
        self.resolution.error_message.as_deref()
    }

    /// See [`ResolutionDetails::flag_metadata`].
    pub fn flag_metadata(&self) -> &FlagMetadata {
        &self.resolution.flag_metadata
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ErrorCode, EvaluationDetails, Reason, ResolutionDetails};
    use crate::FlagValueType;

    #[test]
    fn error_details_carry_default() {
        let details = ResolutionDetails::error(7_i64, ErrorCode::FlagNotFound, "no such flag");

        assert_eq!(details.value, 7);
        assert_eq!(details.reason, Reason::Error);
        assert_eq!(details.error_code, Some(ErrorCode::FlagNotFound));
        assert!(details.is_error());
    }

    #[test]
    fn serializes_flattened_camel_case() {
        let details = EvaluationDetails {
            flag_key: "discountPercentage".to_owned(),
            flag_type: FlagValueType::Float,
            resolution: ResolutionDetails::new(0.15, Reason::Static).with_variant("default"),
        };

        assert_eq!(
            serde_json::to_value(&details).unwrap(),
            json!({
                "flagKey": "discountPercentage",
                "flagType": "FLOAT",
                "value": 0.15,
                "variant": "default",
                "reason": "STATIC",
            })
        );
    }

    #[test]
    fn normal_errors_are_not_escalated() {
        assert!(ErrorCode::FlagNotFound.is_normal());
        assert!(!ErrorCode::TypeMismatch.is_normal());
    }
}
