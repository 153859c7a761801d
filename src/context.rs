use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

/// Attributes identifying the subject of a flag evaluation (a user, a session, a request).
///
/// Contexts are immutable values: they are built with the consuming `with_*` methods and combined
/// with [`EvaluationContext::merge`].
///
/// # Examples
/// ```
/// # use flagline::EvaluationContext;
/// let context = EvaluationContext::new()
///     .with_targeting_key("user-1")
///     .with_attribute("age", 42)
///     .with_attribute("country", "NZ");
///
/// assert_eq!(context.targeting_key(), Some("user-1"));
/// assert_eq!(context.get("country").and_then(|v| v.as_str()), Some("NZ"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    targeting_key: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, ContextValue>,
}

/// A single value stored in an [`EvaluationContext`].
///
/// Conveniently implements `From` conversions for all supported types.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    /// A boolean value.
    Bool(bool),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Float(f64),
    /// A timestamp.
    DateTime(DateTime<Utc>),
    /// A string value.
    String(String),
    /// A list of values.
    List(Vec<ContextValue>),
    /// A nested structure.
    Struct(HashMap<String, ContextValue>),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::String(value.to_owned())
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        ContextValue::Int(value.into())
    }
}

impl ContextValue {
    /// Returns the value as a boolean if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContextValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ContextValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float. Integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ContextValue::Float(f) => Some(*f),
            ContextValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a timestamp if it is one.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ContextValue::DateTime(t) => Some(*t),
            _ => None,
        }
    }
}

impl EvaluationContext {
    /// Create an empty context. The empty context is the identity element of
    /// [`EvaluationContext::merge`].
    pub fn new() -> EvaluationContext {
        EvaluationContext::default()
    }

    /// Set the targeting key, the unique identifier of the evaluation subject.
    pub fn with_targeting_key(mut self, targeting_key: impl Into<String>) -> EvaluationContext {
        self.targeting_key = Some(targeting_key.into());
        self
    }

    /// Add an attribute, replacing any previous value stored under `key`.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<ContextValue>,
    ) -> EvaluationContext {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The targeting key, if one was set.
    pub fn targeting_key(&self) -> Option<&str> {
        self.targeting_key.as_deref()
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.attributes.get(key)
    }

    /// Iterate over all attributes in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes (the targeting key is not counted).
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Returns `true` if the context carries neither a targeting key nor attributes.
    pub fn is_empty(&self) -> bool {
        self.targeting_key.is_none() && self.attributes.is_empty()
    }

    /// Right-biased union of two contexts.
    ///
    /// For every key present in both, the value from `overrides` wins; keys present in only one
    /// of them are carried through unchanged. The same applies to the targeting key.
    ///
    /// ```
    /// # use flagline::EvaluationContext;
    /// let base = EvaluationContext::new().with_attribute("plan", "free").with_attribute("age", 30);
    /// let overrides = EvaluationContext::new().with_attribute("plan", "pro");
    ///
    /// let merged = base.merge(&overrides);
    /// assert_eq!(merged.get("plan").and_then(|v| v.as_str()), Some("pro"));
    /// assert_eq!(merged.get("age").and_then(|v| v.as_int()), Some(30));
    /// ```
    pub fn merge(&self, overrides: &EvaluationContext) -> EvaluationContext {
        if overrides.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return overrides.clone();
        }

        let mut attributes = self.attributes.clone();
        attributes.extend(
            overrides
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        EvaluationContext {
            targeting_key: overrides
                .targeting_key
                .clone()
                .or_else(|| self.targeting_key.clone()),
            attributes,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for EvaluationContext
where
    K: Into<String>,
    V: Into<ContextValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        EvaluationContext {
            targeting_key: None,
            attributes: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ContextValue, EvaluationContext};

    fn sample() -> EvaluationContext {
        EvaluationContext::new()
            .with_targeting_key("user-1")
            .with_attribute("email", "user@example.com")
            .with_attribute("age", 37)
            .with_attribute("beta", true)
    }

    #[test]
    fn merge_prefers_override_on_collision() {
        let base = sample();
        let overrides = EvaluationContext::new()
            .with_attribute("age", 38)
            .with_attribute("ratio", 0.5);

        let merged = base.merge(&overrides);

        assert_eq!(merged.get("age"), overrides.get("age"));
        assert_eq!(merged.get("ratio"), Some(&ContextValue::Float(0.5)));
        assert_eq!(merged.get("email"), base.get("email"));
        assert_eq!(merged.get("beta"), Some(&ContextValue::Bool(true)));
        assert_eq!(merged.targeting_key(), Some("user-1"));
    }

    #[test]
    fn merge_overrides_targeting_key_only_when_present() {
        let base = sample();

        let replaced = base.merge(&EvaluationContext::new().with_targeting_key("user-2"));
        assert_eq!(replaced.targeting_key(), Some("user-2"));

        let kept = base.merge(&EvaluationContext::new().with_attribute("x", 1));
        assert_eq!(kept.targeting_key(), Some("user-1"));
    }

    #[test]
    fn empty_context_is_merge_identity() {
        let context = sample();
        let empty = EvaluationContext::new();

        assert_eq!(context.merge(&empty), context);
        assert_eq!(empty.merge(&context), context);
        assert!(empty.merge(&empty).is_empty());
    }

    #[test]
    fn merge_does_not_modify_inputs() {
        let base = sample();
        let overrides = EvaluationContext::new().with_attribute("age", 1);
        let before = base.clone();

        let _ = base.merge(&overrides);

        assert_eq!(base, before);
    }

    #[test]
    fn supports_heterogeneous_values() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let context = EvaluationContext::new()
            .with_attribute("signup", at)
            .with_attribute(
                "tags",
                ContextValue::List(vec!["a".into(), "b".into()]),
            )
            .with_attribute(
                "address",
                ContextValue::Struct([("city".to_owned(), "Oslo".into())].into()),
            );

        assert_eq!(context.get("signup").and_then(|v| v.as_datetime()), Some(at));
        assert!(matches!(context.get("tags"), Some(ContextValue::List(l)) if l.len() == 2));
        assert!(context.get("missing").is_none());
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn collects_from_pairs() {
        let context: EvaluationContext = [("plan", "pro"), ("region", "eu")].into_iter().collect();

        assert_eq!(context.len(), 2);
        assert_eq!(context.get("region").and_then(|v| v.as_str()), Some("eu"));
        assert_eq!(context.targeting_key(), None);
    }
}
