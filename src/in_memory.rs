//! A provider serving flags from an in-process table. Useful for tests, demos, and local
//! development.
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, RwLock},
};

use crate::{
    error::ProviderError, ErrorCode, EvaluationContext, EventDetails, EventSender, FlagMetadata,
    FlagType, FlagValue, Provider, ProviderEvent, ProviderMetadata, ProviderStatus, Reason,
    ResolutionDetails, StatusCell,
};

/// Whether an [`InMemoryFlag`] is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagState {
    /// The flag resolves to one of its variants.
    Enabled,
    /// The flag always resolves to the caller's default with [`Reason::Disabled`].
    Disabled,
}

/// Picks a variant name for a context. Returning `None` serves the flag's default variant.
pub type ContextEvaluator =
    Arc<dyn Fn(&InMemoryFlag, &EvaluationContext) -> Option<String> + Send + Sync>;

/// Definition of a single flag served by [`InMemoryProvider`].
///
/// # Examples
/// ```
/// # use flagline::{InMemoryFlag, FlagState};
/// let flag = InMemoryFlag::new(
///     "off",
///     [("on".to_owned(), true.into()), ("off".to_owned(), false.into())],
/// )
/// .with_context_evaluator(|_flag, context| {
///     context
///         .get("beta")
///         .and_then(|v| v.as_bool())
///         .filter(|beta| *beta)
///         .map(|_| "on".to_owned())
/// });
///
/// assert_eq!(flag.state, FlagState::Enabled);
/// ```
#[derive(Clone)]
pub struct InMemoryFlag {
    /// Disabled flags always resolve to the caller's default.
    pub state: FlagState,
    /// Variant served when no context evaluator is set or it returns `None`.
    pub default_variant: String,
    /// Variant name to value.
    pub variants: HashMap<String, FlagValue>,
    /// Optional dynamic variant selection.
    pub context_evaluator: Option<ContextEvaluator>,
    /// Reported with every successful resolution.
    pub metadata: FlagMetadata,
}

impl InMemoryFlag {
    /// Variant name used by [`InMemoryFlag::single`].
    pub const DEFAULT_VARIANT: &'static str = "default";

    /// Create an enabled flag.
    pub fn new(
        default_variant: impl Into<String>,
        variants: impl IntoIterator<Item = (String, FlagValue)>,
    ) -> InMemoryFlag {
        InMemoryFlag {
            state: FlagState::Enabled,
            default_variant: default_variant.into(),
            variants: variants.into_iter().collect(),
            context_evaluator: None,
            metadata: FlagMetadata::new(),
        }
    }

    /// Create an enabled flag with a single variant called
    /// [`"default"`](InMemoryFlag::DEFAULT_VARIANT).
    pub fn single(value: impl Into<FlagValue>) -> InMemoryFlag {
        InMemoryFlag::new(
            InMemoryFlag::DEFAULT_VARIANT,
            [(InMemoryFlag::DEFAULT_VARIANT.to_owned(), value.into())],
        )
    }

    /// Set whether the flag is served.
    pub fn with_state(mut self, state: FlagState) -> InMemoryFlag {
        self.state = state;
        self
    }

    /// Shorthand for `with_state(FlagState::Disabled)`.
    pub fn disabled(self) -> InMemoryFlag {
        self.with_state(FlagState::Disabled)
    }

    /// Pick variants dynamically from the evaluation context.
    pub fn with_context_evaluator(
        mut self,
        evaluator: impl Fn(&InMemoryFlag, &EvaluationContext) -> Option<String> + Send + Sync + 'static,
    ) -> InMemoryFlag {
        self.context_evaluator = Some(Arc::new(evaluator));
        self
    }

    /// Attach metadata reported with every resolution of this flag.
    pub fn with_metadata(mut self, metadata: FlagMetadata) -> InMemoryFlag {
        self.metadata = metadata;
        self
    }

    /// Context evaluators compare by identity.
    fn same_definition(&self, other: &InMemoryFlag) -> bool {
        let same_evaluator = match (&self.context_evaluator, &other.context_evaluator) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_evaluator
            && self.state == other.state
            && self.default_variant == other.default_variant
            && self.variants == other.variants
            && self.metadata == other.metadata
    }

    fn resolve<T: FlagType>(
        &self,
        flag_key: &str,
        default: T,
        context: &EvaluationContext,
    ) -> ResolutionDetails<T> {
        if self.state == FlagState::Disabled {
            return ResolutionDetails::new(default, Reason::Disabled)
                .with_metadata(self.metadata.clone());
        }

        let (variant_key, reason) = match &self.context_evaluator {
            None => (self.default_variant.as_str(), Reason::Static),
            Some(evaluator) => match evaluator(self, context) {
                Some(variant) => {
                    return self.serve(flag_key, &variant, Reason::TargetingMatch, default)
                }
                None => (self.default_variant.as_str(), Reason::Default),
            },
        };

        self.serve(flag_key, variant_key, reason, default)
    }

    fn serve<T: FlagType>(
        &self,
        flag_key: &str,
        variant_key: &str,
        reason: Reason,
        default: T,
    ) -> ResolutionDetails<T> {
        let Some(value) = self.variants.get(variant_key) else {
            return ResolutionDetails::error(
                default,
                ErrorCode::General,
                format!("variant {variant_key:?} of flag {flag_key:?} is not defined"),
            );
        };

        let found = value.value_type();
        match T::from_flag_value(value.clone()) {
            Some(value) => ResolutionDetails::new(value, reason)
                .with_variant(variant_key)
                .with_metadata(self.metadata.clone()),
            None => ResolutionDetails::error(
                default,
                ErrorCode::TypeMismatch,
                format!(
                    "flag {flag_key:?} has type {found:?}, requested {:?}",
                    T::TYPE
                ),
            ),
        }
    }
}

impl std::fmt::Debug for InMemoryFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryFlag")
            .field("state", &self.state)
            .field("default_variant", &self.default_variant)
            .field("variants", &self.variants)
            .field("context_evaluator", &self.context_evaluator.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Provider serving a static table of [`InMemoryFlag`]s.
///
/// The table can be replaced at runtime with [`InMemoryProvider::update_flags`], which emits
/// [`ProviderEvent::ConfigurationChanged`].
///
/// # Examples
/// ```
/// # use flagline::{InMemoryFlag, InMemoryProvider, Registry};
/// let provider = InMemoryProvider::new([
///     ("enableFeatureA", InMemoryFlag::single(false)),
///     ("discountPercentage", InMemoryFlag::single(0.15)),
/// ]);
///
/// let registry = Registry::new();
/// registry.set_provider_and_wait(provider).unwrap();
/// ```
pub struct InMemoryProvider {
    // Replaced as a whole, so a resolution always reads one consistent table.
    flags: RwLock<Arc<HashMap<String, InMemoryFlag>>>,
    status: StatusCell,
    events: Mutex<Option<EventSender>>,
}

impl InMemoryProvider {
    /// Provider name reported in [`ProviderMetadata`].
    pub const NAME: &'static str = "InMemoryProvider";

    /// Create a provider serving `flags`. The provider is `NotReady` until initialized.
    pub fn new<K: Into<String>>(flags: impl IntoIterator<Item = (K, InMemoryFlag)>) -> InMemoryProvider {
        InMemoryProvider {
            flags: RwLock::new(Arc::new(
                flags.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            )),
            status: StatusCell::default(),
            events: Mutex::new(None),
        }
    }

    /// Replace the whole flag table and notify handlers of the keys that were added, removed, or
    /// given a different definition. Nothing is emitted if no key changed.
    pub fn update_flags<K: Into<String>>(&self, flags: impl IntoIterator<Item = (K, InMemoryFlag)>) {
        let new_flags: HashMap<String, InMemoryFlag> =
            flags.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let changed: BTreeSet<String> = {
            let mut slot = self
                .flags
                .write()
                .expect("thread holding flags lock should not panic");
            let removed = slot
                .keys()
                .filter(|key| !new_flags.contains_key(*key));
            let added_or_replaced = new_flags.iter().filter_map(|(key, flag)| match slot.get(key) {
                Some(old) if old.same_definition(flag) => None,
                _ => Some(key),
            });
            let changed = removed.chain(added_or_replaced).cloned().collect();
            *slot = Arc::new(new_flags);
            changed
        };
        if changed.is_empty() {
            return;
        }

        self.emit(
            EventDetails::new(ProviderEvent::ConfigurationChanged)
                .with_flags_changed(changed.into_iter().collect()),
        );
    }

    /// Add or replace a single flag.
    pub fn set_flag(&self, flag_key: impl Into<String>, flag: InMemoryFlag) {
        let flag_key = flag_key.into();
        {
            let mut slot = self
                .flags
                .write()
                .expect("thread holding flags lock should not panic");
            let mut flags = (**slot).clone();
            flags.insert(flag_key.clone(), flag);
            *slot = Arc::new(flags);
        }

        self.emit(
            EventDetails::new(ProviderEvent::ConfigurationChanged)
                .with_flags_changed(vec![flag_key]),
        );
    }

    /// Move the provider to `status`, emitting the matching event. Simulates backend outages in
    /// tests.
    ///
    /// `Fatal` is terminal: once there, the status only changes on [`Provider::shutdown`].
    pub fn set_status(&self, status: ProviderStatus) {
        if self.status.get() == ProviderStatus::Fatal {
            log::debug!(target: "flagline", status:? = status; "ignoring status change of a fatal provider");
            return;
        }
        let previous = self.status.set(status);
        if previous == status {
            return;
        }

        let event = match status {
            ProviderStatus::Ready => EventDetails::new(ProviderEvent::Ready),
            ProviderStatus::Stale => EventDetails::new(ProviderEvent::Stale),
            ProviderStatus::Error => EventDetails::new(ProviderEvent::Error)
                .with_error_code(ErrorCode::General),
            ProviderStatus::Fatal => EventDetails::new(ProviderEvent::Error)
                .with_error_code(ErrorCode::ProviderFatal),
            ProviderStatus::NotReady => return,
        };
        self.emit(event);
    }

    fn snapshot(&self) -> Arc<HashMap<String, InMemoryFlag>> {
        self.flags
            .read()
            .expect("thread holding flags lock should not panic")
            .clone()
    }

    fn emit(&self, details: EventDetails) {
        let sender = self
            .events
            .lock()
            .expect("thread holding events lock should not panic")
            .clone();
        if let Some(sender) = sender {
            sender.emit(details);
        }
    }

    fn resolve<T: FlagType>(
        &self,
        flag_key: &str,
        default: T,
        context: &EvaluationContext,
    ) -> ResolutionDetails<T> {
        let flags = self.snapshot();
        match flags.get(flag_key) {
            Some(flag) => flag.resolve(flag_key, default, context),
            None => ResolutionDetails::error(
                default,
                ErrorCode::FlagNotFound,
                format!("flag {flag_key:?} not found"),
            ),
        }
    }
}

impl Provider for InMemoryProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new(InMemoryProvider::NAME)
    }

    fn status(&self) -> ProviderStatus {
        self.status.get()
    }

    fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
        self.status.set(ProviderStatus::Ready);
        Ok(())
    }

    fn shutdown(&self) {
        self.status.set(ProviderStatus::NotReady);
    }

    fn attach_events(&self, events: EventSender) {
        *self
            .events
            .lock()
            .expect("thread holding events lock should not panic") = Some(events);
    }

    fn resolve_boolean(
        &self,
        flag_key: &str,
        default: bool,
        context: &EvaluationContext,
    ) -> ResolutionDetails<bool> {
        self.resolve(flag_key, default, context)
    }

    fn resolve_integer(
        &self,
        flag_key: &str,
        default: i64,
        context: &EvaluationContext,
    ) -> ResolutionDetails<i64> {
        self.resolve(flag_key, default, context)
    }

    fn resolve_float(
        &self,
        flag_key: &str,
        default: f64,
        context: &EvaluationContext,
    ) -> ResolutionDetails<f64> {
        self.resolve(flag_key, default, context)
    }

    fn resolve_string(
        &self,
        flag_key: &str,
        default: String,
        context: &EvaluationContext,
    ) -> ResolutionDetails<String> {
        self.resolve(flag_key, default, context)
    }

    fn resolve_struct(
        &self,
        flag_key: &str,
        default: serde_json::Value,
        context: &EvaluationContext,
    ) -> ResolutionDetails<serde_json::Value> {
        self.resolve(flag_key, default, context)
    }
}
