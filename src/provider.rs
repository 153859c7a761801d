use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

#[cfg(doc)]
use crate::Registry;
use crate::{
    error::ProviderError, EvaluationContext, EventSender, Hook, Reason, ResolutionDetails,
};

/// Readiness of a [`Provider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    /// Not initialized yet (or already shut down). Evaluation returns the default value.
    NotReady,
    /// Initialized and serving flags.
    Ready,
    /// Transient failure. Evaluation is still attempted and the provider may recover.
    Error,
    /// Serving last-known values while the backend catches up.
    Stale,
    /// Unrecoverable failure. Evaluation returns the default value.
    Fatal,
}

/// Identifying information about a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Human-readable provider name, used in logs and events.
    pub name: String,
}

impl ProviderMetadata {
    /// Create metadata for a provider called `name`.
    pub fn new(name: impl Into<String>) -> ProviderMetadata {
        ProviderMetadata { name: name.into() }
    }
}

/// A pluggable backend that resolves flag values.
///
/// Providers are installed into a [`Registry`] and shared by every client of their domain, so
/// they must be `Send + Sync`. Resolve methods should not panic: resolution failures are reported
/// through [`ResolutionDetails::error`] and the caller's `default`.
///
/// # Lifecycle
///
/// The registry calls [`Provider::attach_events`] and then [`Provider::initialize`] on a
/// background thread. Returning [`ProviderError::Fatal`] keeps the provider from ever being
/// installed. [`Provider::shutdown`] is called when the provider is replaced or the registry shuts
/// down.
///
/// # Examples
///
/// ```
/// # use flagline::{EvaluationContext, Provider, ProviderMetadata, ProviderStatus, Reason, ResolutionDetails};
/// struct AlwaysOn;
///
/// impl Provider for AlwaysOn {
///     fn metadata(&self) -> ProviderMetadata {
///         ProviderMetadata::new("always-on")
///     }
///
///     fn status(&self) -> ProviderStatus {
///         ProviderStatus::Ready
///     }
///
///     fn resolve_boolean(&self, _: &str, _: bool, _: &EvaluationContext) -> ResolutionDetails<bool> {
///         ResolutionDetails::new(true, Reason::Static)
///     }
///
///     fn resolve_integer(&self, _: &str, default: i64, _: &EvaluationContext) -> ResolutionDetails<i64> {
///         ResolutionDetails::new(default, Reason::Default)
///     }
///
///     fn resolve_float(&self, _: &str, default: f64, _: &EvaluationContext) -> ResolutionDetails<f64> {
///         ResolutionDetails::new(default, Reason::Default)
///     }
///
///     fn resolve_string(&self, _: &str, default: String, _: &EvaluationContext) -> ResolutionDetails<String> {
///         ResolutionDetails::new(default, Reason::Default)
///     }
///
///     fn resolve_struct(
///         &self,
///         _: &str,
///         default: serde_json::Value,
///         _: &EvaluationContext,
///     ) -> ResolutionDetails<serde_json::Value> {
///         ResolutionDetails::new(default, Reason::Default)
///     }
/// }
/// ```
pub trait Provider: Send + Sync {
    /// Provider identity.
    fn metadata(&self) -> ProviderMetadata;

    /// Current readiness of the provider.
    fn status(&self) -> ProviderStatus;

    /// Prepare the provider for evaluation (connect, load flags). Called once, before the provider
    /// is installed. `context` is the registry-level evaluation context at the time of the call.
    fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Release resources. The provider is no longer used for evaluation afterwards.
    fn shutdown(&self) {}

    /// Hooks that run around every evaluation served by this provider. They run after API, client
    /// and invocation hooks in the `before` stage.
    fn hooks(&self) -> Vec<Arc<dyn Hook>> {
        Vec::new()
    }

    /// Receive a handle to emit events. Called once per registration, before
    /// [`Provider::initialize`]. The default implementation drops it.
    fn attach_events(&self, _events: EventSender) {}

    /// Resolve a boolean flag.
    fn resolve_boolean(
        &self,
        flag_key: &str,
        default: bool,
        context: &EvaluationContext,
    ) -> ResolutionDetails<bool>;

    /// Resolve an integer flag.
    fn resolve_integer(
        &self,
        flag_key: &str,
        default: i64,
        context: &EvaluationContext,
    ) -> ResolutionDetails<i64>;

    /// Resolve a float flag.
    fn resolve_float(
        &self,
        flag_key: &str,
        default: f64,
        context: &EvaluationContext,
    ) -> ResolutionDetails<f64>;

    /// Resolve a string flag.
    fn resolve_string(
        &self,
        flag_key: &str,
        default: String,
        context: &EvaluationContext,
    ) -> ResolutionDetails<String>;

    /// Resolve a structured (JSON) flag.
    fn resolve_struct(
        &self,
        flag_key: &str,
        default: serde_json::Value,
        context: &EvaluationContext,
    ) -> ResolutionDetails<serde_json::Value>;
}

/// Conversion into a shared provider, accepted by the `set_provider*` methods of [`Registry`].
///
/// Implemented for any provider value and for `Arc`s of providers, so the caller can keep a handle
/// to a provider it installs (e.g., to update an [`InMemoryProvider`](crate::InMemoryProvider)).
pub trait IntoProvider {
    /// Perform the conversion.
    fn into_provider(self) -> Arc<dyn Provider>;
}

impl<P: Provider + 'static> IntoProvider for P {
    fn into_provider(self) -> Arc<dyn Provider> {
        Arc::new(self)
    }
}

impl<P: Provider + 'static> IntoProvider for Arc<P> {
    fn into_provider(self) -> Arc<dyn Provider> {
        self
    }
}

impl IntoProvider for Arc<dyn Provider> {
    fn into_provider(self) -> Arc<dyn Provider> {
        self
    }
}

/// Thread-safe holder for a [`ProviderStatus`], for provider implementations.
#[derive(Debug)]
pub struct StatusCell(RwLock<ProviderStatus>);

impl StatusCell {
    /// Create a cell holding `status`.
    pub fn new(status: ProviderStatus) -> StatusCell {
        StatusCell(RwLock::new(status))
    }

    /// Current status.
    pub fn get(&self) -> ProviderStatus {
        *self
            .0
            .read()
            .expect("thread holding status lock should not panic")
    }

    /// Replace the status, returning the previous one.
    pub fn set(&self, status: ProviderStatus) -> ProviderStatus {
        let mut slot = self
            .0
            .write()
            .expect("thread holding status lock should not panic");
        std::mem::replace(&mut *slot, status)
    }
}

impl Default for StatusCell {
    fn default() -> StatusCell {
        StatusCell::new(ProviderStatus::NotReady)
    }
}

/// The provider a [`Registry`] starts with. Always ready; every flag resolves to the caller's
/// default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvider;

impl NoopProvider {
    const VARIANT: &'static str = "default-variant";

    fn resolve<T>(&self, default: T) -> ResolutionDetails<T> {
        ResolutionDetails::new(default, Reason::Default).with_variant(NoopProvider::VARIANT)
    }
}

impl Provider for NoopProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::new("No-op Provider")
    }

    fn status(&self) -> ProviderStatus {
        ProviderStatus::Ready
    }

    fn resolve_boolean(&self, _: &str, default: bool, _: &EvaluationContext) -> ResolutionDetails<bool> {
        self.resolve(default)
    }

    fn resolve_integer(&self, _: &str, default: i64, _: &EvaluationContext) -> ResolutionDetails<i64> {
        self.resolve(default)
    }

    fn resolve_float(&self, _: &str, default: f64, _: &EvaluationContext) -> ResolutionDetails<f64> {
        self.resolve(default)
    }

    fn resolve_string(
        &self,
        _: &str,
        default: String,
        _: &EvaluationContext,
    ) -> ResolutionDetails<String> {
        self.resolve(default)
    }

    fn resolve_struct(
        &self,
        _: &str,
        default: serde_json::Value,
        _: &EvaluationContext,
    ) -> ResolutionDetails<serde_json::Value> {
        self.resolve(default)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{NoopProvider, Provider, ProviderStatus, StatusCell};
    use crate::{EvaluationContext, Reason};

    #[test]
    fn noop_provider_returns_default() {
        let details = NoopProvider.resolve_string("greeting", "hi".to_owned(), &EvaluationContext::new());

        assert_eq!(details.value, "hi");
        assert_eq!(details.reason, Reason::Default);
        assert_eq!(details.variant.as_deref(), Some("default-variant"));
        assert_eq!(NoopProvider.status(), ProviderStatus::Ready);
    }

    #[test]
    fn status_cell_is_shared_between_threads() {
        let cell = Arc::new(StatusCell::default());
        assert_eq!(cell.get(), ProviderStatus::NotReady);

        {
            let cell = cell.clone();
            let _ = std::thread::spawn(move || cell.set(ProviderStatus::Stale)).join();
        }

        assert_eq!(cell.set(ProviderStatus::Ready), ProviderStatus::Stale);
        assert_eq!(cell.get(), ProviderStatus::Ready);
    }
}
