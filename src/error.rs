use std::{sync::Arc, time::Duration};

/// Represents a result type for registry operations.
///
/// Flag evaluation never returns this type: evaluation errors are reported as an
/// [`ErrorCode`](crate::ErrorCode) inside [`EvaluationDetails`](crate::EvaluationDetails).
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by [`Registry`](crate::Registry) configuration calls.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Provider initialization failed fatally. The provider was not installed and the previously
    /// active provider is still in use.
    #[error("provider {provider:?} failed to initialize: {message}")]
    ProviderFatal {
        /// Name of the provider that failed.
        provider: String,
        /// Message reported by the provider.
        message: String,
    },

    /// Provider did not settle within the allotted time. Initialization continues in the
    /// background.
    #[error("provider {provider:?} did not initialize within {timeout:?}")]
    InitTimeout {
        /// Name of the provider being initialized.
        provider: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A newer provider was set for the same domain before this one finished initializing. The
    /// provider was not installed.
    #[error("provider {provider:?} was superseded before it finished initializing")]
    Superseded {
        /// Name of the superseded provider.
        provider: String,
    },

    /// Indicates that the initialization thread panicked. This should normally never happen.
    #[error("provider initialization thread panicked")]
    InitThreadPanicked,

    /// An I/O error, e.g. failure to spawn the initialization thread.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Error reported by [`Provider::initialize`](crate::Provider::initialize).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// The provider cannot recover. It is never installed and never retried automatically.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// A transient failure. The provider is installed in the `Error` status and evaluation is
    /// still attempted.
    #[error("provider error: {0}")]
    General(String),
}

/// Error raised by a [`Hook`](crate::Hook) stage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    /// Create a new hook error from any message.
    pub fn new(message: impl Into<String>) -> HookError {
        HookError(message.into())
    }
}
