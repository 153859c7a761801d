use std::time::Duration;

#[cfg(doc)]
use crate::Registry;

/// Configuration for [`Registry`].
///
/// # Examples
/// ```
/// # use std::time::Duration;
/// # use flagline::{Registry, RegistryConfig};
/// let registry = Registry::with_config(
///     RegistryConfig::new().with_init_timeout(Duration::from_secs(5)),
/// );
/// ```
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long [`Registry::set_provider_and_wait`] blocks for a provider to initialize.
    ///
    /// Defaults to [`RegistryConfig::DEFAULT_INIT_TIMEOUT`].
    pub init_timeout: Duration,
    /// Name of the threads initializing providers.
    ///
    /// Defaults to [`RegistryConfig::DEFAULT_THREAD_NAME`].
    pub thread_name: String,
}

impl RegistryConfig {
    /// Default value for [`RegistryConfig::init_timeout`].
    pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default value for [`RegistryConfig::thread_name`].
    pub const DEFAULT_THREAD_NAME: &'static str = "flagline-init";

    /// Create a new `RegistryConfig` using default configuration.
    pub fn new() -> RegistryConfig {
        RegistryConfig::default()
    }

    /// Update initialization timeout with `init_timeout`.
    pub fn with_init_timeout(mut self, init_timeout: Duration) -> RegistryConfig {
        self.init_timeout = init_timeout;
        self
    }

    /// Update initialization thread name with `thread_name`.
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> RegistryConfig {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> RegistryConfig {
        RegistryConfig {
            init_timeout: RegistryConfig::DEFAULT_INIT_TIMEOUT,
            thread_name: RegistryConfig::DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}
