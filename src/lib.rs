//! A feature flag evaluation client with pluggable providers.
//!
//! # Overview
//!
//! Application code asks a [`Client`] for the value of a flag, passing a typed default and an
//! [`EvaluationContext`] describing the subject (user, request, device). The client delegates
//! resolution to the [`Provider`] bound to its domain in a [`Registry`], runs [`Hook`]s around the
//! evaluation, and always returns a value: on any failure the caller's default comes back, with
//! the reason recorded in [`EvaluationDetails`].
//!
//! An [`InMemoryProvider`] serving a static flag table is included for tests, demos, and local
//! development.
//!
//! # Error Handling
//!
//! Flag evaluation never fails. Errors are reported as an [`ErrorCode`] in the `*_details`
//! methods of [`Client`], while the plain `*_value` methods just return the default.
//!
//! Registry configuration (setting providers) returns [`Result`] with the [`Error`] enum, e.g. when
//! a provider fails to initialize or does not initialize in time.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging
//! messages, under the `flagline` target. Consider integrating a `log`-compatible logger
//! implementation for better visibility into provider lifecycle and evaluation errors.
//!
//! # Examples
//!
//! ```
//! # use flagline::{EvaluationContext, InMemoryFlag, InMemoryProvider, Registry};
//! let registry = Registry::new();
//! registry
//!     .set_provider_and_wait(InMemoryProvider::new([
//!         ("enableFeatureA", InMemoryFlag::single(true)),
//!         ("discountPercentage", InMemoryFlag::single(0.15)),
//!     ]))
//!     .unwrap();
//!
//! let client = registry.default_client();
//! let context = EvaluationContext::new()
//!     .with_targeting_key("user-1")
//!     .with_attribute("country", "NL");
//!
//! assert!(client.boolean_value("enableFeatureA", false, &context));
//! assert_eq!(client.float_value("discountPercentage", 0.0, &context), 0.15);
//! ```
//!
//! A runnable demo lives in the `demos/smoke` directory of the repository.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod client;
mod config;
mod context;
mod details;
mod error;
mod eval;
mod events;
mod hooks;
mod in_memory;
mod provider;
mod registry;
mod value;

pub use client::{Client, ClientMetadata};
pub use config::RegistryConfig;
pub use context::{ContextValue, EvaluationContext};
pub use details::{
    ErrorCode, EvaluationDetails, FlagMetadata, MetadataValue, Reason, ResolutionDetails,
};
pub use error::{Error, HookError, ProviderError, Result};
pub use events::{EventDetails, EventHandler, EventSender, HandlerId, ProviderEvent};
pub use hooks::{EvaluationOptions, Hook, HookContext, HookHints};
pub use in_memory::{ContextEvaluator, FlagState, InMemoryFlag, InMemoryProvider};
pub use provider::{
    IntoProvider, NoopProvider, Provider, ProviderMetadata, ProviderStatus, StatusCell,
};
pub use registry::{ProviderInit, Registry};
pub use value::{FlagType, FlagValue, FlagValueType};
