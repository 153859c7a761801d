use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::{
    eval, events::HandlerScope, hooks::HookPipeline, ErrorCode, EvaluationContext,
    EvaluationDetails, EvaluationOptions, EventDetails, FlagType, HandlerId, Hook, HookContext,
    ProviderEvent, ProviderStatus, Registry, ResolutionDetails,
};

/// Identifying information about a [`Client`], passed to hooks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Domain the client was created for. `None` for the default client.
    pub domain: Option<String>,
}

/// Evaluates flags using the provider its domain is bound to.
///
/// Create clients with [`Registry::client`] or [`Registry::default_client`]. The provider is looked
/// up on every evaluation, so providers set after the client was created are picked up. Clients
/// are cheap to clone and clones share their context and hooks.
///
/// Every accessor is total: failures are never returned as errors, they produce the caller's
/// `default` and an [`ErrorCode`](crate::ErrorCode) in the `*_details` variants.
///
/// # Examples
/// ```
/// # use flagline::{EvaluationContext, InMemoryFlag, InMemoryProvider, Registry};
/// let registry = Registry::new();
/// registry
///     .set_provider_and_wait(InMemoryProvider::new([
///         ("greetingMessage", InMemoryFlag::single("Hello there!")),
///     ]))
///     .unwrap();
///
/// let client = registry.default_client();
/// let context = EvaluationContext::new().with_targeting_key("user-1");
///
/// assert_eq!(client.string_value("greetingMessage", "Hi", &context), "Hello there!");
///
/// let details = client.integer_details("usernameMaxLength", 20, &context);
/// assert_eq!(*details.value(), 20);
/// assert!(details.error_code().is_some());
/// ```
#[derive(Clone)]
pub struct Client {
    registry: Registry,
    metadata: ClientMetadata,
    state: Arc<ClientState>,
}

#[derive(Default)]
struct ClientState {
    context: RwLock<Arc<EvaluationContext>>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
}

impl Client {
    pub(crate) fn new(registry: Registry, domain: Option<String>) -> Client {
        Client {
            registry,
            metadata: ClientMetadata { domain },
            state: Arc::new(ClientState::default()),
        }
    }

    /// Client identity.
    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    /// Status of the provider currently serving this client.
    pub fn provider_status(&self) -> ProviderStatus {
        self.registry.provider_status(self.metadata.domain.as_deref())
    }

    /// Set the client-level evaluation context. It overrides the registry-level context and is
    /// overridden by the context passed to each evaluation.
    pub fn set_evaluation_context(&self, context: EvaluationContext) {
        *self
            .state
            .context
            .write()
            .expect("thread holding context lock should not panic") = Arc::new(context);
    }

    /// Current client-level evaluation context.
    pub fn evaluation_context(&self) -> Arc<EvaluationContext> {
        self.state
            .context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    /// Add a hook running for every evaluation of this client.
    pub fn add_hook(&self, hook: impl Hook + 'static) {
        self.add_hooks([Arc::new(hook) as Arc<dyn Hook>]);
    }

    /// Add hooks running for every evaluation of this client.
    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.state
            .hooks
            .write()
            .expect("thread holding hooks lock should not panic")
            .extend(hooks);
    }

    /// Register a handler for events of the provider serving this client.
    ///
    /// If that provider is already in the state `kind` describes, the handler runs immediately.
    pub fn add_handler(
        &self,
        kind: ProviderEvent,
        handler: impl Fn(&EventDetails) + Send + Sync + 'static,
    ) -> HandlerId {
        self.registry.add_scoped_handler(
            HandlerScope::Client(self.metadata.domain.clone()),
            kind,
            Arc::new(handler),
        )
    }

    /// Remove a handler. Same as [`Registry::remove_handler`].
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.registry.remove_handler(id)
    }

    /// Evaluate a boolean flag.
    pub fn boolean_value(&self, flag_key: &str, default: bool, context: &EvaluationContext) -> bool {
        self.boolean_details(flag_key, default, context).into_value()
    }

    /// Evaluate a boolean flag, returning full details.
    pub fn boolean_details(
        &self,
        flag_key: &str,
        default: bool,
        context: &EvaluationContext,
    ) -> EvaluationDetails<bool> {
        self.evaluate(flag_key, default, context, &EvaluationOptions::default())
    }

    /// Evaluate an integer flag.
    pub fn integer_value(&self, flag_key: &str, default: i64, context: &EvaluationContext) -> i64 {
        self.integer_details(flag_key, default, context).into_value()
    }

    /// Evaluate an integer flag, returning full details.
    pub fn integer_details(
        &self,
        flag_key: &str,
        default: i64,
        context: &EvaluationContext,
    ) -> EvaluationDetails<i64> {
        self.evaluate(flag_key, default, context, &EvaluationOptions::default())
    }

    /// Evaluate a float flag.
    ///
    /// Integer flags are not converted: evaluating one as a float is a type mismatch.
    pub fn float_value(&self, flag_key: &str, default: f64, context: &EvaluationContext) -> f64 {
        self.float_details(flag_key, default, context).into_value()
    }

    /// Evaluate a float flag, returning full details.
    pub fn float_details(
        &self,
        flag_key: &str,
        default: f64,
        context: &EvaluationContext,
    ) -> EvaluationDetails<f64> {
        self.evaluate(flag_key, default, context, &EvaluationOptions::default())
    }

    /// Evaluate a string flag.
    pub fn string_value(
        &self,
        flag_key: &str,
        default: impl Into<String>,
        context: &EvaluationContext,
    ) -> String {
        self.string_details(flag_key, default, context).into_value()
    }

    /// Evaluate a string flag, returning full details.
    pub fn string_details(
        &self,
        flag_key: &str,
        default: impl Into<String>,
        context: &EvaluationContext,
    ) -> EvaluationDetails<String> {
        self.evaluate(
            flag_key,
            default.into(),
            context,
            &EvaluationOptions::default(),
        )
    }

    /// Evaluate a structured (JSON) flag.
    pub fn struct_value(
        &self,
        flag_key: &str,
        default: serde_json::Value,
        context: &EvaluationContext,
    ) -> serde_json::Value {
        self.struct_details(flag_key, default, context).into_value()
    }

    /// Evaluate a structured (JSON) flag, returning full details.
    pub fn struct_details(
        &self,
        flag_key: &str,
        default: serde_json::Value,
        context: &EvaluationContext,
    ) -> EvaluationDetails<serde_json::Value> {
        self.evaluate(flag_key, default, context, &EvaluationOptions::default())
    }

    /// Evaluate a flag of any supported type with per-invocation hooks and hints.
    ///
    /// The evaluation context is the registry context, overridden by the client context,
    /// overridden by `context`, overridden by whatever `before` hooks return.
    ///
    /// # Examples
    /// ```
    /// # use flagline::{EvaluationContext, EvaluationOptions, Registry};
    /// let client = Registry::new().default_client();
    ///
    /// let details = client.evaluate(
    ///     "discountPercentage",
    ///     0.0,
    ///     &EvaluationContext::new(),
    ///     &EvaluationOptions::new().with_hint("requestId", "42"),
    /// );
    /// assert_eq!(*details.value(), 0.0);
    /// ```
    pub fn evaluate<T: FlagType>(
        &self,
        flag_key: &str,
        default: T,
        context: &EvaluationContext,
        options: &EvaluationOptions,
    ) -> EvaluationDetails<T> {
        let snapshot = self.registry.snapshot(self.metadata.domain.as_deref());

        let evaluation_context = snapshot
            .context
            .merge(&self.evaluation_context())
            .merge(context);

        let mut hooks = snapshot.hooks;
        hooks.extend(
            self.state
                .hooks
                .read()
                .expect("thread holding hooks lock should not panic")
                .iter()
                .cloned(),
        );
        hooks.extend(options.hooks.iter().cloned());

        let provider_parts = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (snapshot.provider.hooks(), snapshot.provider.metadata())
        }));
        let (provider_hooks, provider_metadata) = match provider_parts {
            Ok(parts) => parts,
            Err(_) => {
                log::warn!(target: "flagline", flag_key:display = flag_key; "provider panicked while preparing an evaluation");
                return EvaluationDetails {
                    flag_key: flag_key.to_owned(),
                    flag_type: T::TYPE,
                    resolution: ResolutionDetails::error(
                        default,
                        ErrorCode::General,
                        "provider panicked",
                    ),
                };
            }
        };
        hooks.extend(provider_hooks);

        let hook_context = HookContext {
            flag_key: flag_key.to_owned(),
            flag_type: T::TYPE,
            default_value: default.clone().into_flag_value(),
            evaluation_context,
            client_metadata: self.metadata.clone(),
            provider_metadata,
        };

        eval::evaluate(
            &*snapshot.provider,
            snapshot.status,
            &HookPipeline::new(hooks, &options.hints),
            hook_context,
            default,
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}
