//! Provider registry: which provider serves which domain.
use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, RwLock, Weak},
    time::Duration,
};

use crate::{
    error::ProviderError,
    events::{
        fires_on_registration, run_handlers, EventBus, EventSink, HandlerScope, ProviderId,
    },
    Client, Error, ErrorCode, EvaluationContext, EventDetails, EventHandler, EventSender,
    HandlerId, Hook, IntoProvider, NoopProvider, Provider, ProviderEvent, ProviderMetadata,
    ProviderStatus, RegistryConfig, Result,
};

/// Owns the active providers, the registry-level evaluation context, hooks, and event handlers.
///
/// A `Registry` is a cheap handle: clones share the same state. Pass it to whoever needs to create
/// [`Client`]s.
///
/// Every registry starts with a [`NoopProvider`] as its default provider. Named domains fall back
/// to the default provider until a provider is set for them.
///
/// # Examples
/// ```
/// # use flagline::{EvaluationContext, InMemoryFlag, InMemoryProvider, ProviderStatus, Registry};
/// let registry = Registry::new();
/// let status = registry
///     .set_provider_and_wait(InMemoryProvider::new([("newCheckout", InMemoryFlag::single(true))]))
///     .unwrap();
/// assert_eq!(status, ProviderStatus::Ready);
///
/// let client = registry.default_client();
/// assert!(client.boolean_value("newCheckout", false, &EvaluationContext::new()));
/// ```
#[derive(Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

struct Shared {
    config: RegistryConfig,
    providers: RwLock<Providers>,
    context: RwLock<Arc<EvaluationContext>>,
    hooks: RwLock<Vec<Arc<dyn Hook>>>,
    events: EventBus,
}

struct Providers {
    default: Arc<dyn Provider>,
    domains: HashMap<String, Arc<dyn Provider>>,
    /// Status of providers installed by the registry, keyed by provider identity.
    states: HashMap<ProviderId, ProviderStatus>,
    /// Latest `set_provider*` generation per slot (`None` is the default slot).
    pending: HashMap<Option<String>, u64>,
    next_generation: u64,
}

/// What a client needs to run one evaluation. Taken under a single lock so the whole evaluation
/// sees one provider.
pub(crate) struct Snapshot {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) status: ProviderStatus,
    pub(crate) context: Arc<EvaluationContext>,
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
}

fn provider_id(provider: &Arc<dyn Provider>) -> ProviderId {
    Arc::as_ptr(provider) as *const () as usize
}

impl Providers {
    fn new() -> Providers {
        Providers {
            default: Arc::new(NoopProvider),
            domains: HashMap::new(),
            states: HashMap::new(),
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    fn get(&self, domain: Option<&str>) -> &Arc<dyn Provider> {
        domain
            .and_then(|domain| self.domains.get(domain))
            .unwrap_or(&self.default)
    }

    /// Tracked status of `provider`. A provider reporting `Fatal` or `NotReady` itself is taken
    /// at its word; a panicking `status()` counts as `Error`.
    fn status_of(&self, provider: &Arc<dyn Provider>) -> ProviderStatus {
        let reported = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| provider.status()))
            .unwrap_or(ProviderStatus::Error);
        match self.states.get(&provider_id(provider)).copied() {
            Some(ProviderStatus::Fatal) => ProviderStatus::Fatal,
            Some(_) if matches!(reported, ProviderStatus::Fatal | ProviderStatus::NotReady) => {
                reported
            }
            Some(tracked) => tracked,
            None => reported,
        }
    }

    fn is_bound(&self, id: ProviderId) -> bool {
        provider_id(&self.default) == id || self.domains.values().any(|p| provider_id(p) == id)
    }

    /// Returns `true` if handlers of `scope` are interested in events of provider `id`.
    fn serves(&self, scope: &HandlerScope, id: ProviderId) -> bool {
        match scope {
            HandlerScope::Api => true,
            HandlerScope::Client(domain) => provider_id(self.get(domain.as_deref())) == id,
        }
    }

    /// Returns `true` if handlers of `scope` are interested in events of whatever provider is set
    /// for `slot`.
    fn serves_slot(&self, scope: &HandlerScope, slot: Option<&str>) -> bool {
        match (scope, slot) {
            (HandlerScope::Api, _) => true,
            (HandlerScope::Client(domain), Some(slot)) => domain.as_deref() == Some(slot),
            (HandlerScope::Client(domain), None) => domain
                .as_deref()
                .map_or(true, |domain| !self.domains.contains_key(domain)),
        }
    }

    fn next_generation(&mut self, slot: Option<String>) -> u64 {
        self.next_generation += 1;
        self.pending.insert(slot, self.next_generation);
        self.next_generation
    }

    /// Clear `generation` from `slot`, returning `true` if it was the latest one.
    fn take_pending(&mut self, slot: &Option<String>, generation: u64) -> bool {
        if self.pending.get(slot) == Some(&generation) {
            self.pending.remove(slot);
            true
        } else {
            false
        }
    }

    /// Bind `provider` to `slot`. Returns the replaced provider if nothing else uses it anymore.
    fn install(
        &mut self,
        slot: Option<String>,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        let replaced = match slot {
            Some(domain) => self.domains.insert(domain, provider),
            None => Some(std::mem::replace(&mut self.default, provider)),
        }?;

        let id = provider_id(&replaced);
        if self.is_bound(id) {
            return None;
        }
        self.states.remove(&id);
        Some(replaced)
    }

    /// Unbind every provider, returning each distinct one once.
    fn clear(&mut self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        let old_default = std::mem::replace(&mut self.default, Arc::new(NoopProvider));
        for provider in std::iter::once(old_default).chain(self.domains.drain().map(|(_, p)| p)) {
            let id = provider_id(&provider);
            if !providers.iter().any(|p| provider_id(p) == id) {
                providers.push(provider);
            }
        }
        self.states.clear();
        self.pending.clear();
        providers
    }
}

impl Registry {
    /// Create a registry with default configuration.
    pub fn new() -> Registry {
        Registry::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    pub fn with_config(config: RegistryConfig) -> Registry {
        Registry {
            shared: Arc::new(Shared {
                config,
                providers: RwLock::new(Providers::new()),
                context: RwLock::new(Arc::new(EvaluationContext::new())),
                hooks: RwLock::new(Vec::new()),
                events: EventBus::default(),
            }),
        }
    }

    /// Set the default provider.
    ///
    /// Initialization runs on a background thread. The provider is installed once initialization
    /// settles: with status [`ProviderStatus::Ready`] on success or [`ProviderStatus::Error`] on
    /// [`ProviderError::General`]. A provider failing with [`ProviderError::Fatal`] is never
    /// installed and the previous provider stays active.
    ///
    /// # Errors
    ///
    /// Returns an error if the initialization thread cannot be spawned.
    pub fn set_provider(&self, provider: impl IntoProvider) -> Result<ProviderInit> {
        self.start(None, provider.into_provider())
    }

    /// Set the default provider and block until it is initialized, waiting at most
    /// [`RegistryConfig::init_timeout`].
    ///
    /// Once this returns `Ok`, every evaluation on the default domain uses the new provider.
    ///
    /// # Errors
    ///
    /// See [`ProviderInit::wait_timeout`].
    pub fn set_provider_and_wait(&self, provider: impl IntoProvider) -> Result<ProviderStatus> {
        self.set_provider_and_wait_timeout(provider, self.shared.config.init_timeout)
    }

    /// Like [`Registry::set_provider_and_wait`] with an explicit timeout.
    pub fn set_provider_and_wait_timeout(
        &self,
        provider: impl IntoProvider,
        timeout: Duration,
    ) -> Result<ProviderStatus> {
        self.set_provider(provider)?.wait_timeout(timeout)
    }

    /// Set the provider serving clients of `domain`. See [`Registry::set_provider`].
    pub fn set_provider_for_domain(
        &self,
        domain: impl Into<String>,
        provider: impl IntoProvider,
    ) -> Result<ProviderInit> {
        self.start(Some(domain.into()), provider.into_provider())
    }

    /// Set the provider of `domain` and block until it is initialized. See
    /// [`Registry::set_provider_and_wait`].
    pub fn set_provider_for_domain_and_wait(
        &self,
        domain: impl Into<String>,
        provider: impl IntoProvider,
    ) -> Result<ProviderStatus> {
        self.set_provider_for_domain_and_wait_timeout(
            domain,
            provider,
            self.shared.config.init_timeout,
        )
    }

    /// Like [`Registry::set_provider_for_domain_and_wait`] with an explicit timeout.
    pub fn set_provider_for_domain_and_wait_timeout(
        &self,
        domain: impl Into<String>,
        provider: impl IntoProvider,
        timeout: Duration,
    ) -> Result<ProviderStatus> {
        self.set_provider_for_domain(domain, provider)?
            .wait_timeout(timeout)
    }

    /// The provider serving `domain`, falling back to the default provider.
    pub fn provider(&self, domain: Option<&str>) -> Arc<dyn Provider> {
        self.shared.providers().get(domain).clone()
    }

    /// Metadata of the provider serving `domain`.
    pub fn provider_metadata(&self, domain: Option<&str>) -> ProviderMetadata {
        self.provider(domain).metadata()
    }

    /// Status of the provider serving `domain`.
    pub fn provider_status(&self, domain: Option<&str>) -> ProviderStatus {
        let providers = self.shared.providers();
        providers.status_of(providers.get(domain))
    }

    /// Create a client for `domain`. The client is served by the domain's provider, or by the
    /// default provider while the domain has none.
    pub fn client(&self, domain: impl Into<String>) -> Client {
        Client::new(self.clone(), Some(domain.into()))
    }

    /// Create a client served by the default provider.
    pub fn default_client(&self) -> Client {
        Client::new(self.clone(), None)
    }

    /// Set the registry-level evaluation context. It has the lowest precedence and is also passed
    /// to [`Provider::initialize`].
    pub fn set_evaluation_context(&self, context: EvaluationContext) {
        *self
            .shared
            .context
            .write()
            .expect("thread holding context lock should not panic") = Arc::new(context);
    }

    /// Current registry-level evaluation context.
    pub fn evaluation_context(&self) -> Arc<EvaluationContext> {
        self.shared.context()
    }

    /// Add a hook running for every evaluation of every client.
    pub fn add_hook(&self, hook: impl Hook + 'static) {
        self.add_hooks([Arc::new(hook) as Arc<dyn Hook>]);
    }

    /// Add hooks running for every evaluation of every client.
    pub fn add_hooks(&self, hooks: impl IntoIterator<Item = Arc<dyn Hook>>) {
        self.shared
            .hooks
            .write()
            .expect("thread holding hooks lock should not panic")
            .extend(hooks);
    }

    /// Register a handler for events of every provider.
    ///
    /// If the default provider is already in the state `kind` describes (e.g., `Ready`), the
    /// handler runs immediately.
    pub fn add_handler(
        &self,
        kind: ProviderEvent,
        handler: impl Fn(&EventDetails) + Send + Sync + 'static,
    ) -> HandlerId {
        self.add_scoped_handler(HandlerScope::Api, kind, Arc::new(handler))
    }

    /// Remove a handler registered through the registry or any client.
    ///
    /// Returns `false` if no such handler exists.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.shared.events.remove(id)
    }

    /// Shut down every registered provider and reset the registry to the [`NoopProvider`].
    ///
    /// Providers still initializing are never installed afterwards. Hooks, handlers, and the
    /// evaluation context are kept.
    pub fn shutdown(&self) {
        let providers = self
            .shared
            .providers
            .write()
            .expect("thread holding providers lock should not panic")
            .clear();

        for provider in providers {
            log::debug!(target: "flagline", provider:display = provider.metadata().name; "shutting down provider");
            provider.shutdown();
        }
    }

    pub(crate) fn add_scoped_handler(
        &self,
        scope: HandlerScope,
        kind: ProviderEvent,
        handler: EventHandler,
    ) -> HandlerId {
        let id = self.shared.events.add(scope.clone(), kind, handler.clone());

        let (provider, status) = {
            let providers = self.shared.providers();
            let domain = match &scope {
                HandlerScope::Api => None,
                HandlerScope::Client(domain) => domain.as_deref(),
            };
            let provider = providers.get(domain).clone();
            let status = providers.status_of(&provider);
            (provider, status)
        };

        if fires_on_registration(kind, status) {
            let mut details = EventDetails::for_status(kind, status);
            details.provider_name = provider.metadata().name;
            run_handlers(&[handler], &details);
        }

        id
    }

    pub(crate) fn snapshot(&self, domain: Option<&str>) -> Snapshot {
        let (provider, status) = {
            let providers = self.shared.providers();
            let provider = providers.get(domain).clone();
            let status = providers.status_of(&provider);
            (provider, status)
        };

        Snapshot {
            provider,
            status,
            context: self.shared.context(),
            hooks: self
                .shared
                .hooks
                .read()
                .expect("thread holding hooks lock should not panic")
                .clone(),
        }
    }

    fn start(&self, slot: Option<String>, provider: Arc<dyn Provider>) -> Result<ProviderInit> {
        let name = provider.metadata().name;
        let generation = self
            .shared
            .providers
            .write()
            .expect("thread holding providers lock should not panic")
            .next_generation(slot.clone());

        let sink: Weak<Shared> = Arc::downgrade(&self.shared);
        let sink: Weak<dyn EventSink> = sink;
        provider.attach_events(EventSender::new(sink, provider_id(&provider), name.clone()));

        let init = ProviderInit {
            provider: name.clone(),
            outcome: Arc::new((Mutex::new(None), Condvar::new())),
        };

        {
            // Cloning Arcs for move into thread
            let shared = Arc::clone(&self.shared);
            let outcome = Arc::clone(&init.outcome);
            let context = self.shared.context();

            log::debug!(target: "flagline", provider:display = name, domain:? = slot; "initializing provider");

            std::thread::Builder::new()
                .name(self.shared.config.thread_name.clone())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        provider.initialize(&context)
                    }));
                    let result = shared.settle(slot, generation, provider, result);

                    let (lock, condvar) = &*outcome;
                    if let Ok(mut lock) = lock.lock() {
                        *lock = Some(result);
                    }
                    condvar.notify_all();
                })?;
        }

        Ok(init)
    }
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn providers(&self) -> std::sync::RwLockReadGuard<'_, Providers> {
        self.providers
            .read()
            .expect("thread holding providers lock should not panic")
    }

    fn context(&self) -> Arc<EvaluationContext> {
        self.context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    /// Install (or discard) a provider whose initialization finished, and notify handlers.
    fn settle(
        &self,
        slot: Option<String>,
        generation: u64,
        provider: Arc<dyn Provider>,
        result: std::thread::Result<std::result::Result<(), ProviderError>>,
    ) -> Result<ProviderStatus> {
        let name = provider.metadata().name;
        let id = provider_id(&provider);

        let (status, message) = match result {
            Ok(Ok(())) => (ProviderStatus::Ready, None),
            Ok(Err(ProviderError::General(message))) => (ProviderStatus::Error, Some(message)),
            Ok(Err(ProviderError::Fatal(message))) => {
                log::warn!(target: "flagline", provider:display = name, domain:? = slot; "provider failed to initialize: {message}");
                let handlers = {
                    let mut providers = self
                        .providers
                        .write()
                        .expect("thread holding providers lock should not panic");
                    providers.take_pending(&slot, generation);
                    self.events.handlers_for(ProviderEvent::Error, |scope| {
                        providers.serves_slot(scope, slot.as_deref())
                    })
                };
                self.discard(&provider);

                let mut details = EventDetails::new(ProviderEvent::Error)
                    .with_message(message.clone())
                    .with_error_code(ErrorCode::ProviderFatal);
                details.provider_name.clone_from(&name);
                run_handlers(&handlers, &details);

                return Err(Error::ProviderFatal {
                    provider: name,
                    message,
                });
            }
            Err(_) => {
                log::warn!(target: "flagline", provider:display = name; "provider initialization panicked");
                self.providers
                    .write()
                    .expect("thread holding providers lock should not panic")
                    .take_pending(&slot, generation);
                self.discard(&provider);
                return Err(Error::InitThreadPanicked);
            }
        };

        let kind = match status {
            ProviderStatus::Ready => ProviderEvent::Ready,
            _ => ProviderEvent::Error,
        };
        let (replaced, handlers) = {
            let mut providers = self
                .providers
                .write()
                .expect("thread holding providers lock should not panic");
            if !providers.take_pending(&slot, generation) {
                drop(providers);
                log::debug!(target: "flagline", provider:display = name, domain:? = slot; "provider was superseded before it finished initializing");
                self.discard(&provider);
                return Err(Error::Superseded { provider: name });
            }

            providers.states.insert(id, status);
            let replaced = providers.install(slot.clone(), provider);
            let handlers = self
                .events
                .handlers_for(kind, |scope| providers.serves(scope, id));
            (replaced, handlers)
        };

        match &message {
            None => {
                log::debug!(target: "flagline", provider:display = name, domain:? = slot; "provider is ready")
            }
            Some(message) => {
                log::warn!(target: "flagline", provider:display = name, domain:? = slot; "provider initialized with error: {message}")
            }
        }

        if let Some(replaced) = replaced {
            log::debug!(target: "flagline", provider:display = replaced.metadata().name; "shutting down replaced provider");
            replaced.shutdown();
        }

        let mut details = EventDetails::for_status(kind, status);
        details.provider_name = name;
        details.message = message;
        run_handlers(&handlers, &details);

        Ok(status)
    }

    /// Shut down a provider that did not get installed, unless it is in use elsewhere.
    fn discard(&self, provider: &Arc<dyn Provider>) {
        if !self.providers().is_bound(provider_id(provider)) {
            provider.shutdown();
        }
    }
}

impl EventSink for Shared {
    fn dispatch(&self, provider: ProviderId, details: &EventDetails) {
        let handlers = {
            let mut providers = self
                .providers
                .write()
                .expect("thread holding providers lock should not panic");
            // Fatal is terminal.
            if let Some(status) = details.implied_status() {
                if let Some(state) = providers.states.get_mut(&provider) {
                    if *state != ProviderStatus::Fatal {
                        *state = status;
                    }
                }
            }
            self.events
                .handlers_for(details.kind, |scope| providers.serves(scope, provider))
        };

        log::debug!(target: "flagline",
                    provider:display = details.provider_name,
                    event:serde = details.kind;
                    "provider emitted event");
        run_handlers(&handlers, details);
    }
}

/// Handle to a provider initialization started by [`Registry::set_provider`].
///
/// Dropping the handle does not cancel initialization.
#[derive(Clone)]
pub struct ProviderInit {
    provider: String,
    /// Holds `None` while the provider is initializing and the outcome afterwards.
    outcome: Arc<(Mutex<Option<Result<ProviderStatus>>>, Condvar)>,
}

impl ProviderInit {
    /// Name of the provider being initialized.
    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    /// Returns `true` once initialization has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        self.outcome
            .0
            .lock()
            .map_or(true, |outcome| outcome.is_some())
    }

    /// Block until initialization settles.
    ///
    /// # Errors
    ///
    /// - [`Error::ProviderFatal`] if the provider failed fatally; the previous provider stays
    ///   active.
    /// - [`Error::Superseded`] if another provider was set for the same domain in the meantime.
    /// - [`Error::InitThreadPanicked`] if initialization panicked.
    pub fn wait(&self) -> Result<ProviderStatus> {
        let (lock, condvar) = &*self.outcome;
        let mut lock = lock.lock().map_err(|_| Error::InitThreadPanicked)?;
        loop {
            match &*lock {
                Some(outcome) => return outcome.clone(),
                None => {
                    lock = condvar.wait(lock).map_err(|_| Error::InitThreadPanicked)?;
                }
            }
        }
    }

    /// Block until initialization settles, at most for `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitTimeout`] if the provider did not settle in time. Initialization
    /// continues in the background and the provider is installed once it settles (unless
    /// superseded). Otherwise, see [`ProviderInit::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> Result<ProviderStatus> {
        let (lock, condvar) = &*self.outcome;
        let lock = lock.lock().map_err(|_| Error::InitThreadPanicked)?;
        let (lock, _) = condvar
            .wait_timeout_while(lock, timeout, |outcome| outcome.is_none())
            .map_err(|_| Error::InitThreadPanicked)?;
        match &*lock {
            Some(outcome) => outcome.clone(),
            None => Err(Error::InitTimeout {
                provider: self.provider.clone(),
                timeout,
            }),
        }
    }
}

impl std::fmt::Debug for ProviderInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderInit")
            .field("provider", &self.provider)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use super::{provider_id, Registry};
    use crate::{
        error::ProviderError, events::EventSink, Error, ErrorCode, EvaluationContext, EventDetails,
        InMemoryFlag, InMemoryProvider, Provider, ProviderEvent, ProviderMetadata, ProviderStatus,
        Reason, ResolutionDetails, StatusCell,
    };

    /// Provider whose initialization is controlled by the test.
    struct Scripted {
        name: &'static str,
        init: Result<(), ProviderError>,
        gate: Mutex<()>,
        status: StatusCell,
        shut_down: AtomicBool,
    }

    impl Scripted {
        fn new(name: &'static str, init: Result<(), ProviderError>) -> Scripted {
            Scripted {
                name,
                init,
                gate: Mutex::new(()),
                status: StatusCell::default(),
                shut_down: AtomicBool::new(false),
            }
        }
    }

    impl Provider for Scripted {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata::new(self.name)
        }

        fn status(&self) -> ProviderStatus {
            self.status.get()
        }

        fn initialize(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
            let _gate = self.gate.lock().unwrap();
            self.status.set(match &self.init {
                Ok(()) => ProviderStatus::Ready,
                Err(ProviderError::General(_)) => ProviderStatus::Error,
                Err(ProviderError::Fatal(_)) => ProviderStatus::Fatal,
            });
            self.init.clone()
        }

        fn shutdown(&self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }

        fn resolve_boolean(&self, _: &str, _: bool, _: &EvaluationContext) -> ResolutionDetails<bool> {
            ResolutionDetails::new(true, Reason::Static)
        }

        fn resolve_integer(&self, _: &str, default: i64, _: &EvaluationContext) -> ResolutionDetails<i64> {
            ResolutionDetails::new(default, Reason::Default)
        }

        fn resolve_float(&self, _: &str, default: f64, _: &EvaluationContext) -> ResolutionDetails<f64> {
            ResolutionDetails::new(default, Reason::Default)
        }

        fn resolve_string(
            &self,
            _: &str,
            _: String,
            _: &EvaluationContext,
        ) -> ResolutionDetails<String> {
            ResolutionDetails::new(self.name.to_owned(), Reason::Static)
        }

        fn resolve_struct(
            &self,
            _: &str,
            default: serde_json::Value,
            _: &EvaluationContext,
        ) -> ResolutionDetails<serde_json::Value> {
            ResolutionDetails::new(default, Reason::Default)
        }
    }

    #[test]
    fn starts_with_noop_provider() {
        let registry = Registry::new();

        assert_eq!(registry.provider_metadata(None).name, "No-op Provider");
        assert_eq!(registry.provider_status(Some("anything")), ProviderStatus::Ready);
    }

    #[test]
    fn general_init_error_installs_provider_in_error_status() {
        let registry = Registry::new();
        let provider = Arc::new(Scripted::new(
            "flaky",
            Err(ProviderError::General("backend slow".to_owned())),
        ));

        let status = registry.set_provider_and_wait(provider.clone()).unwrap();

        assert_eq!(status, ProviderStatus::Error);
        assert_eq!(registry.provider_metadata(None).name, "flaky");
        assert_eq!(registry.provider_status(None), ProviderStatus::Error);
    }

    #[test]
    fn fatal_init_keeps_previous_provider() {
        let registry = Registry::new();
        registry
            .set_provider_and_wait(Scripted::new("good", Ok(())))
            .unwrap();

        let result = registry.set_provider_and_wait(Scripted::new(
            "broken",
            Err(ProviderError::Fatal("bad credentials".to_owned())),
        ));

        assert!(matches!(result, Err(Error::ProviderFatal { .. })));
        assert_eq!(registry.provider_metadata(None).name, "good");
        assert_eq!(registry.provider_status(None), ProviderStatus::Ready);
    }

    #[test]
    fn replaced_provider_is_shut_down_unless_still_bound() {
        let registry = Registry::new();
        let shared = Arc::new(Scripted::new("shared", Ok(())));
        registry.set_provider_and_wait(shared.clone()).unwrap();
        registry
            .set_provider_for_domain_and_wait("billing", shared.clone())
            .unwrap();

        registry
            .set_provider_and_wait(Scripted::new("other", Ok(())))
            .unwrap();
        assert!(!shared.shut_down.load(Ordering::SeqCst));

        registry
            .set_provider_for_domain_and_wait("billing", Scripted::new("other", Ok(())))
            .unwrap();
        assert!(shared.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn timeout_leaves_initialization_running() {
        let registry = Registry::new();
        let slow = Arc::new(Scripted::new("slow", Ok(())));
        let gate = slow.gate.lock().unwrap();

        let init = registry.set_provider(slow.clone()).unwrap();
        let result = init.wait_timeout(Duration::from_millis(20));
        assert!(matches!(result, Err(Error::InitTimeout { .. })));
        assert!(!init.is_settled());
        assert_eq!(registry.provider_metadata(None).name, "No-op Provider");

        drop(gate);
        assert_eq!(init.wait().unwrap(), ProviderStatus::Ready);
        assert_eq!(registry.provider_metadata(None).name, "slow");
    }

    #[test]
    fn newer_provider_supersedes_pending_one() {
        let registry = Registry::new();
        let slow = Arc::new(Scripted::new("slow", Ok(())));
        let gate = slow.gate.lock().unwrap();

        let pending = registry.set_provider(slow.clone()).unwrap();
        registry
            .set_provider_and_wait(Scripted::new("fast", Ok(())))
            .unwrap();
        drop(gate);

        assert!(matches!(pending.wait(), Err(Error::Superseded { .. })));
        assert_eq!(registry.provider_metadata(None).name, "fast");
        assert!(slow.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn domains_fall_back_to_default_provider() {
        let registry = Registry::new();
        registry
            .set_provider_and_wait(Scripted::new("default", Ok(())))
            .unwrap();
        registry
            .set_provider_for_domain_and_wait("billing", Scripted::new("billing", Ok(())))
            .unwrap();

        assert_eq!(registry.provider_metadata(Some("billing")).name, "billing");
        assert_eq!(registry.provider_metadata(Some("search")).name, "default");
        assert_eq!(registry.provider_metadata(None).name, "default");
    }

    #[test]
    fn handlers_see_init_and_provider_events() {
        let registry = Registry::new();
        let ready = Arc::new(AtomicUsize::new(0));
        let changed = Arc::new(Mutex::new(Vec::new()));

        {
            let ready = ready.clone();
            registry.add_handler(ProviderEvent::Ready, move |details| {
                if details.provider_name == InMemoryProvider::NAME {
                    ready.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        {
            let changed = changed.clone();
            registry.add_handler(ProviderEvent::ConfigurationChanged, move |details| {
                changed
                    .lock()
                    .unwrap()
                    .extend(details.flags_changed.iter().cloned());
            });
        }

        let provider = Arc::new(InMemoryProvider::new([(
            "enableFeatureA",
            InMemoryFlag::single(false),
        )]));
        registry.set_provider_and_wait(provider.clone()).unwrap();
        assert_eq!(ready.load(Ordering::SeqCst), 1);

        provider.set_flag("enableFeatureB", InMemoryFlag::single(true));
        assert_eq!(*changed.lock().unwrap(), vec!["enableFeatureB".to_owned()]);
    }

    #[test]
    fn provider_events_drive_tracked_status() {
        let registry = Registry::new();
        let provider = Arc::new(InMemoryProvider::new([(
            "enableFeatureA",
            InMemoryFlag::single(false),
        )]));
        registry.set_provider_and_wait(provider.clone()).unwrap();

        provider.set_status(ProviderStatus::Stale);
        assert_eq!(registry.provider_status(None), ProviderStatus::Stale);

        provider.set_status(ProviderStatus::Fatal);
        assert_eq!(registry.provider_status(None), ProviderStatus::Fatal);
    }

    #[test]
    fn fatal_status_is_terminal() {
        let registry = Registry::new();
        let provider = Arc::new(Scripted::new("default", Ok(())));
        registry.set_provider_and_wait(provider.clone()).unwrap();
        let id = provider_id(&(provider.clone() as Arc<dyn Provider>));

        registry.shared.dispatch(
            id,
            &EventDetails::new(ProviderEvent::Error).with_error_code(ErrorCode::ProviderFatal),
        );
        assert_eq!(registry.provider_status(None), ProviderStatus::Fatal);

        registry
            .shared
            .dispatch(id, &EventDetails::new(ProviderEvent::Ready));
        registry
            .shared
            .dispatch(id, &EventDetails::new(ProviderEvent::Stale));
        assert_eq!(registry.provider_status(None), ProviderStatus::Fatal);

        let details = registry
            .default_client()
            .boolean_details("flag", false, &EvaluationContext::new());
        assert!(!*details.value());
        assert_eq!(details.error_code(), Some(ErrorCode::ProviderFatal));
    }

    #[test]
    fn self_reported_fatal_or_not_ready_overrides_tracked_status() {
        let registry = Registry::new();
        let provider = Arc::new(Scripted::new("default", Ok(())));
        registry.set_provider_and_wait(provider.clone()).unwrap();
        let client = registry.default_client();
        let context = EvaluationContext::new();
        assert!(client.boolean_value("flag", false, &context));

        provider.status.set(ProviderStatus::NotReady);
        assert_eq!(registry.provider_status(None), ProviderStatus::NotReady);
        let details = client.boolean_details("flag", false, &context);
        assert!(!*details.value());
        assert_eq!(details.error_code(), Some(ErrorCode::ProviderNotReady));

        provider.status.set(ProviderStatus::Fatal);
        assert_eq!(registry.provider_status(None), ProviderStatus::Fatal);
        let details = client.boolean_details("flag", false, &context);
        assert!(!*details.value());
        assert_eq!(details.reason(), Reason::Error);
        assert_eq!(details.error_code(), Some(ErrorCode::ProviderFatal));
    }

    #[test]
    fn late_handler_fires_for_ready_provider() {
        let registry = Registry::new();
        registry
            .set_provider_and_wait(InMemoryProvider::new([("flag", InMemoryFlag::single(1))]))
            .unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        {
            let fired = fired.clone();
            registry.add_handler(ProviderEvent::Ready, move |_| {
                fired.store(true, Ordering::SeqCst);
            });
        }

        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn shutdown_resets_to_noop() {
        let registry = Registry::new();
        let provider = Arc::new(Scripted::new("default", Ok(())));
        registry.set_provider_and_wait(provider.clone()).unwrap();
        registry
            .set_provider_for_domain_and_wait("billing", provider.clone())
            .unwrap();

        registry.shutdown();

        assert!(provider.shut_down.load(Ordering::SeqCst));
        assert_eq!(registry.provider_metadata(None).name, "No-op Provider");
        assert_eq!(registry.provider_metadata(Some("billing")).name, "No-op Provider");
    }
}
