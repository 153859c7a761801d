//! Provider events and their handlers.
//!
//! The registry emits [`ProviderEvent::Ready`] or [`ProviderEvent::Error`] when a provider
//! finishes initializing. Providers may emit their own events (e.g., when flag configuration
//! changes) through the [`EventSender`] handed to [`Provider::attach_events`].
//!
//! [`Provider::attach_events`]: crate::Provider::attach_events
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, Weak,
    },
};

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, FlagMetadata, ProviderStatus};

/// Kind of a provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEvent {
    /// The provider is ready to evaluate flags.
    Ready,
    /// The provider failed to initialize or lost its backend.
    Error,
    /// Flag configuration changed.
    ConfigurationChanged,
    /// The provider serves possibly outdated values.
    Stale,
}

impl ProviderEvent {
    /// The status a provider is in right after emitting this event, if the event implies one.
    fn implied_status(self) -> Option<ProviderStatus> {
        match self {
            ProviderEvent::Ready => Some(ProviderStatus::Ready),
            ProviderEvent::Error => Some(ProviderStatus::Error),
            ProviderEvent::Stale => Some(ProviderStatus::Stale),
            ProviderEvent::ConfigurationChanged => None,
        }
    }
}

/// Payload delivered to event handlers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    /// What happened.
    pub kind: ProviderEvent,
    /// Name of the emitting provider. Filled in by [`EventSender`].
    pub provider_name: String,
    /// Human-readable description, e.g. the initialization error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Set for [`ProviderEvent::Error`]; [`ErrorCode::ProviderFatal`] if the provider can't recover.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Keys of flags affected by [`ProviderEvent::ConfigurationChanged`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags_changed: Vec<String>,
    /// Provider-defined extra information.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: FlagMetadata,
}

impl EventDetails {
    /// Create event details of the given kind.
    pub fn new(kind: ProviderEvent) -> EventDetails {
        EventDetails {
            kind,
            provider_name: String::new(),
            message: None,
            error_code: None,
            flags_changed: Vec::new(),
            metadata: FlagMetadata::new(),
        }
    }

    /// Attach a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> EventDetails {
        self.message = Some(message.into());
        self
    }

    /// Attach an error code.
    pub fn with_error_code(mut self, error_code: ErrorCode) -> EventDetails {
        self.error_code = Some(error_code);
        self
    }

    /// List flags affected by a configuration change.
    pub fn with_flags_changed(mut self, flags_changed: Vec<String>) -> EventDetails {
        self.flags_changed = flags_changed;
        self
    }

    /// The status the emitting provider is in after this event, if the event implies one.
    pub(crate) fn implied_status(&self) -> Option<ProviderStatus> {
        match (self.kind, self.error_code) {
            (ProviderEvent::Error, Some(ErrorCode::ProviderFatal)) => Some(ProviderStatus::Fatal),
            (kind, _) => kind.implied_status(),
        }
    }

    /// Details describing a provider that is currently in `status`. Used for handlers that
    /// fire on registration.
    pub(crate) fn for_status(kind: ProviderEvent, status: ProviderStatus) -> EventDetails {
        let details = EventDetails::new(kind);
        match status {
            ProviderStatus::Error => details.with_error_code(ErrorCode::General),
            ProviderStatus::Fatal => details.with_error_code(ErrorCode::ProviderFatal),
            _ => details,
        }
    }
}

/// Callback invoked for provider events.
///
/// Handlers run on the thread that emitted the event. A panicking handler is caught and logged.
pub type EventHandler = Arc<dyn Fn(&EventDetails) + Send + Sync>;

/// Identifies a registered handler, returned by `add_handler` and accepted by `remove_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Opaque identity of a provider instance (address of its allocation).
pub(crate) type ProviderId = usize;

/// Receiver side of [`EventSender`], implemented by the registry.
pub(crate) trait EventSink: Send + Sync {
    fn dispatch(&self, provider: ProviderId, details: &EventDetails);
}

/// Handle providers use to emit events.
///
/// Holds a weak reference to the registry, so a provider outliving its registry can keep emitting
/// without effect.
#[derive(Clone)]
pub struct EventSender {
    sink: Weak<dyn EventSink>,
    provider: ProviderId,
    provider_name: String,
}

impl EventSender {
    pub(crate) fn new(
        sink: Weak<dyn EventSink>,
        provider: ProviderId,
        provider_name: String,
    ) -> EventSender {
        EventSender {
            sink,
            provider,
            provider_name,
        }
    }

    /// Emit an event to every handler interested in this provider.
    pub fn emit(&self, mut details: EventDetails) {
        let Some(sink) = self.sink.upgrade() else {
            log::debug!(target: "flagline", provider:display = self.provider_name; "registry is gone, dropping provider event");
            return;
        };
        details.provider_name.clone_from(&self.provider_name);
        sink.dispatch(self.provider, &details);
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("provider_name", &self.provider_name)
            .finish_non_exhaustive()
    }
}

struct Registration {
    id: HandlerId,
    kind: ProviderEvent,
    handler: EventHandler,
}

/// Who registered a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HandlerScope {
    /// Registry-level handlers receive events of every provider.
    Api,
    /// Client handlers receive events of the provider their domain resolves to.
    Client(Option<String>),
}

#[derive(Default)]
pub(crate) struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<HandlerScope, Vec<Registration>>>,
}

impl EventBus {
    pub(crate) fn add(
        &self,
        scope: HandlerScope,
        kind: ProviderEvent,
        handler: EventHandler,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self
            .handlers
            .write()
            .expect("thread holding handlers lock should not panic");
        handlers
            .entry(scope)
            .or_default()
            .push(Registration { id, kind, handler });
        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self
            .handlers
            .write()
            .expect("thread holding handlers lock should not panic");
        let mut removed = false;
        for registrations in handlers.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
        }
        removed
    }

    /// Collect handlers for `kind` in `scope`. The lock is released before handlers run, so
    /// handlers may register or remove handlers themselves.
    pub(crate) fn handlers_for(
        &self,
        kind: ProviderEvent,
        mut scope: impl FnMut(&HandlerScope) -> bool,
    ) -> Vec<EventHandler> {
        let handlers = self
            .handlers
            .read()
            .expect("thread holding handlers lock should not panic");
        handlers
            .iter()
            .filter(|(registered, _)| scope(registered))
            .flat_map(|(_, registrations)| registrations.iter())
            .filter(|r| r.kind == kind)
            .map(|r| r.handler.clone())
            .collect()
    }
}

/// Run handlers, isolating panics.
pub(crate) fn run_handlers(handlers: &[EventHandler], details: &EventDetails) {
    for handler in handlers {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(details)));
        if result.is_err() {
            log::warn!(target: "flagline",
                       provider:display = details.provider_name,
                       event:serde = details.kind;
                       "event handler panicked");
        }
    }
}

/// Returns `true` if a handler for `kind` added while the provider is in `status` should run
/// immediately.
pub(crate) fn fires_on_registration(kind: ProviderEvent, status: ProviderStatus) -> bool {
    match kind.implied_status() {
        Some(ProviderStatus::Error) => {
            matches!(status, ProviderStatus::Error | ProviderStatus::Fatal)
        }
        Some(implied) => implied == status,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::{
        fires_on_registration, run_handlers, EventBus, EventDetails, EventHandler, HandlerScope,
        ProviderEvent,
    };
    use crate::ProviderStatus;

    #[test]
    fn handlers_are_scoped_and_removable() {
        let bus = EventBus::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let api = bus.add(
            HandlerScope::Api,
            ProviderEvent::Ready,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let billing = HandlerScope::Client(Some("billing".to_owned()));
        bus.add(billing.clone(), ProviderEvent::Ready, Arc::new(|_| {}));
        bus.add(billing, ProviderEvent::Stale, Arc::new(|_| {}));

        assert_eq!(bus.handlers_for(ProviderEvent::Ready, |_| true).len(), 2);
        assert_eq!(
            bus.handlers_for(ProviderEvent::Ready, |scope| *scope == HandlerScope::Api)
                .len(),
            1
        );

        run_handlers(
            &bus.handlers_for(ProviderEvent::Ready, |scope| *scope == HandlerScope::Api),
            &EventDetails::new(ProviderEvent::Ready),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(bus.remove(api));
        assert!(!bus.remove(api));
        assert_eq!(bus.handlers_for(ProviderEvent::Ready, |_| true).len(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        run_handlers(
            &[
                Arc::new(|_: &EventDetails| panic!("boom")) as EventHandler,
                Arc::new(move |_: &EventDetails| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ],
            &EventDetails::new(ProviderEvent::Error),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_handlers_fire_for_current_status() {
        assert!(fires_on_registration(
            ProviderEvent::Ready,
            ProviderStatus::Ready
        ));
        assert!(fires_on_registration(
            ProviderEvent::Error,
            ProviderStatus::Fatal
        ));
        assert!(!fires_on_registration(
            ProviderEvent::Ready,
            ProviderStatus::NotReady
        ));
        assert!(!fires_on_registration(
            ProviderEvent::ConfigurationChanged,
            ProviderStatus::Ready
        ));
    }
}
