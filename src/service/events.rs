//! Event bus for status, error and lifecycle notifications
//!
//! Listeners are kept per [`EventKind`] and compared by identity, so adding
//! the same [`EventListener`] twice is a no-op. A panicking listener is
//! caught and logged; the remaining listeners still run.

use crate::error::ClientError;
use crate::service::ConnectionStatus;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Pre-declared event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChange,
    Error,
    Connecting,
    Connected,
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::StatusChange,
        EventKind::Error,
        EventKind::Connecting,
        EventKind::Connected,
        EventKind::Disconnected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StatusChange => "statusChange",
            EventKind::Error => "error",
            EventKind::Connecting => "connecting",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    StatusChange(ConnectionStatus),
    Error(ClientError),
    Connecting,
    Connected,
    Disconnected,
}

impl ServiceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServiceEvent::StatusChange(_) => EventKind::StatusChange,
            ServiceEvent::Error(_) => EventKind::Error,
            ServiceEvent::Connecting => EventKind::Connecting,
            ServiceEvent::Connected => EventKind::Connected,
            ServiceEvent::Disconnected => EventKind::Disconnected,
        }
    }
}

/// Listener callback, compared by identity
#[derive(Clone)]
pub struct EventListener(Arc<dyn Fn(&ServiceEvent) + Send + Sync>);

impl EventListener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn call(&self, event: &ServiceEvent) {
        (self.0)(event)
    }
}

impl PartialEq for EventListener {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl Eq for EventListener {}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventListener({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Dispatch table: event kind -> listeners
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<HashMap<EventKind, Vec<EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the listener was already registered for `kind`
    pub fn add(&self, kind: EventKind, listener: EventListener) -> bool {
        let mut listeners = self.listeners.lock();
        let entry = listeners.entry(kind).or_default();
        if entry.contains(&listener) {
            return false;
        }
        entry.push(listener);
        true
    }

    pub fn remove(&self, kind: EventKind, listener: &EventListener) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entry) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| l != listener);
        entry.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Invoke every listener for the event's kind; returns how many ran cleanly
    pub fn emit(&self, event: &ServiceEvent) -> usize {
        let kind = event.kind();
        // Snapshot so listeners may add/remove listeners while being called
        let snapshot: Vec<EventListener> = self
            .listeners
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.call(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => error!(
                    event = %kind,
                    panic = %panic_message(panic.as_ref()),
                    "Event listener panicked"
                ),
            }
        }
        delivered
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_map()
            .entries(listeners.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
