//! Subscription registry
//!
//! Two mappings, reconciled only at defined points (explicit unsubscribe and
//! reconnect):
//!
//! - destination -> handler set (what callers asked for)
//! - destination -> transport subscription (what the broker currently knows)
//!
//! Many handlers for one destination share a single transport subscription.

use crate::protocol::{Headers, InboundMessage};
use crate::service::core::Command;
use crate::service::events::panic_message;
use crate::transport::SubscriptionId;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Message callback, compared by identity
#[derive(Clone)]
pub struct MessageHandler(Arc<dyn Fn(&InboundMessage) + Send + Sync>);

impl MessageHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, message: &InboundMessage) {
        (self.0)(message)
    }
}

impl PartialEq for MessageHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl Eq for MessageHandler {}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageHandler({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Whether a handle is backed by a transport subscription yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    /// Created while not connected; only the local handler is removed on unsubscribe
    Pending,
}

/// Handle returned by `subscribe`
///
/// Removal is always routed back through the service that issued it.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    destination: String,
    state: SubscriptionState,
    handler: MessageHandler,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: String,
        destination: String,
        state: SubscriptionState,
        handler: MessageHandler,
        mailbox: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            destination,
            state,
            handler,
            mailbox,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == SubscriptionState::Pending
    }

    /// Remove this subscription; a no-op once the service is gone
    pub fn unsubscribe(&self) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let command = match self.state {
            SubscriptionState::Active => Command::Unsubscribe {
                id: self.id.clone(),
                keep_handlers: false,
            },
            SubscriptionState::Pending => Command::RemoveHandler {
                destination: self.destination.clone(),
                handler: self.handler.clone(),
            },
        };
        let _ = mailbox.send(command);
    }
}

impl AsRef<str> for SubscriptionHandle {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.destination == other.destination
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("state", &self.state)
            .finish()
    }
}

/// Caller interest in one destination
#[derive(Debug, Default)]
struct HandlerSet {
    handlers: Vec<MessageHandler>,
    /// Headers from the first subscribe, reused on restore
    headers: Headers,
}

/// Handler sets plus the transport subscriptions that back them
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handlers: BTreeMap<String, HandlerSet>,
    active: BTreeMap<String, SubscriptionId>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler (idempotent per handler identity); returns true if added
    pub fn add_handler(&mut self, destination: &str, handler: MessageHandler, headers: &Headers) -> bool {
        let set = self
            .handlers
            .entry(destination.to_string())
            .or_insert_with(|| HandlerSet {
                handlers: Vec::new(),
                headers: headers.clone(),
            });
        if set.handlers.contains(&handler) {
            return false;
        }
        set.handlers.push(handler);
        true
    }

    /// Remove one handler; drops the destination's handler set once empty
    pub fn remove_handler(&mut self, destination: &str, handler: &MessageHandler) -> bool {
        let Some(set) = self.handlers.get_mut(destination) else {
            return false;
        };
        let before = set.handlers.len();
        set.handlers.retain(|h| h != handler);
        let removed = set.handlers.len() != before;
        if set.handlers.is_empty() {
            self.handlers.remove(destination);
        }
        removed
    }

    pub fn remove_handlers(&mut self, destination: &str) {
        self.handlers.remove(destination);
    }

    pub fn handler_count(&self, destination: &str) -> usize {
        self.handlers.get(destination).map_or(0, |s| s.handlers.len())
    }

    pub fn active_id(&self, destination: &str) -> Option<&SubscriptionId> {
        self.active.get(destination)
    }

    pub fn set_active(&mut self, destination: &str, id: SubscriptionId) {
        self.active.insert(destination.to_string(), id);
    }

    pub fn remove_active(&mut self, destination: &str) -> Option<SubscriptionId> {
        self.active.remove(destination)
    }

    /// Destination backed by the transport subscription with this id
    pub fn destination_for(&self, id: &str) -> Option<String> {
        self.active
            .iter()
            .find(|(_, sub)| sub.as_str() == id)
            .map(|(destination, _)| destination.clone())
    }

    /// Forget every transport subscription (they died with the old socket)
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Destinations that still have at least one handler, with their headers
    pub fn restorable(&self) -> Vec<(String, Headers)> {
        self.handlers
            .iter()
            .filter(|(_, set)| !set.handlers.is_empty())
            .map(|(destination, set)| (destination.clone(), set.headers.clone()))
            .collect()
    }

    /// Snapshot of the handlers to run for a delivery on `subscription`
    pub fn handlers_for(&self, subscription: &SubscriptionId) -> Option<(String, Vec<MessageHandler>)> {
        let destination = self.destination_for(subscription.as_str())?;
        let handlers = self
            .handlers
            .get(&destination)
            .map(|set| set.handlers.clone())
            .unwrap_or_default();
        Some((destination, handlers))
    }

    pub fn active_destinations(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn handler_destinations(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
        self.active.clear();
    }
}

/// Run every handler in registration order, isolating panics
pub fn dispatch_message(destination: &str, handlers: &[MessageHandler], message: &InboundMessage) -> usize {
    let mut delivered = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler.call(message))) {
            Ok(()) => delivered += 1,
            Err(panic) => error!(
                destination = %destination,
                panic = %panic_message(panic.as_ref()),
                "Message handler panicked"
            ),
        }
    }
    debug!(destination = %destination, delivered, "Dispatched message");
    delivered
}
