//! Transport layer for the real-time client
//!
//! The service core drives a [`Transport`] and learns about its progress
//! through an [`EventSink`]. Every trait method is synchronous and must not
//! block: implementations hand the work to their own I/O task so that the
//! core can mutate its state inside a single turn.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::protocol::InboundMessage;
pub use crate::protocol::Headers;

pub mod stomp;

pub use stomp::{StompOptions, StompTransport};

/// Identifier of a transport-level subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised synchronously by a transport
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Invalid broker URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Progress reported by a transport after `activate`
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the session (STOMP CONNECTED)
    Connected { headers: Headers },
    /// Broker sent an ERROR frame
    StompError { message: String },
    /// Socket-level failure
    SocketError { message: String },
    /// Socket closed, for any reason
    Closed { reason: String },
    /// Message delivered on a transport subscription
    Message {
        subscription: SubscriptionId,
        message: InboundMessage,
    },
}

/// Callback through which a transport reports [`TransportEvent`]s
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(TransportEvent) + Send + Sync>);

impl EventSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventSink")
    }
}

/// Capability the service core needs from the underlying connection
///
/// Implementations never retry on their own; reconnection belongs to the
/// service so that subscriptions and the outbound queue can be rebuilt
/// deterministically.
pub trait Transport: Send + 'static {
    /// Start a connection attempt. Supersedes any earlier activation.
    fn activate(&mut self, connect_headers: &Headers, sink: EventSink)
        -> Result<(), TransportError>;

    /// Graceful teardown; reports `Closed` through the sink when done
    fn deactivate(&mut self);

    fn is_connected(&self) -> bool;

    fn subscribe(
        &mut self,
        destination: &str,
        headers: &Headers,
    ) -> Result<SubscriptionId, TransportError>;

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), TransportError>;

    fn publish(
        &mut self,
        destination: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn activate(
        &mut self,
        connect_headers: &Headers,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        (**self).activate(connect_headers, sink)
    }

    fn deactivate(&mut self) {
        (**self).deactivate()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn subscribe(
        &mut self,
        destination: &str,
        headers: &Headers,
    ) -> Result<SubscriptionId, TransportError> {
        (**self).subscribe(destination, headers)
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), TransportError> {
        (**self).unsubscribe(id)
    }

    fn publish(
        &mut self,
        destination: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), TransportError> {
        (**self).publish(destination, body, headers)
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
