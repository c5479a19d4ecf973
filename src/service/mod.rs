//! Reconnecting real-time messaging service
//!
//! - [`status`] - connection status
//! - [`events`] - event bus for status/error/lifecycle notifications
//! - [`registry`] - handler sets and transport subscriptions
//! - [`queue`] - outbound queue for sends issued while disconnected
//! - [`reconnect`] - backoff policy (pure)
//! - [`options`] - construction options
//! - `core` - the single-owner state machine
//! - [`client`] - the [`WebSocketService`] handle and its task

pub mod client;
mod core;
pub mod events;
pub mod options;
pub mod queue;
pub mod reconnect;
pub mod registry;
pub mod status;

pub use self::core::ServiceSnapshot;
pub use client::WebSocketService;
pub use events::{EventBus, EventKind, EventListener, ServiceEvent};
pub use options::ServiceOptions;
pub use queue::{OutboundQueue, PendingMessage};
pub use reconnect::{ReconnectPolicy, ReconnectionDecision};
pub use registry::{MessageHandler, SubscriptionHandle, SubscriptionRegistry, SubscriptionState};
pub use status::ConnectionStatus;
