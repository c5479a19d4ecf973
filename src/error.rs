//! Error types for the real-time messaging client
//!
//! Errors are cloneable so the same value can be handed to every `error`
//! listener on the event bus and to every caller awaiting a connect or
//! disconnect.

use crate::service::ConnectionStatus;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("STOMP Error: {message}")]
    Stomp { message: String },

    #[error("WebSocket Error: {message}")]
    WebSocket { message: String },

    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Connection closed before the connect attempt completed")]
    ConnectionClosed,

    #[error("Connect attempt aborted by disconnect")]
    ConnectAborted,

    #[error("Not connected - current status: {status}")]
    NotConnected { status: ConnectionStatus },

    #[error("Failed to subscribe to {destination}: {message}")]
    SubscribeFailed { destination: String, message: String },

    #[error("Failed to publish to {destination}: {message}")]
    PublishFailed { destination: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Client not initialized: {message}")]
    NotInitialized { message: String },

    #[error("Service has been disposed")]
    Disposed,
}

impl ClientError {
    /// Create STOMP error-frame error
    pub fn stomp<S: Into<String>>(message: S) -> Self {
        Self::Stomp {
            message: message.into(),
        }
    }

    /// Create socket-level error
    pub fn websocket<S: Into<String>>(message: S) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
