//! tickerlink - reconnecting STOMP-over-WebSocket client
//!
//! A real-time messaging client for price feeds served over STOMP, with
//! automatic reconnection, subscription restore and an outbound queue for
//! messages sent while offline.
//!
//! # Overview
//!
//! - [`service`] - the [`WebSocketService`]: connection state machine,
//!   subscription registry, outbound queue and event bus
//! - [`transport`] - the transport capability and its STOMP 1.2 implementation
//! - [`protocol`] - STOMP frame codec, message types and topic helpers
//! - [`session`] - [`RealtimeSession`], a status-tracking wrapper for applications
//! - [`config`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tickerlink::{EtfPriceUpdate, MessageHandler, ServiceOptions, TopicBuilder, WebSocketService};
//!
//! # tokio_test::block_on(async {
//! let service = WebSocketService::new(ServiceOptions::new("http://localhost:8080/ws"))?;
//!
//! let handler = MessageHandler::new(|message| {
//!     if let Ok(update) = message.json::<EtfPriceUpdate>() {
//!         println!("{} {}", update.etf_code, update.price);
//!     }
//! });
//! service.subscribe(TopicBuilder::etf_price("069500"), handler).await?;
//! service.connect().await?;
//! # Ok::<(), tickerlink::ClientError>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod service;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use protocol::{
    EtfPriceUpdate, Headers, InboundMessage, MessageBody, StockPrice, TopicBuilder,
};
pub use service::{
    ConnectionStatus, EventKind, EventListener, MessageHandler, ServiceEvent, ServiceOptions,
    SubscriptionHandle, WebSocketService,
};
pub use session::{RealtimeSession, SessionOptions};
pub use transport::{StompOptions, StompTransport, Transport};
