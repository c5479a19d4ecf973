//! STOMP 1.2 over WebSocket transport
//!
//! Split the same way as the rest of the transport code:
//!
//! - [`connection`] - pure URL resolution, CONNECT frame and heart-beat negotiation
//! - [`message_handler`] - pure routing of inbound frames
//! - [`client`] - the I/O task and the [`StompTransport`] handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use tickerlink::transport::{EventSink, Headers, StompOptions, StompTransport, Transport};
//!
//! # tokio_test::block_on(async {
//! let mut transport = StompTransport::new(StompOptions::new("http://localhost:8080/ws"));
//! let sink = EventSink::new(|event| println!("{event:?}"));
//! transport.activate(&Headers::new(), sink)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::StompTransport;
pub use connection::{negotiate_heartbeat, resolve_ws_url, HeartbeatPlan, StompOptions};
pub use message_handler::{route_frame, FrameRoute};
