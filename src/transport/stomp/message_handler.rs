//! Pure routing of inbound STOMP frames
//!
//! Turns decoded server frames into the action the I/O task has to take.

use crate::protocol::{Command, Frame, Headers, InboundMessage};
use crate::transport::SubscriptionId;
use chrono::Utc;
use tracing::debug;

/// What to do with an inbound server frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRoute {
    /// Session established; carries the CONNECTED headers
    Connected(Headers),
    /// Deliver to the handlers of a transport subscription
    Deliver {
        subscription: SubscriptionId,
        message: InboundMessage,
    },
    /// Broker reported an error
    BrokerError(String),
    /// Receipt for a frame we sent
    Receipt(String),
    /// Frame that needs no action
    Ignore(Command),
}

/// Collapse repeated headers, keeping the first occurrence
pub fn header_map(frame: &Frame) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in &frame.headers {
        headers
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }
    headers
}

/// Decide how to handle a server frame (pure function)
pub fn route_frame(frame: Frame) -> FrameRoute {
    match frame.command {
        Command::Connected => FrameRoute::Connected(header_map(&frame)),
        Command::Message => {
            let headers = header_map(&frame);
            let subscription = headers.get("subscription").cloned().unwrap_or_default();
            let message = InboundMessage {
                destination: headers.get("destination").cloned().unwrap_or_default(),
                subscription: subscription.clone(),
                message_id: headers.get("message-id").cloned(),
                headers,
                body: frame.body,
                received_at: Utc::now(),
            };
            FrameRoute::Deliver {
                subscription: SubscriptionId::new(subscription),
                message,
            }
        }
        Command::Error => {
            let message = match frame.get("message") {
                Some(message) => message.to_string(),
                None if !frame.body.is_empty() => frame.body.clone(),
                None => "Unknown broker error".to_string(),
            };
            FrameRoute::BrokerError(message)
        }
        Command::Receipt => {
            FrameRoute::Receipt(frame.get("receipt-id").unwrap_or_default().to_string())
        }
        other => {
            debug!(command = %other, "Ignoring unexpected frame from broker");
            FrameRoute::Ignore(other)
        }
    }
}
