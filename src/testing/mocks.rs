//! Mock implementations for testing
//!
//! [`MockTransport`] records every call the service makes and lets tests play
//! the broker: confirm a connection, close it, report errors and deliver
//! messages. Clones share state, so a test keeps one clone while the service
//! owns the other.

use crate::protocol::{Headers, InboundMessage};
use crate::transport::{EventSink, SubscriptionId, Transport, TransportError, TransportEvent};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// One recorded call into the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Activate {
        headers: Headers,
    },
    Deactivate,
    Subscribe {
        id: SubscriptionId,
        destination: String,
        headers: Headers,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Publish {
        destination: String,
        body: String,
        headers: Headers,
    },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    connected: bool,
    sink: Option<EventSink>,
    subscriptions: BTreeMap<SubscriptionId, String>,
    next_subscription: u64,
    fail_activate: bool,
    fail_subscribe: bool,
    fail_subscribe_to: Vec<String>,
    fail_publish: bool,
    fail_publish_to: Vec<String>,
}

/// Mock transport for testing
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    activations: Arc<watch::Sender<usize>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (activations, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            activations: Arc::new(activations),
        }
    }

    // ── Broker side ─────────────────────────────────────────────────────

    fn emit(&self, event: TransportEvent) {
        let sink = self.state.lock().sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    /// Accept the current activation
    pub fn emit_connected(&self) {
        self.state.lock().connected = true;
        let mut headers = Headers::new();
        headers.insert("version".to_string(), "1.2".to_string());
        self.emit(TransportEvent::Connected { headers });
    }

    /// Close the socket from the broker side
    pub fn emit_close(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.subscriptions.clear();
        }
        self.emit(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    pub fn emit_stomp_error(&self, message: &str) {
        self.emit(TransportEvent::StompError {
            message: message.to_string(),
        });
    }

    pub fn emit_socket_error(&self, message: &str) {
        self.emit(TransportEvent::SocketError {
            message: message.to_string(),
        });
    }

    /// Deliver a message on the live subscription for `destination`.
    /// Returns false when nothing is subscribed there.
    pub fn emit_message(&self, destination: &str, body: &str) -> bool {
        let subscription = self
            .state
            .lock()
            .subscriptions
            .iter()
            .find(|(_, d)| d.as_str() == destination)
            .map(|(id, _)| id.clone());
        let Some(subscription) = subscription else {
            return false;
        };

        let mut message = InboundMessage::new(destination, body);
        message.subscription = subscription.to_string();
        self.emit(TransportEvent::Message {
            subscription,
            message,
        });
        true
    }

    /// Deliver a message tagged with an arbitrary subscription id
    pub fn emit_message_for(&self, subscription: &str, destination: &str, body: &str) {
        let mut message = InboundMessage::new(destination, body);
        message.subscription = subscription.to_string();
        self.emit(TransportEvent::Message {
            subscription: SubscriptionId::new(subscription),
            message,
        });
    }

    // ── Failure injection ───────────────────────────────────────────────

    pub fn fail_activation(&self, fail: bool) {
        self.state.lock().fail_activate = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    /// Fail subscribes to one destination only
    pub fn fail_subscribe_to(&self, destination: &str) {
        self.state.lock().fail_subscribe_to.push(destination.to_string());
    }

    pub fn fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Fail publishes to one destination only
    pub fn fail_publish_to(&self, destination: &str) {
        self.state.lock().fail_publish_to.push(destination.to_string());
    }

    // ── Inspection ──────────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().calls.clear();
    }

    /// `(destination, body, headers)` of every publish, in order
    pub fn published(&self) -> Vec<(String, String, Headers)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish {
                    destination,
                    body,
                    headers,
                } => Some((destination, body, headers)),
                _ => None,
            })
            .collect()
    }

    /// Destinations of every subscribe call, in order
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Subscribe { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Unsubscribe { .. }))
            .count()
    }

    /// Destinations with a live transport subscription
    pub fn live_subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.values().cloned().collect()
    }

    pub fn activation_count(&self) -> usize {
        *self.activations.borrow()
    }

    /// Wait until `activate` has been called at least `count` times
    pub async fn wait_for_activations(&self, count: usize) {
        let mut rx = self.activations.subscribe();
        let _ = rx.wait_for(|n| *n >= count).await;
    }
}

impl Transport for MockTransport {
    fn activate(&mut self, connect_headers: &Headers, sink: EventSink) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            state.calls.push(TransportCall::Activate {
                headers: connect_headers.clone(),
            });
            if state.fail_activate {
                return Err(TransportError::Handshake("Mock activation failure".to_string()));
            }
            state.connected = false;
            state.subscriptions.clear();
            state.sink = Some(sink);
        }
        self.activations.send_modify(|n| *n += 1);
        Ok(())
    }

    fn deactivate(&mut self) {
        let sink = {
            let mut state = self.state.lock();
            state.calls.push(TransportCall::Deactivate);
            state.connected = false;
            state.subscriptions.clear();
            state.sink.take()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Closed {
                reason: "Client disconnect".to_string(),
            });
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn subscribe(
        &mut self,
        destination: &str,
        headers: &Headers,
    ) -> Result<SubscriptionId, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_subscribe || state.fail_subscribe_to.iter().any(|d| d == destination) {
            return Err(TransportError::Protocol("Mock subscribe failure".to_string()));
        }

        let id = SubscriptionId::new(format!("sub-{}", state.next_subscription));
        state.next_subscription += 1;
        state.subscriptions.insert(id.clone(), destination.to_string());
        state.calls.push(TransportCall::Subscribe {
            id: id.clone(),
            destination: destination.to_string(),
            headers: headers.clone(),
        });
        Ok(id)
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(TransportCall::Unsubscribe { id: id.clone() });
        state.subscriptions.remove(id);
        Ok(())
    }

    fn publish(
        &mut self,
        destination: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_publish || state.fail_publish_to.iter().any(|d| d == destination) {
            return Err(TransportError::Io("Mock publish failure".to_string()));
        }

        state.calls.push(TransportCall::Publish {
            destination: destination.to_string(),
            body: body.to_string(),
            headers: headers.clone(),
        });
        Ok(())
    }
}
