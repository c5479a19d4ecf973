//! Single-owner service state machine
//!
//! [`ServiceCore`] holds the connection status, subscription registry,
//! outbound queue, reconnect state and the transport. It is owned by one
//! task (see `client.rs`) and every mutation happens inside one synchronous
//! method call, so no caller can observe a torn intermediate state.
//!
//! Timers are plain deadlines; the owning task sleeps on them and calls
//! [`ServiceCore::on_reconnect_timer`] / [`ServiceCore::on_connect_timeout`].

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Headers, InboundMessage, MessageBody};
use crate::service::events::{EventBus, ServiceEvent};
use crate::service::options::ServiceOptions;
use crate::service::queue::{OutboundQueue, PendingMessage};
use crate::service::reconnect::{ReconnectPolicy, ReconnectionDecision};
use crate::service::registry::{
    dispatch_message, MessageHandler, SubscriptionHandle, SubscriptionRegistry, SubscriptionState,
};
use crate::service::ConnectionStatus;
use crate::transport::{EventSink, SubscriptionId, Transport, TransportEvent};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Mailbox protocol of the service task
pub(crate) enum Command {
    Connect {
        reply: Reply<ClientResult<()>>,
    },
    Disconnect {
        reply: Reply<ClientResult<()>>,
    },
    Subscribe {
        destination: String,
        handler: MessageHandler,
        headers: Headers,
        reply: Reply<ClientResult<SubscriptionHandle>>,
    },
    Unsubscribe {
        id: String,
        keep_handlers: bool,
    },
    RemoveHandler {
        destination: String,
        handler: MessageHandler,
    },
    Send {
        destination: String,
        body: MessageBody,
        headers: Headers,
        reply: Reply<ClientResult<String>>,
    },
    ActiveSubscriptions {
        reply: Reply<Vec<String>>,
    },
    Snapshot {
        reply: Reply<ServiceSnapshot>,
    },
    Dispose,
    /// Event reported by the transport activation `generation`
    Transport {
        generation: u64,
        event: TransportEvent,
    },
}

/// Point-in-time view of the service state
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSnapshot {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub reconnect_scheduled: bool,
    pub pending_messages: usize,
    pub active_subscriptions: Vec<String>,
    pub handler_destinations: Vec<String>,
}

pub(crate) struct ServiceCore<T: Transport> {
    transport: T,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    connect_headers: Headers,

    status: ConnectionStatus,
    status_tx: watch::Sender<ConnectionStatus>,
    events: EventBus,

    registry: SubscriptionRegistry,
    queue: OutboundQueue,

    reconnect_attempts: u32,
    reconnect_deadline: Option<Instant>,
    connect_deadline: Option<Instant>,
    /// Set by an explicit disconnect; suppresses automatic reconnects
    disconnect_requested: bool,

    connect_waiters: Vec<Reply<ClientResult<()>>>,
    disconnect_waiters: Vec<Reply<ClientResult<()>>>,

    message_counter: u64,
    /// Bumped per activation; events tagged with an older value are dropped
    generation: u64,
    mailbox: mpsc::WeakUnboundedSender<Command>,
}

impl<T: Transport> ServiceCore<T> {
    pub(crate) fn new(
        transport: T,
        options: &ServiceOptions,
        status_tx: watch::Sender<ConnectionStatus>,
        events: EventBus,
        mailbox: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            transport,
            policy: options.reconnect_policy(),
            connect_timeout: options.connect_timeout,
            connect_headers: options.build_connect_headers(),
            status: ConnectionStatus::Disconnected,
            status_tx,
            events,
            registry: SubscriptionRegistry::new(),
            queue: OutboundQueue::new(),
            reconnect_attempts: 0,
            reconnect_deadline: None,
            connect_deadline: None,
            disconnect_requested: false,
            connect_waiters: Vec::new(),
            disconnect_waiters: Vec::new(),
            message_counter: 0,
            generation: 0,
            mailbox,
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_deadline
    }

    pub(crate) fn connect_deadline(&self) -> Option<Instant> {
        self.connect_deadline
    }

    pub(crate) fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => self.connect(Some(reply)),
            Command::Disconnect { reply } => self.disconnect(Some(reply)),
            Command::Subscribe {
                destination,
                handler,
                headers,
                reply,
            } => {
                let result = self.subscribe(destination, handler, headers);
                let _ = reply.send(result);
            }
            Command::Unsubscribe { id, keep_handlers } => self.unsubscribe(&id, keep_handlers),
            Command::RemoveHandler {
                destination,
                handler,
            } => {
                self.registry.remove_handler(&destination, &handler);
            }
            Command::Send {
                destination,
                body,
                headers,
                reply,
            } => {
                let result = self.send(destination, body, headers);
                let _ = reply.send(result);
            }
            Command::ActiveSubscriptions { reply } => {
                let _ = reply.send(self.registry.active_destinations());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Dispose => self.dispose(),
            Command::Transport { generation, event } => {
                self.handle_transport_event(generation, event)
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            status: self.status,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_scheduled: self.reconnect_deadline.is_some(),
            pending_messages: self.queue.len(),
            active_subscriptions: self.registry.active_destinations(),
            handler_destinations: self.registry.handler_destinations(),
        }
    }

    // ── Status ──────────────────────────────────────────────────────────

    /// The only place the status changes; no-op transitions are suppressed
    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status == status {
            return;
        }
        debug!(from = %self.status, to = %status, "Connection status changed");
        self.status = status;
        self.status_tx.send_replace(status);

        self.events.emit(&ServiceEvent::StatusChange(status));
        match status {
            ConnectionStatus::Connecting => {
                self.events.emit(&ServiceEvent::Connecting);
            }
            ConnectionStatus::Connected => {
                self.events.emit(&ServiceEvent::Connected);
            }
            ConnectionStatus::Disconnected => {
                self.events.emit(&ServiceEvent::Disconnected);
            }
            ConnectionStatus::Disconnecting | ConnectionStatus::Error => {}
        }
    }

    fn settle_connect(&mut self, result: ClientResult<()>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn settle_disconnect(&mut self, result: ClientResult<()>) {
        for waiter in self.disconnect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    // ── Connection manager ──────────────────────────────────────────────

    pub(crate) fn connect(&mut self, reply: Option<Reply<ClientResult<()>>>) {
        match self.status {
            ConnectionStatus::Connected => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return;
            }
            ConnectionStatus::Connecting => {
                self.connect_waiters.extend(reply);
                return;
            }
            ConnectionStatus::Disconnecting => {
                // The socket being torn down is superseded by the new activation
                self.settle_disconnect(Ok(()));
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
        }

        self.connect_waiters.extend(reply);
        self.start_connect();
    }

    fn start_connect(&mut self) {
        self.disconnect_requested = false;
        self.generation += 1;
        self.set_status(ConnectionStatus::Connecting);
        self.connect_deadline = Some(Instant::now() + self.connect_timeout);

        let sink = self.event_sink(self.generation);
        info!(generation = self.generation, "Activating transport");
        if let Err(e) = self.transport.activate(&self.connect_headers, sink) {
            self.handle_connection_error(ClientError::Transport(e));
        }
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let mailbox = self.mailbox.clone();
        EventSink::new(move |event| {
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Command::Transport { generation, event });
            }
        })
    }

    pub(crate) fn disconnect(&mut self, reply: Option<Reply<ClientResult<()>>>) {
        // Any call cancels a scheduled reconnect, even when already disconnected
        self.reconnect_deadline = None;
        self.disconnect_requested = true;

        match self.status {
            ConnectionStatus::Disconnecting => {
                self.disconnect_waiters.extend(reply);
                return;
            }
            ConnectionStatus::Disconnected => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                return;
            }
            _ => {}
        }

        self.set_status(ConnectionStatus::Disconnecting);
        self.disconnect_waiters.extend(reply);

        if self.transport.is_connected() {
            info!("Disconnecting transport");
            self.transport.deactivate();
            return;
        }

        // Nothing established yet: abort the attempt and finish right away
        debug!("Aborting in-flight activation");
        self.transport.deactivate();
        self.generation += 1;
        self.connect_deadline = None;
        self.settle_connect(Err(ClientError::ConnectAborted));
        self.set_status(ConnectionStatus::Disconnected);
        self.settle_disconnect(Ok(()));
    }

    pub(crate) fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            trace!(
                generation,
                current = self.generation,
                "Dropping event from superseded transport activation"
            );
            return;
        }

        match event {
            TransportEvent::Connected { headers } => self.handle_connected(&headers),
            TransportEvent::StompError { message } => {
                self.handle_connection_error(ClientError::stomp(message))
            }
            TransportEvent::SocketError { message } => {
                self.handle_connection_error(ClientError::websocket(message))
            }
            TransportEvent::Closed { reason } => self.handle_close(&reason),
            TransportEvent::Message {
                subscription,
                message,
            } => self.dispatch(&subscription, &message),
        }
    }

    fn handle_connected(&mut self, headers: &Headers) {
        if !matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Error
        ) {
            warn!(status = %self.status, "Ignoring connect confirmation in unexpected state");
            return;
        }

        info!(
            server = headers.get("server").map(String::as_str).unwrap_or("unknown"),
            "Connected"
        );
        self.reconnect_attempts = 0;
        self.connect_deadline = None;
        self.reconnect_deadline = None;
        self.set_status(ConnectionStatus::Connected);
        self.settle_connect(Ok(()));

        self.restore_subscriptions();
        self.flush_pending_messages();
    }

    fn handle_connection_error(&mut self, error: ClientError) {
        let previous = self.status;
        error!(error = %error, status = %previous, "Connection error");

        self.connect_deadline = None;
        self.set_status(ConnectionStatus::Error);
        self.events.emit(&ServiceEvent::Error(error.clone()));

        if previous == ConnectionStatus::Connecting {
            self.settle_connect(Err(error.clone()));
        }
        if previous == ConnectionStatus::Disconnecting {
            self.settle_disconnect(Err(error));
        }

        self.schedule_reconnect();
    }

    fn handle_close(&mut self, reason: &str) {
        self.connect_deadline = None;

        match self.status {
            ConnectionStatus::Disconnecting => {
                info!(reason = %reason, "Disconnected");
                self.set_status(ConnectionStatus::Disconnected);
                self.settle_disconnect(Ok(()));
            }
            ConnectionStatus::Disconnected => {}
            previous => {
                warn!(reason = %reason, status = %previous, "Connection closed unexpectedly");
                self.set_status(ConnectionStatus::Disconnected);
                if previous == ConnectionStatus::Connecting {
                    self.settle_connect(Err(ClientError::ConnectionClosed));
                }
                // The close that ends an explicit disconnect never reconnects
                if !self.disconnect_requested {
                    self.schedule_reconnect();
                }
            }
        }
    }

    /// At most one reconnect deadline exists; scheduling replaces it
    fn schedule_reconnect(&mut self) {
        self.reconnect_deadline = None;

        match self.policy.decide(self.reconnect_attempts) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.reconnect_attempts = attempt;
                self.reconnect_deadline = Some(Instant::now() + delay);
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect attempt"
                );
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                warn!(
                    max_attempts = self.policy.max_attempts,
                    "Maximum reconnect attempts reached"
                );
            }
            ReconnectionDecision::Disabled => {}
        }
    }

    pub(crate) fn on_reconnect_timer(&mut self) {
        self.reconnect_deadline = None;
        debug!(attempt = self.reconnect_attempts, "Reconnect timer fired");
        self.connect(None);
    }

    pub(crate) fn on_connect_timeout(&mut self) {
        self.connect_deadline = None;
        if self.status == ConnectionStatus::Connecting {
            let timeout_ms = self.connect_timeout.as_millis() as u64;
            self.handle_connection_error(ClientError::ConnectTimeout { timeout_ms });
        }
    }

    // ── Subscription registry ───────────────────────────────────────────

    pub(crate) fn subscribe(
        &mut self,
        destination: String,
        handler: MessageHandler,
        headers: Headers,
    ) -> ClientResult<SubscriptionHandle> {
        self.registry
            .add_handler(&destination, handler.clone(), &headers);

        if let Some(id) = self.registry.active_id(&destination) {
            return Ok(self.handle(id.to_string(), destination, SubscriptionState::Active, handler));
        }

        if self.status != ConnectionStatus::Connected {
            self.message_counter += 1;
            let id = format!("pending-{}", self.message_counter);
            debug!(destination = %destination, "Subscription deferred until connected");
            let handle = self.handle(id, destination, SubscriptionState::Pending, handler);
            self.connect(None);
            return Ok(handle);
        }

        if !self.transport.is_connected() {
            return Err(ClientError::NotConnected {
                status: self.status,
            });
        }

        match self.transport.subscribe(&destination, &headers) {
            Ok(id) => {
                debug!(destination = %destination, subscription = %id, "Subscribed");
                self.registry.set_active(&destination, id.clone());
                Ok(self.handle(id.to_string(), destination, SubscriptionState::Active, handler))
            }
            Err(e) => {
                error!(destination = %destination, error = %e, "Failed to subscribe");
                Err(ClientError::SubscribeFailed {
                    destination,
                    message: e.to_string(),
                })
            }
        }
    }

    fn handle(
        &self,
        id: String,
        destination: String,
        state: SubscriptionState,
        handler: MessageHandler,
    ) -> SubscriptionHandle {
        SubscriptionHandle::new(id, destination, state, handler, self.mailbox.clone())
    }

    pub(crate) fn unsubscribe(&mut self, id: &str, keep_handlers: bool) {
        let Some(destination) = self.registry.destination_for(id) else {
            debug!(subscription = %id, "Unsubscribe for unknown subscription ignored");
            return;
        };

        if let Some(subscription) = self.registry.remove_active(&destination) {
            if let Err(e) = self.transport.unsubscribe(&subscription) {
                warn!(destination = %destination, error = %e, "Error unsubscribing");
            }
        }
        if !keep_handlers {
            self.registry.remove_handlers(&destination);
        }
        debug!(destination = %destination, keep_handlers, "Unsubscribed");
    }

    fn restore_subscriptions(&mut self) {
        if !self.transport.is_connected() {
            return;
        }

        self.registry.clear_active();
        for (destination, headers) in self.registry.restorable() {
            match self.transport.subscribe(&destination, &headers) {
                Ok(id) => self.registry.set_active(&destination, id),
                Err(e) => error!(
                    destination = %destination,
                    error = %e,
                    "Failed to restore subscription"
                ),
            }
        }
    }

    fn dispatch(&mut self, subscription: &SubscriptionId, message: &InboundMessage) {
        match self.registry.handlers_for(subscription) {
            Some((destination, handlers)) => {
                dispatch_message(&destination, &handlers, message);
            }
            None => trace!(
                subscription = %subscription,
                destination = %message.destination,
                "No handlers for message"
            ),
        }
    }

    // ── Outbound queue ──────────────────────────────────────────────────

    pub(crate) fn send(
        &mut self,
        destination: String,
        body: MessageBody,
        headers: Headers,
    ) -> ClientResult<String> {
        if self.status != ConnectionStatus::Connected {
            self.message_counter += 1;
            let id = format!("pending-{}", self.message_counter);
            self.queue.push(PendingMessage {
                destination,
                body,
                headers,
            });
            debug!(queued = self.queue.len(), "Queued message until connected");

            if self.status == ConnectionStatus::Disconnected {
                self.connect(None);
            }
            return Ok(id);
        }

        self.publish(&destination, &body, &headers)
    }

    fn publish(
        &mut self,
        destination: &str,
        body: &MessageBody,
        headers: &Headers,
    ) -> ClientResult<String> {
        if !self.transport.is_connected() {
            return Err(ClientError::NotConnected {
                status: self.status,
            });
        }

        self.message_counter += 1;
        let id = format!("msg-{}", self.message_counter);
        let payload = body.encode()?;

        let mut headers = headers.clone();
        headers.insert("message-id".to_string(), id.clone());
        if body.is_json() {
            headers
                .entry("content-type".to_string())
                .or_insert_with(|| "application/json".to_string());
        }

        self.transport
            .publish(destination, &payload, &headers)
            .map_err(|e| {
                error!(destination = %destination, error = %e, "Failed to send message");
                ClientError::PublishFailed {
                    destination: destination.to_string(),
                    message: e.to_string(),
                }
            })?;

        trace!(destination = %destination, message_id = %id, "Published");
        Ok(id)
    }

    fn flush_pending_messages(&mut self) {
        if self.queue.is_empty() || !self.transport.is_connected() {
            return;
        }

        let mut queue = std::mem::take(&mut self.queue);
        let outcome = queue.flush(|m| self.publish(&m.destination, &m.body, &m.headers));
        self.queue = queue;

        info!(
            sent = outcome.sent.len(),
            requeued = outcome.requeued,
            "Flushed pending messages"
        );
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Tear everything down; safe to call more than once
    pub(crate) fn dispose(&mut self) {
        self.disconnect(None);

        self.reconnect_deadline = None;
        self.connect_deadline = None;
        self.settle_connect(Err(ClientError::Disposed));
        self.settle_disconnect(Ok(()));

        self.events.clear();
        self.registry.clear();
        self.queue.clear();

        // Whatever the transport still reports is no longer interesting
        self.generation += 1;
        self.status = ConnectionStatus::Disconnected;
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        info!("Service disposed");
    }
}
