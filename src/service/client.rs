//! Public handle and owning task of the service
//!
//! [`WebSocketService`] is a cheap, cloneable handle. All state lives in a
//! [`ServiceCore`] owned by one background task; the handle talks to it through
//! a mailbox that also carries transport events, so API calls and transport
//! callbacks are applied in a single total order.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tickerlink::protocol::TopicBuilder;
//! use tickerlink::service::{MessageHandler, ServiceOptions, WebSocketService};
//!
//! # tokio_test::block_on(async {
//! let service = WebSocketService::new(ServiceOptions::new("http://localhost:8080/ws"))?;
//! let handler = MessageHandler::new(|message| println!("{}", message.body));
//! let handle = service
//!     .subscribe(TopicBuilder::etf_price("069500"), handler)
//!     .await?;
//! service.connect().await?;
//! handle.unsubscribe();
//! service.dispose();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Headers, MessageBody};
use crate::service::core::{Command, Reply, ServiceCore, ServiceSnapshot};
use crate::service::events::{EventBus, EventKind, EventListener};
use crate::service::options::ServiceOptions;
use crate::service::registry::{MessageHandler, SubscriptionHandle};
use crate::service::ConnectionStatus;
use crate::transport::{sleep_until_opt, StompTransport, Transport};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, Instrument};

/// Reconnecting real-time messaging client
#[derive(Clone)]
pub struct WebSocketService {
    mailbox: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: EventBus,
    disposed: Arc<AtomicBool>,
    url: Arc<str>,
}

impl WebSocketService {
    /// Create a service backed by the STOMP transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: ServiceOptions) -> ClientResult<Self> {
        let transport = StompTransport::new(options.stomp_options());
        Self::with_transport(options, transport)
    }

    /// Create a service over any [`Transport`]
    pub fn with_transport<T: Transport>(options: ServiceOptions, transport: T) -> ClientResult<Self> {
        options
            .validate()
            .map_err(|message| ClientError::NotInitialized {
                message: format!("invalid options: {message}"),
            })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ClientError::NotInitialized {
                message: format!("no tokio runtime: {e}"),
            }
        })?;

        let (mailbox, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let events = EventBus::new();
        if let Some(listener) = options.on_status_change.clone() {
            events.add(EventKind::StatusChange, listener);
        }
        if let Some(listener) = options.on_error.clone() {
            events.add(EventKind::Error, listener);
        }

        let core = ServiceCore::new(
            transport,
            &options,
            status_tx,
            events.clone(),
            mailbox.downgrade(),
        );
        let span = crate::service_span!(url = %options.url);
        runtime.spawn(run_service(core, rx).instrument(span));
        info!(url = %options.url, "WebSocket service created");

        Ok(Self {
            mailbox,
            status,
            events,
            disposed: Arc::new(AtomicBool::new(false)),
            url: Arc::from(options.url.as_str()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Queue a command; the reply future resolves once the task handled it
    fn request<R, F>(&self, build: F) -> Result<oneshot::Receiver<R>, ClientError>
    where
        F: FnOnce(Reply<R>) -> Command,
    {
        if self.is_disposed() {
            return Err(ClientError::Disposed);
        }
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(build(tx))
            .map_err(|_| ClientError::Disposed)?;
        Ok(rx)
    }

    /// Connect, or join the attempt already in flight
    ///
    /// The request is queued before this returns; awaiting only waits for
    /// the outcome.
    pub fn connect(&self) -> impl Future<Output = ClientResult<()>> + Send + 'static {
        let rx = self.request(|reply| Command::Connect { reply });
        async move { rx?.await.unwrap_or(Err(ClientError::Disposed)) }
    }

    /// Disconnect, or join the disconnect already in flight
    pub fn disconnect(&self) -> impl Future<Output = ClientResult<()>> + Send + 'static {
        let rx = self.request(|reply| Command::Disconnect { reply });
        async move { rx?.await.unwrap_or(Err(ClientError::Disposed)) }
    }

    /// Register `handler` for `destination`
    ///
    /// While not connected this returns a pending handle and starts
    /// connecting in the background.
    pub fn subscribe<D: Into<String>>(
        &self,
        destination: D,
        handler: MessageHandler,
    ) -> impl Future<Output = ClientResult<SubscriptionHandle>> + Send + 'static {
        self.subscribe_with_headers(destination, handler, Headers::new())
    }

    pub fn subscribe_with_headers<D: Into<String>>(
        &self,
        destination: D,
        handler: MessageHandler,
        headers: Headers,
    ) -> impl Future<Output = ClientResult<SubscriptionHandle>> + Send + 'static {
        let destination = destination.into();
        let rx = self.request(|reply| Command::Subscribe {
            destination,
            handler,
            headers,
            reply,
        });
        async move { rx?.await.unwrap_or(Err(ClientError::Disposed)) }
    }

    /// Remove the subscription identified by a handle or its id
    pub fn unsubscribe<S: AsRef<str>>(&self, subscription: S, keep_handlers: bool) {
        if self.is_disposed() {
            return;
        }
        let _ = self.mailbox.send(Command::Unsubscribe {
            id: subscription.as_ref().to_string(),
            keep_handlers,
        });
    }

    /// Publish, or queue until connected; resolves to the message id
    pub fn send<D: Into<String>, B: Into<MessageBody>>(
        &self,
        destination: D,
        body: B,
    ) -> impl Future<Output = ClientResult<String>> + Send + 'static {
        self.send_with_headers(destination, body, Headers::new())
    }

    pub fn send_with_headers<D: Into<String>, B: Into<MessageBody>>(
        &self,
        destination: D,
        body: B,
        headers: Headers,
    ) -> impl Future<Output = ClientResult<String>> + Send + 'static {
        let destination = destination.into();
        let body = body.into();
        let rx = self.request(|reply| Command::Send {
            destination,
            body,
            headers,
            reply,
        });
        async move { rx?.await.unwrap_or(Err(ClientError::Disposed)) }
    }

    pub fn get_connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch channel following every status transition
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Destinations that currently have a transport subscription
    pub fn get_active_subscriptions(&self) -> impl Future<Output = Vec<String>> + Send + 'static {
        let rx = self.request(|reply| Command::ActiveSubscriptions { reply });
        async move {
            match rx {
                Ok(rx) => rx.await.unwrap_or_default(),
                Err(_) => Vec::new(),
            }
        }
    }

    pub fn snapshot(&self) -> impl Future<Output = ClientResult<ServiceSnapshot>> + Send + 'static {
        let rx = self.request(|reply| Command::Snapshot { reply });
        async move { rx?.await.map_err(|_| ClientError::Disposed) }
    }

    pub fn add_event_listener(&self, kind: EventKind, listener: EventListener) -> bool {
        !self.is_disposed() && self.events.add(kind, listener)
    }

    pub fn remove_event_listener(&self, kind: EventKind, listener: &EventListener) -> bool {
        self.events.remove(kind, listener)
    }

    /// Tear down the connection and clear all state. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.mailbox.send(Command::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WebSocketService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketService")
            .field("url", &self.url)
            .field("status", &self.get_connection_status())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Owning task: mailbox plus the two timers
async fn run_service<T: Transport>(
    mut core: ServiceCore<T>,
    mut mailbox: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        tokio::select! {
            command = mailbox.recv() => match command {
                Some(Command::Dispose) | None => {
                    core.dispose();
                    break;
                }
                Some(command) => core.handle_command(command),
            },
            _ = sleep_until_opt(core.reconnect_deadline()) => core.on_reconnect_timer(),
            _ = sleep_until_opt(core.connect_deadline()) => core.on_connect_timeout(),
        }
    }
    debug!(status = %core.status(), "Service task stopped");
}
