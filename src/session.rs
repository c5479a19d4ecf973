//! Session wrapper for application code
//!
//! [`RealtimeSession`] owns one [`WebSocketService`], mirrors its status and
//! last error from the event bus, and remembers the subscriptions it created
//! so that [`RealtimeSession::close`] can release all of them.

use crate::error::{ClientError, ClientResult};
use crate::protocol::{Headers, MessageBody};
use crate::service::{
    ConnectionStatus, EventListener, MessageHandler, ServiceEvent, ServiceOptions,
    SubscriptionHandle, WebSocketService,
};
use crate::transport::{StompTransport, Transport};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Start connecting as soon as the session is created
    pub auto_connect: bool,
    pub service: ServiceOptions,
}

impl SessionOptions {
    pub fn new(service: ServiceOptions) -> Self {
        Self {
            auto_connect: true,
            service,
        }
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }
}

#[derive(Debug, Default)]
struct SessionState {
    status: ConnectionStatus,
    last_error: Option<ClientError>,
}

pub struct RealtimeSession {
    service: Option<WebSocketService>,
    state: Arc<Mutex<SessionState>>,
    subscriptions: Mutex<BTreeMap<String, SubscriptionHandle>>,
}

fn not_initialized() -> ClientError {
    ClientError::NotInitialized {
        message: "WebSocketService not initialized".to_string(),
    }
}

impl RealtimeSession {
    pub fn new(options: SessionOptions) -> ClientResult<Self> {
        let transport = StompTransport::new(options.service.stomp_options());
        Self::with_transport(options, transport)
    }

    pub fn with_transport<T: Transport>(options: SessionOptions, transport: T) -> ClientResult<Self> {
        let state = Arc::new(Mutex::new(SessionState::default()));

        let status_state = state.clone();
        let error_state = state.clone();
        let service_options = options
            .service
            .on_status_change(EventListener::new(move |event| {
                if let ServiceEvent::StatusChange(status) = event {
                    status_state.lock().status = *status;
                }
            }))
            .on_error(EventListener::new(move |event| {
                if let ServiceEvent::Error(error) = event {
                    error_state.lock().last_error = Some(error.clone());
                }
            }));

        let service = WebSocketService::with_transport(service_options, transport)?;

        if options.auto_connect {
            let connecting = service.connect();
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = connecting.await {
                    warn!(error = %e, "Automatic connect failed");
                    state.lock().last_error = Some(e);
                }
            });
        }

        Ok(Self {
            service: Some(service),
            state,
            subscriptions: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn service(&self) -> Option<&WebSocketService> {
        self.service.as_ref()
    }

    fn require_service(&self) -> ClientResult<&WebSocketService> {
        self.service.as_ref().ok_or_else(not_initialized)
    }

    /// Connect; the request is queued before this returns
    pub fn connect(&self) -> impl Future<Output = ClientResult<()>> + Send + 'static {
        let pending = self.require_service().map(WebSocketService::connect);
        async move { pending?.await }
    }

    pub fn disconnect(&self) -> impl Future<Output = ClientResult<()>> + Send + 'static {
        let pending = self.require_service().map(WebSocketService::disconnect);
        async move { pending?.await }
    }

    /// Subscribe and remember the handle under its destination
    pub async fn subscribe<D: Into<String>>(
        &self,
        destination: D,
        handler: MessageHandler,
    ) -> ClientResult<SubscriptionHandle> {
        let destination = destination.into();
        let handle = self
            .require_service()?
            .subscribe(destination.clone(), handler)
            .await?;
        self.subscriptions.lock().insert(destination, handle.clone());
        Ok(handle)
    }

    /// Unsubscribe by handle or id and forget the tracked entry
    pub fn unsubscribe<S: AsRef<str>>(&self, subscription: S) {
        let Some(service) = self.service.as_ref() else {
            return;
        };
        let id = subscription.as_ref();
        service.unsubscribe(id, false);
        self.subscriptions.lock().retain(|_, handle| handle.id() != id);
    }

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
        let pending = self
            .require_service()
            .map(|service| service.send_with_headers(destination, body, headers));
        async move { pending?.await }
    }

    /// Destinations this session subscribed to and has not released
    pub fn tracked_destinations(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.state.lock().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.state.lock().last_error = None;
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status() == ConnectionStatus::Connecting
    }

    pub fn is_disconnected(&self) -> bool {
        self.status() == ConnectionStatus::Disconnected
    }

    pub fn has_error(&self) -> bool {
        self.status() == ConnectionStatus::Error
    }

    /// Release every tracked subscription and dispose the service
    pub fn close(&mut self) {
        let Some(service) = self.service.take() else {
            return;
        };
        let handles: Vec<SubscriptionHandle> = std::mem::take(&mut *self.subscriptions.lock())
            .into_values()
            .collect();
        for handle in &handles {
            service.unsubscribe(handle, false);
        }
        service.dispose();
        debug!(released = handles.len(), "Session closed");
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close();
    }
}
