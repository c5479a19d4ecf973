//! Construction options for [`crate::service::WebSocketService`]

use crate::protocol::Headers;
use crate::service::events::EventListener;
use crate::service::reconnect::ReconnectPolicy;
use crate::transport::stomp::connection::DEFAULT_HEARTBEAT;
use crate::transport::StompOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Broker endpoint (`ws(s)://` or SockJS `http(s)://`)
    pub url: String,
    /// Bearer credential sent as `Authorization` in the connect headers
    pub auth_token: Option<String>,
    pub auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub debug: bool,
    /// Extra headers for the connect handshake
    pub connect_headers: Headers,
    pub heartbeat_incoming: Duration,
    pub heartbeat_outgoing: Duration,
    /// Registered as a `statusChange` listener at construction
    pub on_status_change: Option<EventListener>,
    /// Registered as an `error` listener at construction
    pub on_error: Option<EventListener>,
}

impl ServiceOptions {
    pub fn new<S: Into<String>>(url: S) -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            url: url.into(),
            auth_token: None,
            auto_reconnect: policy.enabled,
            max_reconnect_attempts: policy.max_attempts,
            initial_reconnect_delay: policy.initial_delay,
            max_reconnect_delay: policy.max_delay,
            connect_timeout: Duration::from_millis(10000),
            debug: false,
            connect_headers: Headers::new(),
            heartbeat_incoming: DEFAULT_HEARTBEAT,
            heartbeat_outgoing: DEFAULT_HEARTBEAT,
            on_status_change: None,
            on_error: None,
        }
    }

    pub fn with_auth_token<S: Into<String>>(mut self, token: S) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_connect_header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.connect_headers.insert(name.into(), value.into());
        self
    }

    pub fn on_status_change(mut self, listener: EventListener) -> Self {
        self.on_status_change = Some(listener);
        self
    }

    pub fn on_error(mut self, listener: EventListener) -> Self {
        self.on_error = Some(listener);
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.auto_reconnect,
            max_attempts: self.max_reconnect_attempts,
            initial_delay: self.initial_reconnect_delay,
            max_delay: self.max_reconnect_delay,
        }
    }

    /// Custom connect headers plus the bearer credential, if any
    pub fn build_connect_headers(&self) -> Headers {
        let mut headers = self.connect_headers.clone();
        if let Some(token) = self.auth_token.as_deref().filter(|t| !t.is_empty()) {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }

    pub fn stomp_options(&self) -> StompOptions {
        StompOptions {
            url: self.url.clone(),
            heartbeat_outgoing: self.heartbeat_outgoing,
            heartbeat_incoming: self.heartbeat_incoming,
            debug: self.debug,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be greater than 0".to_string());
        }
        self.reconnect_policy().validate()
    }
}
