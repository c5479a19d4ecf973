//! Pure connection setup for the STOMP transport
//!
//! URL resolution, CONNECT frame construction and heart-beat negotiation.
//! Nothing in here performs I/O.

use crate::protocol::{Command, Frame, Headers};
use crate::transport::TransportError;
use std::time::Duration;
use url::Url;

/// STOMP versions offered in the CONNECT frame
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Default heart-beat interval in both directions
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(4000);

/// Options for [`super::StompTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct StompOptions {
    /// Broker endpoint; `http(s)` SockJS endpoints are accepted
    pub url: String,
    /// How often we promise to send (`cx`)
    pub heartbeat_outgoing: Duration,
    /// How often we want to receive (`cy`)
    pub heartbeat_incoming: Duration,
    /// Log every frame at DEBUG level
    pub debug: bool,
}

impl StompOptions {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            heartbeat_outgoing: DEFAULT_HEARTBEAT,
            heartbeat_incoming: DEFAULT_HEARTBEAT,
            debug: false,
        }
    }
}

/// Map a broker endpoint to the WebSocket URL to dial
///
/// `ws`/`wss` are used verbatim. `http`/`https` endpoints are treated as SockJS
/// endpoints and mapped to their raw WebSocket path (`.../websocket`).
pub fn resolve_ws_url(endpoint: &str) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }

    let ws_scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
    };

    url.set_scheme(ws_scheme)
        .map_err(|_| invalid("cannot convert scheme"))?;
    let path = format!("{}/websocket", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}

/// Build the CONNECT frame; caller headers win over the defaults
pub fn build_connect_frame(url: &Url, options: &StompOptions, connect_headers: &Headers) -> Frame {
    let mut frame = Frame::new(Command::Connect);

    let defaults = [
        ("accept-version", ACCEPT_VERSION.to_string()),
        ("host", url.host_str().unwrap_or("localhost").to_string()),
        (
            "heart-beat",
            format!(
                "{},{}",
                options.heartbeat_outgoing.as_millis(),
                options.heartbeat_incoming.as_millis()
            ),
        ),
    ];
    for (name, value) in defaults {
        if !connect_headers.contains_key(name) {
            frame = frame.header(name, value);
        }
    }

    frame.with_headers(connect_headers)
}

/// Negotiated heart-beat schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPlan {
    /// Send an EOL at least this often
    pub send_every: Option<Duration>,
    /// Expect some traffic at least this often
    pub expect_every: Option<Duration>,
}

impl HeartbeatPlan {
    pub const DISABLED: HeartbeatPlan = HeartbeatPlan {
        send_every: None,
        expect_every: None,
    };

    /// Silence longer than this means the broker is gone
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.expect_every.map(|d| d * 2)
    }
}

/// Parse a `heart-beat: sx,sy` header value (milliseconds)
pub fn parse_heartbeat_header(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

/// Negotiate per STOMP 1.2: send every max(cx, sy), expect every max(cy, sx)
pub fn negotiate_heartbeat(options: &StompOptions, server_header: Option<&str>) -> HeartbeatPlan {
    let Some((sx, sy)) = server_header.and_then(parse_heartbeat_header) else {
        return HeartbeatPlan::DISABLED;
    };
    let cx = options.heartbeat_outgoing.as_millis() as u64;
    let cy = options.heartbeat_incoming.as_millis() as u64;

    let send_every = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy)));
    let expect_every = (cy != 0 && sx != 0).then(|| Duration::from_millis(cy.max(sx)));

    HeartbeatPlan {
        send_every,
        expect_every,
    }
}
