//! Impure I/O for the STOMP transport
//!
//! Each activation spawns one task that owns the WebSocket. The
//! [`StompTransport`] handle talks to it over an unbounded channel, so every
//! [`Transport`] method returns without awaiting network I/O.

use super::connection::{
    build_connect_frame, negotiate_heartbeat, resolve_ws_url, HeartbeatPlan, StompOptions,
};
use super::message_handler::{route_frame, FrameRoute};
use crate::protocol::{Command, Decoded, Frame, FrameDecoder, Headers};
use crate::transport::{
    sleep_until_opt, EventSink, SubscriptionId, Transport, TransportError, TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn, Instrument};
use url::Url;

/// Upper bound on sending DISCONNECT and the close handshake
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Work queued for the connection task
#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Disconnect,
}

/// STOMP 1.2 over WebSocket
pub struct StompTransport {
    options: StompOptions,
    connected: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    sink: Option<EventSink>,
    task: Option<JoinHandle<()>>,
    next_subscription: u64,
}

impl StompTransport {
    pub fn new(options: StompOptions) -> Self {
        Self {
            options,
            connected: Arc::new(AtomicBool::new(false)),
            outbound: None,
            sink: None,
            task: None,
            next_subscription: 0,
        }
    }

    pub fn options(&self) -> &StompOptions {
        &self.options
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outbound = None;
        self.sink = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn queue(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::NotConnected)
    }
}

impl Transport for StompTransport {
    fn activate(&mut self, connect_headers: &Headers, sink: EventSink) -> Result<(), TransportError> {
        let url = resolve_ws_url(&self.options.url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Io(format!("no async runtime: {e}")))?;

        self.abort_task();

        let connect_frame = build_connect_frame(&url, &self.options, connect_headers);
        let (tx, rx) = mpsc::unbounded_channel();
        // A fresh flag per activation so an aborted task cannot flip the new one
        let connected = Arc::new(AtomicBool::new(false));

        info!(url = %url, "Opening STOMP connection");
        let span = crate::stomp_span!(url = %url);
        let task = runtime.spawn(
            run_connection(
                url,
                connect_frame,
                self.options.clone(),
                rx,
                connected.clone(),
                sink.clone(),
            )
            .instrument(span),
        );

        self.connected = connected;
        self.outbound = Some(tx);
        self.sink = Some(sink);
        self.task = Some(task);
        Ok(())
    }

    fn deactivate(&mut self) {
        let delivered = self
            .outbound
            .take()
            .map(|tx| tx.send(Outbound::Disconnect).is_ok())
            .unwrap_or(false);

        if delivered {
            // Detached: the task finishes the teardown even if we are dropped
            self.task = None;
        } else if let Some(sink) = self.sink.take() {
            // Task already gone; report the close ourselves
            sink.emit(TransportEvent::Closed {
                reason: "Transport inactive".to_string(),
            });
        }
        self.sink = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(
        &mut self,
        destination: &str,
        headers: &Headers,
    ) -> Result<SubscriptionId, TransportError> {
        let id = SubscriptionId::new(format!("sub-{}", self.next_subscription));

        let mut frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination);
        if !headers.contains_key("ack") {
            frame = frame.header("ack", "auto");
        }
        let frame = frame.with_headers(
            headers
                .iter()
                .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "destination"),
        );

        self.queue(frame)?;
        self.next_subscription += 1;
        Ok(id)
    }

    fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), TransportError> {
        self.queue(Frame::new(Command::Unsubscribe).header("id", id.as_str()))
    }

    fn publish(
        &mut self,
        destination: &str,
        body: &str,
        headers: &Headers,
    ) -> Result<(), TransportError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .with_headers(headers.iter().filter(|(k, _)| k.as_str() != "destination"))
            .with_body(body);
        self.queue(frame)
    }
}

impl Drop for StompTransport {
    /// Aborts a live connection; a task already told to disconnect was detached
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connection task: reports exactly one `Closed` when it ends
async fn run_connection(
    url: Url,
    connect_frame: Frame,
    options: StompOptions,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    connected: Arc<AtomicBool>,
    sink: EventSink,
) {
    let reason = match connection_loop(&url, connect_frame, &options, outbound, &connected, &sink)
        .await
    {
        Ok(reason) => reason,
        Err(e) => {
            warn!(url = %url, error = %e, "STOMP connection failed");
            sink.emit(TransportEvent::SocketError {
                message: e.to_string(),
            });
            e.to_string()
        }
    };

    connected.store(false, Ordering::SeqCst);
    debug!(url = %url, reason = %reason, "STOMP connection closed");
    sink.emit(TransportEvent::Closed { reason });
}

fn io_error(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

async fn connection_loop(
    url: &Url,
    connect_frame: Frame,
    options: &StompOptions,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    connected: &AtomicBool,
    sink: &EventSink,
) -> Result<String, TransportError> {
    // Only a disconnect can be queued before the session exists
    let (mut ws, _response) = tokio::select! {
        result = connect_async(url.as_str()) => {
            result.map_err(|e| TransportError::Handshake(e.to_string()))?
        }
        _ = outbound.recv() => return Ok("Client disconnect".to_string()),
    };

    if options.debug {
        debug!(frame = %connect_frame.command, ">>> frame");
    }
    ws.send(Message::text(connect_frame.encode()))
        .await
        .map_err(io_error)?;

    let mut decoder = FrameDecoder::new();
    let mut plan = HeartbeatPlan::DISABLED;
    let mut last_received = Instant::now();
    let mut next_heartbeat: Option<Instant> = None;

    loop {
        let receive_deadline = plan.receive_timeout().map(|timeout| last_received + timeout);

        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(frame)) => {
                    if options.debug {
                        debug!(command = %frame.command, headers = ?frame.headers, body = %frame.body, ">>> frame");
                    }
                    ws.send(Message::text(frame.encode())).await.map_err(io_error)?;
                    next_heartbeat = plan.send_every.map(|every| Instant::now() + every);
                }
                Some(Outbound::Disconnect) | None => {
                    connected.store(false, Ordering::SeqCst);
                    let teardown = async {
                        ws.send(Message::text(Frame::new(Command::Disconnect).encode()))
                            .await?;
                        ws.close(None).await
                    };
                    if tokio::time::timeout(DISCONNECT_GRACE, teardown).await.is_err() {
                        warn!(url = %url, "Broker did not acknowledge close in time");
                    }
                    return Ok("Client disconnect".to_string());
                }
            },

            _ = sleep_until_opt(next_heartbeat) => {
                trace!("Sending heart-beat");
                ws.send(Message::text("\n".to_string())).await.map_err(io_error)?;
                next_heartbeat = plan.send_every.map(|every| Instant::now() + every);
            }

            _ = sleep_until_opt(receive_deadline) => {
                warn!(url = %url, "No heart-beat from broker, closing connection");
                let _ = ws.close(None).await;
                return Ok("Heart-beat timeout".to_string());
            }

            incoming = ws.next() => {
                last_received = Instant::now();
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8(data.to_vec())
                        .map_err(|e| TransportError::Protocol(e.to_string()))?,
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => format!("Closed by server: {} {}", u16::from(f.code), f.reason),
                            None => "Closed by server".to_string(),
                        };
                        return Ok(reason);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(io_error(e)),
                    None => return Ok("WebSocket stream ended".to_string()),
                };

                let decoded = decoder
                    .push(&text)
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;

                for item in decoded {
                    let frame = match item {
                        Decoded::Heartbeat => {
                            trace!("Received heart-beat");
                            continue;
                        }
                        Decoded::Frame(frame) => frame,
                    };
                    if options.debug {
                        debug!(command = %frame.command, headers = ?frame.headers, body = %frame.body, "<<< frame");
                    }

                    match route_frame(frame) {
                        FrameRoute::Connected(headers) => {
                            plan = negotiate_heartbeat(options, headers.get("heart-beat").map(String::as_str));
                            next_heartbeat = plan.send_every.map(|every| Instant::now() + every);
                            connected.store(true, Ordering::SeqCst);
                            info!(
                                url = %url,
                                version = headers.get("version").map(String::as_str).unwrap_or("1.0"),
                                "STOMP session established"
                            );
                            sink.emit(TransportEvent::Connected { headers });
                        }
                        FrameRoute::Deliver { subscription, message } => {
                            sink.emit(TransportEvent::Message { subscription, message });
                        }
                        FrameRoute::BrokerError(message) => {
                            warn!(url = %url, error = %message, "Broker reported error");
                            sink.emit(TransportEvent::StompError { message });
                        }
                        FrameRoute::Receipt(id) => debug!(receipt = %id, "Receipt received"),
                        FrameRoute::Ignore(_) => {}
                    }
                }
            }
        }
    }
}
