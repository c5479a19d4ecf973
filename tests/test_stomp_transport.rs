//! STOMP transport tests against an in-process WebSocket broker
//!
//! The broker side is a bare `tokio_tungstenite` server that speaks just
//! enough STOMP for each scenario, using the crate's own frame codec.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tickerlink::protocol::{Command, Decoded, Frame, FrameDecoder, TopicBuilder};
use tickerlink::transport::{EventSink, Headers, StompOptions, StompTransport, Transport, TransportEvent};
use tickerlink::{ClientError, ConnectionStatus, MessageHandler, ServiceOptions, WebSocketService};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

struct Broker {
    ws: WebSocketStream<TcpStream>,
    decoder: FrameDecoder,
    buffered: VecDeque<Frame>,
}

impl Broker {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.expect("client connects");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        Self {
            ws,
            decoder: FrameDecoder::new(),
            buffered: VecDeque::new(),
        }
    }

    /// Next STOMP frame from the client, skipping heart-beats
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.buffered.pop_front() {
                return Some(frame);
            }
            let text = match self.ws.next().await? {
                Ok(Message::Text(text)) => text.as_str().to_string(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            };
            for item in self.decoder.push(&text).expect("client sends valid frames") {
                if let Decoded::Frame(frame) = item {
                    self.buffered.push_back(frame);
                }
            }
        }
    }

    async fn expect(&mut self, command: Command) -> Frame {
        let frame = self.next_frame().await.expect("frame from client");
        assert_eq!(frame.command, command, "unexpected frame: {frame:?}");
        frame
    }

    async fn send(&mut self, frame: Frame) {
        self.ws
            .send(Message::text(frame.encode()))
            .await
            .expect("broker send");
    }

    async fn accept_session(&mut self, heart_beat: &str) -> Frame {
        let connect = self.expect(Command::Connect).await;
        self.send(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", heart_beat)
                .header("server", "test-broker/1.0"),
        )
        .await;
        connect
    }
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

#[tokio::test]
async fn test_end_to_end_subscribe_receive_send_disconnect() {
    // Arrange: broker script
    let (listener, url) = listen().await;
    let topic = TopicBuilder::etf_price("069500");
    let broker_topic = topic.clone();
    let broker = tokio::spawn(async move {
        let mut broker = Broker::accept(&listener).await;
        let connect = broker.accept_session("0,0").await;

        let subscribe = broker.expect(Command::Subscribe).await;
        assert_eq!(subscribe.get("destination"), Some(broker_topic.as_str()));
        assert_eq!(subscribe.get("ack"), Some("auto"));
        let id = subscribe.get("id").expect("subscription id").to_string();

        broker
            .send(
                Frame::new(Command::Message)
                    .header("subscription", id)
                    .header("message-id", "m-1")
                    .header("destination", broker_topic.as_str())
                    .with_body(r#"{"etfCode":"069500","price":35210.0,"dayOverDayRate":0.5,"volume":10}"#),
            )
            .await;

        let send = broker.expect(Command::Send).await;
        broker.expect(Command::Disconnect).await;
        (connect, send)
    });

    let service = WebSocketService::new(
        ServiceOptions::new(url)
            .with_auto_reconnect(false)
            .with_auth_token("secret"),
    )
    .expect("service");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = MessageHandler::new(move |message| {
        let _ = tx.send(message.clone());
    });

    // Act: subscribe first, which connects in the background
    let handle = service.subscribe(topic.clone(), handler).await.expect("subscribe");
    assert!(handle.is_pending());
    timeout(WAIT, service.connect())
        .await
        .expect("connect in time")
        .expect("connect");

    let message = timeout(WAIT, rx.recv())
        .await
        .expect("message in time")
        .expect("message delivered");
    service
        .send("/app/ack", "received")
        .await
        .expect("send");
    timeout(WAIT, service.disconnect())
        .await
        .expect("disconnect in time")
        .expect("disconnect");

    // Assert
    let (connect, send) = timeout(WAIT, broker).await.expect("broker done").expect("broker ok");
    assert_eq!(connect.get("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.get("Authorization"), Some("Bearer secret"));
    assert_eq!(send.get("destination"), Some("/app/ack"));
    assert!(send.get("message-id").is_some());
    assert_eq!(send.body, "received");

    assert_eq!(message.destination, topic);
    assert_eq!(message.message_id.as_deref(), Some("m-1"));
    let update: tickerlink::EtfPriceUpdate = message.json().expect("typed payload");
    assert_eq!(update.etf_code, "069500");
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_dispose_sends_disconnect_to_broker() {
    // Arrange
    let (listener, url) = listen().await;
    let broker = tokio::spawn(async move {
        let mut broker = Broker::accept(&listener).await;
        broker.accept_session("0,0").await;
        broker.expect(Command::Disconnect).await;
        broker.next_frame().await
    });
    let service =
        WebSocketService::new(ServiceOptions::new(url).with_auto_reconnect(false)).expect("service");
    timeout(WAIT, service.connect())
        .await
        .expect("connect in time")
        .expect("connect");

    // Act: the service task drops the transport right after queueing the teardown
    service.dispose();

    // Assert: DISCONNECT arrives, then the socket closes
    let after = timeout(WAIT, broker).await.expect("broker done").expect("broker ok");
    assert!(after.is_none(), "nothing after DISCONNECT: {after:?}");
}

#[tokio::test]
async fn test_broker_error_rejects_connect() {
    // Arrange
    let (listener, url) = listen().await;
    let broker = tokio::spawn(async move {
        let mut broker = Broker::accept(&listener).await;
        broker.expect(Command::Connect).await;
        broker
            .send(Frame::new(Command::Error).header("message", "Bad credentials"))
            .await;
        let _ = broker.ws.close(None).await;
    });
    let service =
        WebSocketService::new(ServiceOptions::new(url).with_auto_reconnect(false)).expect("service");

    // Act
    let result = timeout(WAIT, service.connect()).await.expect("settles in time");

    // Assert
    assert_eq!(result, Err(ClientError::stomp("Bad credentials")));
    broker.await.expect("broker ok");
}

#[tokio::test]
async fn test_unreachable_broker_reports_socket_error() {
    // Arrange: grab a free port, then stop listening on it
    let (listener, url) = listen().await;
    drop(listener);
    let service =
        WebSocketService::new(ServiceOptions::new(url).with_auto_reconnect(false)).expect("service");

    // Act
    let result = timeout(WAIT, service.connect()).await.expect("settles in time");

    // Assert
    assert!(
        matches!(result, Err(ClientError::WebSocket { .. })),
        "unexpected result: {result:?}"
    );
}

#[tokio::test]
async fn test_missing_heartbeats_close_the_connection() {
    // Arrange: the broker promises heart-beats every 100ms and then goes silent
    let (listener, url) = listen().await;
    let broker = tokio::spawn(async move {
        let mut broker = Broker::accept(&listener).await;
        broker.accept_session("100,0").await;
        while broker.next_frame().await.is_some() {}
    });

    let mut options = StompOptions::new(url);
    options.heartbeat_incoming = Duration::from_millis(100);
    let mut transport = StompTransport::new(options);
    let events = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let recorded = events.clone();
    let sink = EventSink::new(move |event: TransportEvent| {
        recorded.lock().push(format!("{event:?}"));
        let _ = tx.send(event);
    });

    // Act
    transport.activate(&Headers::new(), sink).expect("activate");
    let connected = timeout(WAIT, rx.recv()).await.expect("connected in time");
    let closed = timeout(WAIT, rx.recv()).await.expect("closed in time");

    // Assert
    assert!(matches!(connected, Some(TransportEvent::Connected { .. })));
    match closed {
        Some(TransportEvent::Closed { reason }) => assert_eq!(reason, "Heart-beat timeout"),
        other => panic!("expected close, got {other:?} after {:?}", events.lock()),
    }
    assert!(!transport.is_connected());
    broker.await.expect("broker ok");
}

#[tokio::test]
async fn test_publish_before_connected_is_rejected() {
    let (_listener, url) = listen().await;
    let mut transport = StompTransport::new(StompOptions::new(url));
    transport
        .activate(&Headers::new(), EventSink::new(|_| {}))
        .expect("activate");

    let result = transport.publish("/app/x", "1", &Headers::new());

    assert!(result.is_err(), "no STOMP session yet");
    assert!(transport.subscribe("/topic/x", &Headers::new()).is_err());
}
