//! RealtimeSession tests
//!
//! The session mirrors service status and errors, tracks the subscriptions
//! it created and releases them all on close.


use test_helpers::*;
use tickerlink::testing::MockTransport;
use tickerlink::{ClientError, ConnectionStatus, MessageHandler, RealtimeSession, SessionOptions};

fn session(auto_connect: bool) -> (RealtimeSession, MockTransport) {
    let mock = MockTransport::new();
    let options = SessionOptions::new(test_options()).with_auto_connect(auto_connect);
    let session = RealtimeSession::with_transport(options, mock.clone())
        .expect("session should be created inside a runtime");
    (session, mock)
}

async fn settle_session(session: &RealtimeSession) {
    settle(session.service().expect("session open")).await;
}

#[tokio::test]
async fn test_manual_connect_updates_status_flags() {
    // Arrange
    let (session, mock) = session(false);
    assert!(session.is_disconnected());
    assert_eq!(mock.activation_count(), 0, "no auto connect");

    // Act
    let connecting = session.connect();
    mock.wait_for_activations(1).await;
    settle_session(&session).await;
    assert!(session.is_connecting());
    mock.emit_connected();
    connecting.await.expect("connected");
    settle_session(&session).await;

    // Assert
    assert!(session.is_connected());
    assert_eq!(session.status(), ConnectionStatus::Connected);
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_auto_connect_starts_immediately() {
    let (session, mock) = session(true);

    mock.wait_for_activations(1).await;
    mock.emit_connected();
    settle_session(&session).await;

    assert!(session.is_connected());
}

#[tokio::test]
async fn test_auto_connect_failure_is_recorded() {
    // Arrange
    let (session, mock) = session(true);
    mock.wait_for_activations(1).await;

    // Act
    mock.emit_stomp_error("Bad credentials");
    settle_session(&session).await;

    // Assert
    assert!(session.has_error());
    assert_eq!(session.last_error(), Some(ClientError::stomp("Bad credentials")));
}

#[tokio::test]
async fn test_clear_error() {
    let (session, mock) = session(false);
    let connecting = session.connect();
    mock.wait_for_activations(1).await;
    mock.emit_socket_error("reset");
    assert!(connecting.await.is_err());
    settle_session(&session).await;
    assert_eq!(session.last_error(), Some(ClientError::websocket("reset")));

    session.clear_error();

    assert!(session.last_error().is_none());
    assert!(session.has_error(), "status is untouched by clearing the error");
}

#[tokio::test]
async fn test_subscriptions_are_tracked_and_released_on_close() {
    // Arrange
    let (mut session, mock) = session(false);
    let connecting = session.connect();
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    connecting.await.unwrap();

    let (handler, _) = recording_handler();
    session.subscribe("/topic/a", handler).await.unwrap();
    session
        .subscribe("/topic/b", MessageHandler::new(|_| {}))
        .await
        .unwrap();
    assert_eq!(
        session.tracked_destinations(),
        vec!["/topic/a".to_string(), "/topic/b".to_string()]
    );
    let service = session.service().cloned().expect("open");

    // Act
    session.close();

    // Assert
    assert!(session.tracked_destinations().is_empty());
    assert!(session.service().is_none());
    assert!(service.is_disposed());
    let mut status = service.status_receiver();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .ok();
    assert_eq!(mock.unsubscribe_count(), 2);
}

#[tokio::test]
async fn test_unsubscribe_by_handle_forgets_entry() {
    let (session, mock) = session(false);
    let connecting = session.connect();
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    connecting.await.unwrap();

    let handle = session
        .subscribe("/topic/a", MessageHandler::new(|_| {}))
        .await
        .unwrap();
    session.unsubscribe(&handle);
    settle_session(&session).await;

    assert!(session.tracked_destinations().is_empty());
    assert_eq!(mock.unsubscribe_count(), 1);
}

#[tokio::test]
async fn test_send_through_session() {
    let (session, mock) = session(false);

    let id = session.send("/app/a", "1").await.expect("queued");
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    settle_session(&session).await;

    assert!(id.starts_with("pending-"));
    assert_eq!(mock.published().len(), 1);
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let (mut session, _mock) = session(false);

    session.close();
    session.close();

    let expected = ClientError::NotInitialized {
        message: "WebSocketService not initialized".to_string(),
    };
    assert_eq!(session.connect().await, Err(expected.clone()));
    assert_eq!(session.send("/app/a", "1").await, Err(expected.clone()));
    assert_eq!(
        session
            .subscribe("/topic/a", MessageHandler::new(|_| {}))
            .await
            .map(|h| h.id().to_string()),
        Err(expected)
    );
}
