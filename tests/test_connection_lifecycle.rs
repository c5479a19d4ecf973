//! Connection lifecycle tests
//!
//! Drive `WebSocketService` through connect, disconnect, broker errors and
//! disposal using the mock transport, and check the observable status
//! sequence and the outcome of each call.


use std::time::Duration;
use test_helpers::*;
use tickerlink::testing::TransportCall;
use tickerlink::{ClientError, ConnectionStatus};

#[tokio::test]
async fn test_connect_reaches_connected_with_status_sequence() {
    // Arrange
    let (service, mock) = new_service(test_options());
    let statuses = record_statuses(&service);
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);

    // Act
    let connecting = service.connect();
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    connecting.await.expect("connect should resolve once confirmed");

    // Assert
    assert_eq!(service.get_connection_status(), ConnectionStatus::Connected);
    assert_eq!(
        *statuses.lock(),
        vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
    );
}

#[tokio::test]
async fn test_connect_while_connected_resolves_without_new_activation() {
    let (service, mock) = connected_service(test_options()).await;

    service.connect().await.expect("already connected");

    assert_eq!(mock.activation_count(), 1, "no second activation expected");
}

#[tokio::test]
async fn test_concurrent_connects_share_one_activation() {
    // Arrange
    let (service, mock) = new_service(test_options());

    // Act: two callers race before the broker answers
    let first = service.connect();
    let second = service.connect();
    mock.wait_for_activations(1).await;
    mock.emit_connected();

    // Assert
    first.await.expect("first caller connected");
    second.await.expect("second caller joined the same attempt");
    let snapshot = settle(&service).await;
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(mock.activation_count(), 1);
}

#[tokio::test]
async fn test_auth_token_is_sent_as_bearer_header() {
    let (service, mock) = new_service(
        test_options()
            .with_auth_token("secret-token")
            .with_connect_header("X-Client", "integration"),
    );

    let _connecting = service.connect();
    mock.wait_for_activations(1).await;

    let headers = mock
        .calls()
        .into_iter()
        .find_map(|call| match call {
            TransportCall::Activate { headers } => Some(headers),
            _ => None,
        })
        .expect("activation recorded");
    assert_eq!(
        headers.get("Authorization").map(String::as_str),
        Some("Bearer secret-token")
    );
    assert_eq!(headers.get("X-Client").map(String::as_str), Some("integration"));
}

#[tokio::test]
async fn test_disconnect_from_connected() {
    // Arrange
    let (service, mock) = connected_service(test_options()).await;
    let statuses = record_statuses(&service);

    // Act
    service.disconnect().await.expect("disconnect should succeed");

    // Assert
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(
        *statuses.lock(),
        vec![ConnectionStatus::Disconnecting, ConnectionStatus::Disconnected]
    );
    assert!(mock.calls().contains(&TransportCall::Deactivate));
}

#[tokio::test]
async fn test_disconnect_when_already_disconnected_is_noop() {
    let (service, mock) = new_service(test_options());

    service.disconnect().await.expect("nothing to do");

    assert!(mock.calls().is_empty(), "transport must not be touched");
}

#[tokio::test]
async fn test_disconnect_during_connect_aborts_attempt() {
    // Arrange
    let (service, mock) = new_service(test_options());
    let connecting = service.connect();
    mock.wait_for_activations(1).await;

    // Act
    service.disconnect().await.expect("disconnect should succeed");

    // Assert
    assert_eq!(connecting.await, Err(ClientError::ConnectAborted));
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);

    // A late confirmation from the aborted attempt is ignored
    mock.emit_connected();
    let snapshot = settle(&service).await;
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_error_while_disconnecting_rejects_and_schedules_reconnect() {
    // Arrange
    let (service, mock) = connected_service(reconnecting_options(3)).await;
    let errors = record_errors(&service);

    // Act: the socket fails before the teardown completes
    let disconnecting = service.disconnect();
    mock.emit_socket_error("reset during teardown");

    // Assert
    assert_eq!(
        disconnecting.await,
        Err(ClientError::websocket("reset during teardown"))
    );
    assert_eq!(
        *errors.lock(),
        vec![ClientError::websocket("reset during teardown")]
    );
    let snapshot = settle(&service).await;
    assert!(snapshot.reconnect_scheduled);
    assert_eq!(snapshot.reconnect_attempts, 1);

    mock.wait_for_activations(2).await;
    assert_eq!(mock.activation_count(), 2);
}

#[tokio::test]
async fn test_broker_error_during_connect_rejects_and_reports() {
    // Arrange
    let (service, mock) = new_service(test_options());
    let errors = record_errors(&service);
    let connecting = service.connect();
    mock.wait_for_activations(1).await;

    // Act
    mock.emit_stomp_error("Bad credentials");

    // Assert
    let result = connecting.await;
    assert_eq!(result, Err(ClientError::stomp("Bad credentials")));
    assert_eq!(service.get_connection_status(), ConnectionStatus::Error);
    assert_eq!(*errors.lock(), vec![ClientError::stomp("Bad credentials")]);
    assert_eq!(
        result.unwrap_err().to_string(),
        "STOMP Error: Bad credentials"
    );
}

#[tokio::test]
async fn test_socket_error_while_connected_moves_to_error() {
    let (service, mock) = connected_service(test_options()).await;
    let errors = record_errors(&service);

    mock.emit_socket_error("connection reset");
    let snapshot = settle(&service).await;

    assert_eq!(snapshot.status, ConnectionStatus::Error);
    assert_eq!(*errors.lock(), vec![ClientError::websocket("connection reset")]);
    assert!(!snapshot.reconnect_scheduled, "reconnect disabled in test options");
}

#[tokio::test]
async fn test_unexpected_close_while_connecting_rejects_connect() {
    let (service, mock) = new_service(test_options());
    let connecting = service.connect();
    mock.wait_for_activations(1).await;

    mock.emit_close("refused");

    assert_eq!(connecting.await, Err(ClientError::ConnectionClosed));
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_activation_failure_is_reported() {
    let (service, mock) = new_service(test_options());
    mock.fail_activation(true);

    let result = service.connect().await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(service.get_connection_status(), ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    // Arrange
    let (service, mock) = new_service(test_options().with_connect_timeout(Duration::from_secs(5)));
    let errors = record_errors(&service);
    let started = tokio::time::Instant::now();

    // Act: the broker never answers
    let result = service.connect().await;

    // Assert
    assert_eq!(result, Err(ClientError::ConnectTimeout { timeout_ms: 5000 }));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(service.get_connection_status(), ConnectionStatus::Error);
    assert_eq!(errors.lock().len(), 1);
    assert_eq!(mock.activation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_timeout_after_successful_connect() {
    let (service, _mock) = connected_service(test_options()).await;
    let errors = record_errors(&service);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(service.get_connection_status(), ConnectionStatus::Connected);
    assert!(errors.lock().is_empty(), "stale connect timer must not fire");
}

#[tokio::test]
async fn test_status_receiver_follows_transitions() {
    let (service, mock) = new_service(test_options());
    let mut status = service.status_receiver();

    let connecting = service.connect();
    status
        .wait_for(|s| *s == ConnectionStatus::Connecting)
        .await
        .expect("service alive");
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    connecting.await.expect("connected");

    assert_eq!(*status.borrow_and_update(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_dispose_is_idempotent_and_final() {
    // Arrange
    let (service, mock) = connected_service(test_options()).await;

    // Act
    service.dispose();
    service.dispose();

    // Assert
    assert!(service.is_disposed());
    assert_eq!(service.connect().await, Err(ClientError::Disposed));
    assert_eq!(service.send("/app/x", "1").await, Err(ClientError::Disposed));
    assert!(service.get_active_subscriptions().await.is_empty());

    let mut status = service.status_receiver();
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .ok();
    assert_eq!(service.get_connection_status(), ConnectionStatus::Disconnected);
    assert!(mock.calls().contains(&TransportCall::Deactivate));
}

#[tokio::test]
async fn test_clones_share_one_service() {
    let (service, mock) = new_service(test_options());
    let other = service.clone();

    let connecting = other.connect();
    mock.wait_for_activations(1).await;
    mock.emit_connected();
    connecting.await.expect("connected");

    assert_eq!(service.get_connection_status(), ConnectionStatus::Connected);
}
