//! Automatic reconnection tests
//!
//! Run on a paused tokio clock so the backoff delays can be measured:
//! 1000ms, 1500ms, 2250ms, ... capped by the maximum delay, and no
//! further attempts once the attempt budget is spent.


use std::time::Duration;
use test_helpers::*;
use tickerlink::ConnectionStatus;
use tokio::time::Instant;

/// Fail the current activation with a close and measure how long the
/// service waits before activating again
async fn close_and_measure(mock: &tickerlink::testing::MockTransport, next: usize) -> Duration {
    let started = Instant::now();
    mock.emit_close("connection refused");
    mock.wait_for_activations(next).await;
    started.elapsed()
}

/// The paused clock jumps straight to the deadline; allow for timer-wheel
/// millisecond rounding
fn assert_delay(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "expected ~{expected_ms}ms, waited {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sequence_and_attempt_limit() {
    // Arrange
    let (service, mock) = new_service(reconnecting_options(3));
    let connecting = service.connect();
    mock.wait_for_activations(1).await;

    // Act + Assert: each failure schedules the next attempt with backoff
    let first = close_and_measure(&mock, 2).await;
    assert!(connecting.await.is_err(), "initial connect fails on close");
    let second = close_and_measure(&mock, 3).await;
    let third = close_and_measure(&mock, 4).await;

    assert_delay(first, 1000);
    assert_delay(second, 1500);
    assert_delay(third, 2250);

    // The third reconnect attempt fails too: budget exhausted
    mock.emit_close("connection refused");
    let snapshot = settle(&service).await;
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 3);
    assert!(!snapshot.reconnect_scheduled);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(mock.activation_count(), 4, "no attempts beyond the limit");
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_attempts() {
    // Arrange
    let (service, mock) = connected_service(reconnecting_options(5)).await;

    // Act: drop twice, then let the broker accept
    let first = close_and_measure(&mock, 2).await;
    let second = close_and_measure(&mock, 3).await;
    mock.emit_connected();
    let connected = settle(&service).await;

    // Assert
    assert_delay(first, 1000);
    assert_delay(second, 1500);
    assert_eq!(connected.status, ConnectionStatus::Connected);
    assert_eq!(connected.reconnect_attempts, 0);

    // The next drop starts over from the initial delay
    let after_reset = close_and_measure(&mock, 4).await;
    assert_delay(after_reset, 1000);
}

#[tokio::test(start_paused = true)]
async fn test_delay_is_capped_by_max_delay() {
    let options = reconnecting_options(10)
        .with_reconnect_delays(Duration::from_millis(1000), Duration::from_millis(2000));
    let (_service, mock) = connected_service(options).await;

    let delays = [
        close_and_measure(&mock, 2).await,
        close_and_measure(&mock, 3).await,
        close_and_measure(&mock, 4).await,
        close_and_measure(&mock, 5).await,
    ];

    for (delay, expected) in delays.into_iter().zip([1000, 1500, 2000, 2000]) {
        assert_delay(delay, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_subscriptions_restored_by_automatic_reconnect() {
    // Arrange
    let (service, mock) = connected_service(reconnecting_options(5)).await;
    let (handler, received) = recording_handler();
    service.subscribe("/topic/stocks/005930", handler).await.unwrap();

    // Act
    close_and_measure(&mock, 2).await;
    mock.emit_connected();
    let snapshot = settle(&service).await;
    mock.emit_message("/topic/stocks/005930", "quote");
    settle(&service).await;

    // Assert
    assert_eq!(snapshot.active_subscriptions, vec!["/topic/stocks/005930".to_string()]);
    assert_eq!(*received.lock(), vec!["quote".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_disconnect_cancels_scheduled_reconnect() {
    // Arrange
    let (service, mock) = connected_service(reconnecting_options(5)).await;
    mock.emit_close("network down");
    assert!(settle(&service).await.reconnect_scheduled);

    // Act
    service.disconnect().await.expect("disconnect");
    tokio::time::sleep(Duration::from_secs(60)).await;

    // Assert
    let snapshot = settle(&service).await;
    assert!(!snapshot.reconnect_scheduled);
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(mock.activation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_reconnect_never_retries() {
    let (service, mock) = connected_service(test_options()).await;

    mock.emit_close("network down");
    tokio::time::sleep(Duration::from_secs(60)).await;

    let snapshot = settle(&service).await;
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
    assert_eq!(snapshot.reconnect_attempts, 0);
    assert_eq!(mock.activation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_then_close_counts_two_attempts() {
    let (service, mock) = connected_service(reconnecting_options(5)).await;

    mock.emit_socket_error("reset by peer");
    mock.emit_close("reset by peer");
    let snapshot = settle(&service).await;

    assert_eq!(snapshot.reconnect_attempts, 2);
    assert!(snapshot.reconnect_scheduled);
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_triggers_reconnect() {
    let options = reconnecting_options(1).with_connect_timeout(Duration::from_secs(5));
    let (service, mock) = new_service(options);
    let started = Instant::now();

    let result = service.connect().await;
    mock.wait_for_activations(2).await;

    assert!(result.is_err());
    assert_delay(started.elapsed(), 6000);
    let snapshot = settle(&service).await;
    assert_eq!(snapshot.status, ConnectionStatus::Connecting);
}
