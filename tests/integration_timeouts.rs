//! Timeout, cancellation, and backpressure behavior against a live server.

use dgram_ipc::{
    Client, ClientConfig, SendOptions, Server, ServerConfig, TypedHandler,
};
use serde_json::{json, Map};
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn slow_server(socket_path: &str, handler_delay: Duration) -> Server {
    let server = Server::new(ServerConfig::new(socket_path)).expect("create server");

    server
        .register_handler(
            "slow",
            TypedHandler::string(move |_request| async move {
                sleep(handler_delay).await;
                Ok("finally".to_string())
            }),
        )
        .expect("register slow");

    server
        .register_handler(
            "ping",
            TypedHandler::object(|_request| async {
                let mut result = Map::new();
                result.insert("message".to_string(), json!("pong"));
                Ok(result)
            }),
        )
        .expect("register ping");

    server
}

#[tokio::test]
async fn slow_handler_times_out_with_handler_timeout_code() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = slow_server(socket_path, Duration::from_secs(10));
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    let started = Instant::now();
    let outcome = client
        .send_request(
            "slow",
            None,
            Some(SendOptions {
                timeout: Some(Duration::from_secs(1)),
            }),
        )
        .await;
    let elapsed = started.elapsed();

    // Whichever side's watchdog wins the race, the caller observes the
    // handler-timeout code well inside three seconds.
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    match outcome {
        Ok(response) => {
            assert!(!response.success);
            assert_eq!(response.error.unwrap().code, -32002);
        }
        Err(err) => assert_eq!(err.code(), -32002),
    }
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.statistics().pending_count, 0);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_request_signals_waiter() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = slow_server(socket_path, Duration::from_secs(10));
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request(
                    "slow",
                    None,
                    Some(SendOptions {
                        timeout: Some(Duration::from_secs(30)),
                    }),
                )
                .await
        })
    };

    // Wait for the request to become pending, then cancel it.
    let mut handle = None;
    for _ in 0..50 {
        sleep(Duration::from_millis(10)).await;
        if let Some(pending) = client.pending_handles().pop() {
            handle = Some(pending);
            break;
        }
    }
    let handle = handle.expect("request became pending");
    assert!(client.is_pending(handle.internal_id()));

    assert!(client.cancel_request(&handle, "operator gave up"));
    assert!(handle.is_cancelled());

    let outcome = waiter.await.unwrap();
    let err = outcome.unwrap_err();
    assert!(err.to_string().contains("operator gave up"), "{err}");
    assert_eq!(client.pending_count(), 0);

    // Cancellation is idempotent.
    assert!(!client.cancel_request(&handle, "again"));
    assert_eq!(
        client.request_status(&handle),
        dgram_ipc::RequestStatus::Cancelled
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_all_requests_drains_the_table() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = slow_server(socket_path, Duration::from_secs(10));
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        waiters.push(tokio::spawn(async move {
            client
                .send_request(
                    "slow",
                    None,
                    Some(SendOptions {
                        timeout: Some(Duration::from_secs(30)),
                    }),
                )
                .await
        }));
    }

    for _ in 0..100 {
        sleep(Duration::from_millis(10)).await;
        if client.pending_count() == 3 {
            break;
        }
    }
    assert_eq!(client.pending_count(), 3);

    let cancelled = client.cancel_all_requests("shutting down");
    assert_eq!(cancelled, 3);
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.statistics().pending_count, 0);
    assert_eq!(client.statistics().total_cancelled, 3);

    for waiter in waiters {
        assert!(waiter.await.unwrap().is_err());
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn saturated_worker_pool_rejects_with_busy() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut config = ServerConfig::new(socket_path);
    config.max_connections = 1;
    let server_inner = Server::new(config).unwrap();
    server_inner
        .register_handler(
            "slow",
            TypedHandler::string(|_request| async {
                sleep(Duration::from_millis(500)).await;
                Ok("done".to_string())
            }),
        )
        .unwrap();
    let mut server = server_inner;
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    // Occupy the only worker slot.
    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .send_request(
                    "slow",
                    None,
                    Some(SendOptions {
                        timeout: Some(Duration::from_secs(5)),
                    }),
                )
                .await
        })
    };
    sleep(Duration::from_millis(100)).await;

    // The overflow request is rejected immediately, not queued.
    let response = client.send_request("slow", None, None).await.unwrap();
    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert_eq!(error.data.unwrap()["reason"], "busy");

    // The occupant still completes normally.
    let response = first.await.unwrap().unwrap();
    assert!(response.success);
    assert_eq!(response.result.unwrap(), json!("done"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn client_statistics_track_lifecycle() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = slow_server(socket_path, Duration::from_secs(10));
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    client.send_request("ping", None, None).await.unwrap();
    let _ = client
        .send_request(
            "slow",
            None,
            Some(SendOptions {
                timeout: Some(Duration::from_millis(200)),
            }),
        )
        .await;

    // The slow call terminates either by the client's own watchdog
    // (expired) or by the server's handler-timeout response (completed),
    // depending on which side's deadline fires first.
    let stats = client.statistics();
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.total_registered, 2);
    assert_eq!(stats.total_completed + stats.total_expired, 2);
    assert!(stats.total_completed >= 1);

    server.stop().await.unwrap();
}
