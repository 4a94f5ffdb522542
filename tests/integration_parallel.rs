//! Parallel batch execution against a live server.

use dgram_ipc::{Client, ClientConfig, ParallelRequest, Server, ServerConfig, TypedHandler};
use serde_json::{json, Map};
use std::time::{Duration, Instant};
use tokio::time::sleep;

const HANDLER_DELAY: Duration = Duration::from_millis(150);

fn batch_server(socket_path: &str) -> Server {
    let server = Server::new(ServerConfig::new(socket_path)).expect("create server");

    server
        .register_handler(
            "ping",
            TypedHandler::object(|_request| async {
                sleep(HANDLER_DELAY).await;
                let mut result = Map::new();
                result.insert("message".to_string(), json!("pong"));
                Ok(result)
            }),
        )
        .expect("register ping");

    server
        .register_handler(
            "echo",
            TypedHandler::custom(|request| async move {
                sleep(HANDLER_DELAY).await;
                Ok(serde_json::Value::Object(request.args.unwrap_or_default()))
            }),
        )
        .expect("register echo");

    server
}

#[tokio::test]
async fn parallel_batch_preserves_input_order() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = batch_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    // Measure one sequential call as the comparison baseline.
    let single_started = Instant::now();
    client.send_request("ping", None, None).await.unwrap();
    let single_elapsed = single_started.elapsed();

    let mut args_a = Map::new();
    args_a.insert("msg".to_string(), json!("a"));
    let mut args_b = Map::new();
    args_b.insert("msg".to_string(), json!("b"));

    let batch_started = Instant::now();
    let results = client
        .execute_in_parallel(vec![
            ParallelRequest::new("ping"),
            ParallelRequest::new("echo").with_args(args_a),
            ParallelRequest::new("echo").with_args(args_b),
        ])
        .await;
    let batch_elapsed = batch_started.elapsed();

    // One result per input, in input order.
    assert_eq!(results.len(), 3);
    let ping = results[0].as_ref().unwrap();
    assert_eq!(ping.result.as_ref().unwrap()["message"], "pong");
    let echo_a = results[1].as_ref().unwrap();
    assert_eq!(echo_a.result.as_ref().unwrap()["msg"], "a");
    let echo_b = results[2].as_ref().unwrap();
    assert_eq!(echo_b.result.as_ref().unwrap()["msg"], "b");

    // The three ran concurrently, not back to back.
    assert!(
        batch_elapsed < single_elapsed * 2,
        "batch {batch_elapsed:?} vs single {single_elapsed:?}"
    );

    assert_eq!(client.pending_count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn one_failure_does_not_affect_the_rest() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = batch_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    let results = client
        .execute_in_parallel(vec![
            ParallelRequest::new("ping"),
            ParallelRequest::new("no-such-handler"),
            ParallelRequest::new("ping"),
        ])
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().success);
    assert!(results[2].as_ref().unwrap().success);

    // The middle input gets its own MethodNotFound response without
    // disturbing its neighbours.
    let missing = results[1].as_ref().unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error.as_ref().unwrap().code, -32601);

    assert_eq!(client.pending_count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn correlation_holds_under_concurrent_load() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut config = ServerConfig::new(socket_path);
    config.max_connections = 64;
    let server_inner = Server::new(config).unwrap();
    // Echo a caller-chosen tag so each waiter can prove it got its own
    // response and not a neighbour's.
    server_inner
        .register_handler(
            "tag",
            TypedHandler::custom(|request| async move {
                Ok(serde_json::Value::Object(request.args.unwrap_or_default()))
            }),
        )
        .unwrap();
    let mut server = server_inner;
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "demo")).unwrap();

    let mut waiters = Vec::new();
    for i in 0..32i64 {
        let client = client.clone();
        waiters.push(tokio::spawn(async move {
            let mut args = Map::new();
            args.insert("tag".to_string(), json!(i));
            let response = client.send_request("tag", Some(args), None).await?;
            Ok::<(i64, dgram_ipc::Response), dgram_ipc::IpcError>((i, response))
        }));
    }

    for waiter in waiters {
        let (i, response) = waiter.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.result.unwrap()["tag"], json!(i));
    }

    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.tracking_anomaly_count(), 0);
    assert_eq!(client.statistics().total_completed, 32);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn parallel_batches_use_distinct_reply_sockets() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();
    let reply_dir = tempfile::tempdir_in("/tmp").unwrap();

    let mut server = batch_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut config = ClientConfig::new(socket_path, "demo");
    config.transport.reply_socket_dir = reply_dir.path().to_path_buf();
    let client = Client::new(config).unwrap();

    let results = client
        .execute_in_parallel(vec![
            ParallelRequest::new("ping"),
            ParallelRequest::new("ping"),
            ParallelRequest::new("ping"),
            ParallelRequest::new("ping"),
        ])
        .await;
    assert!(results.iter().all(|r| r.as_ref().unwrap().success));

    // Every pending reply socket was released as its entry terminated.
    assert_eq!(std::fs::read_dir(reply_dir.path()).unwrap().count(), 0);

    server.stop().await.unwrap();
}
