//! Manifest-backed validation exercised end-to-end: the same schema on
//! both sides, defaults applied before dispatch, and the consistency
//! property that a request the client's manifest accepts is also accepted
//! by the server's.

use dgram_ipc::{Client, ClientConfig, Manifest, Server, ServerConfig, TypedHandler};
use serde_json::{json, Map};
use std::time::Duration;
use tokio::time::sleep;

fn library_manifest() -> Manifest {
    Manifest::from_json(
        r#"{
            "version": "1.0",
            "name": "library",
            "channels": {
                "library": {
                    "requests": {
                        "lookup": {
                            "args": {
                                "isbn": {
                                    "type": "string",
                                    "required": true,
                                    "pattern": "[0-9\\-]+",
                                    "min_length": 10,
                                    "max_length": 17
                                },
                                "format": {
                                    "type": "string",
                                    "enum": ["brief", "full"],
                                    "default": "brief"
                                }
                            },
                            "response": {"type": "object"}
                        }
                    }
                }
            }
        }"#,
    )
    .unwrap()
}

fn lookup_server(socket_path: &str) -> Server {
    let server = Server::with_manifest(ServerConfig::new(socket_path), Some(library_manifest()))
        .expect("create server");

    // Echoes the effective arguments back, so tests can observe what the
    // handler actually received after defaults were applied.
    server
        .register_handler(
            "lookup",
            TypedHandler::object(|request| async move {
                Ok(request.args.unwrap_or_default())
            }),
        )
        .expect("register lookup");

    server
}

#[tokio::test]
async fn handler_result_outside_declared_shape_is_an_internal_error() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let server_inner =
        Server::with_manifest(ServerConfig::new(socket_path), Some(library_manifest()))
            .expect("create server");
    // lookup declares an object response, but this handler produces a
    // bare string.
    server_inner
        .register_handler(
            "lookup",
            TypedHandler::string(|_request| async { Ok("not an object".to_string()) }),
        )
        .unwrap();
    let mut server = server_inner;
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "library")).unwrap();
    let mut args = Map::new();
    args.insert("isbn".to_string(), json!("978-0-13-468"));
    let response = client
        .send_request("lookup", Some(args), None)
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, -32603);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn defaults_are_applied_before_dispatch() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = lookup_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "library")).unwrap();

    let mut args = Map::new();
    args.insert("isbn".to_string(), json!("978-0-13-468"));
    let response = client
        .send_request("lookup", Some(args), None)
        .await
        .unwrap();

    assert!(response.success);
    let result = response.result.unwrap();
    assert_eq!(result["isbn"], "978-0-13-468");
    // The handler saw the declared default, not an absent key.
    assert_eq!(result["format"], "brief");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn explicit_values_win_over_defaults() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = lookup_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let client = Client::new(ClientConfig::new(socket_path, "library")).unwrap();

    let mut args = Map::new();
    args.insert("isbn".to_string(), json!("978-0-13-468"));
    args.insert("format".to_string(), json!("full"));
    let response = client
        .send_request("lookup", Some(args), None)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.result.unwrap()["format"], "full");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn client_accepted_requests_pass_server_validation() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = lookup_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    // Both sides hold the same manifest: anything the client's send-path
    // validation lets through must come back as a handler result, never
    // as a server-side InvalidParams.
    let client = Client::with_manifest(
        ClientConfig::new(socket_path, "library"),
        Some(library_manifest()),
    )
    .unwrap();

    let argument_sets: Vec<Map<String, serde_json::Value>> = vec![
        {
            let mut m = Map::new();
            m.insert("isbn".to_string(), json!("0-13-468599-7"));
            m
        },
        {
            let mut m = Map::new();
            m.insert("isbn".to_string(), json!("978-0-13-468"));
            m.insert("format".to_string(), json!("full"));
            m
        },
    ];

    for args in argument_sets {
        let response = client
            .send_request("lookup", Some(args), None)
            .await
            .unwrap();
        assert!(response.success, "server rejected: {:?}", response.error);
    }

    // And something the client rejects never reaches the wire.
    let mut bad = Map::new();
    bad.insert("isbn".to_string(), json!("123"));
    let err = client.send_request("lookup", Some(bad), None).await;
    assert_eq!(err.unwrap_err().code(), -32602);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn channel_unknown_to_manifest_is_rejected_by_server() {
    let dir = tempfile::tempdir_in("/tmp").unwrap();
    let socket_path = dir.path().join("svc.sock");
    let socket_path = socket_path.to_str().unwrap();

    let mut server = lookup_server(socket_path);
    server.start().await.unwrap();
    sleep(Duration::from_millis(50)).await;

    // No client-side manifest, wrong channel: the server's manifest has
    // no "warehouse" channel, so validation fails there.
    let client = Client::new(ClientConfig::new(socket_path, "warehouse")).unwrap();
    let mut args = Map::new();
    args.insert("isbn".to_string(), json!("978-0-13-468"));
    let response = client
        .send_request("lookup", Some(args), None)
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, -32001);

    server.stop().await.unwrap();
}
