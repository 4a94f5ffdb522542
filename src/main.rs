//! # Datagram IPC - Reference CLI Entry Point
//!
//! A thin collaborator around the library core: `listen` mode hosts a
//! service on a well-known datagram socket, `send` mode drives one and
//! prints the JSON response.
//!
//! ## Architecture Overview
//!
//! The main function performs these key operations:
//! 1. **Initialize logging**: Sets up structured logging with tracing
//! 2. **Parse arguments**: Processes command-line configuration
//! 3. **Load manifest**: Optional argument-validation schema
//! 4. **Dispatch mode**: Runs the server loop or a single client call
//!
//! ## Error Handling
//!
//! The binary uses `anyhow::Result` for error handling at the edges; the
//! library underneath reports typed `IpcError` values which are rendered
//! into log lines and process exit status here.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dgram_ipc::{
    cli::{Args, Mode},
    Client, EventKind, Manifest, Server, ServerEvent, TypedHandler,
};
use serde_json::json;
use tracing::{error, info};

use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

mod logging;
use logging::ConsoleFormatter;

/// Main application entry point
///
/// Uses Tokio's multi-threaded runtime: the server receive loop, handler
/// workers, and client waits are all tokio tasks underneath.
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments first, as they control logging behavior.
    let args = Args::parse();

    // Configure logging level based on verbosity flags.
    // This level applies to both the log file and stdout.
    // - default: INFO
    // -v: DEBUG
    // -vv and more: TRACE
    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Configure the detailed log layer (file or stderr).
    // The guard must be kept alive for the duration of the program for file logging.
    let guard;
    let detailed_log_layer;

    if let Some("stderr") = args.log_file.as_deref() {
        // Log detailed messages to stderr.
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    } else if let Some(path_str) = args.log_file.as_deref() {
        // Log to the requested file with daily rotation.
        let log_path = std::path::Path::new(path_str);
        let log_dir = log_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."));
        let log_filename = log_path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("dgram_ipc.log"));
        let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
        let (non_blocking_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false) // Disable color codes for the file logger
            .with_filter(log_level)
            .boxed();
        guard = Some(file_guard);
    } else {
        // No log file requested: send diagnostics to stderr.
        detailed_log_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(log_level)
            .boxed();
        guard = None;
    }

    // This layer sends clean, user-facing output to stdout.
    // It is only enabled if the --quiet flag is NOT present.
    let stdout_log = if !args.quiet {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .event_format(ConsoleFormatter) // Use the custom formatter
                .with_filter(log_level),
        )
    } else {
        None
    };

    // Initialize the tracing subscriber by combining the layers.
    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    // Keep the logging guard alive for the duration of the program.
    let _log_guard = guard;

    // Report where detailed diagnostics actually land: the daily-rolling
    // appender suffixes the configured name with today's date.
    if let Some(path_str) = args.log_file.as_deref() {
        if path_str != "stderr" {
            let today = chrono::Local::now().format("%Y-%m-%d");
            info!("Diagnostics logged to {path_str}.{today}");
        }
    }

    // Load the optional manifest before doing any socket work so schema
    // problems fail fast.
    let manifest = match args.manifest {
        Some(ref path) => Some(
            Manifest::from_file(path)
                .with_context(|| format!("failed to load manifest {:?}", path))?,
        ),
        None => None,
    };

    match args.mode {
        Mode::Listen => run_listen(&args, manifest).await,
        Mode::Send => run_send(&args, manifest).await,
    }
}

/// Host a demo service until interrupted
///
/// Registers the conventional `ping` and `echo` handlers so a freshly
/// built binary can be exercised immediately, wires lifecycle events into
/// the log, and runs until Ctrl-C.
async fn run_listen(args: &Args, manifest: Option<Manifest>) -> Result<()> {
    let mut server = Server::with_manifest(args.server_config(), manifest)
        .context("failed to create server")?;

    server.register_handler(
        "ping",
        TypedHandler::object(|_request| async {
            let mut result = serde_json::Map::new();
            result.insert("message".to_string(), json!("pong"));
            Ok(result)
        }),
    )?;

    server.register_handler(
        "echo",
        TypedHandler::custom(|request| async move {
            let args = request.args.unwrap_or_default();
            Ok(serde_json::Value::Object(args))
        }),
    )?;

    server.on(EventKind::Request, |event| {
        if let ServerEvent::Request { request } = event {
            info!(
                "request '{}' on channel '{}' ({})",
                request.request, request.channel_id, request.id
            );
        }
    });
    server.on(EventKind::Error, |event| {
        if let ServerEvent::Error { error } = event {
            error!("server error: {error}");
        }
    });

    server.start().await.context("failed to start server")?;
    info!("Listening on {} - press Ctrl-C to stop", args.socket_path);

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for Ctrl-C")?;
    info!("Shutting down");
    server.stop().await.context("failed to stop server")?;
    Ok(())
}

/// Send one request and print the JSON response to stdout
async fn run_send(args: &Args, manifest: Option<Manifest>) -> Result<()> {
    let request_name = args
        .request
        .as_deref()
        .ok_or_else(|| anyhow!("--request is required in send mode"))?;
    let request_args = args.parsed_args()?;

    let client = Client::with_manifest(args.client_config(), manifest)
        .context("failed to create client")?;

    if args.no_response {
        let id = client.publish_request(request_name, request_args).await;
        if id.is_empty() {
            return Err(anyhow!("fire-and-forget send failed"));
        }
        println!("{}", json!({ "published": id }));
        return Ok(());
    }

    let response = client
        .send_request(request_name, request_args, None)
        .await
        .context("request failed")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
