//! # Server Core Module
//!
//! The request-serving half of the IPC layer: one well-known datagram
//! socket, a single-reader receive loop, a registry of typed handlers, and
//! per-request worker tasks supervised for both timeouts and panics.
//!
//! ## Dispatch Pipeline
//!
//! ```
//! recv_from ─▶ security validate ─▶ parse Request ─▶ lookup handler
//!                                                        │
//!                    ┌───────────────────────────────────┘
//!                    ▼
//!            worker task (capped by max_connections)
//!                    │  manifest arg validation
//!                    │  handler future + timeout watchdog
//!                    ▼
//!            HandlerResult ─▶ Response ─▶ send to reply_to (if any)
//! ```
//!
//! Within one request the sequence is parse → validate → dispatch → reply;
//! between requests, execution order is unspecified. Backpressure comes
//! from the handler-worker cap: once it is reached, new requests are
//! rejected with a "busy" error, and beyond that the kernel socket buffer
//! is the only queue.
//!
//! ## Supervision
//!
//! Every handler failure becomes an error `Response` rather than a crash:
//! timeouts synthesize `HandlerTimeout`, argument mismatches
//! `InvalidParams`, unknown operations `MethodNotFound`, and panics are
//! caught at the task boundary and surface as `InternalError`.

use crate::error::{ErrorObject, IpcError, Result};
use crate::manifest::Manifest;
use crate::message::{Request, Response};
use crate::security::{SecurityLimits, SecurityValidator};
use crate::timeout::TimeoutManager;
use crate::transport::{datagram, TransportConfig};
use crate::utils::current_timestamp_secs;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default handler deadline when neither the request nor the caller set one
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period for in-flight handlers during shutdown
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the well-known datagram socket to bind
    pub socket_path: String,

    /// Maximum concurrently executing handlers
    ///
    /// A logical rate limit: requests arriving past this cap are rejected
    /// with a "busy" internal error rather than queued in-process.
    pub max_connections: usize,

    /// Handler deadline applied when a request does not carry its own
    pub default_timeout: Duration,

    /// Ceiling on request-supplied handler timeouts
    pub max_handler_timeout: Duration,

    /// Unlink a stale socket file before binding
    pub cleanup_on_start: bool,

    /// Unlink the socket file when the server stops
    pub cleanup_on_shutdown: bool,

    /// How long `stop` waits for in-flight handlers
    pub shutdown_grace: Duration,

    /// Transport tuning
    pub transport: TransportConfig,

    /// Security limits shared with the validator
    pub security: SecurityLimits,
}

impl ServerConfig {
    /// Configuration for a socket path with default tuning
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_connections: 16,
            default_timeout: DEFAULT_HANDLER_TIMEOUT,
            max_handler_timeout: Duration::from_secs(300),
            cleanup_on_start: true,
            cleanup_on_shutdown: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            transport: TransportConfig::default(),
            security: SecurityLimits::default(),
        }
    }
}

/// Outcome a handler may produce: a value or a wire-shaped error
pub type HandlerOutcome<T> = std::result::Result<T, ErrorObject>;

/// Boxed future returned by handler closures
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = HandlerOutcome<T>> + Send>>;

/// Shared handler closure taking the full request
pub type HandlerFn<T> = Arc<dyn Fn(Request) -> HandlerFuture<T> + Send + Sync>;

/// A registered handler, typed by the JSON shape of its success result
///
/// The variant decides the final JSON encoding: a `String` handler's value
/// becomes a JSON string, an `Object` handler's map a JSON object, and so
/// on. `Custom` passes any JSON value through untouched.
#[derive(Clone)]
pub enum TypedHandler {
    /// Produces a JSON string result
    String(HandlerFn<String>),
    /// Produces a JSON integer result
    Integer(HandlerFn<i64>),
    /// Produces a JSON number result
    Number(HandlerFn<f64>),
    /// Produces a JSON boolean result
    Boolean(HandlerFn<bool>),
    /// Produces a JSON array result
    Array(HandlerFn<Vec<Value>>),
    /// Produces a JSON object result
    Object(HandlerFn<Map<String, Value>>),
    /// Produces any JSON value
    Custom(HandlerFn<Value>),
}

impl std::fmt::Debug for TypedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            TypedHandler::String(_) => "String",
            TypedHandler::Integer(_) => "Integer",
            TypedHandler::Number(_) => "Number",
            TypedHandler::Boolean(_) => "Boolean",
            TypedHandler::Array(_) => "Array",
            TypedHandler::Object(_) => "Object",
            TypedHandler::Custom(_) => "Custom",
        };
        write!(f, "TypedHandler::{variant}")
    }
}

macro_rules! handler_constructor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name<F, Fut>(f: F) -> Self
        where
            F: Fn(Request) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerOutcome<$ty>> + Send + 'static,
        {
            TypedHandler::$variant(Arc::new(move |request| Box::pin(f(request))))
        }
    };
}

impl TypedHandler {
    handler_constructor!(
        /// Wrap an async closure producing a string result
        string, String, String
    );
    handler_constructor!(
        /// Wrap an async closure producing an integer result
        integer, Integer, i64
    );
    handler_constructor!(
        /// Wrap an async closure producing a number result
        number, Number, f64
    );
    handler_constructor!(
        /// Wrap an async closure producing a boolean result
        boolean, Boolean, bool
    );
    handler_constructor!(
        /// Wrap an async closure producing an array result
        array, Array, Vec<Value>
    );
    handler_constructor!(
        /// Wrap an async closure producing an object result
        object, Object, Map<String, Value>
    );
    handler_constructor!(
        /// Wrap an async closure producing any JSON value
        custom, Custom, Value
    );

    /// Run the handler and normalize its outcome to a [`HandlerResult`]
    async fn invoke(&self, request: Request) -> HandlerResult {
        match self {
            TypedHandler::String(f) => f(request).await.map(Value::String).into(),
            TypedHandler::Integer(f) => f(request).await.map(Value::from).into(),
            TypedHandler::Number(f) => match f(request).await {
                Ok(v) => match serde_json::Number::from_f64(v) {
                    Some(n) => HandlerResult::value(Value::Number(n)),
                    None => HandlerResult::error(ErrorObject::new(
                        crate::error::INTERNAL_ERROR,
                        "handler produced a non-finite number",
                    )),
                },
                Err(e) => HandlerResult::error(e),
            },
            TypedHandler::Boolean(f) => f(request).await.map(Value::Bool).into(),
            TypedHandler::Array(f) => f(request).await.map(Value::Array).into(),
            TypedHandler::Object(f) => f(request).await.map(Value::Object).into(),
            TypedHandler::Custom(f) => f(request).await.into(),
        }
    }
}

/// Normalized handler outcome, ready for response synthesis
#[derive(Debug, Clone)]
pub struct HandlerResult {
    /// JSON-encoded success value
    pub value: Option<Value>,
    /// Failure detail, when the handler failed
    pub error: Option<ErrorObject>,
}

impl HandlerResult {
    fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    fn error(error: ErrorObject) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }
}

impl From<HandlerOutcome<Value>> for HandlerResult {
    fn from(outcome: HandlerOutcome<Value>) -> Self {
        match outcome {
            Ok(value) => HandlerResult::value(value),
            Err(error) => HandlerResult::error(error),
        }
    }
}

/// Lifecycle event emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The socket is bound and the receive loop is running
    Listening {
        /// Bound socket path
        socket_path: String,
    },
    /// A request was received and parsed
    Request {
        /// The parsed request
        request: Request,
    },
    /// A response was produced (whether or not it will be sent)
    Response {
        /// The synthesized response
        response: Response,
    },
    /// Something went wrong outside a handler's own error result
    Error {
        /// Error detail
        error: ErrorObject,
    },
    /// The server stopped and released its socket
    Closed,
}

/// Names of the known lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Matches [`ServerEvent::Listening`]
    Listening,
    /// Matches [`ServerEvent::Request`]
    Request,
    /// Matches [`ServerEvent::Response`]
    Response,
    /// Matches [`ServerEvent::Error`]
    Error,
    /// Matches [`ServerEvent::Closed`]
    Closed,
}

type EventCallback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Typed listener table: one slot per known event, no dynamic names
#[derive(Default)]
struct EventListeners {
    listening: RwLock<Vec<EventCallback>>,
    request: RwLock<Vec<EventCallback>>,
    response: RwLock<Vec<EventCallback>>,
    error: RwLock<Vec<EventCallback>>,
    closed: RwLock<Vec<EventCallback>>,
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("listening", &self.listening.read().len())
            .field("request", &self.request.read().len())
            .field("response", &self.response.read().len())
            .field("error", &self.error.read().len())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}

impl EventListeners {
    fn slot(&self, kind: EventKind) -> &RwLock<Vec<EventCallback>> {
        match kind {
            EventKind::Listening => &self.listening,
            EventKind::Request => &self.request,
            EventKind::Response => &self.response,
            EventKind::Error => &self.error,
            EventKind::Closed => &self.closed,
        }
    }

    fn add(&self, kind: EventKind, callback: EventCallback) {
        self.slot(kind).write().push(callback);
    }

    /// Invoke every listener registered for this event, synchronously
    fn emit(&self, event: &ServerEvent) {
        let kind = match event {
            ServerEvent::Listening { .. } => EventKind::Listening,
            ServerEvent::Request { .. } => EventKind::Request,
            ServerEvent::Response { .. } => EventKind::Response,
            ServerEvent::Error { .. } => EventKind::Error,
            ServerEvent::Closed => EventKind::Closed,
        };
        let callbacks = self.slot(kind).read().clone();
        for callback in callbacks {
            callback(event);
        }
    }
}

/// Per-channel activity record
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    /// Seconds since the epoch of the most recent request
    pub last_seen: f64,
    /// Requests received on this channel since the server started
    pub request_count: u64,
}

/// Everything the receive loop and workers share
#[derive(Debug)]
struct ServerShared {
    config: ServerConfig,
    validator: SecurityValidator,
    manifest: Option<Manifest>,
    handlers: RwLock<HashMap<String, TypedHandler>>,
    listeners: EventListeners,
    clients: RwLock<HashMap<String, ClientRecord>>,
    timeouts: TimeoutManager,
    worker_permits: Arc<Semaphore>,
}

/// Datagram IPC server hosting one well-known socket
#[derive(Debug)]
pub struct Server {
    shared: Arc<ServerShared>,
    socket_path: PathBuf,
    shutdown_tx: Option<watch::Sender<bool>>,
    receive_task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server, validating the socket path
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_manifest(config, None)
    }

    /// Create a server that validates incoming arguments against a manifest
    pub fn with_manifest(config: ServerConfig, manifest: Option<Manifest>) -> Result<Self> {
        let validator = SecurityValidator::new(config.security.clone());
        let socket_path = validator.validate_socket_path(&config.socket_path)?;
        let worker_permits = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            shared: Arc::new(ServerShared {
                config,
                validator,
                manifest,
                handlers: RwLock::new(HashMap::new()),
                listeners: EventListeners::default(),
                clients: RwLock::new(HashMap::new()),
                timeouts: TimeoutManager::new(),
                worker_permits,
            }),
            socket_path,
            shutdown_tx: None,
            receive_task: None,
        })
    }

    /// Register a handler for a request name
    ///
    /// Registering the same name again replaces the previous handler; the
    /// registry is expected to be filled at configuration time, before
    /// `start`.
    ///
    /// ## Parameters
    /// - `request_name`: operation name, identifier rules apply
    /// - `handler`: typed handler deciding the result's JSON shape
    ///
    /// ## Returns
    /// - `Ok(())`: the handler is registered
    /// - `Err(SecurityViolation)`: the name violates identifier rules
    pub fn register_handler(&self, request_name: &str, handler: TypedHandler) -> Result<()> {
        self.shared
            .validator
            .validate_identifier(request_name, "request name")?;
        let previous = self
            .shared
            .handlers
            .write()
            .insert(request_name.to_string(), handler);
        if previous.is_some() {
            warn!("Replaced existing handler for request '{}'", request_name);
        }
        Ok(())
    }

    /// Register a listener for one lifecycle event
    pub fn on(&self, kind: EventKind, callback: impl Fn(&ServerEvent) + Send + Sync + 'static) {
        self.shared.listeners.add(kind, Arc::new(callback));
    }

    /// Names with a registered handler, for introspection and tests
    pub fn handler_names(&self) -> Vec<String> {
        self.shared.handlers.read().keys().cloned().collect()
    }

    /// Snapshot of per-channel activity records
    pub fn client_stats(&self) -> HashMap<String, ClientRecord> {
        self.shared.clients.read().clone()
    }

    /// The timeout manager supervising this server's handlers
    pub fn timeout_manager(&self) -> &TimeoutManager {
        &self.shared.timeouts
    }

    /// Bind the socket and start the receive loop
    ///
    /// Emits `Listening` once the loop is running. Idempotent start is not
    /// supported: a second `start` on a running server is an error.
    ///
    /// ## Resource Management
    ///
    /// Binding unlinks a stale socket file first when `cleanup_on_start`
    /// is set, and the receive buffer is sized to the probed per-datagram
    /// limit so no datagram the kernel delivers can be truncated.
    pub async fn start(&mut self) -> Result<()> {
        if self.receive_task.is_some() {
            return Err(IpcError::InternalError(
                "server is already running".to_string(),
            ));
        }

        if self.shared.config.cleanup_on_start {
            datagram::cleanup_socket_file(&self.socket_path);
        }

        let socket = datagram::bind_datagram(&self.socket_path)?;
        let recv_buffer = datagram::probe_max_datagram_size().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            run_receive_loop(shared, socket, recv_buffer, shutdown_rx).await;
        });
        self.receive_task = Some(task);

        info!("Server listening on {:?}", self.socket_path);
        self.shared.listeners.emit(&ServerEvent::Listening {
            socket_path: self.socket_path.to_string_lossy().into_owned(),
        });
        Ok(())
    }

    /// Stop the receive loop and release the socket
    ///
    /// In-flight handlers get up to the configured grace period to finish;
    /// the socket file is unlinked when `cleanup_on_shutdown` is set, and
    /// `Closed` is emitted last. Stopping a stopped server is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return Ok(());
        };
        let _ = shutdown_tx.send(true);

        if let Some(task) = self.receive_task.take() {
            if let Err(e) = task.await {
                warn!("Receive loop ended abnormally: {e}");
            }
        }

        // All permits free means all workers done.
        let max = self.shared.config.max_connections as u32;
        let grace = self.shared.config.shutdown_grace;
        match tokio::time::timeout(grace, self.shared.worker_permits.acquire_many(max)).await {
            Ok(Ok(permits)) => drop(permits),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                "Shutdown grace of {:?} elapsed with handlers still running",
                grace
            ),
        }

        if self.shared.config.cleanup_on_shutdown {
            datagram::cleanup_socket_file(&self.socket_path);
        }

        info!("Server on {:?} stopped", self.socket_path);
        self.shared.listeners.emit(&ServerEvent::Closed);
        Ok(())
    }

    /// Whether the receive loop is currently running
    pub fn is_running(&self) -> bool {
        self.receive_task.is_some()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Best-effort: stop() is the clean path, but a dropped server must
        // not leave its receive loop running or its socket file behind.
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(task) = self.receive_task.take() {
            task.abort();
        }
        if self.shared.config.cleanup_on_shutdown {
            datagram::cleanup_socket_file(&self.socket_path);
        }
    }
}

/// Single-reader receive loop
///
/// The only task that reads the server socket. Each accepted datagram is
/// handed to a worker task; the loop itself never awaits a handler.
async fn run_receive_loop(
    shared: Arc<ServerShared>,
    socket: UnixDatagram,
    recv_buffer: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; recv_buffer];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("Receive loop shutting down");
                return;
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, _peer)) => {
                        let bytes = buf[..len].to_vec();
                        accept_datagram(&shared, bytes).await;
                    }
                    Err(e) => {
                        error!("Server socket receive failed: {e}");
                        shared.listeners.emit(&ServerEvent::Error {
                            error: ErrorObject::new(
                                crate::error::INTERNAL_ERROR,
                                "server socket receive failed",
                            ),
                        });
                        return;
                    }
                }
            }
        }
    }
}

/// Validate, parse, and dispatch one datagram
async fn accept_datagram(shared: &Arc<ServerShared>, bytes: Vec<u8>) {
    if let Err(e) = shared.validator.validate_message_bytes(&bytes) {
        // Not even a JSON object: there is no trustworthy reply_to to
        // answer on, so drop and surface through the error event.
        warn!("Rejected datagram: {e}");
        shared.listeners.emit(&ServerEvent::Error {
            error: e.to_error_object(),
        });
        return;
    }

    let request = match Request::from_bytes(&bytes) {
        Ok(request) => request,
        Err(e) => {
            // A JSON object that is not a valid Request (missing or
            // mistyped required fields). If it still names a reply
            // socket, answer with the InvalidRequest error.
            shared.listeners.emit(&ServerEvent::Error {
                error: e.to_error_object(),
            });
            if let Some((reply_to, request_id, channel_id)) = salvage_reply_fields(&bytes) {
                let response =
                    Response::error(request_id, channel_id, e.to_error_object());
                send_response(shared, &reply_to, response).await;
            }
            return;
        }
    };

    shared.listeners.emit(&ServerEvent::Request {
        request: request.clone(),
    });
    touch_client_record(shared, &request.channel_id);

    let handler = shared.handlers.read().get(&request.request).cloned();
    let Some(handler) = handler else {
        debug!("No handler for request '{}'", request.request);
        respond_with_error(
            shared,
            &request,
            IpcError::MethodNotFound(request.request.clone()).to_error_object(),
        )
        .await;
        return;
    };

    // Backpressure: past the worker cap, reject instead of queueing.
    let permit = match Arc::clone(&shared.worker_permits).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!(
                "Handler pool saturated; rejecting request '{}'",
                request.request
            );
            respond_with_error(
                shared,
                &request,
                ErrorObject::with_data(
                    crate::error::INTERNAL_ERROR,
                    "server busy",
                    serde_json::json!({"reason": "busy"}),
                ),
            )
            .await;
            return;
        }
    };

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let _permit = permit;
        run_handler_worker(shared, handler, request).await;
    });
}

/// Execute one handler under timeout and panic supervision
async fn run_handler_worker(shared: Arc<ServerShared>, handler: TypedHandler, request: Request) {
    // Manifest validation happens on the worker so a slow validation of
    // one request cannot stall the receive loop.
    let mut effective = request.clone();
    if let Some(ref manifest) = shared.manifest {
        let mut args = effective.args.take().unwrap_or_default();
        manifest.apply_defaults(&effective.channel_id, &effective.request, &mut args);
        if let Err(e) = manifest.validate_args(&effective.channel_id, &effective.request, &args) {
            respond_with_error(&shared, &request, e.to_error_object()).await;
            return;
        }
        effective.args = Some(args);
    }

    // Request-supplied timeouts are honored only when sane: finite,
    // positive, and within the server cap.
    let timeout = effective
        .timeout
        .filter(|t| t.is_finite() && *t > 0.0)
        .map(Duration::from_secs_f64)
        .filter(|t| *t <= shared.config.max_handler_timeout)
        .unwrap_or(shared.config.default_timeout);

    // The watchdog goes through the timeout manager so handler deadlines
    // show up in its statistics like every other supervised wait.
    let (expired_tx, expired_rx) = oneshot::channel();
    let watchdog_key = format!("handler-{}", effective.id);
    let registered = shared.timeouts.register(watchdog_key.clone(), timeout, move || {
        let _ = expired_tx.send(());
    });
    if let Err(e) = registered {
        respond_with_error(&shared, &request, e.to_error_object()).await;
        return;
    }

    let handler_task = tokio::spawn(async move { handler.invoke(effective).await });

    let result = supervise_handler(handler_task, expired_rx, timeout).await;
    shared.timeouts.cancel(&watchdog_key);

    let response = match result {
        Ok(HandlerResult {
            value: Some(value), ..
        }) => {
            // The manifest's declared response shape binds the handler,
            // not the caller; a mismatch is the server's own fault.
            let declared_ok = match shared.manifest {
                Some(ref manifest) => manifest
                    .validate_response(&request.channel_id, &request.request, &value)
                    .is_ok(),
                None => true,
            };
            if declared_ok {
                Response::success(&request.id, &request.channel_id, value)
            } else {
                warn!(
                    "Handler for '{}' produced a result outside its declared response type",
                    request.request
                );
                Response::error(
                    &request.id,
                    &request.channel_id,
                    ErrorObject::new(
                        crate::error::INTERNAL_ERROR,
                        "handler result does not match the declared response type",
                    ),
                )
            }
        }
        Ok(HandlerResult {
            error: Some(error), ..
        }) => Response::error(&request.id, &request.channel_id, error),
        Ok(_) => Response::error(
            &request.id,
            &request.channel_id,
            ErrorObject::new(
                crate::error::INTERNAL_ERROR,
                "handler produced neither value nor error",
            ),
        ),
        Err(e) => Response::error(&request.id, &request.channel_id, e.to_error_object()),
    };

    shared.listeners.emit(&ServerEvent::Response {
        response: response.clone(),
    });

    match request.reply_to {
        Some(ref reply_to) => send_response(&shared, reply_to, response).await,
        // Fire-and-forget: the response is dropped silently.
        None => debug!(
            "Dropping response for fire-and-forget request '{}'",
            request.id
        ),
    }
}

/// Wait for the handler, its deadline, or its panic — whichever is first
async fn supervise_handler(
    mut handler_task: JoinHandle<HandlerResult>,
    expired_rx: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<HandlerResult> {
    tokio::select! {
        joined = &mut handler_task => {
            match joined {
                Ok(result) => Ok(result),
                Err(e) if e.is_panic() => {
                    Err(IpcError::InternalError("handler panicked".to_string()))
                }
                Err(_) => Err(IpcError::InternalError(
                    "handler task was cancelled".to_string(),
                )),
            }
        }
        _ = expired_rx => {
            handler_task.abort();
            Err(IpcError::HandlerTimeout {
                timeout_secs: timeout.as_secs_f64(),
            })
        }
    }
}

/// Synthesize and send an error response, honoring fire-and-forget
async fn respond_with_error(shared: &Arc<ServerShared>, request: &Request, error: ErrorObject) {
    let response = Response::error(&request.id, &request.channel_id, error);
    shared.listeners.emit(&ServerEvent::Response {
        response: response.clone(),
    });
    if let Some(ref reply_to) = request.reply_to {
        send_response(shared, reply_to, response).await;
    }
}

/// Send a response datagram to a reply socket path
async fn send_response(shared: &Arc<ServerShared>, reply_to: &str, response: Response) {
    let reply_path = match shared.validator.validate_socket_path(reply_to) {
        Ok(path) => path,
        Err(e) => {
            warn!("Refusing to reply to invalid reply_to path: {e}");
            shared.listeners.emit(&ServerEvent::Error {
                error: e.to_error_object(),
            });
            return;
        }
    };

    let bytes = match response.to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to encode response: {e}");
            return;
        }
    };

    let send = async {
        let socket = UnixDatagram::unbound()?;
        datagram::send_to(&socket, &reply_path, &bytes).await
    };
    if let Err(e) = send.await {
        // The reply socket may already be gone if the caller timed out.
        debug!("Failed to deliver response to {:?}: {e}", reply_path);
        shared.listeners.emit(&ServerEvent::Error {
            error: ErrorObject::new(
                crate::error::INTERNAL_ERROR,
                "failed to deliver response datagram",
            ),
        });
    }
}

/// Record per-channel activity
fn touch_client_record(shared: &Arc<ServerShared>, channel_id: &str) {
    let mut clients = shared.clients.write();
    let record = clients.entry(channel_id.to_string()).or_insert(ClientRecord {
        last_seen: 0.0,
        request_count: 0,
    });
    record.last_seen = current_timestamp_secs();
    record.request_count += 1;
}

/// Pull reply fields out of a JSON object that failed Request parsing
fn salvage_reply_fields(bytes: &[u8]) -> Option<(String, String, String)> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let reply_to = value.get("reply_to")?.as_str()?.to_string();
    let request_id = value
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let channel_id = value
        .get("channel_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((reply_to, request_id, channel_id))
}
