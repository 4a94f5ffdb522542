//! # Client Core Module
//!
//! The request-sending half of the IPC layer. A client is pinned to one
//! server socket and one channel; it validates outgoing requests, opens a
//! short-lived reply socket per tracked request, correlates responses to
//! waiters strictly by request id, and supervises every wait with the
//! process-wide timeout manager.
//!
//! ## Correlation Model
//!
//! ```
//! send_request ──▶ reply socket + correlation entry + bilateral timeout
//!                        │
//!        ┌───────────────┼──────────────────┐
//!        ▼               ▼                  ▼
//!    response        cancel_request     timeout fires
//!    matched by id   signals waiter     signals waiter
//!        └───────────────┴──────────────────┘
//!                        │
//!              entry removed exactly once,
//!              reply socket unlinked on return
//! ```
//!
//! At any moment `pending_count()` equals the size of the correlation
//! table, and only the originating waiter removes its own entry on the
//! response path; cancel and timeout remove it on theirs, whichever comes
//! first.
//!
//! ## Validation Policy
//!
//! With a manifest configured, argument sets are validated before send.
//! Without one (dynamic-manifest mode), send-path validation is limited to
//! identifier and security checks and argument-shape validation is
//! deferred to the server. This asymmetry is deliberate and observable.

use crate::error::{IpcError, Result};
use crate::manifest::Manifest;
use crate::message::{Request, Response};
use crate::security::{SecurityLimits, SecurityValidator};
use crate::timeout::TimeoutManager;
use crate::transport::{datagram, ReplySocket, TransportConfig};
use crate::utils::current_timestamp_secs;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Default wait for a tracked request, in the absence of per-call options
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the server's well-known datagram socket
    pub socket_path: String,

    /// Channel this client speaks on
    pub channel_id: String,

    /// Timeout applied to tracked requests without an explicit one
    pub default_timeout: Duration,

    /// Transport tuning (buffer sizes, reply socket naming)
    pub transport: TransportConfig,

    /// Security limits shared with the validator
    pub security: SecurityLimits,
}

impl ClientConfig {
    /// Configuration for a socket path and channel with default tuning
    pub fn new(socket_path: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            channel_id: channel_id.into(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: TransportConfig::default(),
            security: SecurityLimits::default(),
        }
    }
}

/// Per-call options for [`Client::send_request`]
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides the client's default timeout for this request
    pub timeout: Option<Duration>,
}

/// Observable status of a request, past or present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Correlation entry still present; the waiter has not finished
    Pending,
    /// The waiter received a response
    Completed,
    /// The request failed before or during the wait
    Failed,
    /// The request was cancelled
    Cancelled,
    /// The wait ended on its timeout
    TimedOut,
}

// Terminal states recorded on the handle's shared cell.
const STATE_PENDING: u8 = 0;
const STATE_COMPLETED: u8 = 1;
const STATE_FAILED: u8 = 2;
const STATE_CANCELLED: u8 = 3;
const STATE_TIMED_OUT: u8 = 4;

/// User-facing opaque record for one tracked request
///
/// The internal UUID is hidden from normal accessors; only
/// [`RequestHandle::internal_id`] exposes it, for callers that need to
/// correlate with logs or the wire.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    internal_id: String,
    request_name: String,
    channel_id: String,
    created_at: f64,
    cancelled: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl RequestHandle {
    fn new(internal_id: String, request_name: String, channel_id: String) -> Self {
        Self {
            internal_id,
            request_name,
            channel_id,
            created_at: current_timestamp_secs(),
            cancelled: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(STATE_PENDING)),
        }
    }

    /// Operation name this handle tracks
    pub fn request_name(&self) -> &str {
        &self.request_name
    }

    /// Channel the request was sent on
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Seconds since the epoch when the request was created
    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Whether this handle has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Explicit accessor for the internal request UUID
    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    fn record_terminal(&self, state: u8) {
        // First terminal state wins; cancel and timeout race the waiter.
        let _ = self.state.compare_exchange(
            STATE_PENDING,
            state,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Terminal signal delivered to a waiter by cancel or timeout
#[derive(Debug)]
enum RequestOutcome {
    Cancelled(String),
    TimedOut(f64),
}

/// One in-flight tracked request
#[derive(Debug)]
struct CorrelationEntry {
    handle: RequestHandle,
    timeout: Duration,
    terminator: Option<oneshot::Sender<RequestOutcome>>,
}

/// Counters and histogram over the correlation table
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequestStatistics {
    /// Requests currently awaiting completion
    pub pending_count: usize,
    /// Cumulative tracked requests registered
    pub total_registered: u64,
    /// Cumulative requests that completed with a response
    pub total_completed: u64,
    /// Cumulative cancellations
    pub total_cancelled: u64,
    /// Cumulative timeout expiries
    pub total_expired: u64,
    /// Mean timeout among active entries, in seconds
    pub average_timeout: f64,
    /// Longest timeout among active entries, in seconds
    pub longest_timeout: f64,
    /// Shortest timeout among active entries, in seconds
    pub shortest_timeout: f64,
}

#[derive(Debug)]
struct ClientShared {
    config: ClientConfig,
    server_path: PathBuf,
    validator: SecurityValidator,
    manifest: Option<Manifest>,
    timeouts: TimeoutManager,
    pending: Mutex<HashMap<String, CorrelationEntry>>,
    total_registered: AtomicU64,
    total_completed: AtomicU64,
    total_cancelled: AtomicU64,
    total_expired: AtomicU64,
    tracking_anomalies: AtomicU64,
}

/// Datagram IPC client pinned to one server socket and one channel
///
/// Cloning shares the correlation table, timeout manager, and statistics;
/// [`Client::create_channel_proxy`] builds on this to pin a clone to a
/// different channel over the same transport.
#[derive(Clone, Debug)]
pub struct Client {
    shared: Arc<ClientShared>,
    channel_id: String,
}

impl Client {
    /// Create a client, validating the socket path and channel id
    ///
    /// Construction fails with a `SecurityViolation` when the socket path
    /// is outside the allowed roots, traverses upward, or exceeds the
    /// kernel path limit; nothing touches the filesystem until the first
    /// send.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_manifest(config, None)
    }

    /// Create a client that validates argument sets against a manifest
    pub fn with_manifest(config: ClientConfig, manifest: Option<Manifest>) -> Result<Self> {
        let validator = SecurityValidator::new(config.security.clone());
        let server_path = validator.validate_socket_path(&config.socket_path)?;
        validator.validate_identifier(&config.channel_id, "channel id")?;

        let channel_id = config.channel_id.clone();
        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                server_path,
                validator,
                manifest,
                timeouts: TimeoutManager::new(),
                pending: Mutex::new(HashMap::new()),
                total_registered: AtomicU64::new(0),
                total_completed: AtomicU64::new(0),
                total_cancelled: AtomicU64::new(0),
                total_expired: AtomicU64::new(0),
                tracking_anomalies: AtomicU64::new(0),
            }),
            channel_id,
        })
    }

    /// Channel this client (or proxy) speaks on
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// The timeout manager supervising this client's requests
    pub fn timeout_manager(&self) -> &TimeoutManager {
        &self.shared.timeouts
    }

    /// Create a channel proxy: the same surface, pinned to `channel_id`
    ///
    /// The proxy shares this client's transport configuration, correlation
    /// table, timeout manager, and statistics; only the channel differs.
    pub fn create_channel_proxy(&self, channel_id: &str) -> Result<Client> {
        self.shared
            .validator
            .validate_identifier(channel_id, "channel id")?;
        Ok(Client {
            shared: Arc::clone(&self.shared),
            channel_id: channel_id.to_string(),
        })
    }

    /// Send a tracked request and wait for its response
    ///
    /// ## Steps
    ///
    /// 1. Validate identifiers (and arguments, when a manifest is present)
    /// 2. Open a per-request reply socket
    /// 3. Register a correlation entry and a bilateral timeout
    /// 4. Send the request datagram with `reply_to` set
    /// 5. Wait for a response matched by `request_id`, a cancellation, or
    ///    the timeout — whichever happens first
    /// 6. Remove the entry and release the reply socket on every path
    ///
    /// ## Parameters
    /// - `request_name`: operation to invoke, identifier rules apply
    /// - `args`: optional argument map carried in the datagram
    /// - `options`: per-call overrides; `None` uses the client defaults
    ///
    /// ## Returns
    /// - `Ok(Response)`: the server's response, success or error-shaped
    /// - `Err(RequestTimeout)`: no response within the effective timeout
    /// - `Err(Cancelled)`: another task cancelled this request
    /// - `Err(...)`: validation or transport failure before the wait
    ///
    /// ## Error Conditions
    ///
    /// A `Response` with `success == false` is still `Ok`: the exchange
    /// worked and the server reported a handler-level failure. `Err` means
    /// the exchange itself did not complete.
    pub async fn send_request(
        &self,
        request_name: &str,
        args: Option<Map<String, Value>>,
        options: Option<SendOptions>,
    ) -> Result<Response> {
        self.validate_outgoing(request_name, args.as_ref())?;

        let timeout = options
            .and_then(|o| o.timeout)
            .unwrap_or(self.shared.config.default_timeout);

        // Reply socket first: if this fails nothing needs cleanup.
        let reply = ReplySocket::create(&self.shared.config.transport, None)?;
        self.shared
            .validator
            .validate_socket_path(&reply.path_string())?;

        let request = Request::new(
            self.channel_id.clone(),
            request_name.to_string(),
            args,
            Some(timeout.as_secs_f64()),
        )
        .with_reply_to(reply.path_string());
        let request_id = request.id.clone();

        let handle = RequestHandle::new(
            request_id.clone(),
            request_name.to_string(),
            self.channel_id.clone(),
        );

        let (terminator, mut terminal_rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if pending.contains_key(&request_id) {
                return Err(IpcError::ResponseTrackingError(format!(
                    "duplicate correlation entry for request '{request_id}'"
                )));
            }
            pending.insert(
                request_id.clone(),
                CorrelationEntry {
                    handle: handle.clone(),
                    timeout,
                    terminator: Some(terminator),
                },
            );
        }
        self.shared.total_registered.fetch_add(1, Ordering::Relaxed);

        // Bilateral supervision: the first half to expire signals the
        // waiter once and cancels its sibling.
        let shared = Arc::clone(&self.shared);
        let timed_out_id = request_id.clone();
        let timeout_secs = timeout.as_secs_f64();
        if let Err(e) = self.shared.timeouts.register_bilateral(
            &request_id,
            timeout,
            timeout,
            move || {
                let entry = shared.pending.lock().remove(&timed_out_id);
                if let Some(mut entry) = entry {
                    shared.total_expired.fetch_add(1, Ordering::Relaxed);
                    entry.handle.record_terminal(STATE_TIMED_OUT);
                    if let Some(sender) = entry.terminator.take() {
                        let _ = sender.send(RequestOutcome::TimedOut(timeout_secs));
                    }
                }
            },
        ) {
            self.shared.pending.lock().remove(&request_id);
            return Err(e);
        }

        let send_result = self.send_bytes(&request).await;
        if let Err(e) = send_result {
            self.remove_entry_for_failure(&request_id);
            return Err(e);
        }

        debug!(
            "Sent request '{}' ({}) on channel '{}'",
            request_name, request_id, self.channel_id
        );

        let outcome = self.await_response(&request_id, &reply, &mut terminal_rx).await;

        match &outcome {
            Ok(_) => {
                // Response path: the originator removes its own entry.
                let removed = self.shared.pending.lock().remove(&request_id);
                if removed.is_some() {
                    self.shared.total_completed.fetch_add(1, Ordering::Relaxed);
                    handle.record_terminal(STATE_COMPLETED);
                }
                self.shared.timeouts.cancel_bilateral(&request_id);
            }
            Err(IpcError::Cancelled { .. }) | Err(IpcError::RequestTimeout { .. }) => {
                // Entry and timeouts were already cleared by whoever
                // signalled us; nothing further to release but the reply
                // socket, which drops below.
            }
            Err(_) => {
                self.remove_entry_for_failure(&request_id);
                handle.record_terminal(STATE_FAILED);
            }
        }

        outcome
    }

    /// Send a request without a reply socket and return immediately
    ///
    /// The server produces no response datagram for such a request.
    pub async fn send_request_no_response(
        &self,
        request_name: &str,
        args: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.validate_outgoing(request_name, args.as_ref())?;

        let request = Request::new(
            self.channel_id.clone(),
            request_name.to_string(),
            args,
            None,
        );
        self.send_bytes(&request).await?;
        debug!(
            "Published fire-and-forget request '{}' on channel '{}'",
            request_name, self.channel_id
        );
        Ok(())
    }

    /// Fire-and-forget send that reports the generated request id
    ///
    /// On any failure before the datagram leaves the process, the returned
    /// id is empty; the failure itself is logged rather than returned.
    pub async fn publish_request(
        &self,
        request_name: &str,
        args: Option<Map<String, Value>>,
    ) -> String {
        if let Err(e) = self.validate_outgoing(request_name, args.as_ref()) {
            warn!("publish_request validation failed: {e}");
            return String::new();
        }

        let request = Request::new(
            self.channel_id.clone(),
            request_name.to_string(),
            args,
            None,
        );
        let id = request.id.clone();
        match self.send_bytes(&request).await {
            Ok(()) => id,
            Err(e) => {
                warn!("publish_request send failed: {e}");
                String::new()
            }
        }
    }

    /// Convenience liveness check against the conventional `ping` handler
    pub async fn ping(&self) -> Result<Response> {
        self.send_request("ping", None, None).await
    }

    /// Cancel one pending request
    ///
    /// Removes the correlation entry, cancels its timeouts, flags the
    /// handle, and signals the waiter with `Cancelled`. Returns `false`
    /// when the request is no longer pending; cancellation is idempotent.
    pub fn cancel_request(&self, handle: &RequestHandle, reason: &str) -> bool {
        let entry = self.shared.pending.lock().remove(handle.internal_id());
        match entry {
            Some(mut entry) => {
                self.shared.total_cancelled.fetch_add(1, Ordering::Relaxed);
                self.shared.timeouts.cancel_bilateral(handle.internal_id());
                entry.handle.cancelled.store(true, Ordering::SeqCst);
                entry.handle.record_terminal(STATE_CANCELLED);
                if let Some(sender) = entry.terminator.take() {
                    let _ = sender.send(RequestOutcome::Cancelled(reason.to_string()));
                }
                debug!(
                    "Cancelled request '{}' ({}): {}",
                    entry.handle.request_name(),
                    handle.internal_id(),
                    reason
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request, returning how many were cancelled
    pub fn cancel_all_requests(&self, reason: &str) -> usize {
        let drained: Vec<CorrelationEntry> = {
            let mut pending = self.shared.pending.lock();
            pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for mut entry in drained {
            self.shared.total_cancelled.fetch_add(1, Ordering::Relaxed);
            self.shared
                .timeouts
                .cancel_bilateral(entry.handle.internal_id());
            entry.handle.cancelled.store(true, Ordering::SeqCst);
            entry.handle.record_terminal(STATE_CANCELLED);
            if let Some(sender) = entry.terminator.take() {
                let _ = sender.send(RequestOutcome::Cancelled(reason.to_string()));
            }
        }
        if count > 0 {
            debug!("Cancelled {} pending requests: {}", count, reason);
        }
        count
    }

    /// Number of requests currently awaiting completion
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Internal ids of every pending request
    pub fn pending_ids(&self) -> Vec<String> {
        self.shared.pending.lock().keys().cloned().collect()
    }

    /// Handles of every pending request
    pub fn pending_handles(&self) -> Vec<RequestHandle> {
        self.shared
            .pending
            .lock()
            .values()
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Whether the given internal id is still pending
    pub fn is_pending(&self, id: &str) -> bool {
        self.shared.pending.lock().contains_key(id)
    }

    /// Status of a request by handle inspection
    pub fn request_status(&self, handle: &RequestHandle) -> RequestStatus {
        if self.is_pending(handle.internal_id()) {
            return RequestStatus::Pending;
        }
        if handle.is_cancelled() {
            return RequestStatus::Cancelled;
        }
        match handle.state.load(Ordering::SeqCst) {
            STATE_FAILED => RequestStatus::Failed,
            STATE_TIMED_OUT => RequestStatus::TimedOut,
            STATE_CANCELLED => RequestStatus::Cancelled,
            _ => RequestStatus::Completed,
        }
    }

    /// Counters plus the timeout histogram over active entries
    pub fn statistics(&self) -> PendingRequestStatistics {
        let (pending_count, average, longest, shortest) = {
            let pending = self.shared.pending.lock();
            let count = pending.len();
            if count == 0 {
                (0, 0.0, 0.0, 0.0)
            } else {
                let timeouts: Vec<f64> = pending
                    .values()
                    .map(|e| e.timeout.as_secs_f64())
                    .collect();
                let sum: f64 = timeouts.iter().sum();
                let longest = timeouts.iter().cloned().fold(f64::MIN, f64::max);
                let shortest = timeouts.iter().cloned().fold(f64::MAX, f64::min);
                (count, sum / count as f64, longest, shortest)
            }
        };

        PendingRequestStatistics {
            pending_count,
            total_registered: self.shared.total_registered.load(Ordering::Relaxed),
            total_completed: self.shared.total_completed.load(Ordering::Relaxed),
            total_cancelled: self.shared.total_cancelled.load(Ordering::Relaxed),
            total_expired: self.shared.total_expired.load(Ordering::Relaxed),
            average_timeout: average,
            longest_timeout: longest,
            shortest_timeout: shortest,
        }
    }

    /// Responses dropped because their id matched no correlation entry
    pub fn tracking_anomaly_count(&self) -> u64 {
        self.shared.tracking_anomalies.load(Ordering::Relaxed)
    }

    /// Fan out several requests concurrently
    ///
    /// Each input runs as its own tracked `send_request` with its own
    /// reply socket and correlation entry, released as that entry
    /// terminates.
    ///
    /// ## Parameters
    /// - `requests`: batch elements, each naming an operation with
    ///   optional arguments and timeout override
    ///
    /// ## Returns
    /// One result per input, in input order. One input's failure does not
    /// affect the others; a worker task fault is reported as that input's
    /// `InternalError`.
    pub async fn execute_in_parallel(
        &self,
        requests: Vec<ParallelRequest>,
    ) -> Vec<Result<Response>> {
        let mut join_handles = Vec::with_capacity(requests.len());
        for spec in requests {
            let client = self.clone();
            join_handles.push(tokio::spawn(async move {
                let options = spec.timeout.map(|timeout| SendOptions {
                    timeout: Some(timeout),
                });
                client
                    .send_request(&spec.request_name, spec.args, options)
                    .await
            }));
        }

        let mut results = Vec::with_capacity(join_handles.len());
        for join_handle in join_handles {
            match join_handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(Err(IpcError::InternalError(format!(
                    "parallel request task failed: {e}"
                )))),
            }
        }
        results
    }

    /// Identifier and (when a manifest is present) argument validation
    fn validate_outgoing(
        &self,
        request_name: &str,
        args: Option<&Map<String, Value>>,
    ) -> Result<()> {
        let validator = &self.shared.validator;
        validator.validate_identifier(&self.channel_id, "channel id")?;
        validator.validate_identifier(request_name, "request name")?;
        if let Some(args) = args {
            validator.validate_args(args)?;
        }

        if let Some(ref manifest) = self.shared.manifest {
            let empty = Map::new();
            manifest.validate_args(
                &self.channel_id,
                request_name,
                args.unwrap_or(&empty),
            )?;
        }

        Ok(())
    }

    /// Encode, size-check, and transmit one request datagram
    async fn send_bytes(&self, request: &Request) -> Result<()> {
        let bytes = request.to_bytes()?;
        let limit = self.shared.validator.max_message_size();
        if bytes.len() > limit {
            return Err(IpcError::PayloadTooLarge {
                size: bytes.len(),
                limit,
            });
        }

        let socket = UnixDatagram::unbound()?;
        datagram::send_to(&socket, &self.shared.server_path, &bytes).await
    }

    /// Wait for the matching response, a cancellation, or the timeout
    async fn await_response(
        &self,
        request_id: &str,
        reply: &ReplySocket,
        terminal_rx: &mut oneshot::Receiver<RequestOutcome>,
    ) -> Result<Response> {
        let buffer_size = self.shared.config.transport.recv_buffer_size;
        loop {
            tokio::select! {
                outcome = &mut *terminal_rx => {
                    return match outcome {
                        Ok(RequestOutcome::Cancelled(reason)) => {
                            Err(IpcError::Cancelled { reason })
                        }
                        Ok(RequestOutcome::TimedOut(timeout_secs)) => {
                            Err(IpcError::RequestTimeout { timeout_secs })
                        }
                        // Sender dropped without signalling; treat as an
                        // internal tracking fault.
                        Err(_) => Err(IpcError::ResponseTrackingError(
                            "correlation entry vanished without a signal".to_string(),
                        )),
                    };
                }
                received = reply.recv(buffer_size, None) => {
                    let bytes = received?;
                    self.shared.validator.validate_message_bytes(&bytes)?;
                    let response = Response::from_bytes(&bytes)?;
                    if response.request_id != request_id {
                        // Stray datagram on a single-owner reply socket:
                        // drop it and keep waiting for ours.
                        self.shared
                            .tracking_anomalies
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Dropping response for unknown request '{}' on reply socket for '{}'",
                            response.request_id, request_id
                        );
                        continue;
                    }
                    return Ok(response);
                }
            }
        }
    }

    /// Shared cleanup for failure paths that still own the entry
    fn remove_entry_for_failure(&self, request_id: &str) {
        self.shared.pending.lock().remove(request_id);
        self.shared.timeouts.cancel_bilateral(request_id);
    }
}

/// One element of an [`Client::execute_in_parallel`] batch
#[derive(Debug, Clone)]
pub struct ParallelRequest {
    /// Operation name
    pub request_name: String,
    /// Arguments, if any
    pub args: Option<Map<String, Value>>,
    /// Per-request timeout override
    pub timeout: Option<Duration>,
}

impl ParallelRequest {
    /// Batch element with default timeout and no arguments
    pub fn new(request_name: impl Into<String>) -> Self {
        Self {
            request_name: request_name.into(),
            args: None,
            timeout: None,
        }
    }

    /// Attach arguments
    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach a timeout override
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
