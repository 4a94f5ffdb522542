//! # Timeout Manager Module
//!
//! A single process-wide manager for deadline supervision. Every tracked
//! request, handler execution, and bilateral request/response pair
//! registers a keyed timeout here; a dedicated fire-and-forget worker task
//! waits out each deadline and invokes the registered callback exactly once
//! unless the timeout is cancelled first.
//!
//! ## Scheduling Model
//!
//! One small tokio task per active registration. The worker sleeps until
//! the entry's deadline, then re-reads the deadline under the registry lock
//! before firing, which is what makes `extend` atomic with respect to
//! expiry: a fire must observe an `Active` entry whose deadline has truly
//! passed, and a successful extend moves the deadline before the worker can
//! observe it.
//!
//! ## State Machine
//!
//! ```
//!        register            deadline passes
//! (none) ────────▶ Active ───────────────────▶ Expired (callback fires)
//!                    │
//!                    │ cancel
//!                    ▼
//!                Cancelled (no callbacks)
//! ```
//!
//! Terminal entries are removed from the registry immediately, so the
//! registry only ever holds `Active` entries and `active_count` is simply
//! its size.

use crate::error::{IpcError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Suffix appended to the request half of a bilateral pair
pub const BILATERAL_REQUEST_SUFFIX: &str = "-request";

/// Suffix appended to the response half of a bilateral pair
pub const BILATERAL_RESPONSE_SUFFIX: &str = "-response";

/// Callback invoked when a timeout expires
pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked if a timeout callback panics
pub type TimeoutErrorCallback = Box<dyn FnOnce(IpcError) + Send + 'static>;

/// Lifecycle status of one registered timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// Waiting for its deadline
    Active,
    /// Deadline passed and the callback fired
    Expired,
    /// Cancelled before the deadline; callbacks were not invoked
    Cancelled,
}

/// Registry entry for one active timeout
///
/// The callback is owned by the worker task, not the entry; the entry only
/// carries what `cancel`/`extend`/`statistics` need under the lock.
#[derive(Debug)]
struct TimeoutEntry {
    deadline: Instant,
    duration: Duration,
    status: TimeoutStatus,
    wake: Arc<Notify>,
}

/// Point-in-time statistics over the manager
///
/// `total_completed` counts every entry that reached a terminal state,
/// whether it expired or was cancelled; the histogram fields describe the
/// configured durations of the currently active entries.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutStatistics {
    /// Number of currently active timeouts
    pub pending_count: usize,
    /// Cumulative registrations since the manager was created
    pub total_registered: u64,
    /// Cumulative entries that reached any terminal state
    pub total_completed: u64,
    /// Cumulative cancellations
    pub total_cancelled: u64,
    /// Cumulative expirations
    pub total_expired: u64,
    /// Mean configured duration among active entries, in seconds
    pub average_timeout: f64,
    /// Longest configured duration among active entries, in seconds
    pub longest_timeout: f64,
    /// Shortest configured duration among active entries, in seconds
    pub shortest_timeout: f64,
}

#[derive(Debug)]
struct ManagerInner {
    entries: Mutex<HashMap<String, TimeoutEntry>>,
    total_registered: AtomicU64,
    total_cancelled: AtomicU64,
    total_expired: AtomicU64,
}

/// Process-wide deadline supervisor
///
/// Cloning is cheap and shares the underlying registry; the client and
/// server hold clones of one manager so statistics cover the whole
/// process.
#[derive(Clone, Debug)]
pub struct TimeoutManager {
    inner: Arc<ManagerInner>,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                entries: Mutex::new(HashMap::new()),
                total_registered: AtomicU64::new(0),
                total_cancelled: AtomicU64::new(0),
                total_expired: AtomicU64::new(0),
            }),
        }
    }

    /// Register a timeout that invokes `callback` on expiry
    ///
    /// ## Parameters
    /// - `key`: unique name for later `cancel`/`extend` calls
    /// - `duration`: how long from now the deadline sits
    /// - `callback`: invoked exactly once if the deadline passes
    ///
    /// ## Returns
    /// - `Ok(())`: the timeout is active and its worker is running
    /// - `Err(ResponseTrackingError)`: `key` already names an active
    ///   timeout
    pub fn register(
        &self,
        key: impl Into<String>,
        duration: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        self.register_entry(key.into(), duration, Box::new(callback), None)
    }

    /// Register a timeout with a supervisor for the callback itself
    ///
    /// `error_callback` is invoked if `callback` panics while firing, so a
    /// faulty callback cannot silently disappear with the worker task.
    pub fn register_with_error_callback(
        &self,
        key: impl Into<String>,
        duration: Duration,
        callback: impl FnOnce() + Send + 'static,
        error_callback: impl FnOnce(IpcError) + Send + 'static,
    ) -> Result<()> {
        self.register_entry(
            key.into(),
            duration,
            Box::new(callback),
            Some(Box::new(error_callback)),
        )
    }

    /// Register a bilateral request/response timeout pair
    ///
    /// Two timeouts are registered under `base_key` + `"-request"` and
    /// `base_key` + `"-response"`. Whichever expires first cancels the
    /// other and invokes `callback` exactly once.
    pub fn register_bilateral(
        &self,
        base_key: &str,
        request_duration: Duration,
        response_duration: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let request_key = format!("{base_key}{BILATERAL_REQUEST_SUFFIX}");
        let response_key = format!("{base_key}{BILATERAL_RESPONSE_SUFFIX}");

        // Shared once-only slot: the first half to fire takes the callback
        // and cancels its sibling.
        let shared: Arc<Mutex<Option<TimeoutCallback>>> =
            Arc::new(Mutex::new(Some(Box::new(callback))));

        let manager = self.clone();
        let slot = Arc::clone(&shared);
        let sibling = response_key.clone();
        self.register(request_key.clone(), request_duration, move || {
            let taken = slot.lock().take();
            if let Some(cb) = taken {
                manager.cancel(&sibling);
                cb();
            }
        })?;

        let manager = self.clone();
        let slot = Arc::clone(&shared);
        let sibling = request_key.clone();
        let result = self.register(response_key, response_duration, move || {
            let taken = slot.lock().take();
            if let Some(cb) = taken {
                manager.cancel(&sibling);
                cb();
            }
        });

        if result.is_err() {
            // Roll back the half that did register so the pair is atomic.
            self.cancel(&request_key);
        }
        result
    }

    fn register_entry(
        &self,
        key: String,
        duration: Duration,
        callback: TimeoutCallback,
        error_callback: Option<TimeoutErrorCallback>,
    ) -> Result<()> {
        let wake = Arc::new(Notify::new());
        let deadline = Instant::now() + duration;

        {
            let mut entries = self.inner.entries.lock();
            if entries.contains_key(&key) {
                return Err(IpcError::ResponseTrackingError(format!(
                    "timeout key '{key}' is already active"
                )));
            }
            entries.insert(
                key.clone(),
                TimeoutEntry {
                    deadline,
                    duration,
                    status: TimeoutStatus::Active,
                    wake: Arc::clone(&wake),
                },
            );
        }
        self.inner.total_registered.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_timeout_worker(inner, key, wake, callback, error_callback).await;
        });

        Ok(())
    }

    /// Cancel an active timeout
    ///
    /// Returns `true` if the key named an active timeout, which is now
    /// cancelled; its callbacks will not be invoked. Cancellation of an
    /// unknown or already-terminal key is a no-op returning `false`, which
    /// makes cancellation idempotent.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = {
            let mut entries = self.inner.entries.lock();
            let active = matches!(
                entries.get(key),
                Some(entry) if entry.status == TimeoutStatus::Active
            );
            if active {
                entries.remove(key).map(|mut entry| {
                    entry.status = TimeoutStatus::Cancelled;
                    entry
                })
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                self.inner.total_cancelled.fetch_add(1, Ordering::Relaxed);
                entry.wake.notify_one();
                debug!("Cancelled timeout '{}'", key);
                true
            }
            None => false,
        }
    }

    /// Cancel both halves of a bilateral pair
    ///
    /// Returns how many of the two were still active (0, 1, or 2).
    pub fn cancel_bilateral(&self, base_key: &str) -> usize {
        let mut cancelled = 0;
        if self.cancel(&format!("{base_key}{BILATERAL_REQUEST_SUFFIX}")) {
            cancelled += 1;
        }
        if self.cancel(&format!("{base_key}{BILATERAL_RESPONSE_SUFFIX}")) {
            cancelled += 1;
        }
        cancelled
    }

    /// Move an active timeout's deadline by `delta` seconds
    ///
    /// Succeeds only while the entry is active; expired and cancelled
    /// timeouts cannot be extended. `delta` may be zero (a no-op that
    /// still returns `true`) or negative, which tightens the deadline; a
    /// deadline moved into the past is clamped to "now" and fires
    /// immediately rather than erroring.
    pub fn extend(&self, key: &str, delta_secs: f64) -> bool {
        let woke = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.status == TimeoutStatus::Active => {
                    let now = Instant::now();
                    let new_deadline = if delta_secs >= 0.0 {
                        entry.deadline + Duration::from_secs_f64(delta_secs)
                    } else {
                        let tightened =
                            entry.deadline.checked_sub(Duration::from_secs_f64(-delta_secs));
                        tightened.unwrap_or(now).max(now)
                    };
                    entry.deadline = new_deadline;
                    Some(Arc::clone(&entry.wake))
                }
                _ => None,
            }
        };

        match woke {
            Some(wake) => {
                // The worker may be sleeping toward the old, later deadline;
                // wake it so it re-reads the new one.
                wake.notify_one();
                true
            }
            None => false,
        }
    }

    /// Number of currently active timeouts
    pub fn active_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether `key` names an active timeout
    pub fn is_active(&self, key: &str) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    /// Snapshot of counters and the active-duration histogram
    pub fn statistics(&self) -> TimeoutStatistics {
        let (pending_count, average, longest, shortest) = {
            let entries = self.inner.entries.lock();
            let count = entries.len();
            if count == 0 {
                (0, 0.0, 0.0, 0.0)
            } else {
                let durations: Vec<f64> =
                    entries.values().map(|e| e.duration.as_secs_f64()).collect();
                let sum: f64 = durations.iter().sum();
                let longest = durations.iter().cloned().fold(f64::MIN, f64::max);
                let shortest = durations.iter().cloned().fold(f64::MAX, f64::min);
                (count, sum / count as f64, longest, shortest)
            }
        };

        let total_cancelled = self.inner.total_cancelled.load(Ordering::Relaxed);
        let total_expired = self.inner.total_expired.load(Ordering::Relaxed);

        TimeoutStatistics {
            pending_count,
            total_registered: self.inner.total_registered.load(Ordering::Relaxed),
            total_completed: total_cancelled + total_expired,
            total_cancelled,
            total_expired,
            average_timeout: average,
            longest_timeout: longest,
            shortest_timeout: shortest,
        }
    }
}

/// Worker loop for one registration
///
/// Sleeps toward the entry's deadline, re-reading it after every wake so
/// extends and cancels are observed. Fires at most once.
async fn run_timeout_worker(
    inner: Arc<ManagerInner>,
    key: String,
    wake: Arc<Notify>,
    callback: TimeoutCallback,
    error_callback: Option<TimeoutErrorCallback>,
) {
    loop {
        let deadline = match inner.entries.lock().get(&key) {
            Some(entry) => entry.deadline,
            // Cancelled (or never visible): exit without firing.
            None => return,
        };

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let should_fire = {
                    let mut entries = inner.entries.lock();
                    let current_deadline = match entries.get(&key) {
                        None => return,
                        Some(entry) => entry.deadline,
                    };
                    if current_deadline > Instant::now() {
                        // Extended while we slept; go around again.
                        false
                    } else {
                        if let Some(mut entry) = entries.remove(&key) {
                            entry.status = TimeoutStatus::Expired;
                        }
                        true
                    }
                };

                if should_fire {
                    inner.total_expired.fetch_add(1, Ordering::Relaxed);
                    debug!("Timeout '{}' expired", key);
                    let outcome = catch_unwind(AssertUnwindSafe(callback));
                    if outcome.is_err() {
                        warn!("Timeout callback for '{}' panicked", key);
                        if let Some(err_cb) = error_callback {
                            err_cb(IpcError::InternalError(format!(
                                "timeout callback for '{key}' panicked"
                            )));
                        }
                    }
                    return;
                }
            }
            _ = wake.notified() => {
                // Either cancelled (entry gone, next loop exits) or the
                // deadline moved (next loop re-reads it).
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&count);
        (count, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Test a timeout fires its callback once after the deadline
    #[tokio::test]
    async fn test_timeout_fires() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register("t1", Duration::from_millis(20), cb)
            .unwrap();
        assert_eq!(manager.active_count(), 1);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.statistics().total_expired, 1);
    }

    /// Test cancellation suppresses the callback and is idempotent
    #[tokio::test]
    async fn test_cancel_suppresses_callback() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register("t1", Duration::from_millis(40), cb)
            .unwrap();
        assert!(manager.cancel("t1"));
        assert!(!manager.cancel("t1"));
        assert!(!manager.cancel("never-registered"));

        sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(manager.statistics().total_cancelled, 1);
    }

    /// Test duplicate keys are refused while the first is active
    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let manager = TimeoutManager::new();
        manager
            .register("dup", Duration::from_secs(5), || {})
            .unwrap();
        let err = manager
            .register("dup", Duration::from_secs(5), || {})
            .unwrap_err();
        assert_eq!(err.code(), crate::error::RESPONSE_TRACKING_ERROR);
        manager.cancel("dup");
    }

    /// Test extend(0) is a successful no-op on an active timeout
    #[tokio::test]
    async fn test_extend_zero_is_noop() {
        let manager = TimeoutManager::new();
        manager
            .register("t1", Duration::from_millis(200), || {})
            .unwrap();

        assert!(manager.extend("t1", 0.0));
        assert!(manager.is_active("t1"));
        manager.cancel("t1");
    }

    /// Test a positive extend delays firing past the original deadline
    #[tokio::test]
    async fn test_extend_delays_firing() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register("t1", Duration::from_millis(50), cb)
            .unwrap();
        assert!(manager.extend("t1", 0.2));

        // Past the original deadline, before the extended one.
        sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(manager.is_active("t1"));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    /// Test a negative extend tightens and clamps to "now"
    #[tokio::test]
    async fn test_negative_extend_fires_promptly() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register("t1", Duration::from_secs(30), cb)
            .unwrap();
        // Far larger than the remaining time: clamps to now.
        assert!(manager.extend("t1", -120.0));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    /// Test expired timeouts cannot be extended
    #[tokio::test]
    async fn test_extend_after_expiry_fails() {
        let manager = TimeoutManager::new();
        manager
            .register("t1", Duration::from_millis(10), || {})
            .unwrap();
        sleep(Duration::from_millis(80)).await;
        assert!(!manager.extend("t1", 1.0));
    }

    /// Test bilateral registration fires the shared callback exactly once
    #[tokio::test]
    async fn test_bilateral_fires_once() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register_bilateral(
                "pair",
                Duration::from_millis(20),
                Duration::from_millis(500),
                cb,
            )
            .unwrap();
        assert_eq!(manager.active_count(), 2);

        sleep(Duration::from_millis(120)).await;
        // Request half expired, cancelled the response half, fired once.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    /// Test cancel_bilateral reports both halves and suppresses the callback
    #[tokio::test]
    async fn test_cancel_bilateral() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register_bilateral(
                "pair",
                Duration::from_millis(100),
                Duration::from_millis(100),
                cb,
            )
            .unwrap();

        assert_eq!(manager.cancel_bilateral("pair"), 2);
        assert_eq!(manager.active_count(), 0);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // A second cancel finds nothing.
        assert_eq!(manager.cancel_bilateral("pair"), 0);
    }

    /// Test statistics counters and the active-duration histogram
    #[tokio::test]
    async fn test_statistics() {
        let manager = TimeoutManager::new();
        manager
            .register("short", Duration::from_secs(1), || {})
            .unwrap();
        manager
            .register("long", Duration::from_secs(3), || {})
            .unwrap();

        let stats = manager.statistics();
        assert_eq!(stats.pending_count, 2);
        assert_eq!(stats.total_registered, 2);
        assert_eq!(stats.shortest_timeout, 1.0);
        assert_eq!(stats.longest_timeout, 3.0);
        assert!((stats.average_timeout - 2.0).abs() < 1e-9);

        manager.cancel("short");
        manager.cancel("long");
        let stats = manager.statistics();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.total_cancelled, 2);
        assert_eq!(stats.total_completed, 2);
    }

    /// Test the response half firing first also resolves the pair
    #[tokio::test]
    async fn test_bilateral_response_half_first() {
        let manager = TimeoutManager::new();
        let (fired, cb) = counter();

        manager
            .register_bilateral(
                "pair",
                Duration::from_millis(500),
                Duration::from_millis(20),
                cb,
            )
            .unwrap();

        sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_count(), 0);
    }

    /// Test cancel_bilateral counts only the halves still active
    #[tokio::test]
    async fn test_cancel_bilateral_partial() {
        let manager = TimeoutManager::new();
        manager
            .register_bilateral(
                "pair",
                Duration::from_secs(10),
                Duration::from_secs(10),
                || {},
            )
            .unwrap();

        // Take one half down directly, then sweep the pair.
        assert!(manager.cancel("pair-request"));
        assert_eq!(manager.cancel_bilateral("pair"), 1);
        assert_eq!(manager.active_count(), 0);
    }

    /// Test a cancelled key can be registered again
    #[tokio::test]
    async fn test_key_reusable_after_cancel() {
        let manager = TimeoutManager::new();
        manager
            .register("key", Duration::from_secs(10), || {})
            .unwrap();
        assert!(manager.cancel("key"));
        manager
            .register("key", Duration::from_secs(10), || {})
            .unwrap();
        assert!(manager.is_active("key"));
        manager.cancel("key");
    }

    /// Test extend on a cancelled timeout fails
    #[tokio::test]
    async fn test_extend_after_cancel_fails() {
        let manager = TimeoutManager::new();
        manager
            .register("key", Duration::from_secs(10), || {})
            .unwrap();
        manager.cancel("key");
        assert!(!manager.extend("key", 5.0));
    }

    /// Test the error callback runs when the main callback panics
    #[tokio::test]
    async fn test_error_callback_on_panic() {
        let manager = TimeoutManager::new();
        let (errored, err_tally) = counter();

        manager
            .register_with_error_callback(
                "boom",
                Duration::from_millis(10),
                || panic!("callback fault"),
                move |_err| err_tally(),
            )
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        assert_eq!(errored.load(Ordering::SeqCst), 1);
        // The manager itself survived the panic.
        assert_eq!(manager.active_count(), 0);
    }
}
