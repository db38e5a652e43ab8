//! Per-channel rename convergence under a rate cap.
//!
//! Chat services throttle channel renames hard. [`RenameLimiter`] keeps the
//! most recently requested name per channel and runs at most one background
//! task per channel that converges the live name towards it:
//!
//! 1. wait a short debounce so bursts of requests collapse into one call,
//! 2. read the live name and stop once it matches,
//! 3. otherwise wait out the minimum interval since the previous call,
//!    rename, and check again.
//!
//! A new request cancels the pending task's waits and starts a fresh task.
//! A rename call that is already in flight is never abandoned; the per-channel
//! flight lock keeps the replacement task from issuing its own call until the
//! previous one has returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RenameConfig;
use crate::platform::ChatPlatform;
use crate::AppError;

/// Limiter timings as durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameTimings {
    /// Minimum spacing between two rename calls on one channel.
    pub min_interval: Duration,
    /// Idle period after which the short debounce applies again.
    pub max_delay: Duration,
    /// Debounce after an idle period.
    pub short_debounce: Duration,
    /// Debounce while renames are frequent.
    pub long_debounce: Duration,
    /// Pause after a failed call when the platform gives no hint.
    pub failure_backoff: Duration,
}

impl From<&RenameConfig> for RenameTimings {
    fn from(config: &RenameConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            short_debounce: Duration::from_millis(config.short_debounce_ms),
            long_debounce: Duration::from_millis(config.long_debounce_ms),
            failure_backoff: Duration::from_millis(config.failure_backoff_ms),
        }
    }
}

impl Default for RenameTimings {
    fn default() -> Self {
        Self::from(&RenameConfig::default())
    }
}

struct Entry {
    desired: String,
    last_applied: Option<Instant>,
    last_call: Option<Instant>,
    generation: u64,
    cancel: CancellationToken,
    flight: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    platform: Arc<dyn ChatPlatform>,
    timings: RenameTimings,
    entries: Mutex<HashMap<String, Entry>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

/// Coalesces rename requests per channel.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct RenameLimiter {
    inner: Arc<Inner>,
}

impl RenameLimiter {
    /// Create a limiter issuing calls through `platform`.
    #[must_use]
    pub fn new(platform: Arc<dyn ChatPlatform>, timings: RenameTimings) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                timings,
                entries: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Timings this limiter runs with.
    #[must_use]
    pub fn timings(&self) -> RenameTimings {
        self.inner.timings
    }

    /// Ask for `channel_id` to eventually be named `desired`.
    ///
    /// Returns immediately. Any pending task for the channel is cancelled
    /// and replaced.
    pub fn request_rename(&self, channel_id: &str, desired: &str) {
        if self.inner.root.is_cancelled() {
            debug!(channel = channel_id, "rename limiter shut down, ignoring request");
            return;
        }

        let (generation, cancel) = {
            let mut entries = self.inner.entries();
            let entry = entries
                .entry(channel_id.to_owned())
                .or_insert_with(|| Entry {
                    desired: String::new(),
                    last_applied: None,
                    last_call: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                    flight: Arc::new(tokio::sync::Mutex::new(())),
                });
            entry.cancel.cancel();
            entry.desired = desired.to_owned();
            entry.generation += 1;
            entry.cancel = self.inner.root.child_token();
            (entry.generation, entry.cancel.clone())
        };

        debug!(channel = channel_id, desired, generation, "rename requested");
        let inner = Arc::clone(&self.inner);
        let channel = channel_id.to_owned();
        self.inner.tracker.spawn(
            converge(inner, channel, generation, cancel)
                .instrument(info_span!("rename", channel = channel_id, generation)),
        );
    }

    /// Latest name requested for a channel.
    #[must_use]
    pub fn desired_name(&self, channel_id: &str) -> Option<String> {
        self.inner
            .entries()
            .get(channel_id)
            .map(|entry| entry.desired.clone())
    }

    /// Drop a channel's entry, cancelling its pending waits.
    pub fn forget(&self, channel_id: &str) {
        if let Some(entry) = self.inner.entries().remove(channel_id) {
            entry.cancel.cancel();
            debug!(channel = channel_id, "rename entry dropped");
        }
    }

    /// Cancel every pending task and wait until in-flight calls return.
    pub async fn shutdown(&self) {
        self.inner.root.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("rename limiter stopped");
    }
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Desired name and flight lock, if `generation` still owns the entry.
    fn current(
        &self,
        channel_id: &str,
        generation: u64,
    ) -> Option<(String, Arc<tokio::sync::Mutex<()>>)> {
        self.entries()
            .get(channel_id)
            .filter(|entry| entry.generation == generation)
            .map(|entry| (entry.desired.clone(), Arc::clone(&entry.flight)))
    }

    fn debounce(&self, channel_id: &str) -> Duration {
        let recent = self
            .entries()
            .get(channel_id)
            .and_then(|entry| entry.last_applied)
            .is_some_and(|at| at.elapsed() <= self.timings.max_delay);
        if recent {
            self.timings.long_debounce
        } else {
            self.timings.short_debounce
        }
    }

    fn interval_remaining(&self, channel_id: &str) -> Duration {
        self.entries()
            .get(channel_id)
            .and_then(|entry| entry.last_call.max(entry.last_applied))
            .map_or(Duration::ZERO, |at| {
                self.timings.min_interval.saturating_sub(at.elapsed())
            })
    }

    fn mark_call(&self, channel_id: &str) {
        if let Some(entry) = self.entries().get_mut(channel_id) {
            entry.last_call = Some(Instant::now());
        }
    }

    fn mark_applied(&self, channel_id: &str) {
        if let Some(entry) = self.entries().get_mut(channel_id) {
            entry.last_applied = Some(Instant::now());
        }
    }

    fn drop_if_owned(&self, channel_id: &str, generation: u64) {
        let mut entries = self.entries();
        if entries
            .get(channel_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(channel_id);
        }
    }
}

/// Sleep for `delay` unless cancelled first; `false` means cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

async fn converge(inner: Arc<Inner>, channel_id: String, generation: u64, cancel: CancellationToken) {
    if !pause(&cancel, inner.debounce(&channel_id)).await {
        debug!("superseded during debounce");
        return;
    }

    loop {
        let Some((_, flight)) = inner.current(&channel_id, generation) else {
            return;
        };
        let in_flight = tokio::select! {
            () = cancel.cancelled() => return,
            guard = flight.lock() => guard,
        };

        // Re-read after the lock: a previous task's call may have landed.
        let Some((desired, _)) = inner.current(&channel_id, generation) else {
            return;
        };
        let backoff = match inner.platform.channel_name(&channel_id).await {
            Ok(live) if live == desired => {
                inner.mark_applied(&channel_id);
                debug!(name = %desired, "channel name converged");
                return;
            }
            Ok(_) => {
                let wait = inner.interval_remaining(&channel_id);
                if !wait.is_zero() && !pause(&cancel, wait).await {
                    debug!("superseded while rate limited");
                    return;
                }

                inner.mark_call(&channel_id);
                match inner.platform.rename_channel(&channel_id, &desired).await {
                    Ok(()) => {
                        inner.mark_applied(&channel_id);
                        info!(name = %desired, "channel renamed");
                        continue;
                    }
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };

        let delay = match backoff {
            AppError::NotFound(_) => {
                debug!("channel gone, dropping rename entry");
                inner.drop_if_owned(&channel_id, generation);
                return;
            }
            AppError::RateLimited(hint) => {
                let delay = hint.unwrap_or(inner.timings.failure_backoff);
                warn!(retry_after_ms = delay.as_millis(), "rename rate limited");
                delay
            }
            err => {
                warn!(%err, "rename attempt failed");
                inner.timings.failure_backoff
            }
        };
        drop(in_flight);
        if !pause(&cancel, delay).await {
            return;
        }
    }
}
