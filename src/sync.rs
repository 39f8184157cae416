//! Sync engine: drains the pending order queue against the intake endpoint.
//!
//! A drain takes a snapshot of the queue and submits entries strictly in
//! capture order. A success acknowledges the entry and moves on; the first
//! failure (rejection, transport error, timeout) ends the drain and leaves
//! that entry and everything behind it queued, so a later order can never
//! overtake an earlier one. After a pass that got through its whole
//! snapshot the drain keeps passing until two consecutive passes find
//! nothing to send, which picks up orders captured mid-drain.
//!
//! Triggers: a "became online" transition, startup while online with a
//! non-empty queue, a capture made while online, [`SyncEngine::force_sync`],
//! and a backoff timer armed by every failed drain so a rejected or timed-out
//! head entry is retried while the network stays up. Only one drain runs at a
//! time; a trigger that arrives during a drain schedules further passes
//! instead of starting a second drain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::ApiError;
use crate::orders::LocalId;
use crate::queue::PendingOrderQueue;
use crate::stream::reconnect_delay;

/// Consecutive passes with nothing to send before a drain goes idle.
const IDLE_PASSES_TO_STOP: u32 = 2;

/// The "unsynced" indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_draining: bool,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// What one drain did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub submitted: Vec<LocalId>,
    pub passes: u32,
    /// The entry the drain stopped on, and why.
    pub stopped_on: Option<(LocalId, ApiError)>,
}

#[derive(Debug, Default)]
struct RetryState {
    /// Consecutive failed drains.
    attempt: u32,
    due_at: Option<Instant>,
}

enum PassOutcome {
    Idle,
    Progress,
    Failed,
}

pub struct SyncEngine {
    queue: Arc<PendingOrderQueue>,
    api: Arc<dyn OrderApi>,
    connectivity: Arc<ConnectivityMonitor>,
    submit_timeout: Duration,
    drain_lock: tokio::sync::Mutex<()>,
    rerun_requested: AtomicBool,
    kick: Notify,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
    status_tx: watch::Sender<SyncStatus>,
    retry_min_delay: Duration,
    retry_max_delay: Duration,
    retry: Mutex<RetryState>,
    retry_changed: Notify,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<PendingOrderQueue>,
        api: Arc<dyn OrderApi>,
        connectivity: Arc<ConnectivityMonitor>,
        submit_timeout: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let engine = Self {
            queue,
            api,
            connectivity,
            submit_timeout,
            drain_lock: tokio::sync::Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            kick: Notify::new(),
            last_synced_at: Mutex::new(None),
            status_tx,
            retry_min_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            retry: Mutex::new(RetryState::default()),
            retry_changed: Notify::new(),
        };
        engine.publish_status(false);
        engine
    }

    /// Bounds of the retry delay after a failed drain.
    pub fn with_retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min_delay = min;
        self.retry_max_delay = max;
        self
    }

    fn retry_state(&self) -> std::sync::MutexGuard<'_, RetryState> {
        self.retry.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Arm the retry timer after a failure, disarm it after a clean drain.
    fn schedule_retry(&self, failed: bool) {
        {
            let mut retry = self.retry_state();
            if failed {
                retry.attempt = retry.attempt.saturating_add(1);
                let delay =
                    reconnect_delay(retry.attempt, self.retry_min_delay, self.retry_max_delay);
                retry.due_at = Some(Instant::now() + delay);
                debug!(
                    attempt = retry.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Queued sync retry scheduled"
                );
            } else {
                *retry = RetryState::default();
            }
        }
        self.retry_changed.notify_one();
    }

    fn retry_due_at(&self) -> Option<Instant> {
        self.retry_state().due_at
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    fn publish_status(&self, is_draining: bool) {
        let status = SyncStatus {
            is_online: self.connectivity.is_online(),
            is_draining,
            pending: self.queue.len(),
            last_error: self.queue.head_error(),
            last_synced_at: self.last_synced_at.lock().ok().and_then(|g| *g),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    /// Called by the capture path after an enqueue.
    pub fn notify_captured(&self) {
        self.publish_status(false);
        self.kick.notify_one();
    }

    /// Drain now regardless of the connectivity hint.
    pub async fn force_sync(&self) -> Option<DrainReport> {
        self.drain().await
    }

    /// Run one drain. Returns `None` when another drain is already running;
    /// that drain will make extra passes instead.
    pub async fn drain(&self) -> Option<DrainReport> {
        let mut report: Option<DrainReport> = None;
        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                self.rerun_requested.store(true, Ordering::SeqCst);
                if report.is_none() {
                    debug!("Drain already running; requested another pass");
                }
                return report;
            };
            let current = report.get_or_insert_with(DrainReport::default);
            self.drain_locked(current).await;
            drop(guard);

            // A request that arrived after the last idle check but before the
            // lock was released found nobody left to serve it.
            if current.stopped_on.is_some() || !self.rerun_requested.load(Ordering::SeqCst) {
                break;
            }
        }
        report
    }

    async fn drain_locked(&self, report: &mut DrainReport) {
        self.publish_status(true);
        let mut idle_passes = 0;

        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            report.passes += 1;
            match self.drain_pass(report).await {
                PassOutcome::Failed => break,
                PassOutcome::Progress => idle_passes = 0,
                PassOutcome::Idle => idle_passes += 1,
            }
            if idle_passes >= IDLE_PASSES_TO_STOP {
                if self.rerun_requested.swap(false, Ordering::SeqCst) {
                    idle_passes = 0;
                    continue;
                }
                break;
            }
        }

        if !report.submitted.is_empty() {
            info!(
                submitted = report.submitted.len(),
                pending = self.queue.len(),
                "Drain complete"
            );
        }
        self.schedule_retry(report.stopped_on.is_some());
        self.publish_status(false);
    }

    async fn drain_pass(&self, report: &mut DrainReport) -> PassOutcome {
        let entries = self.queue.snapshot();
        if entries.is_empty() {
            return PassOutcome::Idle;
        }

        for entry in entries {
            let submitted =
                match tokio::time::timeout(self.submit_timeout, self.api.submit_order(&entry))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(self.submit_timeout)),
                };

            match submitted {
                Ok(()) => {
                    self.queue.dequeue_ack(entry.local_id);
                    report.submitted.push(entry.local_id);
                    if let Ok(mut last) = self.last_synced_at.lock() {
                        *last = Some(Utc::now());
                    }
                    info!(local_id = %entry.local_id, table = %entry.table_label, "Order submitted");
                    self.publish_status(true);
                }
                Err(e) => {
                    warn!(
                        local_id = %entry.local_id,
                        attempts = entry.attempts + 1,
                        "Order submission failed, keeping remainder queued: {e}"
                    );
                    self.queue.record_failure(entry.local_id, &e.to_string());
                    report.stopped_on = Some((entry.local_id, e));
                    return PassOutcome::Failed;
                }
            }
        }
        PassOutcome::Progress
    }

    /// Event loop: drain on the triggers listed in the module docs until
    /// `shutdown` fires. An in-flight drain is finished, not cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut connectivity = self.connectivity.subscribe();
        info!("Sync engine started");

        if self.connectivity.is_online() && !self.queue.is_empty() {
            info!(pending = self.queue.len(), "Online at startup; draining queue");
            self.drain().await;
        }

        loop {
            let retry_due_at = self.retry_due_at();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = connectivity.recv() => match event {
                    Some(ConnectivityEvent::BecameOnline) => {
                        info!(pending = self.queue.len(), "Network restored; resuming queued sync");
                        self.drain().await;
                    }
                    Some(ConnectivityEvent::WentOffline) => {
                        info!("Network offline; keeping queue pending");
                        self.publish_status(false);
                    }
                    None => break,
                },
                _ = self.kick.notified() => {
                    if self.connectivity.is_online() {
                        self.drain().await;
                    }
                }
                _ = retry_timer(retry_due_at) => {
                    self.retry_state().due_at = None;
                    // Offline: the next "became online" edge drains instead.
                    if self.connectivity.is_online() {
                        info!(pending = self.queue.len(), "Retrying queued sync");
                        self.drain().await;
                    }
                }
                _ = self.retry_changed.notified() => {}
            }
        }
        info!("Sync engine stopped");
    }
}

async fn retry_timer(due_at: Option<Instant>) {
    match due_at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
