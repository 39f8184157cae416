//! Durable FIFO of captured orders awaiting intake.
//!
//! The whole queue is one versioned record in `local_settings`; every
//! mutation rewrites it. The in-memory copy is authoritative for the running
//! process, so a failed durable write never loses a capture: the queue is
//! marked dirty and the next mutation retries the write.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::db::{self, DbState, RecordLoad};
use crate::orders::{LocalId, NewOrder, PendingOrder};

const QUEUE_RECORD_KEY: &str = "pending_orders";
const QUEUE_RECORD_VERSION: u32 = 1;

#[derive(Default)]
struct QueueState {
    entries: Vec<PendingOrder>,
    dirty: bool,
}

pub struct PendingOrderQueue {
    db: Arc<DbState>,
    state: Mutex<QueueState>,
}

impl PendingOrderQueue {
    /// Load the queue from storage. A malformed or other-version record is
    /// discarded and the queue starts empty.
    pub fn open(db: Arc<DbState>) -> Self {
        let loaded = match db.lock() {
            Ok(conn) => db::read_record::<Vec<PendingOrder>>(
                &conn,
                QUEUE_RECORD_KEY,
                QUEUE_RECORD_VERSION,
            ),
            Err(e) => {
                error!("pending queue: database unavailable at open: {e}");
                RecordLoad::Missing
            }
        };

        let mut state = QueueState::default();
        match loaded {
            RecordLoad::Loaded(entries) => {
                if !entries.is_empty() {
                    info!(pending = entries.len(), "Restored pending order queue");
                }
                state.entries = entries;
            }
            RecordLoad::Missing => {}
            RecordLoad::Reset(reason) => {
                warn!(%reason, "Pending order queue record unreadable, resetting to empty");
                state.dirty = true;
            }
        }

        let queue = Self {
            db,
            state: Mutex::new(state),
        };
        let mut guard = queue.guard();
        if guard.dirty {
            queue.persist(&mut guard);
        }
        drop(guard);
        queue
    }

    fn guard(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock still holds a consistent Vec; keep serving it.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, state: &mut QueueState) {
        let result = self.db.lock().and_then(|conn| {
            db::write_record(&conn, QUEUE_RECORD_KEY, QUEUE_RECORD_VERSION, &state.entries)
        });
        match result {
            Ok(()) => state.dirty = false,
            Err(e) => {
                state.dirty = true;
                error!(pending = state.entries.len(), "pending queue: durable write failed: {e}");
            }
        }
    }

    /// Append a captured order. Never touches the network.
    pub fn enqueue(&self, order: NewOrder) -> LocalId {
        let entry = PendingOrder::from_capture(order, Utc::now());
        let local_id = entry.local_id;
        let mut state = self.guard();
        state.entries.push(entry);
        self.persist(&mut state);
        info!(local_id = %local_id, pending = state.entries.len(), "Order queued");
        local_id
    }

    /// Remove an acknowledged entry. Unknown ids are ignored.
    pub fn dequeue_ack(&self, local_id: LocalId) {
        let mut state = self.guard();
        let before = state.entries.len();
        state.entries.retain(|e| e.local_id != local_id);
        if state.entries.len() != before || state.dirty {
            self.persist(&mut state);
        }
    }

    /// Note a failed submission attempt against an entry.
    pub fn record_failure(&self, local_id: LocalId, error: &str) {
        let mut state = self.guard();
        let Some(entry) = state.entries.iter_mut().find(|e| e.local_id == local_id) else {
            return;
        };
        entry.attempts = entry.attempts.saturating_add(1);
        entry.last_error = Some(error.to_string());
        self.persist(&mut state);
    }

    /// Entries in submission order.
    pub fn snapshot(&self) -> Vec<PendingOrder> {
        self.guard().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.guard().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().entries.is_empty()
    }

    /// Most recent failure recorded against the head of the queue.
    pub fn head_error(&self) -> Option<String> {
        self.guard()
            .entries
            .first()
            .and_then(|e| e.last_error.clone())
    }
}
