//! Test doubles for the network seams.
//!
//! [`FakeOrderApi`] stands in for the admin dashboard and
//! [`ScriptedPushSource`] for the order event stream. Both record what
//! they were asked to do so tests can assert on it afterwards.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::OrderApi;
use crate::error::{ApiError, StreamError};
use crate::orders::{
    ActiveSnapshot, ItemStatus, LocalId, OrderId, OrderLineProjection, OrderProjection,
    OrderStatus, PendingOrder,
};
use crate::stream::{OrderEvent, PushConnection, PushSource};

/// Scripted response for one `submit_order` call.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Accept,
    Reject(u16),
    /// Never answers; the caller's timeout must fire.
    Hang,
    /// Accept after a pause.
    Delay(Duration),
}

/// Order with one line per entry of `items`, created `id` seconds past a fixed instant.
pub fn sample_order(id: i64, status: OrderStatus, items: &[ItemStatus]) -> OrderProjection {
    let created_at = Utc
        .with_ymd_and_hms(2026, 2, 23, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + chrono::Duration::seconds(id);
    OrderProjection {
        order_id: OrderId::from(id),
        table_label: format!("T{id}"),
        items: items
            .iter()
            .enumerate()
            .map(|(i, s)| OrderLineProjection::new(format!("Dish {i}"), 1, *s))
            .collect(),
        overall_status: status,
        created_at,
    }
}

/// Poll `condition` every few milliseconds for up to two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Default)]
pub struct FakeOrderApi {
    submits: Mutex<VecDeque<SubmitOutcome>>,
    attempted: Mutex<Vec<LocalId>>,
    accepted: Mutex<Vec<PendingOrder>>,
    snapshot: Mutex<Vec<OrderProjection>>,
    unreadable: Mutex<Vec<OrderId>>,
    snapshot_calls: AtomicUsize,
    snapshot_failures: AtomicUsize,
    served: Mutex<Vec<OrderId>>,
    fail_mark_served: AtomicBool,
    unhealthy: AtomicBool,
}

impl FakeOrderApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next submissions. Unscripted calls accept.
    pub fn script_submits(&self, outcomes: impl IntoIterator<Item = SubmitOutcome>) {
        self.submits.lock().unwrap().extend(outcomes);
    }

    /// Every entry `submit_order` was called with, in call order.
    pub fn attempted_ids(&self) -> Vec<LocalId> {
        self.attempted.lock().unwrap().clone()
    }

    /// Entries the fake accepted, in acceptance order.
    pub fn submitted(&self) -> Vec<PendingOrder> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn submitted_ids(&self) -> Vec<LocalId> {
        self.submitted().iter().map(|o| o.local_id).collect()
    }

    pub fn set_snapshot(&self, rows: Vec<OrderProjection>) {
        *self.snapshot.lock().unwrap() = rows;
    }

    /// Ids the next snapshots list as rows that fail to parse.
    pub fn set_unreadable(&self, ids: Vec<OrderId>) {
        *self.unreadable.lock().unwrap() = ids;
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` snapshot fetches.
    pub fn fail_snapshots(&self, n: usize) {
        self.snapshot_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_mark_served(&self, fail: bool) {
        self.fail_mark_served.store(fail, Ordering::SeqCst);
    }

    pub fn served_calls(&self) -> Vec<OrderId> {
        self.served.lock().unwrap().clone()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderApi for FakeOrderApi {
    async fn submit_order(&self, order: &PendingOrder) -> Result<(), ApiError> {
        self.attempted.lock().unwrap().push(order.local_id);
        let outcome = self
            .submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitOutcome::Accept);
        match outcome {
            SubmitOutcome::Accept => {}
            SubmitOutcome::Reject(status) => {
                return Err(ApiError::Status {
                    status,
                    message: "Server error".into(),
                })
            }
            SubmitOutcome::Hang => std::future::pending::<()>().await,
            SubmitOutcome::Delay(pause) => tokio::time::sleep(pause).await,
        }
        self.accepted.lock().unwrap().push(order.clone());
        Ok(())
    }

    async fn fetch_active_orders(&self) -> Result<ActiveSnapshot, ApiError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .snapshot_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ApiError::Transport("Cannot connect to server".into()));
        }
        Ok(ActiveSnapshot {
            orders: self.snapshot.lock().unwrap().clone(),
            unreadable: self.unreadable.lock().unwrap().clone(),
        })
    }

    async fn mark_served(&self, order_id: &OrderId) -> Result<(), ApiError> {
        if self.fail_mark_served.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                message: "Server error".into(),
            });
        }
        self.served.lock().unwrap().push(order_id.clone());
        Ok(())
    }

    async fn check_health(&self) -> bool {
        !self.unhealthy.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    events: Vec<OrderEvent>,
    stay_open: bool,
}

/// Push source that replays one scripted session per connect. Once the
/// script runs out, further connects fail.
#[derive(Default)]
pub struct ScriptedPushSource {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    connects: AtomicUsize,
}

impl ScriptedPushSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next session. With `stay_open` the connection idles after
    /// its events instead of closing.
    pub fn push_session(&self, events: Vec<OrderEvent>, stay_open: bool) {
        self.sessions
            .lock()
            .unwrap()
            .push_back(ScriptedSession { events, stay_open });
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSource for ScriptedPushSource {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, StreamError> {
        let session = self.sessions.lock().unwrap().pop_front();
        let Some(session) = session else {
            return Err(StreamError::Connect("no scripted session".into()));
        };
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            events: session.events.into(),
            stay_open: session.stay_open,
        }))
    }
}

struct ScriptedConnection {
    events: VecDeque<OrderEvent>,
    stay_open: bool,
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn next_event(&mut self) -> Option<Result<OrderEvent, StreamError>> {
        if let Some(event) = self.events.pop_front() {
            return Some(Ok(event));
        }
        if self.stay_open {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {}
}
