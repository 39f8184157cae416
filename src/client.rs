//! Client facade: wires the queue, sync engine, connectivity probe, kitchen
//! board and event stream together, and owns their background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::api::{HttpOrderApi, OrderApi};
use crate::config::{mask_terminal_id, ClientConfig};
use crate::connectivity::{self, ConnectivityMonitor};
use crate::db::{self, DbState};
use crate::error::{ApiError, CaptureError, ClientError};
use crate::kitchen::KitchenBoard;
use crate::orders::{LocalId, NewOrder, OrderId, PendingOrder};
use crate::projection::ActiveTicket;
use crate::queue::PendingOrderQueue;
use crate::stream::{EventStreamClient, PushSource, WebSocketPushSource};
use crate::sync::{DrainReport, SyncEngine, SyncStatus};
use crate::tables::{TableCandidate, TableHint, TableResolver};

pub struct PosClient {
    queue: Arc<PendingOrderQueue>,
    api: Arc<dyn OrderApi>,
    source: Arc<dyn PushSource>,
    connectivity: Arc<ConnectivityMonitor>,
    sync: Arc<SyncEngine>,
    board: Arc<KitchenBoard>,
    tables: Mutex<TableResolver>,
    probe_interval: Duration,
    reconnect_min_delay: Duration,
    reconnect_max_delay: Duration,
    started: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl PosClient {
    /// Open the local store under `config.data_dir` and build the HTTP and
    /// WebSocket transports. Background tasks start with [`Self::start`].
    pub fn open(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let db = Arc::new(db::init(&config.data_dir)?);
        Self::open_with_db(config, db)
    }

    /// As [`Self::open`], on a store the caller already opened.
    pub fn open_with_db(config: &ClientConfig, db: Arc<DbState>) -> Result<Self, ClientError> {
        let api: Arc<dyn OrderApi> = Arc::new(HttpOrderApi::new(config)?);
        let source: Arc<dyn PushSource> = Arc::new(WebSocketPushSource::new(config));
        info!(
            admin_url = %config.admin_url,
            terminal_id = %mask_terminal_id(&config.terminal_id),
            "POS order client opened"
        );
        Ok(Self::with_components(config, db, api, source))
    }

    /// Assemble from explicit parts. Only the timing fields of `config` are read.
    pub fn with_components(
        config: &ClientConfig,
        db: Arc<DbState>,
        api: Arc<dyn OrderApi>,
        source: Arc<dyn PushSource>,
    ) -> Self {
        let queue = Arc::new(PendingOrderQueue::open(db.clone()));
        // Unknown until the first probe, which runs as soon as tasks start.
        let connectivity = Arc::new(ConnectivityMonitor::new(false));
        let sync = Arc::new(
            SyncEngine::new(
                queue.clone(),
                api.clone(),
                connectivity.clone(),
                config.submit_timeout,
            )
            .with_retry_backoff(config.reconnect_min_delay, config.reconnect_max_delay),
        );
        let board = Arc::new(KitchenBoard::new(api.clone()));

        Self {
            queue,
            api,
            source,
            connectivity,
            sync,
            board,
            tables: Mutex::new(TableResolver::open(db)),
            probe_interval: config.probe_interval,
            reconnect_min_delay: config.reconnect_min_delay,
            reconnect_max_delay: config.reconnect_max_delay,
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Spawn the connectivity probe, sync engine and event stream. Calling
    /// it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.tasks.spawn(connectivity::run_health_probe(
            self.connectivity.clone(),
            self.api.clone(),
            self.probe_interval,
            self.shutdown.child_token(),
        ));
        self.tasks
            .spawn(self.sync.clone().run(self.shutdown.child_token()));

        let stream = EventStreamClient::new(
            self.source.clone(),
            self.board.clone(),
            self.reconnect_min_delay,
            self.reconnect_max_delay,
        );
        self.tasks.spawn(stream.run(self.shutdown.child_token()));
        info!(pending = self.queue.len(), "Background sync tasks started");
    }

    /// Stop every background task and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!(pending = self.queue.len(), "POS order client stopped");
    }

    // -- intake ------------------------------------------------------------

    /// Validate and queue an order. It leaves the device only through the
    /// sync engine, in capture order.
    pub fn capture_order(&self, order: NewOrder) -> Result<LocalId, CaptureError> {
        order.validate()?;
        let table = order.table_label.clone();
        let local_id = self.queue.enqueue(order);
        info!(
            %local_id,
            %table,
            online = self.connectivity.is_online(),
            "Order captured"
        );
        self.sync.notify_captured();
        Ok(local_id)
    }

    /// Drain now, ignoring the connectivity hint. `None` means a drain was
    /// already running and will pick the queue up.
    pub async fn force_sync(&self) -> Option<DrainReport> {
        self.sync.force_sync().await
    }

    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.subscribe_status()
    }

    pub fn pending_orders(&self) -> Vec<PendingOrder> {
        self.queue.snapshot()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // -- kitchen -----------------------------------------------------------

    pub fn active_view(&self) -> Vec<ActiveTicket> {
        self.board.active_view()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<Vec<ActiveTicket>> {
        self.board.subscribe()
    }

    pub async fn mark_served(&self, order_id: &OrderId) -> Result<(), ApiError> {
        self.board.mark_served(order_id).await
    }

    // -- tables ------------------------------------------------------------

    fn tables(&self) -> MutexGuard<'_, TableResolver> {
        self.tables.lock().unwrap_or_else(|p| {
            warn!("Table resolver lock poisoned; continuing");
            p.into_inner()
        })
    }

    pub fn enter_table(&self, hint: TableHint) -> Option<TableCandidate> {
        self.tables().enter(hint).cloned()
    }

    pub fn refresh_tables(&self, candidates: Vec<TableCandidate>) -> Option<TableCandidate> {
        self.tables().refresh_candidates(candidates).cloned()
    }

    pub fn select_table(&self, table: TableCandidate) {
        self.tables().select(table);
    }

    pub fn current_table(&self) -> Option<TableCandidate> {
        self.tables().current().cloned()
    }

    pub fn needs_table_prompt(&self) -> bool {
        self.tables().needs_prompt()
    }
}
