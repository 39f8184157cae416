//! The Small POS - order intake and kitchen sync
//!
//! Orders captured at the terminal go into a durable local queue and reach
//! the admin dashboard through the sync engine, strictly in capture order and
//! whether or not the network was up when they were taken. The kitchen board
//! keeps a projection of active orders from an initial snapshot plus push
//! events, and refetches the snapshot after every reconnect.

use std::sync::Arc;
use tracing::{info, warn};

pub mod api;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod kitchen;
pub mod logging;
#[cfg(test)]
mod mock;
pub mod orders;
pub mod projection;
pub mod queue;
pub mod storage;
pub mod stream;
pub mod sync;
pub mod tables;

pub use client::PosClient;
pub use config::ClientConfig;
pub use error::{ApiError, CaptureError, ClientError, StoreError, StreamError};
pub use orders::{LineItem, LocalId, NewOrder, OrderId, OrderProjection, OrderStatus};
pub use projection::ActiveTicket;
pub use sync::SyncStatus;
pub use tables::{TableCandidate, TableHint};

/// Process entry point: logging, configuration, background tasks, then wait
/// for Ctrl-C and shut down cleanly.
pub async fn run() -> Result<(), ClientError> {
    let data_dir = config::default_data_dir();
    let _guard = logging::init_logging(&data_dir.join("logs"));
    logging::log_startup();

    let db = Arc::new(db::init(&data_dir)?);
    let config = ClientConfig::resolve(&data_dir, Some(&db))?;
    let client = PosClient::open_with_db(&config, db)?;
    client.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown requested");
    client.shutdown().await;
    Ok(())
}
