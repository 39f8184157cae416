//! Error types shared across the order intake and kitchen subsystems.

use std::time::Duration;

use thiserror::Error;

/// Failures of the local SQLite store or of (de)serializing its records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    Poisoned,

    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the admin dashboard over request/response HTTP.
///
/// Every variant counts as a submission failure for the sync engine; the
/// distinction only matters for log lines and the "unsynced" indicator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("Terminal not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Transport(String),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("Invalid JSON from admin dashboard: {0}")]
    InvalidJson(String),
}

impl ApiError {
    /// HTTP status code, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failures of the push channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("push channel connect failed: {0}")]
    Connect(String),

    #[error("push channel transport error: {0}")]
    Transport(String),

    #[error("push channel protocol error: {0}")]
    Protocol(String),
}

/// Local validation failures at order capture time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Order must contain at least one item")]
    NoItems,

    #[error("Table label is required")]
    MissingTable,

    #[error("Invalid quantity {quantity} for menu item {menu_item_id}")]
    InvalidQuantity { menu_item_id: i64, quantity: i64 },
}

/// Failures bringing the client up.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),
}
