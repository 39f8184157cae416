//! Order data model: locally captured orders awaiting intake, and the
//! server-side order records that feed the kitchen projection.
//!
//! Wire records are parsed leniently (snake_case and camelCase aliases,
//! numeric or string ids, loose status spellings) because snapshot rows and
//! push payloads come from different admin dashboard handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CaptureError;

// ---------------------------------------------------------------------------
// Local capture
// ---------------------------------------------------------------------------

/// Opaque token identifying a queued order on this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One line of a captured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(alias = "menu_item_id")]
    pub menu_item_id: i64,
    pub quantity: i64,
}

impl LineItem {
    pub fn new(menu_item_id: i64, quantity: i64) -> Self {
        Self {
            menu_item_id,
            quantity,
        }
    }
}

/// What the capture surface hands over: a table and its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    #[serde(alias = "table_label", alias = "tableIdentifier")]
    pub table_label: String,
    #[serde(alias = "line_items", alias = "lineItems")]
    pub items: Vec<LineItem>,
}

impl NewOrder {
    pub fn new(table_label: impl Into<String>, items: Vec<LineItem>) -> Self {
        Self {
            table_label: table_label.into(),
            items,
        }
    }

    /// Purely local checks; capture never consults the network.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.table_label.trim().is_empty() {
            return Err(CaptureError::MissingTable);
        }
        if self.items.is_empty() {
            return Err(CaptureError::NoItems);
        }
        if let Some(bad) = self.items.iter().find(|item| item.quantity < 1) {
            return Err(CaptureError::InvalidQuantity {
                menu_item_id: bad.menu_item_id,
                quantity: bad.quantity,
            });
        }
        Ok(())
    }
}

/// A captured order waiting in the durable queue for intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub local_id: LocalId,
    pub table_label: String,
    pub line_items: Vec<LineItem>,
    pub captured_at: DateTime<Utc>,
    /// Failed submission attempts so far. Informational only.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOrder {
    pub fn from_capture(order: NewOrder, captured_at: DateTime<Utc>) -> Self {
        Self {
            local_id: LocalId::new(),
            table_label: order.table_label.trim().to_string(),
            line_items: order.items,
            captured_at,
            attempts: 0,
            last_error: None,
        }
    }

    /// Body for the intake endpoint.
    pub fn intake_request(&self) -> IntakeRequest<'_> {
        IntakeRequest {
            table_label: &self.table_label,
            items: &self.line_items,
        }
    }
}

/// `POST /api/pos/orders` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRequest<'a> {
    pub table_label: &'a str,
    pub items: &'a [LineItem],
}

// ---------------------------------------------------------------------------
// Server records
// ---------------------------------------------------------------------------

/// Server-assigned order id. Accepts numeric or string ids on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawOrderId", into = "String")]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for OrderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOrderId {
    Number(i64),
    Text(String),
}

impl From<RawOrderId> for OrderId {
    fn from(raw: RawOrderId) -> Self {
        match raw {
            RawOrderId::Number(n) => Self(n.to_string()),
            RawOrderId::Text(s) => Self(s.trim().to_string()),
        }
    }
}

/// Top-level order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Partial,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Statuses under which an order may still show on the kitchen board.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Partial
        )
    }

    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "new" => Some(OrderStatus::Pending),
            "confirmed" | "accepted" | "preparing" => Some(OrderStatus::Confirmed),
            "partial" | "partially_served" | "partially-served" => Some(OrderStatus::Partial),
            "completed" | "complete" | "served" | "delivered" => Some(OrderStatus::Completed),
            "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl TryFrom<String> for OrderStatus {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::from_wire(&raw).ok_or_else(|| format!("unknown order status: {raw}"))
    }
}

/// Per-line kitchen status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum ItemStatus {
    Pending,
    Served,
}

impl ItemStatus {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "preparing" | "ready" => Some(ItemStatus::Pending),
            "served" | "delivered" | "completed" => Some(ItemStatus::Served),
            _ => None,
        }
    }
}

impl TryFrom<String> for ItemStatus {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::from_wire(&raw).ok_or_else(|| format!("unknown item status: {raw}"))
    }
}

/// One line of an order as the kitchen sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineProjection {
    #[serde(alias = "name", alias = "item_name", alias = "itemName")]
    pub title: String,
    pub quantity: i64,
    #[serde(alias = "status", alias = "item_status")]
    pub item_status: ItemStatus,
}

impl OrderLineProjection {
    pub fn new(title: impl Into<String>, quantity: i64, item_status: ItemStatus) -> Self {
        Self {
            title: title.into(),
            quantity,
            item_status,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.item_status == ItemStatus::Pending
    }
}

/// Full order record: one snapshot row, or the payload of one push event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderProjection {
    #[serde(alias = "id", alias = "order_id")]
    pub order_id: OrderId,
    #[serde(
        default,
        alias = "table_label",
        alias = "tableNumber",
        alias = "table_number"
    )]
    pub table_label: String,
    #[serde(default)]
    pub items: Vec<OrderLineProjection>,
    #[serde(alias = "status", alias = "overall_status")]
    pub overall_status: OrderStatus,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

impl OrderProjection {
    pub fn has_pending_items(&self) -> bool {
        self.items.iter().any(OrderLineProjection::is_pending)
    }

    /// Visibility rule for the active kitchen view.
    pub fn is_active(&self) -> bool {
        self.overall_status.is_open() && self.has_pending_items()
    }
}

/// Result of one snapshot fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveSnapshot {
    pub orders: Vec<OrderProjection>,
    /// Ids of rows the server listed but that could not be read.
    pub unreadable: Vec<OrderId>,
}

impl ActiveSnapshot {
    /// Every id the server listed, readable or not.
    pub fn listed_ids(&self) -> impl Iterator<Item = &OrderId> {
        self.orders
            .iter()
            .map(|o| &o.order_id)
            .chain(self.unreadable.iter())
    }
}

impl From<Vec<OrderProjection>> for ActiveSnapshot {
    fn from(orders: Vec<OrderProjection>) -> Self {
        Self {
            orders,
            unreadable: Vec::new(),
        }
    }
}
