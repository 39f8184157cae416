//! Kitchen reconciliation projection.
//!
//! Latest known state per order id, merged from snapshot rows, push events
//! and optimistic staff commands. Every write goes through [`merge`]:
//!
//! - an authoritative write (snapshot row or push payload) replaces the
//!   whole order, whatever was there, provisional or not;
//! - an optimistic write only touches an order already known, and marks it
//!   provisional until the next authoritative write for that id.
//!
//! Writes apply in arrival order. Nothing here compares server timestamps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::orders::{
    ActiveSnapshot, ItemStatus, OrderId, OrderLineProjection, OrderProjection, OrderStatus,
};

/// A single write against the projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Complete order payload from the server.
    Authoritative(OrderProjection),
    /// Local guess after a successful mark-served command.
    AllServed(OrderId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedOrder {
    pub order: OrderProjection,
    /// Current state is an optimistic guess not yet confirmed by the server.
    pub provisional: bool,
    /// Projection revision of the last authoritative write.
    revision: u64,
}

/// Precedence rule for one id: authoritative data always wins.
pub fn merge(current: Option<ProjectedOrder>, write: Write, revision: u64) -> Option<ProjectedOrder> {
    match write {
        Write::Authoritative(order) => Some(ProjectedOrder {
            order,
            provisional: false,
            revision,
        }),
        Write::AllServed(_) => current.map(|mut projected| {
            for item in &mut projected.order.items {
                item.item_status = ItemStatus::Served;
            }
            projected.provisional = true;
            projected
        }),
    }
}

/// Marks the projection revision at which a snapshot request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotTicket {
    revision: u64,
}

/// One order as shown on the kitchen board: pending lines only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTicket {
    pub order_id: OrderId,
    pub table_label: String,
    pub overall_status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderLineProjection>,
    pub provisional: bool,
}

#[derive(Debug, Default)]
pub struct KitchenProjection {
    orders: HashMap<OrderId, ProjectedOrder>,
    revision: u64,
}

impl KitchenProjection {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&mut self, id: &OrderId, write: Write) {
        if matches!(write, Write::Authoritative(_)) {
            self.revision += 1;
        }
        let current = self.orders.remove(id);
        if let Some(next) = merge(current, write, self.revision) {
            self.orders.insert(id.clone(), next);
        }
    }

    /// Upsert one complete order payload.
    pub fn upsert(&mut self, order: OrderProjection) {
        let id = order.order_id.clone();
        self.apply(&id, Write::Authoritative(order));
    }

    /// Optimistically mark every line served. Returns false for unknown ids.
    pub fn mark_all_served(&mut self, id: &OrderId) -> bool {
        if !self.orders.contains_key(id) {
            return false;
        }
        self.apply(id, Write::AllServed(id.clone()));
        true
    }

    /// Call before requesting a snapshot; pass the ticket to [`Self::apply_snapshot`].
    pub fn begin_snapshot(&self) -> SnapshotTicket {
        SnapshotTicket {
            revision: self.revision,
        }
    }

    /// Upsert every readable row, then forget orders the snapshot no longer
    /// lists, unless a push touched them after the snapshot was requested.
    /// A listed row that could not be read keeps its last known state.
    pub fn apply_snapshot(&mut self, ticket: SnapshotTicket, snapshot: ActiveSnapshot) {
        let listed: HashSet<OrderId> = snapshot.listed_ids().cloned().collect();
        for row in snapshot.orders {
            self.upsert(row);
        }
        self.orders
            .retain(|id, projected| listed.contains(id) || projected.revision > ticket.revision);
    }

    pub fn get(&self, id: &OrderId) -> Option<&ProjectedOrder> {
        self.orders.get(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders passing the visibility rule, oldest first, pending lines only.
    pub fn active_view(&self) -> Vec<ActiveTicket> {
        let mut tickets: Vec<ActiveTicket> = self
            .orders
            .values()
            .filter(|p| p.order.overall_status.is_open())
            .filter_map(|p| {
                let items: Vec<OrderLineProjection> = p
                    .order
                    .items
                    .iter()
                    .filter(|item| item.is_pending())
                    .cloned()
                    .collect();
                if items.is_empty() {
                    return None;
                }
                Some(ActiveTicket {
                    order_id: p.order.order_id.clone(),
                    table_label: p.order.table_label.clone(),
                    overall_status: p.order.overall_status,
                    created_at: p.order.created_at,
                    items,
                    provisional: p.provisional,
                })
            })
            .collect();
        tickets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        tickets
    }
}
