//! Kitchen board: sole owner of the [`KitchenProjection`].
//!
//! The stream client feeds it snapshots and push payloads; staff commands
//! arrive through [`KitchenBoard::mark_served`]. Every change republishes the
//! active view on a watch channel.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::OrderApi;
use crate::error::ApiError;
use crate::orders::{ActiveSnapshot, OrderId, OrderProjection};
use crate::projection::{ActiveTicket, KitchenProjection, SnapshotTicket};

pub struct KitchenBoard {
    projection: Mutex<KitchenProjection>,
    api: Arc<dyn OrderApi>,
    view_tx: watch::Sender<Vec<ActiveTicket>>,
}

impl KitchenBoard {
    pub fn new(api: Arc<dyn OrderApi>) -> Self {
        let (view_tx, _) = watch::channel(Vec::new());
        Self {
            projection: Mutex::new(KitchenProjection::new()),
            api,
            view_tx,
        }
    }

    fn projection(&self) -> MutexGuard<'_, KitchenProjection> {
        self.projection.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, projection: &KitchenProjection) {
        let view = projection.active_view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    /// Apply one push payload (created or updated).
    pub fn apply_push(&self, order: OrderProjection) {
        let mut projection = self.projection();
        projection.upsert(order);
        self.publish(&projection);
    }

    pub fn begin_snapshot(&self) -> SnapshotTicket {
        self.projection().begin_snapshot()
    }

    pub fn apply_snapshot(&self, ticket: SnapshotTicket, snapshot: ActiveSnapshot) {
        let mut projection = self.projection();
        projection.apply_snapshot(ticket, snapshot);
        self.publish(&projection);
    }

    /// Fetch and merge a full snapshot. Returns the number of rows merged.
    pub async fn refresh_snapshot(&self) -> Result<usize, ApiError> {
        let ticket = self.begin_snapshot();
        let snapshot = self.api.fetch_active_orders().await?;
        let count = snapshot.orders.len();
        if !snapshot.unreadable.is_empty() {
            warn!(
                unreadable = snapshot.unreadable.len(),
                "Snapshot rows unreadable; keeping their last known state"
            );
        }
        self.apply_snapshot(ticket, snapshot);
        info!(orders = count, "Kitchen snapshot merged");
        Ok(count)
    }

    /// Tell the server every line of `order_id` is served; on success mark
    /// the lines served locally until the server's own payload arrives.
    pub async fn mark_served(&self, order_id: &OrderId) -> Result<(), ApiError> {
        if let Err(e) = self.api.mark_served(order_id).await {
            warn!(order_id = %order_id, "Mark served failed: {e}");
            return Err(e);
        }
        let mut projection = self.projection();
        if !projection.mark_all_served(order_id) {
            warn!(order_id = %order_id, "Mark served for an order not on the board");
        }
        self.publish(&projection);
        Ok(())
    }

    pub fn active_view(&self) -> Vec<ActiveTicket> {
        self.projection().active_view()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ActiveTicket>> {
        self.view_tx.subscribe()
    }

    pub fn is_provisional(&self, order_id: &OrderId) -> bool {
        self.projection()
            .get(order_id)
            .map(|p| p.provisional)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{sample_order, FakeOrderApi};
    use crate::orders::{ItemStatus, OrderStatus};

    use ItemStatus::{Pending, Served};

    #[tokio::test]
    async fn test_snapshot_then_push_removes_ticket() {
        let api = Arc::new(FakeOrderApi::new());
        api.set_snapshot(vec![sample_order(17, OrderStatus::Pending, &[Pending, Pending])]);
        let board = KitchenBoard::new(api.clone());
        let mut view = board.subscribe();

        assert_eq!(board.refresh_snapshot().await.unwrap(), 1);
        assert!(view.has_changed().unwrap());
        assert_eq!(view.borrow_and_update().len(), 1);

        board.apply_push(sample_order(17, OrderStatus::Pending, &[Served, Served]));
        assert!(view.has_changed().unwrap());
        assert!(view.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_row_keeps_ticket() {
        let api = Arc::new(FakeOrderApi::new());
        let board = KitchenBoard::new(api.clone());
        board.apply_push(sample_order(17, OrderStatus::Pending, &[Pending]));

        api.set_snapshot(vec![]);
        api.set_unreadable(vec![OrderId::from(17)]);
        assert_eq!(board.refresh_snapshot().await.unwrap(), 0);
        assert_eq!(board.active_view().len(), 1);

        // Once the server stops listing it, the ticket goes.
        api.set_unreadable(vec![]);
        board.refresh_snapshot().await.unwrap();
        assert!(board.active_view().is_empty());
    }

    #[tokio::test]
    async fn test_mark_served_is_optimistic_after_success() {
        let api = Arc::new(FakeOrderApi::new());
        let board = KitchenBoard::new(api.clone());
        let id = OrderId::from(8);
        board.apply_push(sample_order(8, OrderStatus::Confirmed, &[Pending, Pending]));

        board.mark_served(&id).await.unwrap();
        assert!(board.active_view().is_empty());
        assert!(board.is_provisional(&id));
        assert_eq!(api.served_calls(), vec![id.clone()]);

        // Server still reports one line pending: server wins.
        board.apply_push(sample_order(8, OrderStatus::Partial, &[Served, Pending]));
        let view = board.active_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].items.len(), 1);
        assert!(!board.is_provisional(&id));
    }

    #[tokio::test]
    async fn test_failed_mark_served_leaves_board_untouched() {
        let api = Arc::new(FakeOrderApi::new());
        api.fail_mark_served(true);
        let board = KitchenBoard::new(api.clone());
        let id = OrderId::from(3);
        board.apply_push(sample_order(3, OrderStatus::Pending, &[Pending]));

        assert!(board.mark_served(&id).await.is_err());
        assert_eq!(board.active_view().len(), 1);
        assert!(!board.is_provisional(&id));
    }
}
