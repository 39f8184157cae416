//! Connectivity monitor.
//!
//! Holds the process-wide "online" hint and notifies subscribers on
//! transitions. Each false→true flip emits exactly one `BecameOnline`; setting
//! the same state again emits nothing. The hint is fed by a periodic health
//! probe against the admin dashboard. It only tells the sync engine when a
//! drain is worth attempting; a failed submission is still the real signal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::OrderApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    WentOffline,
}

struct Subscribers {
    online: bool,
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<ConnectivityEvent>>,
}

pub struct ConnectivityMonitor {
    state: Arc<Mutex<Subscribers>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(Subscribers {
                online: initially_online,
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().map(|s| s.online).unwrap_or(false)
    }

    /// Record the latest observation. Returns the transition it caused, if any.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        if state.online == online {
            return None;
        }
        state.online = online;

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::WentOffline
        };
        state.senders.retain(|_, tx| tx.send(event).is_ok());
        info!(online, subscribers = state.senders.len(), "Connectivity changed");
        Some(event)
    }

    /// Register for transition notifications. Dropping (or calling
    /// [`Subscription::unsubscribe`] on) the handle cancels it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = match self.state.lock() {
            Ok(mut state) => {
                let id = state.next_id;
                state.next_id += 1;
                state.senders.insert(id, tx);
                id
            }
            // Receiver over a dropped sender: yields None immediately.
            Err(_) => u64::MAX,
        };
        Subscription {
            id,
            state: Arc::downgrade(&self.state),
            rx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().map(|s| s.senders.len()).unwrap_or(0)
    }
}

/// Cancellation handle for a connectivity subscription.
pub struct Subscription {
    id: u64,
    state: Weak<Mutex<Subscribers>>,
    rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl Subscription {
    /// Next transition, or `None` once the monitor is gone.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if let Ok(mut state) = state.lock() {
                state.senders.remove(&self.id);
            }
        }
    }
}

/// Poll the health endpoint every `interval` and feed the monitor until
/// `shutdown` fires. The first probe runs immediately.
pub async fn run_health_probe(
    monitor: Arc<ConnectivityMonitor>,
    api: Arc<dyn OrderApi>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Connectivity probe started (interval: {}s)", interval.as_secs());

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let online = api.check_health().await;
                debug!(online, "Health probe");
                monitor.set_online(online);
            }
        }
    }
    info!("Connectivity probe stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_became_online_emitted_once_per_transition() {
        let monitor = ConnectivityMonitor::new(false);
        let mut sub = monitor.subscribe();

        assert_eq!(monitor.set_online(true), Some(ConnectivityEvent::BecameOnline));
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(true), None);

        assert_eq!(sub.try_recv(), Some(ConnectivityEvent::BecameOnline));
        assert_eq!(sub.try_recv(), None);
        assert!(monitor.is_online());
    }

    #[test]
    fn test_flapping_emits_every_edge() {
        let monitor = ConnectivityMonitor::new(true);
        let mut sub = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(false);
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        let mut seen = Vec::new();
        while let Some(ev) = sub.try_recv() {
            seen.push(ev);
        }
        assert_eq!(
            seen,
            vec![
                ConnectivityEvent::WentOffline,
                ConnectivityEvent::BecameOnline,
                ConnectivityEvent::WentOffline,
                ConnectivityEvent::BecameOnline,
            ]
        );
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let monitor = ConnectivityMonitor::new(false);
        let first = monitor.subscribe();
        let mut second = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(monitor.subscriber_count(), 1);

        monitor.set_online(true);
        assert_eq!(second.try_recv(), Some(ConnectivityEvent::BecameOnline));

        drop(second);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(false);
        let mut sub = monitor.subscribe();
        drop(monitor);
        assert_eq!(sub.recv().await, None);
    }
}
