//! Broadcast hub: fans pipeline events out to live observers.
//!
//! Producers never block: `announce` appends to a bounded history and does a
//! non-blocking send to each subscriber's bounded queue. A subscriber whose
//! queue is full is dropped on the spot. New subscribers first receive a
//! snapshot of the history, then live events.
//!
//! Per subscriber: `Idle` (backlog not yet drained) → `Streaming` → `Closed`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default number of events kept for late joiners.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 10;

struct HubState<T> {
    history: VecDeque<T>,
    subscribers: Vec<(u64, mpsc::Sender<T>)>,
    next_id: u64,
}

/// Shared fan-out point. Clone the `Arc`, not the hub.
pub struct BroadcastHub<T> {
    state: Mutex<HubState<T>>,
    history_capacity: usize,
    queue_capacity: usize,
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// Create a hub. A queue capacity of zero is treated as one.
    pub fn new(history_capacity: usize, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                history: VecDeque::with_capacity(history_capacity),
                subscribers: Vec::new(),
                next_id: 0,
            }),
            history_capacity,
            queue_capacity: queue_capacity.max(1),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_QUEUE)
    }

    fn lock(&self) -> MutexGuard<'_, HubState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an event and offer it to every subscriber without waiting.
    pub fn announce(&self, event: T) {
        let mut state = self.lock();

        if self.history_capacity > 0 {
            if state.history.len() == self.history_capacity {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
        }

        state.subscribers.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = id, "Subscriber queue full, unsubscribing");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = id, "Subscriber gone, removing");
                false
            }
        });
    }

    /// Join the hub. The returned subscription yields the history snapshot
    /// taken here, then live events.
    pub fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let backlog = state.history.clone();
        state.subscribers.push((id, tx));
        drop(state);

        info!(subscriber = id, backlog = backlog.len(), "Observer subscribed");

        Subscription {
            id,
            backlog,
            rx,
            hub: Arc::downgrade(self),
            state: SubscriberState::Idle,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Current history, oldest first.
    pub fn history(&self) -> Vec<T> {
        self.lock().history.iter().cloned().collect()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|(sid, _)| *sid != id);
    }
}

/// Lifecycle of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Streaming,
    Closed,
}

/// One observer's view of the hub. Dropping it deregisters the observer.
pub struct Subscription<T: Clone + Send + 'static> {
    id: u64,
    backlog: VecDeque<T>,
    rx: mpsc::Receiver<T>,
    hub: Weak<BroadcastHub<T>>,
    state: SubscriberState,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SubscriberState {
        self.state
    }

    /// Next event: backlog first, then live. `None` once the hub has shed
    /// this subscriber or gone away.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        if self.state == SubscriberState::Closed {
            return None;
        }
        self.state = SubscriberState::Streaming;
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => {
                self.state = SubscriberState::Closed;
                None
            }
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
        debug!(subscriber = self.id, "Observer unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn late_joiner_replays_bounded_history() {
        let hub = BroadcastHub::new(2, 10);
        for e in ["a", "b", "c"] {
            hub.announce(e.to_string());
        }

        let mut sub = hub.subscribe();
        assert_eq!(sub.recv().await.as_deref(), Some("b"));
        assert_eq!(sub.recv().await.as_deref(), Some("c"));
        assert_eq!(sub.state(), SubscriberState::Idle);

        hub.announce("d".to_string());
        assert_eq!(sub.recv().await.as_deref(), Some("d"));
        assert_eq!(sub.state(), SubscriberState::Streaming);
    }

    #[tokio::test]
    async fn full_queue_sheds_only_the_slow_subscriber() {
        let hub = BroadcastHub::new(10, 1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        hub.announce(1);
        assert_eq!(fast.recv().await, Some(1));
        assert_eq!(hub.subscriber_count(), 2);

        hub.announce(2);
        assert_eq!(hub.subscriber_count(), 1);

        hub.announce(3);
        assert_eq!(fast.recv().await, Some(2));
        assert_eq!(fast.recv().await, Some(3));

        // Slow still gets what was queued before it was shed, then ends.
        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(slow.recv().await, None);
        assert_eq!(slow.state(), SubscriberState::Closed);
    }

    #[tokio::test]
    async fn dropping_subscription_deregisters() {
        let hub = BroadcastHub::<u32>::with_defaults();
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        hub.announce(7);
        assert_eq!(hub.history(), vec![7]);
    }

    #[tokio::test]
    async fn announce_with_no_subscribers_only_fills_history() {
        let hub = BroadcastHub::new(3, 1);
        for i in 0..5 {
            hub.announce(i);
        }
        assert_eq!(hub.history(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn zero_history_keeps_nothing() {
        let hub = BroadcastHub::new(0, 4);
        hub.announce("x");
        let mut sub = hub.subscribe();
        assert!(hub.history().is_empty());
        assert!(timeout(Duration::from_millis(50), sub.recv()).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_producers_deliver_everything_to_a_draining_subscriber() {
        let hub = BroadcastHub::new(0, 64);
        let mut sub = hub.subscribe();

        let mut handles = Vec::new();
        for p in 0..4u32 {
            let hub = hub.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..8u32 {
                    hub.announce(p * 100 + i);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            seen.push(sub.recv().await.unwrap());
        }
        seen.sort();
        assert_eq!(seen.len(), 32);
        assert_eq!(seen[0], 0);
        assert_eq!(seen[31], 307);
    }
}
