//! The per-feed ingestion channel (spec §4.4): a bounded queue between a
//! Feed Connector and the Fan-out Dispatcher that drops the **oldest**
//! entry on overflow rather than blocking the producer or rejecting the
//! newest — "freshness beats completeness for live streaming". Neither
//! `tokio::sync::mpsc` (blocks the sender on full) nor `broadcast` (drops
//! for every receiver uniformly, and is multi-consumer) expresses this, so
//! it's hand-rolled here the same way the teacher hand-rolls its own wire
//! protocol in `rt-protocol` rather than reaching for a framework that
//! doesn't fit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    cap: usize,
    dropped: AtomicU64,
}

/// The producer half, held by a Feed Connector.
#[derive(Clone)]
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// The consumer half, held by the Fan-out Dispatcher.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a bounded, drop-oldest-on-full channel of capacity `cap`
/// (spec §4.4's `Q_in`, default 1024).
pub fn channel<T>(cap: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(cap.min(256))),
        notify: Notify::new(),
        cap: cap.max(1),
        dropped: AtomicU64::new(0),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Pushes `item`, dropping the oldest queued item if at capacity.
    /// Returns `true` iff an item was dropped.
    pub async fn push(&self, item: T) -> bool {
        let mut queue = self.shared.queue.lock().await;
        let dropped = if queue.len() >= self.shared.cap {
            queue.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        queue.push_back(item);
        drop(queue);
        self.shared.notify.notify_one();
        dropped
    }

    pub fn dropped_total(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Receiver<T> {
    /// Waits for and returns the next item, oldest first.
    pub async fn recv(&mut self) -> T {
        loop {
            {
                let mut queue = self.shared.queue.lock().await;
                if let Some(item) = queue.pop_front() {
                    return item;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.shared.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_recv_preserves_fifo_order() {
        let (tx, mut rx) = channel(10);
        tx.push(1).await;
        tx.push(2).await;
        tx.push(3).await;
        assert_eq!(rx.recv().await, 1);
        assert_eq!(rx.recv().await, 2);
        assert_eq!(rx.recv().await, 3);
    }

    #[tokio::test]
    async fn overflow_drops_the_oldest_entry() {
        let (tx, mut rx) = channel(2);
        tx.push(1).await;
        tx.push(2).await;
        let dropped = tx.push(3).await;
        assert!(dropped);
        assert_eq!(rx.recv().await, 2);
        assert_eq!(rx.recv().await, 3);
        assert_eq!(tx.dropped_total(), 1);
    }

    #[tokio::test]
    async fn recv_waits_for_an_item() {
        let (tx, mut rx) = channel::<u32>(4);
        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.push(42).await;
        assert_eq!(handle.await.unwrap(), 42);
    }
}
