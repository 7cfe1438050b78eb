//! Unbounded hand-off queue between producers and the merge builder.
//!
//! [`BlockingQueue`] moves owned values from any number of producer tasks to a
//! consumer task. It never applies backpressure to producers: `enqueue` only
//! takes a short lock. Consumers suspend in [`BlockingQueue::dequeue`] until an
//! item arrives or the queue is stopped.
//!
//! Stopping is final. Once [`BlockingQueue::stop`] has been called, items still
//! queued are discarded, every suspended consumer wakes with `None`, and later
//! `enqueue` calls drop their item. The session controller therefore polls
//! [`BlockingQueue::size`] down to zero before stopping the raw queue.
//!
//! The queue makes no ordering promises beyond FIFO; time ordering of events is
//! the builder's job.

use crate::data::Spill;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Queue carrying spills from producers to the builder.
pub type SpillQueue = BlockingQueue<Spill>;

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    available: Notify,
}

/// Cloneable handle to a shared FIFO queue.
pub struct BlockingQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Create an empty, running queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    stopped: false,
                }),
                available: Notify::new(),
            }),
        }
    }

    /// Append an item. Never waits.
    ///
    /// Returns `false` and drops the item if the queue has been stopped.
    pub fn enqueue(&self, item: T) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.stopped {
                trace!("enqueue after stop, item dropped");
                return false;
            }
            state.items.push_back(item);
        }
        self.inner.available.notify_one();
        true
    }

    /// Take the oldest item, suspending until one is available.
    ///
    /// Returns `None` once the queue is stopped, including for callers that
    /// were already waiting.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            // Register interest before checking so a concurrent enqueue or
            // stop between the check and the await is not missed.
            let notified = self.inner.available.notified();
            {
                let mut state = self.inner.state.lock();
                if state.stopped {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Take the oldest item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return None;
        }
        state.items.pop_front()
    }

    /// Number of queued items. Approximate under concurrent use.
    pub fn size(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Stop the queue and wake every waiting consumer. Idempotent.
    pub fn stop(&self) {
        let discarded = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            let discarded = state.items.len();
            state.items.clear();
            discarded
        };
        if discarded > 0 {
            trace!(discarded, "queue stopped with items pending");
        }
        self.inner.available.notify_waiters();
    }

    /// Whether [`BlockingQueue::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BlockingQueue::new();
        for i in 0..5 {
            assert!(queue.enqueue(i));
        }
        assert_eq!(queue.size(), 5);

        for i in 0..5 {
            assert_eq!(queue.dequeue().await, Some(i));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = BlockingQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(42u32);

        let got = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .expect("task should not panic");
        assert_eq!(got, Some(42));
    }

    #[tokio::test]
    async fn test_stop_wakes_all_waiters() {
        let queue: BlockingQueue<u32> = BlockingQueue::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.stop();

        for waiter in waiters {
            let got = timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake on stop")
                .expect("task should not panic");
            assert_eq!(got, None);
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let queue = BlockingQueue::new();
        queue.enqueue(1);
        queue.stop();
        queue.stop();

        assert!(queue.is_stopped());
        assert_eq!(queue.size(), 0);
        assert!(!queue.enqueue(2));
        assert_eq!(queue.try_dequeue(), None);

        // Never blocks after stop
        let got = timeout(Duration::from_millis(100), queue.dequeue())
            .await
            .expect("dequeue after stop must not block");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_many_producers() {
        let queue = BlockingQueue::new();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.expect("producer task");
        }

        let mut received = Vec::new();
        while let Some(item) = queue.try_dequeue() {
            received.push(item);
        }
        assert_eq!(received.len(), 1000);

        // Per-producer order is preserved
        for p in 0..4 {
            let mine: Vec<_> = received.iter().filter(|v| **v / 1000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
