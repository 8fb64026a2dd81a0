//! Bounded FIFO work queue with a cooperative drain protocol
//!
//! Producers block (or are rejected, via [`BoundedWorkQueue::try_put`])
//! when the queue sits at its maximum depth; consumers block when it is
//! empty. Every dequeued item must be acknowledged with
//! [`BoundedWorkQueue::task_done`]; [`BoundedWorkQueue::join`] unblocks
//! once all enqueued items, stop markers included, have been dequeued and
//! acknowledged.
//!
//! Stop markers ([`Item::Stop`], one per worker via
//! [`BoundedWorkQueue::put_stop`]) are handed out only when no real units
//! remain, so a unit re-appended at the tail after a transient failure
//! always drains before the workers shut down.
//!
//! Wakeups use the notified-before-check pattern: the `Notified` future
//! is created before the state is inspected, so a notification landing
//! between the check and the await is not lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::QueueError;

/// One dequeued element
#[derive(Debug, PartialEq, Eq)]
pub enum Item<T> {
    /// A real unit of work
    Unit(T),
    /// Stop marker: the consumer should acknowledge it and stop pulling
    Stop,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    /// Pending stop markers, delivered once `items` is empty
    stops: usize,
}

/// Thread-safe bounded FIFO queue
#[derive(Debug)]
pub struct BoundedWorkQueue<T> {
    state: Mutex<QueueState<T>>,
    max_depth: usize,
    not_empty: Notify,
    not_full: Notify,
    /// Items enqueued but not yet acknowledged via `task_done`
    unfinished: AtomicUsize,
    all_done: Notify,
}

impl<T> BoundedWorkQueue<T> {
    /// Create a queue with the given maximum depth
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidDepth`] if `max_depth` is zero.
    pub fn new(max_depth: usize) -> Result<Self, QueueError> {
        if max_depth == 0 {
            return Err(QueueError::InvalidDepth(max_depth));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(max_depth),
                stops: 0,
            }),
            max_depth,
            not_empty: Notify::new(),
            not_full: Notify::new(),
            unfinished: AtomicUsize::new(0),
            all_done: Notify::new(),
        })
    }

    /// Enqueue a unit, waiting while the queue is at maximum depth
    pub async fn put(&self, mut unit: T) {
        loop {
            let notified = self.not_full.notified();
            match self.try_put(unit) {
                Ok(()) => return,
                Err(returned) => unit = returned,
            }
            notified.await;
        }
    }

    /// Enqueue a unit only if space is available
    ///
    /// Admission-control variant: when the queue is full the unit is
    /// handed back immediately without blocking and without mutating the
    /// queue.
    pub fn try_put(&self, unit: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.items.len() >= self.max_depth {
            return Err(unit);
        }
        state.items.push_back(unit);
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Re-append an already-admitted unit at the tail
    ///
    /// Used for transient-failure retries. Re-admission does not count
    /// against the depth bound: the unit was admitted once, and blocking
    /// a consumer on its own queue when it is full would deadlock.
    pub fn requeue(&self, unit: T) {
        {
            let mut state = self.state.lock();
            state.items.push_back(unit);
        }
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.not_empty.notify_one();
    }

    /// Enqueue one stop marker
    ///
    /// Markers do not count against the depth bound and are only handed
    /// out once every real unit has been dequeued.
    pub fn put_stop(&self) {
        {
            let mut state = self.state.lock();
            state.stops += 1;
        }
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.not_empty.notify_one();
    }

    /// Dequeue the next item, waiting until one is available
    pub async fn get(&self) -> Item<T> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut state = self.state.lock();
                if let Some(unit) = state.items.pop_front() {
                    self.not_full.notify_one();
                    // A unit may still sit behind us; wake the next
                    // consumer if so.
                    if !state.items.is_empty() || state.stops > 0 {
                        self.not_empty.notify_one();
                    }
                    return Item::Unit(unit);
                }
                if state.stops > 0 {
                    state.stops -= 1;
                    if state.stops > 0 {
                        self.not_empty.notify_one();
                    }
                    return Item::Stop;
                }
            }
            notified.await;
        }
    }

    /// Acknowledge one previously dequeued item
    pub fn task_done(&self) {
        let previous = self.unfinished.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "task_done without matching dequeue");
        if previous == 1 {
            self.all_done.notify_waiters();
        }
    }

    /// Wait until every enqueued item has been dequeued and acknowledged
    pub async fn join(&self) {
        loop {
            let notified = self.all_done.notified();
            if self.unfinished.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Number of real units currently queued
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue holds no real units
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue sits at its maximum depth
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_depth
    }

    /// Configured maximum depth
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Remove and acknowledge everything queued, units and stop markers
    /// alike, without processing
    ///
    /// Used by the drain-and-stop shutdown path. Returns the flushed
    /// units.
    pub fn flush(&self) -> Vec<T> {
        let (drained, stops) = {
            let mut state = self.state.lock();
            let drained: Vec<T> = state.items.drain(..).collect();
            let stops = std::mem::take(&mut state.stops);
            (drained, stops)
        };

        for _ in 0..(drained.len() + stops) {
            self.task_done();
        }
        self.not_full.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_zero_depth_rejected() {
        let queue: Result<BoundedWorkQueue<u32>, _> = BoundedWorkQueue::new(0);
        assert_eq!(queue.unwrap_err(), QueueError::InvalidDepth(0));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedWorkQueue::new(10).unwrap();
        for i in 0..5 {
            queue.put(i).await;
        }
        for expected in 0..5 {
            assert_eq!(queue.get().await, Item::Unit(expected));
            queue.task_done();
        }
    }

    #[tokio::test]
    async fn test_try_put_rejects_when_full() {
        let queue = BoundedWorkQueue::new(2).unwrap();
        assert!(queue.try_put(1).is_ok());
        assert!(queue.try_put(2).is_ok());

        // Full: unit handed back, contents untouched.
        assert_eq!(queue.try_put(3), Err(3));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Item::Unit(1));
        queue.task_done();
    }

    #[tokio::test]
    async fn test_put_blocks_until_space() {
        let queue = Arc::new(BoundedWorkQueue::new(1).unwrap());
        queue.put(1u32).await;

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(2).await })
        };

        // The producer cannot complete while the queue is full.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.get().await, Item::Unit(1));
        queue.task_done();

        timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer still blocked")
            .unwrap();
        assert_eq!(queue.get().await, Item::Unit(2));
        queue.task_done();
    }

    #[tokio::test]
    async fn test_get_blocks_until_item() {
        let queue = Arc::new(BoundedWorkQueue::new(4).unwrap());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let item = queue.get().await;
                queue.task_done();
                item
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.put(42u32).await;
        let item = timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer still blocked")
            .unwrap();
        assert_eq!(item, Item::Unit(42));
    }

    #[tokio::test]
    async fn test_stops_delivered_after_units() {
        let queue = BoundedWorkQueue::new(4).unwrap();
        queue.put_stop();
        queue.put(1u32).await;
        queue.put(2).await;

        // Real units drain before the stop marker even though the stop
        // was enqueued first.
        assert_eq!(queue.get().await, Item::Unit(1));
        queue.task_done();
        assert_eq!(queue.get().await, Item::Unit(2));
        queue.task_done();
        assert_eq!(queue.get().await, Item::<u32>::Stop);
        queue.task_done();
    }

    #[tokio::test]
    async fn test_graceful_drain() {
        // N workers, N stop markers: join returns and no worker remains
        // blocked on get.
        const WORKERS: usize = 4;
        let queue = Arc::new(BoundedWorkQueue::new(16).unwrap());

        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut seen = 0u32;
                loop {
                    match queue.get().await {
                        Item::Unit(_) => {
                            seen += 1;
                            queue.task_done();
                        },
                        Item::Stop => {
                            queue.task_done();
                            break;
                        },
                    }
                }
                seen
            }));
        }

        for i in 0..20u32 {
            queue.put(i).await;
        }
        for _ in 0..WORKERS {
            queue.put_stop();
        }

        timeout(Duration::from_secs(5), queue.join())
            .await
            .expect("join did not complete");

        let mut total = 0;
        for handle in handles {
            total += timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker still blocked")
                .unwrap();
        }
        // Each unit was owned by exactly one worker.
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_requeued_unit_goes_to_tail() {
        let queue = BoundedWorkQueue::new(4).unwrap();
        queue.put("first").await;
        queue.put("second").await;

        let Item::Unit(unit) = queue.get().await else {
            panic!("expected unit");
        };
        assert_eq!(unit, "first");
        // Transient failure: re-append at the tail, then ack the dequeue.
        queue.requeue(unit);
        queue.task_done();

        assert_eq!(queue.get().await, Item::Unit("second"));
        queue.task_done();
        assert_eq!(queue.get().await, Item::Unit("first"));
        queue.task_done();

        queue.join().await;
    }

    #[tokio::test]
    async fn test_requeue_bypasses_depth_bound() {
        let queue = BoundedWorkQueue::new(1).unwrap();
        queue.put(1u32).await;

        let Item::Unit(unit) = queue.get().await else {
            panic!("expected unit");
        };
        // Another producer grabs the freed slot before the retry lands.
        queue.try_put(2).unwrap();
        queue.requeue(unit);
        queue.task_done();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Item::Unit(2));
        queue.task_done();
        assert_eq!(queue.get().await, Item::Unit(1));
        queue.task_done();
        queue.join().await;
    }

    #[tokio::test]
    async fn test_flush_unblocks_join() {
        let queue = BoundedWorkQueue::new(8).unwrap();
        for i in 0..5u32 {
            queue.put(i).await;
        }

        let flushed = queue.flush();
        assert_eq!(flushed.len(), 5);
        assert!(queue.is_empty());

        timeout(Duration::from_secs(1), queue.join())
            .await
            .expect("join did not complete after flush");
    }
}
