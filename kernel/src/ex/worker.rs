//! Executive Work Queues (System Work Queue)
//!
//! Lets kernel components defer work from a context that must not block
//! to a system worker thread. The object manager queues its deferred
//! deletion drain here when the last reference to an object is dropped
//! at raised IRQL.
//!
//! # NT Semantics
//!
//! Three queues with different priorities:
//! - **CriticalWorkQueue**: Highest priority, time-critical work
//! - **DelayedWorkQueue**: Normal priority, general work
//! - **HyperCriticalWorkQueue**: Emergency work during low resources
//!
//! # Usage
//! ```ignore
//! let queues = SystemWorkQueue::new();
//! queues.queue_work_item(
//!     WorkQueueItem::new(|| log::info!("deferred")),
//!     WorkQueueType::DelayedWorkQueue,
//! );
//!
//! // worker thread loop
//! queues.run_pending(WorkQueueType::DelayedWorkQueue, usize::MAX);
//! ```
//!
//! The library owns no threads; the embedding kernel runs `run_pending`
//! from its worker threads.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Work queue types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WorkQueueType {
    /// Time-critical work, higher priority
    CriticalWorkQueue = 0,
    /// Normal work items
    DelayedWorkQueue = 1,
    /// Emergency work during resource exhaustion
    HyperCriticalWorkQueue = 2,
}

const WORK_QUEUE_COUNT: usize = 3;

/// Work queue item (WORK_QUEUE_ITEM)
///
/// Owns the routine it runs; queueing moves the item into the queue.
pub struct WorkQueueItem {
    routine: Box<dyn FnOnce() + Send>,
}

impl WorkQueueItem {
    pub fn new<F>(routine: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            routine: Box::new(routine),
        }
    }

    /// Execute the work item
    fn execute(self) {
        (self.routine)();
    }
}

/// Work queue collaborator
///
/// Anything that can run a work item later, on a thread that may block.
pub trait WorkQueue: Send + Sync {
    /// Queue an item (ExQueueWorkItem)
    fn queue_work_item(&self, item: WorkQueueItem, queue_type: WorkQueueType);
}

struct Queue {
    items: Mutex<VecDeque<WorkQueueItem>>,
    processed: AtomicUsize,
}

impl Queue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            processed: AtomicUsize::new(0),
        }
    }
}

/// In-kernel work queues drained by the embedder's worker threads
pub struct SystemWorkQueue {
    queues: [Queue; WORK_QUEUE_COUNT],
}

impl SystemWorkQueue {
    pub fn new() -> Self {
        Self {
            queues: [Queue::new(), Queue::new(), Queue::new()],
        }
    }

    /// Run up to `max_items` items from one queue
    ///
    /// Items are popped one at a time so a routine may queue further work
    /// without deadlocking. Returns the number of items executed.
    pub fn run_pending(&self, queue_type: WorkQueueType, max_items: usize) -> usize {
        let queue = &self.queues[queue_type as usize];
        let mut processed = 0;

        while processed < max_items {
            let item = queue.items.lock().pop_front();
            match item {
                Some(item) => {
                    item.execute();
                    processed += 1;
                }
                None => break,
            }
        }

        queue.processed.fetch_add(processed, Ordering::Relaxed);
        processed
    }

    /// Drain every queue, highest priority first, until all are empty
    pub fn drain(&self) -> usize {
        let order = [
            WorkQueueType::HyperCriticalWorkQueue,
            WorkQueueType::CriticalWorkQueue,
            WorkQueueType::DelayedWorkQueue,
        ];

        let mut total = 0;
        loop {
            let ran: usize = order
                .iter()
                .map(|queue_type| self.run_pending(*queue_type, usize::MAX))
                .sum();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Get the number of pending items in a queue
    pub fn depth(&self, queue_type: WorkQueueType) -> usize {
        self.queues[queue_type as usize].items.lock().len()
    }

    /// Total items ever executed from a queue
    pub fn processed(&self, queue_type: WorkQueueType) -> usize {
        self.queues[queue_type as usize]
            .processed
            .load(Ordering::Relaxed)
    }
}

impl Default for SystemWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue for SystemWorkQueue {
    fn queue_work_item(&self, item: WorkQueueItem, queue_type: WorkQueueType) {
        self.queues[queue_type as usize].items.lock().push_back(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::AtomicU32;

    #[test]
    fn test_work_item_runs_once() {
        let queues = SystemWorkQueue::new();
        let hits = Arc::new(AtomicU32::new(0));

        let counter = hits.clone();
        queues.queue_work_item(
            WorkQueueItem::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            WorkQueueType::DelayedWorkQueue,
        );

        assert_eq!(queues.depth(WorkQueueType::DelayedWorkQueue), 1);
        assert_eq!(queues.run_pending(WorkQueueType::CriticalWorkQueue, 8), 0);
        assert_eq!(queues.run_pending(WorkQueueType::DelayedWorkQueue, 8), 1);
        assert_eq!(queues.run_pending(WorkQueueType::DelayedWorkQueue, 8), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(queues.processed(WorkQueueType::DelayedWorkQueue), 1);
    }

    #[test]
    fn test_drain_follows_requeued_work() {
        let queues = Arc::new(SystemWorkQueue::new());
        let hits = Arc::new(AtomicU32::new(0));

        let inner_queues = queues.clone();
        let counter = hits.clone();
        queues.queue_work_item(
            WorkQueueItem::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = counter.clone();
                inner_queues.queue_work_item(
                    WorkQueueItem::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                    WorkQueueType::CriticalWorkQueue,
                );
            }),
            WorkQueueType::DelayedWorkQueue,
        );

        assert_eq!(queues.drain(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
