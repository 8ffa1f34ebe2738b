//! Task Queue
//!
//! Bounded FIFO of sweep requests shared by the scheduler and the node crawlers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::Tier;
use crate::tasks::Crawlable;

// == Work Item ==
/// A request to sweep one tier of one shard.
#[derive(Clone)]
pub struct WorkItem {
    pub shard: Arc<dyn Crawlable>,
    pub tier: Tier,
    /// Row of the shard in the oldest-timestamp table
    pub shard_index: usize,
}

impl WorkItem {
    pub fn new(shard: Arc<dyn Crawlable>, tier: Tier, shard_index: usize) -> Self {
        Self {
            shard,
            tier,
            shard_index,
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("shard", &self.shard.index())
            .field("tier", &self.tier)
            .field("shard_index", &self.shard_index)
            .finish()
    }
}

// == Task Queue ==
/// Bounded multi-producer, multi-consumer FIFO.
///
/// A full queue drops new work instead of blocking the producer.
pub struct TaskQueue {
    items: Mutex<VecDeque<WorkItem>>,
    capacity: usize,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    // == Enqueue ==
    /// Appends `item` if there is room. Returns false if it was dropped.
    pub fn enqueue(&self, item: WorkItem) -> bool {
        let mut items = self.items.lock();
        if items.len() < self.capacity {
            debug!(shard = item.shard_index, tier = %item.tier, "Task added");
            items.push_back(item);
            true
        } else {
            trace!(shard = item.shard_index, tier = %item.tier, "Task queue full, dropping task");
            false
        }
    }

    // == Dequeue ==
    pub fn dequeue(&self) -> Option<WorkItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
