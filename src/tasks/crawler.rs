//! TTL Crawler
//!
//! Periodic scheduler that looks at every shard's oldest known timestamps and
//! queues a sweep for each tier that may hold expired items.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::Tier;
use crate::tasks::{Crawlable, EvictionPolicy, OldestTimestampTable, TaskQueue, WorkItem};

/// Scheduler half of the background maintenance.
pub struct Crawler {
    shards: Vec<Arc<dyn Crawlable>>,
    table: Arc<OldestTimestampTable>,
    queue: Arc<TaskQueue>,
    policy: Arc<dyn EvictionPolicy>,
}

impl Crawler {
    /// Seeds the timestamp table with the current time for every shard and tier.
    pub fn new(
        shards: Vec<Arc<dyn Crawlable>>,
        queue: Arc<TaskQueue>,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Self {
        let table = Arc::new(OldestTimestampTable::new(shards.len(), Instant::now()));
        Self {
            shards,
            table,
            queue,
            policy,
        }
    }

    pub fn table(&self) -> &Arc<OldestTimestampTable> {
        &self.table
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    // == Schedule ==
    /// One scheduling pass. Empty shards are skipped. Returns how many work
    /// items the queue accepted.
    ///
    /// The same (shard, tier) may be queued again on the next pass before a
    /// worker has picked up the first request; sweeps tolerate that.
    pub fn schedule(&self) -> usize {
        let now = Instant::now();
        let mut enqueued = 0;

        for (pos, shard) in self.shards.iter().enumerate() {
            if shard.filled() == 0 {
                continue;
            }
            for tier in Tier::ALL {
                let Some(oldest) = self.table.get(pos, tier) else {
                    continue;
                };
                if self.policy.should_sweep(shard.as_ref(), tier, oldest, now)
                    && self
                        .queue
                        .enqueue(WorkItem::new(Arc::clone(shard), tier, pos))
                {
                    enqueued += 1;
                }
            }
        }

        enqueued
    }

    // == Spawn ==
    /// Runs [`Self::schedule`] every `interval` until `token` is cancelled.
    ///
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                policy = self.policy.name(),
                shards = self.shards.len(),
                "Starting crawler with interval of {:?}",
                interval
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("Crawler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let enqueued = self.schedule();
                        if enqueued > 0 {
                            debug!(enqueued, queued = self.queue.len(), "Crawler queued sweeps");
                        }
                    }
                }
            }
        })
    }
}
