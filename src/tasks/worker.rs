//! Node Crawler
//!
//! Workers that take sweep requests off the task queue, one per tick, and run
//! them against the shard they name.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::Tier;
use crate::error::CacheError;
use crate::tasks::{EvictionPolicy, OldestTimestampTable, TaskQueue};

/// What a single worker tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A previous sweep is still running
    Busy,
    /// The queue was empty
    Idle,
    Swept { shard: usize, tier: Tier },
    Failed(CacheError),
}

/// Clears the busy flag on every exit path.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One worker of the crawler pool.
pub struct NodeCrawler {
    index: usize,
    busy: AtomicBool,
    queue: Arc<TaskQueue>,
    table: Arc<OldestTimestampTable>,
    policy: Arc<dyn EvictionPolicy>,
}

impl NodeCrawler {
    pub fn new(
        index: usize,
        queue: Arc<TaskQueue>,
        table: Arc<OldestTimestampTable>,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Self {
        Self {
            index,
            busy: AtomicBool::new(false),
            queue,
            table,
            policy,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    // == Tick ==
    /// Takes at most one work item and sweeps it.
    ///
    /// The sweep runs on the blocking pool and is always awaited to the end;
    /// a failure or panic is logged and never retried.
    pub async fn tick(&self) -> TickOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::Busy;
        }
        let _busy = BusyGuard(&self.busy);

        let Some(work) = self.queue.dequeue() else {
            return TickOutcome::Idle;
        };
        let (shard_index, tier) = (work.shard_index, work.tier);
        debug!(worker = self.index, ?work, "Task taken");

        let policy = Arc::clone(&self.policy);
        let shard = Arc::clone(&work.shard);
        let result = tokio::task::spawn_blocking(move || policy.sweep(shard.as_ref(), tier)).await;

        let error = match result {
            Ok(Ok(oldest)) => {
                self.table.set(shard_index, tier, oldest);
                debug!(worker = self.index, shard = shard_index, %tier, "Finished cleaning");
                return TickOutcome::Swept {
                    shard: shard_index,
                    tier,
                };
            }
            Ok(Err(err)) => err,
            Err(join) => CacheError::Sweep {
                shard: shard_index,
                tier,
                reason: join.to_string(),
            },
        };

        warn!(worker = self.index, shard = shard_index, %tier, "Error while cleaning: {}", error);
        TickOutcome::Failed(error)
    }

    // == Spawn ==
    /// Calls [`Self::tick`] every `interval` until `token` is cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(worker = self.index, "Starting node crawler with interval of {:?}", interval);

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(worker = self.index, "Node crawler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
        })
    }
}
