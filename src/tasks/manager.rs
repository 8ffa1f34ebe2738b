//! Maintenance Manager
//!
//! Owns the scheduler and the worker pool: builds them around a shared queue
//! and timestamp table, spawns one periodic task for each, and stops them.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ValidatedConfig;
use crate::error::{CacheError, Result};
use crate::tasks::{
    policy_for, Crawlable, Crawler, EvictionPolicy, NodeCrawler, OldestTimestampTable, TaskQueue,
};

/// How the background maintenance is sized and paced.
#[derive(Clone)]
pub struct MaintenanceSettings {
    pub queue_size: usize,
    pub workers: usize,
    pub crawl_interval: Duration,
    pub worker_interval: Duration,
    pub policy: Arc<dyn EvictionPolicy>,
}

impl MaintenanceSettings {
    pub fn from_config(config: &ValidatedConfig) -> Self {
        Self {
            queue_size: config.queue_size,
            workers: config.workers,
            crawl_interval: config.crawl_interval,
            worker_interval: config.worker_interval,
            policy: policy_for(config.policy),
        }
    }
}

/// Running background maintenance: one crawler task plus `workers` node
/// crawler tasks, each on its own timer.
///
/// Dropping it cancels every task without waiting for them.
pub struct Maintenance {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    crawler: Arc<Crawler>,
    workers: Vec<Arc<NodeCrawler>>,
}

impl Maintenance {
    // == Start ==
    /// Spawns the crawler and worker tasks on the current tokio runtime.
    pub fn start(shards: Vec<Arc<dyn Crawlable>>, settings: MaintenanceSettings) -> Result<Self> {
        if Handle::try_current().is_err() {
            return Err(CacheError::Runtime(
                "background maintenance needs a tokio runtime".to_string(),
            ));
        }
        if settings.workers == 0 {
            return Err(CacheError::InvalidConfig(
                "at least one node crawler is required".to_string(),
            ));
        }

        let token = CancellationToken::new();
        let queue = Arc::new(TaskQueue::new(settings.queue_size));
        let crawler = Arc::new(Crawler::new(
            shards,
            Arc::clone(&queue),
            Arc::clone(&settings.policy),
        ));

        let workers: Vec<Arc<NodeCrawler>> = (0..settings.workers)
            .map(|index| {
                Arc::new(NodeCrawler::new(
                    index,
                    Arc::clone(&queue),
                    Arc::clone(crawler.table()),
                    Arc::clone(&settings.policy),
                ))
            })
            .collect();

        let mut handles = Vec::with_capacity(workers.len() + 1);
        for worker in &workers {
            handles.push(Arc::clone(worker).spawn(settings.worker_interval, token.child_token()));
        }
        handles.push(Arc::clone(&crawler).spawn(settings.crawl_interval, token.child_token()));

        info!(
            workers = workers.len(),
            queue_size = settings.queue_size,
            policy = settings.policy.name(),
            "Background maintenance started"
        );

        Ok(Self {
            token,
            handles: Mutex::new(handles),
            crawler,
            workers,
        })
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        self.crawler.queue()
    }

    pub fn table(&self) -> &Arc<OldestTimestampTable> {
        self.crawler.table()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.handles.lock().iter().any(|h| !h.is_finished())
    }

    // == Shutdown ==
    /// Stops all timers, letting in-flight sweeps finish for up to `grace`.
    /// Tasks still running after that are aborted. Returns true if every
    /// task stopped on its own.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.token.cancel();

        let handles = std::mem::take(&mut *self.handles.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(grace, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!("Maintenance task ended abnormally: {}", err);
                    }
                }
                info!("Background maintenance stopped");
                true
            }
            Err(_) => {
                warn!("Maintenance did not stop within {:?}, aborting", grace);
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
