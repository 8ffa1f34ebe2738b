//! Background Tasks Module
//!
//! Maintenance that runs beside client traffic.
//!
//! # Tasks
//! - Crawler: periodically queues sweeps for tiers that may hold expired items
//! - Node crawlers: a worker pool that takes one queued sweep per tick and runs it

mod crawler;
mod manager;
mod policy;
mod queue;
mod worker;

pub use crawler::Crawler;
pub use manager::{Maintenance, MaintenanceSettings};
pub use policy::{policy_for, Crawlable, EvictionPolicy, OldestTimestampTable, TtlPolicy};
pub use queue::{TaskQueue, WorkItem};
pub use worker::{NodeCrawler, TickOutcome};
