//! Crawl scheduling and orchestration
//!
//! This module contains the core crawling logic, including:
//! - The visited ledger that keeps every URL to a single visit
//! - The priority work queue and its worker pool
//! - The domain/resource policy applied to outbound requests
//! - Post-load page behaviors
//! - Overall crawl coordination

pub mod behaviors;
mod coordinator;
pub mod ledger;
pub mod policy;
pub mod queue;

pub use coordinator::{Crawler, ErrorRecord, DEFAULT_PRIORITY};
pub use ledger::VisitedLedger;
pub use policy::{BlockReason, Policy, SessionFilter};
pub use queue::{Task, TaskHandler, TaskOptions, WorkQueue};

use crate::config::Config;
use crate::render::Engine;
use std::sync::Arc;

/// Runs a complete crawl with the given engine
///
/// Seeds from the configuration are queued, the crawl runs until it goes
/// quiet, and the engine is shut down. The returned crawler can still be
/// inspected for errors and statistics.
///
/// # Returns
///
/// * `Ok(Crawler)` - The crawl ran to completion (pages may have failed)
/// * `Err(TrawlError)` - The crawl could not run at all
pub async fn crawl(config: Config, engine: Arc<dyn Engine>) -> crate::Result<Crawler> {
    let crawler = Crawler::new(config, engine);
    crawler.init()?;

    let outcome = crawler.on_idle().await;
    crawler.close().await?;
    outcome.map(|()| crawler)
}
