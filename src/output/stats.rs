//! Crawl statistics
//!
//! Counters are updated by workers while the crawl runs and read back as a
//! [`CrawlStatistics`] snapshot for the end-of-run report.

use crate::crawler::ErrorRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters shared by all workers
#[derive(Debug)]
pub struct CrawlStats {
    started: Instant,
    pages_done: AtomicU64,
    pages_failed: AtomicU64,
    pages_timed_out: AtomicU64,
    links_discovered: AtomicU64,
    links_queued: AtomicU64,
    requests_blocked: AtomicU64,
    forms_submitted: AtomicU64,
    screenshots: AtomicU64,
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            pages_done: AtomicU64::new(0),
            pages_failed: AtomicU64::new(0),
            pages_timed_out: AtomicU64::new(0),
            links_discovered: AtomicU64::new(0),
            links_queued: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            forms_submitted: AtomicU64::new(0),
            screenshots: AtomicU64::new(0),
        }
    }
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_done(&self) {
        self.pages_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn page_timed_out(&self) {
        self.pages_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_discovered(&self) {
        self.links_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_queued(&self) {
        self.links_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_blocked(&self, count: u64) {
        self.requests_blocked.fetch_add(count, Ordering::Relaxed);
    }

    pub fn form_submitted(&self) {
        self.forms_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn screenshot_taken(&self) {
        self.screenshots.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of the counters
    pub fn snapshot(&self, pages_visited: u64) -> CrawlStatistics {
        CrawlStatistics {
            pages_visited,
            pages_done: self.pages_done.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            pages_timed_out: self.pages_timed_out.load(Ordering::Relaxed),
            links_discovered: self.links_discovered.load(Ordering::Relaxed),
            links_queued: self.links_queued.load(Ordering::Relaxed),
            requests_blocked: self.requests_blocked.load(Ordering::Relaxed),
            forms_submitted: self.forms_submitted.load(Ordering::Relaxed),
            screenshots: self.screenshots.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStatistics {
    /// URLs claimed in the visited ledger
    pub pages_visited: u64,

    /// Pages whose task reached `Done`
    pub pages_done: u64,

    /// Pages whose task ended in `Failed`
    pub pages_failed: u64,

    /// Navigations that hit their timeout (these may still be `Done`)
    pub pages_timed_out: u64,

    /// Same-site links found on loaded pages, before deduplication
    pub links_discovered: u64,

    /// Links that were new and got scheduled
    pub links_queued: u64,

    /// Outbound requests refused by the policy
    pub requests_blocked: u64,

    pub forms_submitted: u64,

    pub screenshots: u64,

    pub elapsed: Duration,
}

impl CrawlStatistics {
    /// Pages per second over the whole run
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.pages_done + self.pages_failed) as f64 / secs
        } else {
            0.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Pages:");
    println!("  Visited: {}", stats.pages_visited);
    println!("  Done: {}", stats.pages_done);
    println!("  Failed: {}", stats.pages_failed);
    println!("  Timed out: {}", stats.pages_timed_out);
    println!();

    println!("Links:");
    println!("  Discovered: {}", stats.links_discovered);
    println!("  Queued: {}", stats.links_queued);
    println!();

    println!("Automation:");
    println!("  Forms submitted: {}", stats.forms_submitted);
    println!("  Screenshots: {}", stats.screenshots);
    println!("  Requests blocked: {}", stats.requests_blocked);
    println!();

    println!(
        "Elapsed: {:.1}s ({:.2} pages/sec)",
        stats.elapsed.as_secs_f64(),
        stats.rate()
    );
}

/// Prints the error records, oldest first
pub fn print_error_report(errors: &[ErrorRecord]) {
    if errors.is_empty() {
        println!("\nNo errors.");
        return;
    }

    println!("\n=== Errors ({}) ===\n", errors.len());
    for record in errors {
        println!(
            "  [{}] {}: {}",
            record.at.format("%H:%M:%S"),
            record.url,
            record.error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = CrawlStats::new();
        stats.page_done();
        stats.page_done();
        stats.page_failed();
        stats.page_timed_out();
        stats.link_discovered();
        stats.link_discovered();
        stats.link_queued();
        stats.requests_blocked(7);

        let snapshot = stats.snapshot(3);
        assert_eq!(snapshot.pages_visited, 3);
        assert_eq!(snapshot.pages_done, 2);
        assert_eq!(snapshot.pages_failed, 1);
        assert_eq!(snapshot.pages_timed_out, 1);
        assert_eq!(snapshot.links_discovered, 2);
        assert_eq!(snapshot.links_queued, 1);
        assert_eq!(snapshot.requests_blocked, 7);
        assert_eq!(snapshot.forms_submitted, 0);
    }

    #[test]
    fn test_rate_with_zero_elapsed() {
        let snapshot = CrawlStats::new().snapshot(0);
        let zero = CrawlStatistics {
            elapsed: Duration::ZERO,
            ..snapshot
        };
        assert_eq!(zero.rate(), 0.0);
    }
}
