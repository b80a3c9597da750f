//! Visited ledger: the crawl's deduplication set
//!
//! URLs are claimed when they are enqueued, not when they finish, so two
//! pages discovering the same link at the same moment cannot both schedule
//! it. Entries are never evicted during a run.

use crate::url::canonicalize;
use dashmap::DashSet;
use url::Url;

/// Concurrent set of canonical URLs that have been scheduled
#[derive(Debug, Default)]
pub struct VisitedLedger {
    seen: DashSet<String>,
}

impl VisitedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a URL for scheduling
    ///
    /// The URL is canonicalized (fragment stripped) and inserted in a single
    /// atomic check-and-insert.
    ///
    /// # Returns
    ///
    /// * `true` - The URL was not present; the caller now owns scheduling it
    /// * `false` - The URL was already claimed (or cannot be canonicalized)
    pub fn try_claim(&self, url: &Url) -> bool {
        match canonicalize(url.clone()) {
            Ok(canonical) => self.seen.insert(canonical.into()),
            Err(e) => {
                tracing::debug!("Refusing to claim {}: {}", url, e);
                false
            }
        }
    }

    /// Returns true if the URL has already been claimed
    pub fn contains(&self, url: &Url) -> bool {
        canonicalize(url.clone())
            .map(|canonical| self.seen.contains(canonical.as_str()))
            .unwrap_or(false)
    }

    /// Number of claimed URLs
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
