//! Domain and resource policy for outbound requests
//!
//! [`Policy`] holds the immutable rules and exposes a pure decision function.
//! [`SessionFilter`] binds a policy to one rendering session and owns the
//! only mutable inputs: the per-load attempt counter and the timed-out flag.

use crate::config::PolicyConfig;
use crate::render::{Decision, Request, RequestFilter, ResourceKind};
use crate::url::{is_domain_allowed, normalize_resource_url};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

/// Third-party analytics and ad vendors that never help link discovery
pub const DEFAULT_BLOCKED_SUBSTRINGS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "googleadservices.com",
    "googlesyndication.com",
    "doubleclick.net",
    "adservice.google.",
    "connect.facebook.net",
    "facebook.com/tr",
    "bat.bing.com",
    "hotjar.com",
    "fullstory.com",
    "mixpanel.com",
    "segment.io",
    "cdn.segment.com",
    "amplitude.com",
    "newrelic.com",
    "nr-data.net",
    "optimizely.com",
    "scorecardresearch.com",
    "quantserve.com",
    "criteo.com",
    "taboola.com",
    "outbrain.com",
    "adsrvr.org",
    "clarity.ms",
];

/// Why a request was blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The owning page's navigation already timed out
    TimedOut,
    /// Too many requests to the same URL during this page load
    RetryCeiling,
    /// The resource kind is not needed for link discovery
    ResourceKind,
    /// The URL contains a denylisted substring
    Denylisted,
    /// A document navigation left the allowed domains
    ForeignDomain,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::TimedOut => "page timed out",
            Self::RetryCeiling => "retry ceiling exceeded",
            Self::ResourceKind => "blocked resource kind",
            Self::Denylisted => "denylisted",
            Self::ForeignDomain => "outside allowed domains",
        };
        f.write_str(reason)
    }
}

/// Immutable request filtering rules
#[derive(Debug, Clone)]
pub struct Policy {
    allowed_domains: Vec<String>,
    blocked_kinds: HashSet<ResourceKind>,
    blocked_substrings: Vec<String>,
    telemetry_prefixes: Vec<String>,
    retry_ceiling: u32,
}

impl Policy {
    /// Builds a policy from configuration
    ///
    /// The curated vendor list is merged with the operator block list unless
    /// `use-default-block-list` is turned off.
    pub fn new(config: &PolicyConfig, retry_ceiling: u32) -> Self {
        let mut blocked_substrings: Vec<String> = Vec::new();
        if config.use_default_block_list {
            blocked_substrings.extend(DEFAULT_BLOCKED_SUBSTRINGS.iter().map(|s| s.to_string()));
        }
        blocked_substrings.extend(config.block_list.iter().cloned());

        Self {
            allowed_domains: config.domains.clone(),
            blocked_kinds: config.blocked_resource_kinds.iter().copied().collect(),
            blocked_substrings,
            telemetry_prefixes: config.telemetry_endpoints.clone(),
            retry_ceiling,
        }
    }

    pub fn allowed_domains(&self) -> &[String] {
        &self.allowed_domains
    }

    /// True for the crawler's own diagnostics endpoints
    pub fn is_telemetry(&self, url: &str) -> bool {
        self.telemetry_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }

    pub fn is_denylisted(&self, url: &str) -> bool {
        self.blocked_substrings
            .iter()
            .any(|needle| url.contains(needle.as_str()))
    }

    /// Applies the rules in order and returns the first one that blocks
    ///
    /// `attempts` is the number of requests to this URL seen during the
    /// current page load, including this one.
    pub fn judge(&self, request: &Request, timed_out: bool, attempts: u32) -> Option<BlockReason> {
        if self.is_telemetry(&request.url) {
            return None;
        }

        if timed_out {
            return Some(BlockReason::TimedOut);
        }

        if attempts > self.retry_ceiling {
            return Some(BlockReason::RetryCeiling);
        }

        if self.blocked_kinds.contains(&request.kind) {
            return Some(BlockReason::ResourceKind);
        }

        if self.is_denylisted(&request.url) {
            return Some(BlockReason::Denylisted);
        }

        if request.is_navigation {
            let in_scope = Url::parse(&request.url)
                .map(|url| is_domain_allowed(&url, &self.allowed_domains))
                .unwrap_or(false);
            if !in_scope {
                return Some(BlockReason::ForeignDomain);
            }
        }

        None
    }

    /// Pure allow/block decision
    pub fn evaluate(&self, request: &Request, timed_out: bool, attempts: u32) -> Decision {
        match self.judge(request, timed_out, attempts) {
            Some(_) => Decision::Block,
            None => Decision::Allow,
        }
    }

    /// Whether a discovered link may be scheduled as a new page
    ///
    /// This is the document-navigation rule applied ahead of time, plus the
    /// denylist, so links that would be blocked on load are never queued.
    pub fn is_crawlable(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && is_domain_allowed(url, &self.allowed_domains)
            && !self.is_denylisted(url.as_str())
    }

    /// Creates a fresh filter for one rendering session
    pub fn session_filter(self: &Arc<Self>) -> Arc<SessionFilter> {
        Arc::new(SessionFilter::new(self.clone()))
    }
}

/// Request filter bound to a single rendering session
#[derive(Debug)]
pub struct SessionFilter {
    policy: Arc<Policy>,
    attempts: Mutex<HashMap<String, u32>>,
    timed_out: AtomicBool,
    blocked: AtomicU64,
}

impl SessionFilter {
    pub fn new(policy: Arc<Policy>) -> Self {
        Self {
            policy,
            attempts: Mutex::new(HashMap::new()),
            timed_out: AtomicBool::new(false),
            blocked: AtomicU64::new(0),
        }
    }

    /// Starts a new task: clears attempt counts and the timed-out flag
    pub fn reset(&self) {
        self.reset_attempts();
        self.timed_out.store(false, Ordering::SeqCst);
    }

    /// Starts a new page load within the same task
    ///
    /// The timed-out flag survives, so a page that timed out stays blocked.
    pub fn reset_attempts(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Blocks every further non-telemetry request on this session
    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Number of requests this filter has blocked
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Relaxed)
    }

    fn record_attempt(&self, url: &str) -> u32 {
        let key = normalize_resource_url(url);
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = attempts.entry(key).or_insert(0);
        *count += 1;
        *count
    }
}

impl RequestFilter for SessionFilter {
    fn decide(&self, request: &Request) -> Decision {
        let attempts = self.record_attempt(&request.url);
        match self.policy.judge(request, self.is_timed_out(), attempts) {
            Some(reason) => {
                self.blocked.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Blocked {:?} {} ({})", request.kind, request.url, reason);
                Decision::Block
            }
            None => Decision::Allow,
        }
    }
}
