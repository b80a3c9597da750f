use crate::render::{ResourceKind, WaitUntil};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Trawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default, rename = "form")]
    pub forms: Vec<FormConfig>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URLs the crawl starts from
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Maximum number of pages open at once
    #[serde(rename = "max-concurrency", default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Navigation timeout (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// When a navigation counts as finished
    #[serde(rename = "wait-until", default)]
    pub wait_until: WaitUntil,

    /// Requests to the same URL allowed within one page load
    #[serde(rename = "retry-ceiling", default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Upper bound on scroll emulation per page (milliseconds)
    #[serde(rename = "max-scroll-duration", default = "default_max_scroll_duration")]
    pub max_scroll_duration: u64,

    /// Maximum link depth from a seed; unlimited when absent
    #[serde(rename = "max-depth", default)]
    pub max_depth: Option<u32>,

    /// User agent string sent by every session
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Listen address of the outbound filtering proxy
    #[serde(default)]
    pub proxy: Option<String>,
}

impl CrawlerConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn scroll_budget(&self) -> Duration {
        Duration::from_millis(self.max_scroll_duration)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_concurrency: default_max_concurrency(),
            timeout: default_timeout(),
            wait_until: WaitUntil::default(),
            retry_ceiling: default_retry_ceiling(),
            max_scroll_duration: default_max_scroll_duration(),
            max_depth: None,
            user_agent: default_user_agent(),
            proxy: None,
        }
    }
}

/// Request filtering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Allowed registrable domains (apex and all subdomains are crawled)
    pub domains: Vec<String>,

    /// Operator-supplied URL substrings that are always blocked
    #[serde(rename = "block-list", default)]
    pub block_list: Vec<String>,

    /// Whether the built-in analytics/ad vendor list is applied as well
    #[serde(rename = "use-default-block-list", default = "default_true")]
    pub use_default_block_list: bool,

    /// URL prefixes of the crawler's own diagnostics channel, always allowed
    #[serde(rename = "telemetry-endpoints", default)]
    pub telemetry_endpoints: Vec<String>,

    /// Resource kinds that are never loaded
    #[serde(rename = "blocked-resource-kinds", default = "ResourceKind::default_blocked")]
    pub blocked_resource_kinds: Vec<ResourceKind>,
}

/// Output configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Directory screenshots are written to; disabled when absent
    #[serde(default)]
    pub screenshots: Option<PathBuf>,
}

/// Login form automation entry
#[derive(Debug, Clone, Deserialize)]
pub struct FormConfig {
    /// Glob pattern (`*` wildcard) of page URLs the form lives on
    #[serde(rename = "url-pattern")]
    pub url_pattern: String,

    /// Field selector -> value to type into it
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Selector of the element that submits the form
    #[serde(rename = "submit-selector")]
    pub submit_selector: String,
}

/// Available parallelism minus one, never below one
pub fn default_max_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

fn default_timeout() -> u64 {
    30_000
}

fn default_retry_ceiling() -> u32 {
    5
}

fn default_max_scroll_duration() -> u64 {
    5_000
}

fn default_user_agent() -> String {
    format!("sumi-trawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}
