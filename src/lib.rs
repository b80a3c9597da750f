//! Sumi-Trawl: a browser-driven domain crawler
//!
//! This crate schedules page visits across a single site: it deduplicates
//! discovered links, runs a bounded number of rendering sessions in parallel,
//! filters every outbound request through a domain/resource policy, and
//! detects when the crawl has gone quiet.

pub mod config;
pub mod crawler;
pub mod output;
pub mod render;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Trawl operations
///
/// Only conditions that stop the whole crawl surface here. Failures of a
/// single page are recorded as [`TaskError`]s instead.
#[derive(Debug, Error)]
pub enum TrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Failed to launch rendering engine: {0}")]
    BrowserLaunch(String),

    #[error("Rendering engine error: {0}")]
    Render(#[from] render::RenderError),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskState,
        to: state::TaskState,
    },

    #[error("Crawler is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Failure of a single crawl task, kept in the error record list
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Navigation timeout of {timeout_ms} ms exceeded")]
    NavigationTimeout { timeout_ms: u64 },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Post-processing failed: {0}")]
    PostProcessing(String),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Returns true if post-load processing should still run after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NavigationTimeout { .. })
    }
}

impl From<render::NavigationError> for TaskError {
    fn from(error: render::NavigationError) -> Self {
        match error {
            render::NavigationError::Timeout { timeout_ms } => Self::NavigationTimeout { timeout_ms },
            other => Self::Navigation(other.to_string()),
        }
    }
}


/// Result type alias for Sumi-Trawl operations
pub type Result<T> = std::result::Result<T, TrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, ErrorRecord};
pub use state::TaskState;
pub use url::{canonicalize_url, registrable_domain};
