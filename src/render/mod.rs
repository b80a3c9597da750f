//! Rendering engine boundary
//!
//! The crawler never loads pages itself. It drives an [`Engine`] that
//! launches one shared [`Browser`] handle, and each task opens its own
//! [`Session`] on that handle. Every outbound request a session makes is
//! first shown to the installed [`RequestFilter`].
//!
//! The [`http`] submodule provides a static engine built on `reqwest` and
//! `scraper`. Engines that drive a real browser implement the same traits.

pub mod dom;
pub mod http;

pub use http::HttpEngine;

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Category of a network request, as classified by the rendering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    EventSource,
    WebSocket,
    Manifest,
    Object,
    Beacon,
    ImageSet,
    Ping,
    CspReport,
    Other,
}

impl ResourceKind {
    /// Resource kinds that are never needed to discover page structure
    pub fn default_blocked() -> Vec<ResourceKind> {
        vec![
            Self::Image,
            Self::Media,
            Self::Font,
            Self::TextTrack,
            Self::Object,
            Self::Beacon,
            Self::ImageSet,
        ]
    }
}

/// When a navigation counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    /// The `load` event fired
    Load,
    /// The `DOMContentLoaded` event fired
    DomContentLoaded,
    /// No network connections for 500 ms
    NetworkIdle0,
    /// At most two network connections for 500 ms
    #[default]
    NetworkIdle2,
}

/// An outbound request, as seen by the request filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub kind: ResourceKind,
    /// True for top-level document navigations (including redirects)
    pub is_navigation: bool,
}

impl Request {
    /// A top-level document navigation
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ResourceKind::Document,
            is_navigation: true,
        }
    }

    /// A sub-resource request issued by the page
    pub fn resource(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            is_navigation: false,
        }
    }
}

/// Outcome of filtering a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

/// Decides whether a session may issue a request
pub trait RequestFilter: Send + Sync {
    fn decide(&self, request: &Request) -> Decision;
}

/// Options for launching the shared browser handle
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Outbound proxy every session sends its traffic through
    pub proxy: Option<String>,
    pub user_agent: String,
}

/// Options for a single navigation
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    pub wait_until: WaitUntil,
    pub timeout: Duration,
    /// Sent as the referrer of the top-level request
    pub referrer: Option<Url>,
}

/// Errors from a navigation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("Navigation timeout of {timeout_ms} ms exceeded")]
    Timeout { timeout_ms: u64 },

    #[error("Request blocked by filter: {0}")]
    Blocked(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors from the rendering engine outside of navigation
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("No element matches '{0}'")]
    NoMatch(String),

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A page-rendering capability that can launch the shared browser handle
#[async_trait]
pub trait Engine: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, RenderError>;
}

/// The shared browser-level handle
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a new isolated page/session
    async fn open_session(&self) -> Result<Box<dyn Session>, RenderError>;

    /// Tears down the handle; all sessions must already be closed
    async fn close(&self) -> Result<(), RenderError>;
}

/// One isolated page
#[async_trait]
pub trait Session: Send {
    /// Installs the filter consulted before every outbound request
    fn set_request_filter(&mut self, filter: Arc<dyn RequestFilter>);

    /// Loads `url` as the top-level document
    async fn navigate(&mut self, url: &Url, options: &NavigateOptions)
        -> Result<(), NavigationError>;

    /// URL of the currently loaded document, after redirects
    fn current_url(&self) -> Option<Url>;

    /// Returns `attribute` of every element matching `selector`
    async fn query_all(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, RenderError>;

    /// Runs a script in the page and returns its result as a string
    async fn evaluate(&mut self, script: &str) -> Result<String, RenderError>;

    /// Sets the value of the first element matching `selector`
    async fn type_text(&mut self, selector: &str, value: &str) -> Result<(), RenderError>;

    /// Clicks the first element matching `selector`
    async fn click(&mut self, selector: &str) -> Result<(), RenderError>;

    /// Waits for the navigation triggered by the last interaction
    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<(), NavigationError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), RenderError>;

    async fn close(&mut self) -> Result<(), RenderError>;
}
