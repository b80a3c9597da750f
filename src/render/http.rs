//! Static rendering engine
//!
//! Loads documents with a shared `reqwest` client and answers DOM queries
//! with `scraper`. It runs no scripts, so script evaluation and screenshots
//! report [`RenderError::Unsupported`]. Redirects are followed by hand so the
//! request filter sees every hop.

use crate::render::dom::{self, FormMethod, PlannedNavigation};
use crate::render::{
    Browser, Decision, Engine, LaunchOptions, NavigateOptions, NavigationError, RenderError,
    Request, RequestFilter, Session,
};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION, REFERER};
use reqwest::{redirect, Client, Method, StatusCode};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed for one navigation
const MAX_REDIRECTS: usize = 20;

/// Engine that launches a [`HttpBrowser`]
#[derive(Debug, Clone, Default)]
pub struct HttpEngine;

impl HttpEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the shared HTTP client
///
/// Redirects are disabled so sessions can filter each hop.
pub fn build_http_client(options: &LaunchOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(options.user_agent.clone())
        .connect_timeout(Duration::from_secs(10))
        .redirect(redirect::Policy::none())
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &options.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

#[async_trait]
impl Engine for HttpEngine {
    async fn launch(&self, options: &LaunchOptions) -> Result<Arc<dyn Browser>, RenderError> {
        let client =
            build_http_client(options).map_err(|e| RenderError::Launch(e.to_string()))?;

        match &options.proxy {
            Some(proxy) => tracing::info!("HTTP engine ready (proxy: {})", proxy),
            None => tracing::info!("HTTP engine ready"),
        }

        Ok(Arc::new(HttpBrowser {
            client,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Shared browser handle of the static engine
#[derive(Debug)]
pub struct HttpBrowser {
    client: Client,
    open_sessions: Arc<AtomicUsize>,
    closed: AtomicBool,
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn open_session(&self) -> Result<Box<dyn Session>, RenderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RenderError::Session("browser is closed".to_string()));
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            filter: None,
            document: None,
            typed: Vec::new(),
            planned: None,
            referrer: None,
            open_sessions: self.open_sessions.clone(),
            closed: false,
        }))
    }

    async fn close(&self) -> Result<(), RenderError> {
        let open = self.open_sessions.load(Ordering::SeqCst);
        if open > 0 {
            tracing::warn!("Closing browser with {} sessions still open", open);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A loaded document
#[derive(Debug, Clone)]
struct Document {
    url: Url,
    html: String,
}

/// One page of the static engine
pub struct HttpSession {
    client: Client,
    filter: Option<Arc<dyn RequestFilter>>,
    document: Option<Document>,
    /// Values typed since the last navigation, selector -> value
    typed: Vec<(String, String)>,
    /// Navigation queued by the last click
    planned: Option<PlannedNavigation>,
    referrer: Option<Url>,
    open_sessions: Arc<AtomicUsize>,
    closed: bool,
}

impl HttpSession {
    fn allow(&self, url: &Url) -> Result<(), NavigationError> {
        let decision = self
            .filter
            .as_ref()
            .map(|filter| filter.decide(&Request::navigation(url.as_str())))
            .unwrap_or(Decision::Allow);

        match decision {
            Decision::Allow => Ok(()),
            Decision::Block => Err(NavigationError::Blocked(url.to_string())),
        }
    }

    fn document(&self) -> Result<&Document, RenderError> {
        self.document
            .as_ref()
            .ok_or_else(|| RenderError::Session("no document loaded".to_string()))
    }

    /// Performs a navigation, following redirects through the filter
    async fn load(&mut self, planned: PlannedNavigation) -> Result<(), NavigationError> {
        self.document = None;
        self.typed.clear();

        let PlannedNavigation {
            mut method,
            mut url,
            mut form,
        } = planned;

        for _ in 0..=MAX_REDIRECTS {
            url.set_fragment(None);
            self.allow(&url)?;

            let mut request = self.client.request(
                match method {
                    FormMethod::Get => Method::GET,
                    FormMethod::Post => Method::POST,
                },
                url.clone(),
            );
            if let Some(referrer) = &self.referrer {
                request = request.header(REFERER, referrer.as_str());
            }
            if let Some(pairs) = &form {
                request = request.form(pairs);
            }

            let response = request.send().await.map_err(classify_error)?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        NavigationError::Failed(format!("HTTP {} without Location", status))
                    })?;
                let next = url.join(location).map_err(|e| {
                    NavigationError::Failed(format!("Bad redirect '{}': {}", location, e))
                })?;

                tracing::debug!("Redirect {} -> {} ({})", url, next, status);

                // 307/308 preserve the method and body
                if !matches!(
                    status,
                    StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                ) {
                    method = FormMethod::Get;
                    form = None;
                }
                self.referrer = Some(url);
                url = next;
                continue;
            }

            if !status.is_success() {
                return Err(NavigationError::Failed(format!("HTTP {}", status)));
            }

            let is_html = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|ct| ct.contains("html"))
                .unwrap_or(true);

            let body = response.text().await.map_err(classify_error)?;
            self.document = Some(Document {
                url,
                // Non-HTML documents load fine but expose no elements
                html: if is_html { body } else { String::new() },
            });
            return Ok(());
        }

        Err(NavigationError::Failed(format!(
            "Too many redirects (>{})",
            MAX_REDIRECTS
        )))
    }

    async fn load_with_timeout(
        &mut self,
        planned: PlannedNavigation,
        timeout: Duration,
    ) -> Result<(), NavigationError> {
        match tokio::time::timeout(timeout, self.load(planned)).await {
            Ok(result) => result,
            Err(_) => Err(NavigationError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn classify_error(error: reqwest::Error) -> NavigationError {
    if error.is_timeout() {
        NavigationError::Failed("Request timeout".to_string())
    } else if error.is_connect() {
        NavigationError::Failed(format!("Connection failed: {}", error))
    } else {
        NavigationError::Failed(error.to_string())
    }
}

#[async_trait]
impl Session for HttpSession {
    fn set_request_filter(&mut self, filter: Arc<dyn RequestFilter>) {
        self.filter = Some(filter);
    }

    async fn navigate(
        &mut self,
        url: &Url,
        options: &NavigateOptions,
    ) -> Result<(), NavigationError> {
        tracing::trace!("Navigating to {} (wait until {:?})", url, options.wait_until);
        self.referrer = options.referrer.clone();
        self.planned = None;

        let planned = PlannedNavigation {
            method: FormMethod::Get,
            url: url.clone(),
            form: None,
        };
        self.load_with_timeout(planned, options.timeout).await
    }

    fn current_url(&self) -> Option<Url> {
        self.document.as_ref().map(|doc| doc.url.clone())
    }

    async fn query_all(
        &mut self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<String>, RenderError> {
        match &self.document {
            Some(doc) => dom::select_attribute(&doc.html, selector, attribute),
            None => Ok(Vec::new()),
        }
    }

    async fn evaluate(&mut self, _script: &str) -> Result<String, RenderError> {
        Err(RenderError::Unsupported("script evaluation"))
    }

    async fn type_text(&mut self, selector: &str, value: &str) -> Result<(), RenderError> {
        let doc = self.document()?;
        if !dom::has_match(&doc.html, selector)? {
            return Err(RenderError::NoMatch(selector.to_string()));
        }

        self.typed.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), RenderError> {
        let doc = self.document()?;
        let planned = dom::plan_click(&doc.html, &doc.url, selector, &self.typed)?;
        let referrer = doc.url.clone();
        tracing::debug!("Click on '{}' will navigate to {}", selector, planned.url);
        self.referrer = Some(referrer);
        self.planned = Some(planned);
        Ok(())
    }

    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<(), NavigationError> {
        let planned = self.planned.take().ok_or_else(|| {
            NavigationError::Failed("No navigation was triggered".to_string())
        })?;
        self.load_with_timeout(planned, timeout).await
    }

    async fn screenshot(&mut self, _path: &Path) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("screenshots"))
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        if !self.closed {
            self.closed = true;
            self.document = None;
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for HttpSession {
    fn drop(&mut self) {
        if !self.closed {
            self.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
