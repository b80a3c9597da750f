//! Crawler coordinator - main crawl orchestration logic
//!
//! This module wires the pieces of a crawl together:
//! - Seeding the work queue and claiming URLs in the visited ledger
//! - Launching the shared browser handle exactly once
//! - Running the per-task protocol on each worker's session
//! - Collecting error records and statistics
//! - Lifecycle: `init`, `queue`, `on_idle`, `close`

use crate::config::Config;
use crate::crawler::behaviors::{self, skip_unsupported};
use crate::crawler::ledger::VisitedLedger;
use crate::crawler::policy::{Policy, SessionFilter};
use crate::crawler::queue::{panic_message, Task, TaskHandler, TaskOptions, WorkQueue};
use crate::output::{CrawlStatistics, CrawlStats};
use crate::render::{
    Browser, Engine, HttpEngine, LaunchOptions, NavigateOptions, NavigationError, RenderError,
    Session,
};
use crate::state::{TaskState, TaskTracker};
use crate::url::canonicalize_url;
use crate::{Result, TaskError, TrawlError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use url::Url;

/// Priority of seeds and discovered links
pub const DEFAULT_PRIORITY: i32 = 0;

/// Slack given to the engine's own navigation timeout before the
/// coordinator gives up on it
const NAVIGATION_GRACE: Duration = Duration::from_secs(1);

/// A failed or timed-out task, as surfaced at the end of a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub url: Url,
    pub error: TaskError,
    pub at: DateTime<Utc>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Crawl orchestrator
///
/// Call [`Crawler::init`] to start the worker pool and queue the configured
/// seeds, wait for [`Crawler::on_idle`], then [`Crawler::close`] and inspect
/// [`Crawler::errors`].
pub struct Crawler {
    inner: Arc<CrawlerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared with the workers
struct CrawlerInner {
    config: Arc<Config>,
    engine: Arc<dyn Engine>,
    browser: OnceCell<Arc<dyn Browser>>,
    ledger: VisitedLedger,
    queue: WorkQueue,
    policy: Arc<Policy>,
    errors: Mutex<Vec<ErrorRecord>>,
    stats: CrawlStats,
    /// Set when the shared browser handle could not be launched
    fatal: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl Crawler {
    /// Creates a crawler that renders pages with `engine`
    ///
    /// Nothing is launched until the first task needs a session.
    pub fn new(config: Config, engine: Arc<dyn Engine>) -> Self {
        let policy = Arc::new(Policy::new(&config.policy, config.crawler.retry_ceiling));
        let queue = WorkQueue::new(config.crawler.max_concurrency);

        Self {
            inner: Arc::new(CrawlerInner {
                config: Arc::new(config),
                engine,
                browser: OnceCell::new(),
                ledger: VisitedLedger::new(),
                queue,
                policy,
                errors: Mutex::new(Vec::new()),
                stats: CrawlStats::new(),
                fatal: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a crawler backed by the built-in static engine
    pub fn with_http_engine(config: Config) -> Self {
        Self::new(config, Arc::new(HttpEngine::new()))
    }

    /// Starts the worker pool and queues the configured seeds
    pub fn init(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TrawlError::Closed);
        }

        let handles = self.inner.queue.start(self.inner.clone());
        if !handles.is_empty() {
            tracing::info!(
                "Started {} workers (domains: {})",
                handles.len(),
                self.inner.policy.allowed_domains().join(", ")
            );
        }
        lock(&self.workers).extend(handles);

        for seed in &self.inner.config.crawler.seeds {
            self.queue(seed, TaskOptions::default())?;
        }

        Ok(())
    }

    /// Queues a URL at the default priority
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URL was claimed and scheduled
    /// * `Ok(false)` - Already visited, outside the allowed domains, or the
    ///   queue has ended
    /// * `Err(TrawlError)` - The URL is malformed or the crawler is closed
    pub fn queue(&self, url: &str, options: TaskOptions) -> Result<bool> {
        self.queue_with_priority(url, options, DEFAULT_PRIORITY)
    }

    /// Queues a URL; lower `priority` values run first
    pub fn queue_with_priority(&self, url: &str, options: TaskOptions, priority: i32) -> Result<bool> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TrawlError::Closed);
        }

        let url = canonicalize_url(url)?;
        if !self.inner.policy.is_crawlable(&url) {
            tracing::warn!("Not queueing {}: outside allowed domains or denylisted", url);
            return Ok(false);
        }

        Ok(self.inner.schedule(url, options, priority))
    }

    /// Waits until no task is pending or running
    ///
    /// Fails only if the crawl was aborted because the rendering engine
    /// could not be launched. Per-page failures are in [`Crawler::errors`].
    pub async fn on_idle(&self) -> Result<()> {
        self.inner.queue.on_idle().await;

        match lock(&self.inner.fatal).clone() {
            Some(reason) => Err(TrawlError::BrowserLaunch(reason)),
            None => Ok(()),
        }
    }

    /// Stops the crawl and releases the rendering engine
    ///
    /// Pending tasks are discarded, running tasks finish, and the shared
    /// browser handle is closed after every worker has exited.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.queue.end();

        let workers = std::mem::take(&mut *lock(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        if let Some(browser) = self.inner.browser.get() {
            browser.close().await?;
        }

        tracing::info!(
            "Crawler closed: {} URLs visited, {} errors",
            self.inner.ledger.len(),
            lock(&self.inner.errors).len()
        );
        Ok(())
    }

    /// Error records in the order they were appended
    pub fn errors(&self) -> Vec<ErrorRecord> {
        lock(&self.inner.errors).clone()
    }

    pub fn has_errors(&self) -> bool {
        !lock(&self.inner.errors).is_empty()
    }

    /// Number of URLs claimed in the visited ledger
    pub fn visited_count(&self) -> usize {
        self.inner.ledger.len()
    }

    /// Returns true if `url` has been claimed
    pub fn is_visited(&self, url: &Url) -> bool {
        self.inner.ledger.contains(url)
    }

    /// Highest number of tasks that ran at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.inner.queue.peak_in_flight()
    }

    pub fn stats(&self) -> CrawlStatistics {
        self.inner.stats.snapshot(self.inner.ledger.len() as u64)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Drop for Crawler {
    fn drop(&mut self) {
        // Idle workers hold the shared state; release them
        self.inner.queue.end();
    }
}

impl CrawlerInner {
    /// Claims `url` and pushes it; false if it was already claimed
    fn schedule(&self, url: Url, options: TaskOptions, priority: i32) -> bool {
        if !self.ledger.try_claim(&url) {
            tracing::trace!("Already visited: {}", url);
            return false;
        }

        tracing::debug!("Queueing {} (depth {})", url, options.depth);
        self.queue.push(url, options, priority)
    }

    fn record_error(&self, url: &Url, error: TaskError) {
        tracing::warn!("{}: {}", url, error);
        lock(&self.errors).push(ErrorRecord {
            url: url.clone(),
            error,
            at: Utc::now(),
        });
    }

    fn is_aborted(&self) -> bool {
        lock(&self.fatal).is_some()
    }

    /// Ends the crawl after a fatal error
    fn abort(&self, reason: String) {
        {
            let mut fatal = lock(&self.fatal);
            if fatal.is_none() {
                tracing::error!("Aborting crawl: {}", reason);
                *fatal = Some(reason);
            }
        }
        self.queue.end();
    }

    /// Returns the shared browser handle, launching it on first use
    async fn browser(&self) -> std::result::Result<Arc<dyn Browser>, RenderError> {
        self.browser
            .get_or_try_init(|| async {
                let options = LaunchOptions {
                    proxy: self.config.crawler.proxy.clone(),
                    user_agent: self.config.crawler.user_agent.clone(),
                };
                tracing::info!("Launching rendering engine");
                self.engine.launch(&options).await
            })
            .await
            .map(Arc::clone)
    }

    /// Runs the per-task protocol on an open session
    async fn run_task(
        &self,
        session: &mut dyn Session,
        filter: &SessionFilter,
        task: &Task,
        previous: Option<Url>,
        tracker: &mut TaskTracker,
    ) -> std::result::Result<(), TaskError> {
        let crawler = &self.config.crawler;
        let timeout = task
            .options
            .timeout
            .unwrap_or_else(|| crawler.navigation_timeout());
        let options = NavigateOptions {
            wait_until: task.options.wait_until.unwrap_or(crawler.wait_until),
            timeout,
            referrer: previous,
        };

        filter.reset();
        advance(tracker, TaskState::Loading);
        tracing::debug!(
            "Loading {} (depth {}, attempt {})",
            task.url,
            task.options.depth,
            task.attempt
        );

        match navigate_bounded(session, &task.url, &options).await {
            Ok(()) => advance(tracker, TaskState::Loaded),
            Err(e) => {
                let error = TaskError::from(e);
                if !error.is_recoverable() {
                    advance(tracker, TaskState::Failed);
                    return Err(error);
                }

                filter.mark_timed_out();
                self.stats.page_timed_out();
                self.record_error(&task.url, error);
                advance(tracker, TaskState::TimedOut);
            }
        }

        advance(tracker, TaskState::PostProcessing);
        match self.post_process(session, filter, task, timeout).await {
            Ok(()) => {
                advance(tracker, TaskState::Done);
                Ok(())
            }
            Err(e) => {
                advance(tracker, TaskState::Failed);
                Err(TaskError::PostProcessing(e.to_string()))
            }
        }
    }

    /// Link discovery, scrolling, checkbox normalization, then at most one
    /// login form submission followed by a second pass on the result
    async fn post_process(
        &self,
        session: &mut dyn Session,
        filter: &SessionFilter,
        task: &Task,
        timeout: Duration,
    ) -> std::result::Result<(), RenderError> {
        let mut form_submitted = false;

        loop {
            let page_url = session.current_url().unwrap_or_else(|| task.url.clone());
            self.discover_links(session, &page_url, &task.options).await?;

            let budget = self.config.crawler.scroll_budget();
            if let Some(steps) = skip_unsupported(behaviors::scroll_page(session, budget).await)? {
                tracing::trace!("Scrolled {} in {} steps", page_url, steps);
            }

            if let Some(changed) =
                skip_unsupported(behaviors::normalize_checkboxes(session).await)?
            {
                if changed > 0 {
                    tracing::debug!("Checked {} checkboxes on {}", changed, page_url);
                }
            }

            if form_submitted {
                break;
            }
            let Some(form) = behaviors::matching_form(&self.config.forms, &page_url) else {
                break;
            };

            form_submitted = true;
            // The submission is a new page load with its own retry budget
            filter.reset_attempts();
            behaviors::submit_form(session, form, timeout).await?;
            self.stats.form_submitted();
        }

        if let Some(dir) = &self.config.output.screenshots {
            let page_url = session.current_url().unwrap_or_else(|| task.url.clone());
            if skip_unsupported(behaviors::take_screenshot(session, dir, &page_url).await)?
                .is_some()
            {
                self.stats.screenshot_taken();
            }
        }

        Ok(())
    }

    /// Queues the unclaimed in-scope links of the loaded page
    async fn discover_links(
        &self,
        session: &mut dyn Session,
        page_url: &Url,
        options: &TaskOptions,
    ) -> std::result::Result<(), RenderError> {
        // The landing URL after redirects counts as visited too
        self.ledger.try_claim(page_url);

        let child = options.child();
        if let Some(max_depth) = self.config.crawler.max_depth {
            if child.depth > max_depth {
                tracing::debug!("{} is at max depth {}, not following links", page_url, max_depth);
                return Ok(());
            }
        }

        let links = behaviors::extract_links(session, page_url, &self.policy).await?;
        let mut queued = 0;
        for link in links {
            self.stats.link_discovered();
            if self.schedule(link, child.clone(), DEFAULT_PRIORITY) {
                self.stats.link_queued();
                queued += 1;
            }
        }

        if queued > 0 {
            tracing::debug!("{}: queued {} new links", page_url, queued);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CrawlerInner {
    async fn handle(&self, task: Task, previous: Option<Url>) {
        if self.is_aborted() {
            return;
        }

        let browser = match self.browser().await {
            Ok(browser) => browser,
            Err(e) => {
                self.abort(e.to_string());
                return;
            }
        };

        let mut session = match browser.open_session().await {
            Ok(session) => session,
            Err(e) => {
                self.record_error(
                    &task.url,
                    TaskError::Navigation(format!("Failed to open session: {}", e)),
                );
                self.stats.page_failed();
                return;
            }
        };

        let filter = self.policy.session_filter();
        session.set_request_filter(filter.clone());

        let mut tracker = TaskTracker::new(task.url.as_str());
        let caught = AssertUnwindSafe(self.run_task(
            session.as_mut(),
            &filter,
            &task,
            previous,
            &mut tracker,
        ))
        .catch_unwind()
        .await;
        // A panic still ends in the session being closed below
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(payload) => {
                if tracker.state().can_transition_to(TaskState::Failed) {
                    advance(&mut tracker, TaskState::Failed);
                }
                Err(TaskError::Panicked(panic_message(&*payload)))
            }
        };

        if let Err(e) = session.close().await {
            tracing::warn!("Failed to close session for {}: {}", task.url, e);
        }
        self.stats.requests_blocked(filter.blocked_count());

        match outcome {
            Ok(()) => self.stats.page_done(),
            Err(error) => {
                self.record_error(&task.url, error);
                self.stats.page_failed();
            }
        }

        tracing::debug!("{} finished: {}", task.url, tracker.state());
    }

    fn on_panic(&self, url: &Url, message: &str) {
        self.record_error(url, TaskError::Panicked(message.to_string()));
        self.stats.page_failed();
    }
}

fn advance(tracker: &mut TaskTracker, next: TaskState) {
    if let Err(e) = tracker.advance(next) {
        tracing::warn!("{}", e);
    }
}

/// Navigates, giving up shortly after the engine's own timeout should fire
async fn navigate_bounded(
    session: &mut dyn Session,
    url: &Url,
    options: &NavigateOptions,
) -> std::result::Result<(), NavigationError> {
    let limit = options.timeout + NAVIGATION_GRACE;
    match tokio::time::timeout(limit, session.navigate(url, options)).await {
        Ok(result) => result,
        Err(_) => Err(NavigationError::Timeout {
            timeout_ms: options.timeout.as_millis() as u64,
        }),
    }
}
