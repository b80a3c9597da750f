//! Integration tests for the crawler
//!
//! The first group drives the built-in HTTP engine against wiremock servers.
//! The second group uses a scripted in-memory engine to check scheduling
//! properties (concurrency ceiling, single visits, timeouts) without a
//! network.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_trawl::config::{load_config, parse_config, Config};
use sumi_trawl::crawler::{crawl, Crawler, TaskOptions};
use sumi_trawl::render::{
    Browser, Decision, Engine, HttpEngine, LaunchOptions, NavigateOptions, NavigationError,
    RenderError, Request, RequestFilter, ResourceKind, Session,
};
use sumi_trawl::TaskError;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a config for a crawl of a local mock server
fn local_config(seed: &str, crawler_extra: &str, tail: &str) -> Config {
    parse_config(&format!(
        r#"
[crawler]
seeds = ["{seed}"]
max-concurrency = 4
max-scroll-duration = 100
{crawler_extra}

[policy]
domains = ["127.0.0.1"]

{tail}
"#
    ))
    .expect("Failed to parse test config")
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_raw(body, "text/html")
}

#[tokio::test]
async fn test_end_to_end_single_new_link() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(format!(
            r#"<html><body>
            <a href="{base}/a">A</a>
            <a href="{base}/">Home</a>
            </body></html>"#
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<html><body><p>leaf</p></body></html>".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let config = local_config(&format!("{base}/"), "", "");
    let crawler = crawl(config, Arc::new(HttpEngine::new()))
        .await
        .expect("Crawl failed");

    assert_eq!(crawler.visited_count(), 2);
    assert!(!crawler.has_errors(), "errors: {:?}", crawler.errors());

    let stats = crawler.stats();
    assert_eq!(stats.pages_done, 2);
    assert_eq!(stats.links_discovered, 2);
    assert_eq!(stats.links_queued, 1);
}

#[tokio::test]
async fn test_foreign_links_not_followed() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="https://other.org/">Other</a>
               <a href="mailto:team@example.com">Mail</a>
               <a href="/b#section">B</a>"#
                .to_string(),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<p>b</p>".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let crawler = crawl(
        local_config(&format!("{base}/"), "", ""),
        Arc::new(HttpEngine::new()),
    )
    .await
    .expect("Crawl failed");

    assert_eq!(crawler.visited_count(), 2);
    assert!(crawler.is_visited(&Url::parse(&format!("{base}/b")).unwrap()));
    assert!(!crawler.is_visited(&Url::parse("https://other.org/").unwrap()));
}

#[tokio::test]
async fn test_redirect_loop_hits_retry_ceiling() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
        .expect(5)
        .mount(&server)
        .await;

    let crawler = crawl(
        local_config(&format!("{base}/loop"), "", ""),
        Arc::new(HttpEngine::new()),
    )
    .await
    .expect("Crawl failed");

    let errors = crawler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].url.path(), "/loop");
    assert!(
        matches!(&errors[0].error, TaskError::Navigation(msg) if msg.contains("blocked")),
        "unexpected error: {:?}",
        errors[0].error
    );
    assert_eq!(crawler.stats().pages_failed, 1);
}

#[tokio::test]
async fn test_login_form_submitted_once() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(html(
            r#"<form action="/session" method="post">
                <input id="user" name="user">
                <input id="pass" name="pass" type="password">
                <button id="submit" type="submit">Sign in</button>
            </form>"#
                .to_string(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(303).insert_header("location", "/home"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/home"))
        .respond_with(html(r#"<a href="/private">Private</a>"#.to_string()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html("<p>secret</p>".to_string()))
        .expect(1)
        .mount(&server)
        .await;

    let tail = r##"
[[form]]
url-pattern = "*/login"
submit-selector = "#submit"

[form.fields]
"#user" = "alice"
"#pass" = "pw"
"##;
    let crawler = crawl(
        local_config(&format!("{base}/login"), "", tail),
        Arc::new(HttpEngine::new()),
    )
    .await
    .expect("Crawl failed");

    assert!(!crawler.has_errors(), "errors: {:?}", crawler.errors());
    assert_eq!(crawler.stats().forms_submitted, 1);
    // /login, the landing page /home and the link found there
    assert_eq!(crawler.visited_count(), 3);
}

#[tokio::test]
async fn test_per_task_timeout_recorded() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html("<p>late</p>".to_string()).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let config = parse_config(
        r#"
        [crawler]
        max-concurrency = 1
        max-scroll-duration = 100

        [policy]
        domains = ["127.0.0.1"]
        "#,
    )
    .unwrap();
    let crawler = Crawler::with_http_engine(config);
    crawler.init().unwrap();

    let options = TaskOptions {
        timeout: Some(Duration::from_millis(200)),
        ..TaskOptions::default()
    };
    assert!(crawler.queue(&format!("{base}/slow"), options).unwrap());

    tokio::time::timeout(Duration::from_secs(5), crawler.on_idle())
        .await
        .expect("Crawl did not go idle")
        .unwrap();
    crawler.close().await.unwrap();

    let errors = crawler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].error,
        TaskError::NavigationTimeout { timeout_ms: 200 }
    );
    // Timeouts still run post-processing, so the task completes
    let stats = crawler.stats();
    assert_eq!(stats.pages_timed_out, 1);
    assert_eq!(stats.pages_done, 1);
}

#[tokio::test]
async fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("trawl.toml");
    std::fs::write(
        &config_path,
        r#"
[crawler]
seeds = ["https://example.com/"]
timeout = 5000
wait-until = "load"
max-depth = 3

[policy]
domains = ["Example.com"]
block-list = ["/logout"]
blocked-resource-kinds = ["image", "font"]

[output]
screenshots = "shots"
"#,
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.policy.domains, vec!["example.com"]);
    assert_eq!(
        config.policy.blocked_resource_kinds,
        vec![ResourceKind::Image, ResourceKind::Font]
    );
    assert_eq!(config.crawler.max_depth, Some(3));
    assert_eq!(config.crawler.retry_ceiling, 5);
    assert!(config.output.screenshots.is_some());
}

// ===== Scripted engine =====

/// Pages of a fake site: URL -> hrefs on that page
#[derive(Default)]
struct Site {
    links: HashMap<String, Vec<String>>,
    /// Navigations that report a timeout
    slow: HashSet<String>,
    /// Navigations that fail outright
    broken: HashSet<String>,
    /// Navigations that crash the renderer
    crashing: HashSet<String>,
}

impl Site {
    fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.links
            .insert(url.to_string(), links.iter().map(|s| s.to_string()).collect());
        self
    }

    fn slow(mut self, url: &str) -> Self {
        self.slow.insert(url.to_string());
        self
    }

    fn broken(mut self, url: &str) -> Self {
        self.broken.insert(url.to_string());
        self
    }

    fn crashing(mut self, url: &str) -> Self {
        self.crashing.insert(url.to_string());
        self
    }
}

/// What the scripted engine observed
#[derive(Default)]
struct Recorder {
    launches: AtomicUsize,
    open: AtomicUsize,
    peak_open: AtomicUsize,
    navigations: Mutex<Vec<String>>,
    referrers: Mutex<Vec<(String, Option<String>)>>,
    /// Filter decisions for sub-resources requested by timed-out pages
    after_timeout: Mutex<Vec<Decision>>,
    browser_closed: AtomicBool,
    open_at_browser_close: AtomicUsize,
}

impl Recorder {
    fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

struct ScriptedEngine {
    site: Arc<Site>,
    recorder: Arc<Recorder>,
}

impl ScriptedEngine {
    fn new(site: Site) -> (Arc<Self>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let engine = Arc::new(Self {
            site: Arc::new(site),
            recorder: recorder.clone(),
        });
        (engine, recorder)
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Arc<dyn Browser>, RenderError> {
        self.recorder.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedBrowser {
            site: self.site.clone(),
            recorder: self.recorder.clone(),
        }))
    }
}

struct ScriptedBrowser {
    site: Arc<Site>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn open_session(&self) -> Result<Box<dyn Session>, RenderError> {
        let open = self.recorder.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            site: self.site.clone(),
            recorder: self.recorder.clone(),
            filter: None,
            current: None,
            timed_out: false,
        }))
    }

    async fn close(&self) -> Result<(), RenderError> {
        self.recorder
            .open_at_browser_close
            .store(self.recorder.open.load(Ordering::SeqCst), Ordering::SeqCst);
        self.recorder.browser_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedSession {
    site: Arc<Site>,
    recorder: Arc<Recorder>,
    filter: Option<Arc<dyn RequestFilter>>,
    current: Option<Url>,
    timed_out: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    fn set_request_filter(&mut self, filter: Arc<dyn RequestFilter>) {
        self.filter = Some(filter);
    }

    async fn navigate(
        &mut self,
        url: &Url,
        options: &NavigateOptions,
    ) -> Result<(), NavigationError> {
        if let Some(filter) = &self.filter {
            if filter.decide(&Request::navigation(url.as_str())) == Decision::Block {
                return Err(NavigationError::Blocked(url.to_string()));
            }
        }

        self.recorder.navigations.lock().unwrap().push(url.to_string());
        self.recorder.referrers.lock().unwrap().push((
            url.to_string(),
            options.referrer.as_ref().map(|r| r.to_string()),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;

        if self.site.crashing.contains(url.as_str()) {
            panic!("renderer crashed on {}", url);
        }
        if self.site.broken.contains(url.as_str()) {
            return Err(NavigationError::Failed("net::ERR_CONNECTION_RESET".to_string()));
        }

        self.current = Some(url.clone());
        if self.site.slow.contains(url.as_str()) {
            self.timed_out = true;
            return Err(NavigationError::Timeout {
                timeout_ms: options.timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn current_url(&self) -> Option<Url> {
        self.current.clone()
    }

    async fn query_all(
        &mut self,
        _selector: &str,
        _attribute: &str,
    ) -> Result<Vec<String>, RenderError> {
        let Some(current) = &self.current else {
            return Ok(Vec::new());
        };

        // A page that timed out keeps trying to load its scripts
        if self.timed_out {
            if let Some(filter) = &self.filter {
                let script = current.join("/app.js").unwrap();
                let decision =
                    filter.decide(&Request::resource(script.as_str(), ResourceKind::Script));
                self.recorder.after_timeout.lock().unwrap().push(decision);
            }
        }

        Ok(self
            .site
            .links
            .get(current.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<String, RenderError> {
        Err(RenderError::Unsupported("script evaluation"))
    }

    async fn type_text(&mut self, _selector: &str, _value: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("typing"))
    }

    async fn click(&mut self, _selector: &str) -> Result<(), RenderError> {
        Err(RenderError::Unsupported("clicking"))
    }

    async fn wait_for_navigation(&mut self, _timeout: Duration) -> Result<(), NavigationError> {
        Err(NavigationError::Failed("no navigation".to_string()))
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), RenderError> {
        tokio::fs::write(path, b"\x89PNG\r\n").await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.recorder.open.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn site_config(max_concurrency: usize, extra: &str) -> Config {
    parse_config(&format!(
        r#"
[crawler]
seeds = ["https://example.com/"]
max-concurrency = {max_concurrency}
{extra}

[policy]
domains = ["example.com"]
"#
    ))
    .expect("Failed to parse test config")
}

/// Binary tree of 31 pages, every page also linking back to the root
fn tree_site() -> Site {
    let mut site = Site::default().page("https://example.com/", &["/p/1", "/p/2"]);
    for i in 1..=30 {
        let mut links = vec!["/".to_string(), "/p/1#top".to_string()];
        for child in [2 * i + 1, 2 * i + 2] {
            if child <= 30 {
                links.push(format!("/p/{}", child));
            }
        }
        let links: Vec<&str> = links.iter().map(|s| s.as_str()).collect();
        site = site.page(&format!("https://example.com/p/{}", i), &links);
    }
    site
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_ceiling_and_single_visits() {
    let (engine, recorder) = ScriptedEngine::new(tree_site());

    let crawler = crawl(site_config(3, ""), engine).await.expect("Crawl failed");

    let navigations = recorder.navigations();
    let unique: HashSet<&String> = navigations.iter().collect();
    assert_eq!(navigations.len(), 31);
    assert_eq!(unique.len(), 31);
    assert_eq!(crawler.visited_count(), 31);

    assert!(recorder.peak_open.load(Ordering::SeqCst) <= 3);
    assert!(crawler.peak_concurrency() <= 3);
    assert!(crawler.peak_concurrency() >= 2);

    assert_eq!(recorder.launches.load(Ordering::SeqCst), 1);
    assert!(recorder.browser_closed.load(Ordering::SeqCst));
    assert_eq!(recorder.open_at_browser_close.load(Ordering::SeqCst), 0);
    assert!(!crawler.has_errors());
}

#[tokio::test]
async fn test_timeout_continues_post_processing() {
    let site = Site::default()
        .page("https://example.com/", &["/slow"])
        .page("https://example.com/slow", &["/after"])
        .page("https://example.com/after", &[])
        .slow("https://example.com/slow");
    let (engine, recorder) = ScriptedEngine::new(site);

    let crawler = crawl(site_config(2, ""), engine).await.expect("Crawl failed");

    let errors = crawler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].url.as_str(), "https://example.com/slow");
    assert_eq!(
        errors[0].error,
        TaskError::NavigationTimeout { timeout_ms: 30_000 }
    );

    // Links on the timed-out page were still discovered
    assert!(recorder
        .navigations()
        .contains(&"https://example.com/after".to_string()));
    // ...but its own further requests were refused
    assert_eq!(*recorder.after_timeout.lock().unwrap(), vec![Decision::Block]);
    assert!(crawler.has_errors());
}

#[tokio::test]
async fn test_navigation_error_skips_post_processing() {
    let site = Site::default()
        .page("https://example.com/", &["/broken"])
        .page("https://example.com/broken", &["/never"])
        .broken("https://example.com/broken");
    let (engine, recorder) = ScriptedEngine::new(site);

    let crawler = crawl(site_config(2, ""), engine).await.expect("Crawl failed");

    let errors = crawler.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0].error, TaskError::Navigation(msg) if msg.contains("RESET")));
    assert!(!recorder
        .navigations()
        .contains(&"https://example.com/never".to_string()));
    assert_eq!(recorder.open_at_browser_close.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_panicking_page_is_recorded_and_crawl_continues() {
    let site = Site::default()
        .page("https://example.com/", &["/crash", "/fine"])
        .page("https://example.com/fine", &[])
        .crashing("https://example.com/crash");
    let (engine, recorder) = ScriptedEngine::new(site);

    let crawler = tokio::time::timeout(Duration::from_secs(5), crawl(site_config(1, ""), engine))
        .await
        .expect("Crawl stalled after a panic")
        .expect("Crawl failed");

    let errors = crawler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].url.as_str(), "https://example.com/crash");
    assert!(matches!(&errors[0].error, TaskError::Panicked(msg) if msg.contains("renderer crashed")));

    assert!(recorder
        .navigations()
        .contains(&"https://example.com/fine".to_string()));
    // The crashed page's session was still closed
    assert_eq!(recorder.open_at_browser_close.load(Ordering::SeqCst), 0);
    assert_eq!(crawler.stats().pages_failed, 1);
}

#[tokio::test]
async fn test_max_depth_limits_discovery() {
    let site = Site::default()
        .page("https://example.com/", &["/d1"])
        .page("https://example.com/d1", &["/d2"])
        .page("https://example.com/d2", &["/d3"])
        .page("https://example.com/d3", &[]);
    let (engine, recorder) = ScriptedEngine::new(site);

    let crawler = crawl(site_config(2, "max-depth = 2"), engine)
        .await
        .expect("Crawl failed");

    assert_eq!(
        recorder.navigations(),
        vec![
            "https://example.com/",
            "https://example.com/d1",
            "https://example.com/d2"
        ]
    );
    assert_eq!(crawler.visited_count(), 3);
}

#[tokio::test]
async fn test_previous_url_sent_as_referrer() {
    let site = Site::default()
        .page("https://example.com/", &["/next"])
        .page("https://example.com/next", &[]);
    let (engine, recorder) = ScriptedEngine::new(site);

    crawl(site_config(1, ""), engine).await.expect("Crawl failed");

    let referrers = recorder.referrers.lock().unwrap().clone();
    assert_eq!(
        referrers,
        vec![
            ("https://example.com/".to_string(), None),
            (
                "https://example.com/next".to_string(),
                Some("https://example.com/".to_string())
            ),
        ]
    );
}

#[tokio::test]
async fn test_screenshots_written_per_page() {
    let dir = tempfile::tempdir().unwrap();
    let shots = dir.path().join("shots");
    let site = Site::default()
        .page("https://example.com/", &["/a"])
        .page("https://example.com/a", &[]);
    let (engine, _recorder) = ScriptedEngine::new(site);

    let extra = format!("[output]\nscreenshots = {:?}", shots.to_str().unwrap());
    let config = parse_config(&format!(
        r#"
[crawler]
seeds = ["https://example.com/"]
max-concurrency = 2

[policy]
domains = ["example.com"]

{extra}
"#
    ))
    .unwrap();

    let crawler = crawl(config, engine).await.expect("Crawl failed");

    let files = std::fs::read_dir(&shots).unwrap().count();
    assert_eq!(files, 2);
    assert_eq!(crawler.stats().screenshots, 2);
}

#[tokio::test]
async fn test_on_idle_with_nothing_queued() {
    let (engine, recorder) = ScriptedEngine::new(Site::default());
    let config = parse_config(
        r#"
        [policy]
        domains = ["example.com"]
        "#,
    )
    .unwrap();
    let crawler = Crawler::new(config, engine);
    crawler.init().unwrap();

    tokio::time::timeout(Duration::from_secs(1), crawler.on_idle())
        .await
        .expect("on_idle did not resolve")
        .unwrap();
    crawler.close().await.unwrap();

    assert_eq!(recorder.launches.load(Ordering::SeqCst), 0);
    assert_eq!(crawler.visited_count(), 0);
}
