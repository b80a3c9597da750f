//! Post-load page behaviors
//!
//! Everything here runs against an already loaded session: link discovery,
//! scroll emulation, checkbox normalization, login form submission and
//! screenshots. Scheduling decisions stay in the coordinator.

use crate::config::FormConfig;
use crate::crawler::policy::Policy;
use crate::render::{RenderError, Session};
use crate::url::{matches_glob, resolve_link};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Scrolls one viewport and reports whether the bottom was reached
const SCROLL_STEP_SCRIPT: &str = "(() => { \
    const el = document.scrollingElement || document.documentElement; \
    window.scrollBy(0, window.innerHeight); \
    return el.scrollTop + window.innerHeight >= el.scrollHeight; \
})()";

/// Checks every unchecked checkbox and returns how many changed
const CHECKBOX_SCRIPT: &str = "(() => { \
    let changed = 0; \
    for (const box of document.querySelectorAll('input[type=checkbox]:not(:checked):not(:disabled)')) { \
        box.click(); changed += 1; \
    } \
    return changed; \
})()";

/// Pause between scroll steps so lazy content can load
const SCROLL_PAUSE: Duration = Duration::from_millis(100);

/// Collects same-site links from the loaded document
///
/// Hrefs are resolved against `base` and fragment-stripped. Links the policy
/// would block as a document navigation are dropped here so they never
/// reach the queue. Duplicates within the page are kept; the visited ledger
/// collapses them.
pub async fn extract_links(
    session: &mut dyn Session,
    base: &Url,
    policy: &Policy,
) -> Result<Vec<Url>, RenderError> {
    let hrefs = session.query_all("a[href]", "href").await?;

    let links: Vec<Url> = hrefs
        .iter()
        .filter_map(|href| resolve_link(href, base))
        .filter(|url| {
            let crawlable = policy.is_crawlable(url);
            if !crawlable {
                tracing::trace!("Skipping out-of-scope link {}", url);
            }
            crawlable
        })
        .collect();

    tracing::debug!(
        "{}: {} anchors, {} in scope",
        base,
        hrefs.len(),
        links.len()
    );
    Ok(links)
}

/// Scrolls down until the bottom of the page or until `budget` runs out
///
/// Returns the number of scroll steps taken.
pub async fn scroll_page(session: &mut dyn Session, budget: Duration) -> Result<u32, RenderError> {
    let deadline = Instant::now() + budget;
    let mut steps = 0;

    while Instant::now() < deadline {
        let at_bottom = session.evaluate(SCROLL_STEP_SCRIPT).await?;
        steps += 1;
        if at_bottom.trim() == "true" {
            break;
        }
        tokio::time::sleep(SCROLL_PAUSE).await;
    }

    Ok(steps)
}

/// Ticks every enabled checkbox so toggled content is rendered
pub async fn normalize_checkboxes(session: &mut dyn Session) -> Result<u32, RenderError> {
    let result = session.evaluate(CHECKBOX_SCRIPT).await?;
    Ok(result.trim().parse().unwrap_or(0))
}

/// Returns the first form configuration whose pattern matches `url`
pub fn matching_form<'a>(forms: &'a [FormConfig], url: &Url) -> Option<&'a FormConfig> {
    forms
        .iter()
        .find(|form| matches_glob(&form.url_pattern, url.as_str()))
}

/// Fills the configured fields, clicks submit and waits for the result
pub async fn submit_form(
    session: &mut dyn Session,
    form: &FormConfig,
    timeout: Duration,
) -> Result<(), RenderError> {
    for (selector, value) in &form.fields {
        session.type_text(selector, value).await?;
    }

    session.click(&form.submit_selector).await?;
    session.wait_for_navigation(timeout).await?;

    tracing::info!(
        "Submitted form '{}' ({} fields)",
        form.submit_selector,
        form.fields.len()
    );
    Ok(())
}

/// Screenshot file for `url`: the first 16 hex chars of its SHA-256
pub fn screenshot_path(dir: &Path, url: &Url) -> PathBuf {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let name = hex::encode(digest);
    dir.join(format!("{}.png", &name[..16]))
}

/// Saves a screenshot of the current page under `dir`
pub async fn take_screenshot(
    session: &mut dyn Session,
    dir: &Path,
    url: &Url,
) -> Result<PathBuf, RenderError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = screenshot_path(dir, url);
    session.screenshot(&path).await?;
    tracing::debug!("Screenshot of {} saved to {}", url, path.display());
    Ok(path)
}

/// Turns an unsupported capability into a skipped step
pub fn skip_unsupported<T>(result: Result<T, RenderError>) -> Result<Option<T>, RenderError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RenderError::Unsupported(what)) => {
            tracing::debug!("Skipping step: {} is not supported", what);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
