use crate::UrlError;
use url::Url;

/// Canonicalizes a URL string into the form used as the deduplication key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything other than http:// and https://
/// 3. Reject URLs without a host
/// 4. Remove fragment (everything after #)
///
/// Host lowercasing and default-port removal come from the URL parser itself.
/// Paths, trailing slashes and query strings are left alone: two URLs that
/// differ there may serve different documents.
///
/// # Examples
///
/// ```
/// use sumi_trawl::url::canonicalize_url;
///
/// let url = canonicalize_url("https://EXAMPLE.com/page#section").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn canonicalize_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    canonicalize(url)
}

/// Canonicalizes an already parsed URL
pub fn canonicalize(mut url: Url) -> Result<Url, UrlError> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    url.set_fragment(None);
    Ok(url)
}

/// Resolves an `href` against the page it was found on
///
/// Returns None for links that never lead to a crawlable document:
/// `javascript:`, `mailto:`, `tel:`, `data:` and anything that fails to parse.
pub fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let joined = base.join(href).ok()?;
    canonicalize(joined).ok()
}

/// Normalizes a request URL into the key of the per-load attempt counter
///
/// Query and fragment are stripped so that cache-busting parameters cannot
/// dodge the retry ceiling. Unparseable input is returned with everything
/// from the first `?` or `#` removed.
pub fn normalize_resource_url(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => url_str
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_fragment() {
        let result = canonicalize_url("https://example.com/page#section").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page");
    }

    #[test]
    fn test_keeps_query() {
        let result = canonicalize_url("https://example.com/page?b=2&a=1#x").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page?b=2&a=1");
    }

    #[test]
    fn test_lowercase_domain() {
        let result = canonicalize_url("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_empty_path_becomes_root() {
        let result = canonicalize_url("https://example.com").unwrap();
        assert_eq!(result.as_str(), "https://example.com/");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = canonicalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            canonicalize_url("not a url").unwrap_err(),
            UrlError::Parse(_)
        ));
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Url::parse("https://example.com/docs/intro").unwrap();
        let resolved = resolve_link("../about#team", &base).unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/about");
    }

    #[test]
    fn test_resolve_skips_non_navigational() {
        let base = Url::parse("https://example.com/").unwrap();
        assert!(resolve_link("javascript:void(0)", &base).is_none());
        assert!(resolve_link("MAILTO:someone@example.com", &base).is_none());
        assert!(resolve_link("tel:+100", &base).is_none());
        assert!(resolve_link("#top", &base).is_none());
        assert!(resolve_link("   ", &base).is_none());
    }

    #[test]
    fn test_normalize_resource_strips_query_and_fragment() {
        assert_eq!(
            normalize_resource_url("https://cdn.example.com/app.js?v=123#frag"),
            "https://cdn.example.com/app.js"
        );
    }

    #[test]
    fn test_normalize_resource_unparseable() {
        assert_eq!(normalize_resource_url("weird/path?x=1"), "weird/path");
    }
}
