use url::{Host, Url};

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_trawl::url::extract_domain;
///
/// let url = Url::parse("https://Sub.EXAMPLE.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("sub.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the registrable domain of a URL's host
///
/// The registrable domain is the last two labels of a hostname, so both
/// `example.com` and `blog.example.com` map to `example.com`. IP addresses
/// and single-label hosts (such as `localhost`) are returned as-is.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_trawl::url::registrable_domain;
///
/// let url = Url::parse("https://api.v2.example.com/").unwrap();
/// assert_eq!(registrable_domain(&url), Some("example.com".to_string()));
/// ```
pub fn registrable_domain(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(registrable_from_host(domain)),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Computes the registrable domain of a bare hostname
pub fn registrable_from_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    labels[labels.len() - 2..].join(".")
}
