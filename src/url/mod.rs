//! URL handling module for Sumi-Trawl
//!
//! This module provides URL canonicalization, registrable-domain extraction,
//! glob matching for form URL patterns, and the allowed-domain check.

mod domain;
mod matcher;
mod normalize;

// Re-export main functions
pub use domain::{extract_domain, registrable_domain, registrable_from_host};
pub use matcher::{host_within, matches_glob};
pub use normalize::{canonicalize, canonicalize_url, normalize_resource_url, resolve_link};

use url::Url;

/// Checks whether a URL stays inside the allowed domain set
///
/// A URL is allowed when its registrable domain is listed, or when its host
/// sits under any listed entry (which lets operators allow a single
/// subdomain such as `docs.example.org`). Domain entries are expected in
/// lowercase.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use sumi_trawl::url::is_domain_allowed;
///
/// let domains = vec!["example.com".to_string()];
/// let url = Url::parse("https://shop.example.com/cart").unwrap();
/// assert!(is_domain_allowed(&url, &domains));
///
/// let url = Url::parse("https://example.org/").unwrap();
/// assert!(!is_domain_allowed(&url, &domains));
/// ```
pub fn is_domain_allowed<S: AsRef<str>>(url: &Url, domains: &[S]) -> bool {
    let Some(host) = extract_domain(url) else {
        return false;
    };

    // IP addresses have no subdomains
    if !matches!(url.host(), Some(url::Host::Domain(_))) {
        return domains.iter().any(|entry| entry.as_ref() == host);
    }

    let registrable = registrable_from_host(&host);
    domains.iter().any(|entry| {
        let entry = entry.as_ref();
        entry == registrable || host_within(entry, &host)
    })
}
