/// Checks if a URL matches a glob pattern
///
/// The only special character is `*`, which matches any run of characters
/// (including none). Everything else must match literally, and the pattern
/// is anchored at both ends.
///
/// # Examples
///
/// ```
/// use sumi_trawl::url::matches_glob;
///
/// assert!(matches_glob("https://example.com/login*", "https://example.com/login?next=/"));
/// assert!(matches_glob("*/account/*", "https://example.com/account/settings"));
/// assert!(!matches_glob("https://example.com/login", "https://example.com/login/x"));
/// ```
pub fn matches_glob(pattern: &str, candidate: &str) -> bool {
    let mut parts = pattern.split('*');

    // The first part must be a prefix; split always yields at least one item
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = candidate.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    let Some((last, middle)) = remaining.split_last() else {
        // No wildcard at all: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}

/// Checks if a host belongs to an allowed domain entry
///
/// An entry matches the host itself and any of its subdomains, so
/// `example.com` allows `example.com` and `shop.example.com` but not
/// `notexample.com`.
pub fn host_within(domain: &str, host: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
