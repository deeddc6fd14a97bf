//! URL normalization and crawl-scope rules.
//!
//! Every URL entering the crawl passes through here exactly once: resolved
//! against its parent page, stripped of its fragment, then checked against
//! the scope policy before it is allowed to schedule a fetch.

use scraper::{Html, Selector};
use url::Url;

/// File extensions that never yield crawlable page content.
const SKIP_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".css", ".js"];

/// Path substrings that mark administrative or feed endpoints.
const SKIP_PATH_SUBSTRINGS: [&str; 4] = ["/wp-admin/", "/wp-includes/", "/feed/", "/xmlrpc.php"];

/// Href prefixes that are not navigable page links.
const SKIP_HREF_PREFIXES: [&str; 4] = ["#", "javascript:", "mailto:", "tel:"];

/// Strip the fragment; two URLs differing only in fragment are one page.
pub fn normalize(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

/// Resolve a raw href against its page URL into a normalized absolute URL.
///
/// Returns `None` for empty hrefs, in-page anchors, and non-navigable
/// schemes (`javascript:`, `mailto:`, `tel:`), and for hrefs that fail to
/// parse as URLs.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if SKIP_HREF_PREFIXES.iter().any(|p| href.starts_with(p)) {
        return None;
    }
    base.join(href).ok().map(|u| normalize(&u))
}

/// Whether a URL is in scope for a crawl rooted on `base_host`.
///
/// In scope means: http(s), same host, not a static-asset extension, and
/// not an excluded path.
pub fn is_crawlable(url: &Url, base_host: &str) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }
    if url.host_str() != Some(base_host) {
        return false;
    }

    let path = url.path().to_ascii_lowercase();
    if SKIP_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    if SKIP_PATH_SUBSTRINGS.iter().any(|s| path.contains(s)) {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// UrlPolicy
// ---------------------------------------------------------------------------

/// Scope policy for one crawl session: the base host plus any configured
/// extra path exclusions.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    base_host: String,
    exclude_paths: Vec<String>,
}

impl UrlPolicy {
    pub fn new(base: &Url, exclude_paths: &[String]) -> Self {
        Self {
            base_host: base.host_str().unwrap_or_default().to_string(),
            exclude_paths: exclude_paths.to_vec(),
        }
    }

    pub fn allows(&self, url: &Url) -> bool {
        if !is_crawlable(url, &self.base_host) {
            return false;
        }
        let path = url.path();
        !self.exclude_paths.iter().any(|s| path.contains(s.as_str()))
    }
}

/// Extract in-scope child links from rendered HTML, resolved against the
/// page URL, deduplicated, in document order.
pub fn extract_links(html: &str, page_url: &Url, policy: &UrlPolicy) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(url) = resolve(page_url, href) else {
            continue;
        };
        if policy.allows(&url) && seen.insert(url.clone()) {
            links.push(url);
        }
    }
    links
}
