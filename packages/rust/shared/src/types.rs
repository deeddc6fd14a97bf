//! Core domain types for traincrawl crawl sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Cookie
// ---------------------------------------------------------------------------

/// A single browser cookie, captured from an authenticated session.
///
/// This is plain data, not a live reference: cloning a session replays a
/// value copy of these into a fresh browser, so the source and the clone
/// share no mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Expiry timestamp; `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// A minimal name/value cookie (session-scoped, defaults elsewhere).
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            expires: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ScreenshotRef
// ---------------------------------------------------------------------------

/// Opaque reference to a captured page screenshot.
///
/// The crawl core never interprets the contents; the browser driver decides
/// whether this is a file path, an object-store key, or something else. The
/// enrichment backend resolves it when building a vision request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenshotRef(pub String);

impl ScreenshotRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScreenshotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// One fetched page. Written once by the crawl session that produced it,
/// read-many afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Normalized page URL.
    pub url: Url,
    /// Rendered HTML as returned by the browser session.
    pub raw_content: String,
    /// Normalized, order-preserving, deduplicated child links.
    pub extracted_links: Vec<Url>,
    /// Screenshot captured right after render.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotRef>,
    /// Navigation + render time for this page.
    pub fetch_latency_ms: u64,
    /// SHA-256 of the rendered content, for downstream change detection.
    pub content_hash: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ModuleRecord
// ---------------------------------------------------------------------------

/// A page classified as a training module, enriched through the vision
/// model. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Module name (page title, or the last URL path segment).
    pub name: String,
    /// Objectives text scraped from the page or the enriched markdown.
    pub objectives: String,
    /// Question content converted to markdown by the enrichment backend.
    pub markdown: String,
    /// Downloadable attachments linked from the module page.
    pub download_links: Vec<Url>,
    /// Screenshot the vision model saw, for traceability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotRef>,
}

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Aggregate outcome of one bounded-depth crawl session.
///
/// Ownership transfers to the dispatch orchestrator on completion; downstream
/// ticket pipelines consume it from there. A module-fatal failure leaves the
/// maps empty and `error` populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    /// Identifier for this crawl session (time-sortable).
    pub crawl_id: Uuid,
    /// Root URL the crawl started from.
    pub base_url: Url,
    /// Number of pages fetched in this session.
    pub pages_visited: usize,
    /// URL adjacency: page → ordered child links.
    pub url_graph: HashMap<Url, Vec<Url>>,
    /// Fetched pages keyed by normalized URL.
    pub pages: HashMap<Url, PageRecord>,
    /// Enriched module records keyed by normalized URL.
    pub modules: HashMap<Url, ModuleRecord>,
    /// Per-page failures (URL, message) that did not abort the crawl.
    pub page_errors: Vec<(String, String)>,
    /// Fatal failure for the whole session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlResult {
    /// An empty result for a module whose crawl never got off the ground
    /// (session clone failure, catastrophic navigation error).
    pub fn from_error(base_url: Url, error: impl Into<String>) -> Self {
        Self {
            crawl_id: Uuid::now_v7(),
            base_url,
            pages_visited: 0,
            url_graph: HashMap::new(),
            pages: HashMap::new(),
            modules: HashMap::new(),
            page_errors: Vec::new(),
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Mindmap rendering
// ---------------------------------------------------------------------------

/// Render a URL adjacency map as a Mermaid mindmap, for downstream reports.
///
/// Parents and children are emitted in sorted order so output is stable
/// across runs; node labels are sanitized to Mermaid-safe characters.
pub fn mermaid_mindmap(url_graph: &HashMap<Url, Vec<Url>>) -> String {
    fn sanitize(url: &Url) -> String {
        url.as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == ' ' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    let mut out = String::from("mindmap\n  root((Site Map))\n");
    let mut parents: Vec<&Url> = url_graph.keys().collect();
    parents.sort_by_key(|u| u.as_str());

    for parent in parents {
        out.push_str(&format!("    {}\n", sanitize(parent)));
        let mut children: Vec<&Url> = url_graph[parent].iter().collect();
        children.sort_by_key(|u| u.as_str());
        for child in children {
            out.push_str(&format!("      {}\n", sanitize(child)));
        }
    }
    out
}
