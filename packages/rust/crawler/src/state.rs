//! Shared state for one bounded-depth crawl session.
//!
//! Three independent locks guard three concerns: the visited set, the URL
//! adjacency graph, and the fetched records. Lock holds are short and never
//! nested, so concurrent page tasks contend only briefly.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use traincrawl_shared::{CrawlResult, ModuleRecord, PageRecord};

#[derive(Debug, Default)]
struct Records {
    pages: HashMap<Url, PageRecord>,
    modules: HashMap<Url, ModuleRecord>,
    errors: Vec<(String, String)>,
}

/// Accumulated state of one crawl session, shared across its page tasks.
#[derive(Debug, Default)]
pub struct CrawlState {
    visited: Mutex<HashSet<String>>,
    adjacency: Mutex<HashMap<Url, Vec<Url>>>,
    records: Mutex<Records>,
}

impl CrawlState {
    /// Claim a URL for fetching. Returns `false` if some task already
    /// claimed it; the check and the insert happen under one lock hold, so
    /// two racing tasks can never both get `true` for the same URL.
    pub async fn try_mark_visited(&self, url: &Url) -> bool {
        self.visited.lock().await.insert(url.as_str().to_string())
    }

    /// Whether a URL has already been claimed. Advisory only; callers still
    /// go through [`Self::try_mark_visited`] before fetching.
    pub async fn is_visited(&self, url: &Url) -> bool {
        self.visited.lock().await.contains(url.as_str())
    }

    /// Record the ordered child links discovered on a page.
    pub async fn record_children(&self, url: &Url, children: Vec<Url>) {
        self.adjacency.lock().await.insert(url.clone(), children);
    }

    /// Store a fetched page record.
    pub async fn record_page(&self, record: PageRecord) {
        self.records
            .lock()
            .await
            .pages
            .insert(record.url.clone(), record);
    }

    /// Store an enriched module record.
    pub async fn record_module(&self, url: &Url, record: ModuleRecord) {
        self.records.lock().await.modules.insert(url.clone(), record);
    }

    /// Record a per-page failure that did not abort the session.
    pub async fn record_page_error(&self, url: &Url, message: impl Into<String>) {
        self.records
            .lock()
            .await
            .errors
            .push((url.as_str().to_string(), message.into()));
    }

    /// Snapshot the session into its final result.
    ///
    /// `pages_visited` counts claimed URLs, so pages whose fetch failed
    /// still count as visited (they will not be retried).
    pub async fn build_result(&self, base_url: Url) -> CrawlResult {
        let pages_visited = self.visited.lock().await.len();
        let url_graph = self.adjacency.lock().await.clone();
        let records = self.records.lock().await;

        CrawlResult {
            crawl_id: Uuid::now_v7(),
            base_url,
            pages_visited,
            url_graph,
            pages: records.pages.clone(),
            modules: records.modules.clone(),
            page_errors: records.errors.clone(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn second_claim_on_same_url_loses() {
        let state = CrawlState::default();
        let page = url("https://t.example.com/module/intro");

        assert!(state.try_mark_visited(&page).await);
        assert!(!state.try_mark_visited(&page).await);
        assert!(state.is_visited(&page).await);
    }

    #[tokio::test]
    async fn racing_claims_admit_exactly_one_winner() {
        let state = Arc::new(CrawlState::default());
        let page = url("https://t.example.com/module/intro");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            let page = page.clone();
            handles.push(tokio::spawn(
                async move { state.try_mark_visited(&page).await },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn result_snapshot_reflects_recorded_state() {
        let state = CrawlState::default();
        let root = url("https://t.example.com/module/intro");
        let child = url("https://t.example.com/module/intro/part-1");

        state.try_mark_visited(&root).await;
        state.try_mark_visited(&child).await;
        state
            .record_children(&root, vec![child.clone()])
            .await;
        state
            .record_page_error(&child, "navigation failed: scripted")
            .await;

        let result = state.build_result(root.clone()).await;
        assert_eq!(result.pages_visited, 2);
        assert_eq!(result.url_graph[&root], vec![child]);
        assert_eq!(result.page_errors.len(), 1);
        assert!(result.error.is_none());
    }
}
