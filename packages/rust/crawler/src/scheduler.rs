//! Bounded-depth recursive crawl scheduling.
//!
//! One scheduler drives one crawl session: a single browser session behind
//! an async mutex, a shared state bundle, and a fetch pool bounding
//! in-flight page work. Child pages fan out as spawned tasks; each carries
//! a join timeout so one stuck subtree cannot wedge the session.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, instrument, warn};
use url::Url;

use traincrawl_browser::BrowserSession;
use traincrawl_enrich::{EnrichmentBackend, EnrichmentClient};
use traincrawl_shared::{ModuleRecord, PageRecord, Result, ScreenshotRef};

use crate::classify::{self, ModuleSignals};
use crate::rules::{self, UrlPolicy};
use crate::state::CrawlState;

/// Aborts a fan-out's tasks when dropped, so cancelling a crawl subtree
/// cancels every descendant with it. Tasks that already joined ignore the
/// abort; this only fires for tasks still running when the owning crawl
/// future is dropped mid-join.
struct FanOut(Vec<AbortHandle>);

impl Drop for FanOut {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Scheduler for one bounded-depth crawl session.
///
/// Cheap to clone; all fields are shared handles. Every page task in the
/// session drives the same browser session, so page fetches within a
/// session serialize on the session mutex while enrichment and link work
/// proceed concurrently.
pub struct CrawlScheduler<S, B> {
    state: Arc<CrawlState>,
    session: Arc<Mutex<S>>,
    enrichment: Arc<EnrichmentClient<B>>,
    fetch_pool: Arc<Semaphore>,
    policy: Arc<UrlPolicy>,
    child_timeout: Duration,
}

impl<S, B> Clone for CrawlScheduler<S, B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            session: self.session.clone(),
            enrichment: self.enrichment.clone(),
            fetch_pool: self.fetch_pool.clone(),
            policy: self.policy.clone(),
            child_timeout: self.child_timeout,
        }
    }
}

impl<S, B> CrawlScheduler<S, B>
where
    S: BrowserSession + 'static,
    B: EnrichmentBackend + 'static,
{
    pub fn new(
        state: Arc<CrawlState>,
        session: Arc<Mutex<S>>,
        enrichment: Arc<EnrichmentClient<B>>,
        fetch_pool: Arc<Semaphore>,
        policy: Arc<UrlPolicy>,
        child_timeout: Duration,
    ) -> Self {
        Self {
            state,
            session,
            enrichment,
            fetch_pool,
            policy,
            child_timeout,
        }
    }

    /// Crawl `root` and everything reachable within `depth` levels
    /// (`depth == 1` fetches the root only). Page failures are recorded in
    /// the crawl state, never propagated.
    pub async fn run(&self, root: &Url, depth: u32) {
        self.clone().crawl(rules::normalize(root), depth).await;
    }

    // Recursion through spawned tasks needs an owned, boxed future.
    fn crawl(self, url: Url, depth: u32) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if depth == 0 {
                return;
            }
            // Claim before fetching: a URL reached through two parents is
            // fetched by whichever task wins the claim.
            if !self.state.try_mark_visited(&url).await {
                debug!(%url, "already claimed, skipping");
                return;
            }

            let page = {
                let _permit = self
                    .fetch_pool
                    .acquire()
                    .await
                    .expect("fetch pool outlives the crawl");
                match self.fetch_page(&url).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(%url, error = %e, "page fetch failed");
                        self.state.record_page_error(&url, e.to_string()).await;
                        return;
                    }
                }
            };

            let links = page.extracted_links.clone();
            self.state.record_children(&url, links.clone()).await;

            let raw_content = page.raw_content.clone();
            let screenshot = page.screenshot.clone();
            self.state.record_page(page).await;

            if let Some(signals) = classify::detect_module(&raw_content, &url) {
                self.enrich_module(&url, signals, screenshot).await;
            }

            if depth > 1 {
                let mut fan_out = FanOut(Vec::new());
                let mut children: Vec<(Url, JoinHandle<()>)> = Vec::new();
                for link in links {
                    if self.state.is_visited(&link).await {
                        continue;
                    }
                    let task = tokio::spawn(self.clone().crawl(link.clone(), depth - 1));
                    fan_out.0.push(task.abort_handle());
                    children.push((link, task));
                }

                for (link, mut task) in children {
                    match tokio::time::timeout(self.child_timeout, &mut task).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(%link, error = %e, "child crawl task failed");
                            self.state
                                .record_page_error(&link, format!("child task failed: {e}"))
                                .await;
                        }
                        Err(_) => {
                            // The subtree is marked failed; siblings keep
                            // going. Abort and drain so the session mutex is
                            // released before the next child runs.
                            task.abort();
                            let _ = task.await;
                            warn!(
                                %link,
                                timeout_secs = self.child_timeout.as_secs(),
                                "child crawl timed out"
                            );
                            self.state
                                .record_page_error(
                                    &link,
                                    format!(
                                        "child crawl timed out after {}s",
                                        self.child_timeout.as_secs()
                                    ),
                                )
                                .await;
                        }
                    }
                }
            }
        })
    }

    /// Navigate, render, and screenshot one page under a single session
    /// lock hold, then extract links outside it.
    #[instrument(skip_all, fields(%url))]
    async fn fetch_page(&self, url: &Url) -> Result<PageRecord> {
        let started = std::time::Instant::now();

        let mut session = self.session.lock().await;
        session.navigate_to(url).await?;
        let raw_content = session.rendered_content().await?;
        let screenshot = match session.take_screenshot().await {
            Ok(shot) => Some(shot),
            Err(e) => {
                warn!(%url, error = %e, "screenshot failed, continuing without");
                None
            }
        };
        drop(session);

        let fetch_latency_ms = started.elapsed().as_millis() as u64;
        let extracted_links = rules::extract_links(&raw_content, url, &self.policy);
        let content_hash = format!("{:x}", Sha256::digest(raw_content.as_bytes()));
        debug!(
            latency_ms = fetch_latency_ms,
            links = extracted_links.len(),
            "page fetched"
        );

        Ok(PageRecord {
            url: url.clone(),
            raw_content,
            extracted_links,
            screenshot,
            fetch_latency_ms,
            content_hash,
            fetched_at: chrono::Utc::now(),
        })
    }

    /// Enrich a classified module page. Failures (after the client's own
    /// retries) downgrade to a page error; the page record itself stays.
    async fn enrich_module(
        &self,
        url: &Url,
        signals: ModuleSignals,
        screenshot: Option<ScreenshotRef>,
    ) {
        match self
            .enrichment
            .convert_to_markdown(&signals.question_html, screenshot.as_ref())
            .await
        {
            Ok(markdown) => {
                let objectives = signals
                    .objectives
                    .or_else(|| classify::objectives_from_markdown(&markdown))
                    .unwrap_or_else(|| "No objectives found".to_string());
                let record = ModuleRecord {
                    name: signals.name,
                    objectives,
                    markdown,
                    download_links: signals.download_links,
                    screenshot,
                };
                self.state.record_module(url, record).await;
            }
            Err(e) => {
                warn!(%url, error = %e, "module enrichment failed");
                self.state
                    .record_page_error(url, format!("enrichment failed: {e}"))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use traincrawl_browser::testing::ScriptedSession;
    use traincrawl_enrich::{EnrichmentRequest, RateLimiter};
    use traincrawl_shared::{RetryPolicy, TrainCrawlError};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    /// Backend returning one canned completion for every request.
    struct StaticBackend(&'static str);

    #[async_trait]
    impl EnrichmentBackend for StaticBackend {
        async fn complete(&self, _request: &EnrichmentRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Backend whose every call fails.
    struct OutageBackend;

    #[async_trait]
    impl EnrichmentBackend for OutageBackend {
        async fn complete(&self, _request: &EnrichmentRequest) -> Result<String> {
            Err(TrainCrawlError::Enrichment("scripted outage".into()))
        }
    }

    fn scheduler_for<B: EnrichmentBackend + 'static>(
        session: &ScriptedSession,
        backend: B,
        root: &Url,
    ) -> CrawlScheduler<ScriptedSession, B> {
        // Single-attempt retries keep paused-time tests free of backoff.
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        CrawlScheduler::new(
            Arc::new(CrawlState::default()),
            Arc::new(Mutex::new(session.clone())),
            Arc::new(EnrichmentClient::new(backend, RateLimiter::new(1000), retry)),
            Arc::new(Semaphore::new(4)),
            Arc::new(UrlPolicy::new(root, &[])),
            Duration::from_secs(5),
        )
    }

    const ROOT: &str = "https://t.example.com/module/net";

    fn root_with_children() -> ScriptedSession {
        ScriptedSession::default().with_page(
            ROOT,
            r#"
                <a href="/module/net/part-1">One</a>
                <a href="/module/net/part-2">Two</a>
                <a href="/module/net/part-3">Three</a>
                <a href="https://elsewhere.example.com/x">Outside</a>
            "#,
        )
    }

    #[tokio::test]
    async fn depth_two_fetches_root_and_in_scope_children() {
        let session = root_with_children();
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 2).await;
        let result = scheduler.state.build_result(root.clone()).await;

        assert_eq!(result.pages_visited, 4);
        assert_eq!(result.url_graph[&root].len(), 3);
        assert!(result.page_errors.is_empty());

        let navigations = session.navigations();
        assert_eq!(navigations.len(), 4);
        assert!(!navigations.iter().any(|u| u.contains("elsewhere")));
    }

    #[tokio::test]
    async fn depth_one_fetches_root_only() {
        let session = root_with_children();
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 1).await;
        let result = scheduler.state.build_result(root.clone()).await;

        assert_eq!(result.pages_visited, 1);
        // Links are still recorded for the graph even when not followed.
        assert_eq!(result.url_graph[&root].len(), 3);
    }

    #[tokio::test]
    async fn cyclic_links_fetch_each_page_once() {
        let session = ScriptedSession::default()
            .with_page(ROOT, r#"<a href="/module/net/b">B</a>"#)
            .with_page(
                "https://t.example.com/module/net/b",
                r#"<a href="/module/net">Back</a>"#,
            );
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 5).await;
        let result = scheduler.state.build_result(root.clone()).await;

        assert_eq!(result.pages_visited, 2);
        assert_eq!(session.navigations().len(), 2);
    }

    #[tokio::test]
    async fn navigation_failure_is_a_page_error_not_a_crash() {
        let session = root_with_children().fail_navigation("https://t.example.com/module/net/part-2");
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 2).await;
        let result = scheduler.state.build_result(root.clone()).await;

        assert_eq!(result.pages_visited, 4);
        assert_eq!(result.pages.len(), 3);
        assert_eq!(result.page_errors.len(), 1);
        assert!(result.page_errors[0].0.contains("part-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_child_times_out_without_stalling_siblings() {
        let session = root_with_children()
            .delay_navigation("https://t.example.com/module/net/part-1", Duration::from_secs(600));
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 2).await;
        let result = scheduler.state.build_result(root.clone()).await;

        let timeouts: Vec<_> = result
            .page_errors
            .iter()
            .filter(|(_, msg)| msg.contains("timed out"))
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert!(timeouts[0].0.contains("part-1"));

        // The stalled page never produced a record; its siblings did.
        assert!(!result.pages.contains_key(&url("https://t.example.com/module/net/part-1")));
        assert!(result.pages.contains_key(&url("https://t.example.com/module/net/part-2")));
        assert!(result.pages.contains_key(&url("https://t.example.com/module/net/part-3")));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_subtree_cancels_its_descendants() {
        let mid = "https://t.example.com/module/net/a";
        let leaf = "https://t.example.com/module/net/a/b";
        let session = ScriptedSession::default()
            .with_page(ROOT, r#"<a href="/module/net/a">A</a>"#)
            .with_page(mid, r#"<a href="/module/net/a/b">B</a>"#)
            .delay_navigation(mid, Duration::from_secs(1))
            .delay_navigation(leaf, Duration::from_secs(600));
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("md"), &root);

        scheduler.run(&root, 3).await;
        let calls_at_return = session.calls().len();

        let result = scheduler.state.build_result(root.clone()).await;
        assert!(
            result
                .page_errors
                .iter()
                .any(|(u, msg)| u.ends_with("/a") && msg.contains("timed out"))
        );
        assert!(!result.pages.contains_key(&url(leaf)));

        // The stalled leaf must die with its timed-out parent: nothing may
        // keep driving the session or writing state after `run` returns.
        tokio::time::advance(Duration::from_secs(700)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.calls().len(), calls_at_return);
        let late = scheduler.state.build_result(root).await;
        assert!(!late.pages.contains_key(&url(leaf)));
    }

    #[tokio::test]
    async fn module_page_is_enriched() {
        let session = ScriptedSession::default().with_page(
            ROOT,
            r#"
                <h1 class="module-title">Network Traffic Analysis</h1>
                <div class="objectives">Objectives: read a pcap</div>
                <div class="question-frame"><p>Q1</p></div>
                <a href="/module/net/handout.pdf">Handout</a>
            "#,
        );
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, StaticBackend("# Converted"), &root);

        scheduler.run(&root, 1).await;
        let result = scheduler.state.build_result(root.clone()).await;

        let module = &result.modules[&root];
        assert_eq!(module.name, "Network Traffic Analysis");
        assert_eq!(module.objectives, "Objectives: read a pcap");
        assert_eq!(module.markdown, "# Converted");
        assert_eq!(module.download_links.len(), 1);
        assert!(module.screenshot.as_ref().unwrap().as_str().starts_with("mem:"));
    }

    #[tokio::test]
    async fn enrichment_outage_keeps_page_but_records_error() {
        let session = ScriptedSession::default().with_page(
            ROOT,
            r#"<div class="question-frame"><p>Q1</p></div>"#,
        );
        let root = url(ROOT);
        let scheduler = scheduler_for(&session, OutageBackend, &root);

        scheduler.run(&root, 1).await;
        let result = scheduler.state.build_result(root.clone()).await;

        assert!(result.modules.is_empty());
        assert!(result.pages.contains_key(&root));
        assert_eq!(result.page_errors.len(), 1);
        assert!(result.page_errors[0].1.contains("enrichment failed"));
    }
}
