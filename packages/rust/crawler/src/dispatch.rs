//! Multi-module dispatch over a pool of cloned sessions.
//!
//! The entry point: given an authenticated dashboard session, discover the
//! module entry points, snapshot the auth cookies once, and crawl every
//! module in its own cloned session under a bounded worker pool. Modules
//! fail independently; one broken module becomes an error-carrying result,
//! not a failed run.

use std::sync::Arc;

use scraper::{Html, Selector};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use url::Url;

use traincrawl_browser::{BrowserSession, SessionFactory, clone_session};
use traincrawl_enrich::{EnrichmentBackend, EnrichmentClient};
use traincrawl_shared::{Cookie, CrawlResult, CrawlerConfig, Result, TrainCrawlError};

use crate::rules::{self, UrlPolicy};
use crate::scheduler::CrawlScheduler;
use crate::state::CrawlState;

/// Path substrings marking a dashboard link as a module entry point.
const MODULE_PATH_MARKERS: [&str; 2] = ["/module/", "/world/"];

/// One module discovered on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEntry {
    pub name: String,
    pub url: Url,
}

/// Scan dashboard HTML for module entry points, in document order,
/// deduplicated by URL. Only same-host crawlable links count.
pub fn extract_module_entries(html: &str, dashboard_url: &Url) -> Vec<ModuleEntry> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");
    let policy = UrlPolicy::new(dashboard_url, &[]);

    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(url) = rules::resolve(dashboard_url, href) else {
            continue;
        };
        if !policy.allows(&url)
            || !MODULE_PATH_MARKERS.iter().any(|m| url.path().contains(m))
            || !seen.insert(url.clone())
        {
            continue;
        }

        let text = anchor.text().collect::<String>().trim().to_string();
        let name = if text.is_empty() {
            url.path_segments()
                .and_then(|mut s| s.next_back())
                .unwrap_or("module")
                .to_string()
        } else {
            text
        };
        entries.push(ModuleEntry { name, url });
    }
    entries
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Orchestrates per-module crawls from one authenticated dashboard session.
pub struct Dispatcher<F, B> {
    factory: Arc<F>,
    enrichment: Arc<EnrichmentClient<B>>,
    config: CrawlerConfig,
}

impl<F, B> Dispatcher<F, B>
where
    F: SessionFactory + 'static,
    B: EnrichmentBackend + 'static,
{
    pub fn new(factory: F, enrichment: EnrichmentClient<B>, config: CrawlerConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            enrichment: Arc::new(enrichment),
            config,
        }
    }

    /// Crawl every module reachable from the dashboard the given session
    /// currently shows.
    ///
    /// Hard failures (unreadable dashboard, no module entry points, cookie
    /// snapshot failure) abort the whole run; per-module failures surface
    /// as error-carrying results. Results arrive in completion order, one
    /// `(module name, result)` pair per discovered module.
    #[instrument(skip_all)]
    pub async fn clone_site<S: BrowserSession>(
        &self,
        dashboard: &mut S,
    ) -> Result<Vec<(String, CrawlResult)>> {
        let dashboard_url = dashboard.current_url().await?;
        let content = dashboard.rendered_content().await?;

        let entries = extract_module_entries(&content, &dashboard_url);
        if entries.is_empty() {
            return Err(TrainCrawlError::validation(format!(
                "no module entry points found on {dashboard_url}"
            )));
        }
        info!(modules = entries.len(), %dashboard_url, "discovered module entry points");

        // One snapshot for all clones; the dashboard session is not touched
        // again after this.
        let cookies = dashboard.cookies().await?;

        let pool = Arc::new(Semaphore::new(self.config.worker_count));
        let mut tasks = JoinSet::new();
        for entry in entries {
            let factory = self.factory.clone();
            let enrichment = self.enrichment.clone();
            let config = self.config.clone();
            let cookies = cookies.clone();
            let pool = pool.clone();
            tasks.spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .expect("worker pool outlives dispatch");
                let result =
                    crawl_module(factory.as_ref(), enrichment, &cookies, &entry, &config).await;
                (entry.name, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => results.push(pair),
                Err(e) => {
                    warn!(error = %e, "module crawl task panicked");
                    results.push((
                        "<unknown>".to_string(),
                        CrawlResult::from_error(
                            dashboard_url.clone(),
                            format!("module task failed: {e}"),
                        ),
                    ));
                }
            }
        }
        Ok(results)
    }
}

/// Crawl one module in a freshly cloned session. Never fails: every failure
/// mode collapses into the returned result.
#[instrument(skip_all, fields(module = %entry.name))]
async fn crawl_module<F, B>(
    factory: &F,
    enrichment: Arc<EnrichmentClient<B>>,
    cookies: &[Cookie],
    entry: &ModuleEntry,
    config: &CrawlerConfig,
) -> CrawlResult
where
    F: SessionFactory,
    B: EnrichmentBackend + 'static,
{
    let root = rules::normalize(&entry.url);

    let session = match clone_session(factory, cookies).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "session clone failed, skipping module");
            return CrawlResult::from_error(root, e.to_string());
        }
    };
    let session = Arc::new(Mutex::new(session));

    let state = Arc::new(CrawlState::default());
    let scheduler = CrawlScheduler::new(
        state.clone(),
        session.clone(),
        enrichment,
        Arc::new(Semaphore::new(config.worker_count)),
        Arc::new(UrlPolicy::new(&root, &config.exclude_paths)),
        config.child_timeout,
    );
    scheduler.run(&root, config.module_depth).await;

    // Close on every path; a close failure is logged, not propagated.
    if let Err(e) = session.lock().await.close().await {
        warn!(error = %e, "session close failed");
    }

    state.build_result(root).await
}
