//! Retrying enrichment client.
//!
//! Wraps a backend with the shared rate limiter, a bounded attempt count,
//! and exponential backoff. Only [`TrainCrawlError::Enrichment`] failures
//! are retried; everything else propagates immediately.

use serde_json::Value;
use tracing::{instrument, warn};

use traincrawl_shared::{Result, RetryPolicy, ScreenshotRef, TrainCrawlError};

use crate::backend::{EnrichmentBackend, EnrichmentRequest};
use crate::rate::RateLimiter;

/// Rate-limited, retrying facade over an [`EnrichmentBackend`].
///
/// Shared across all crawl workers; every attempt (including retries)
/// passes through the rate limiter first. Each call tracks its own attempt
/// count — there is no retry state shared between calls.
pub struct EnrichmentClient<B> {
    backend: B,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl<B: EnrichmentBackend> EnrichmentClient<B> {
    pub fn new(backend: B, limiter: RateLimiter, retry: RetryPolicy) -> Self {
        Self {
            backend,
            limiter,
            retry,
        }
    }

    /// Convert page content (plus an optional screenshot for the vision
    /// model) into markdown.
    #[instrument(skip_all, fields(chars = html.len(), screenshot = screenshot.is_some()))]
    pub async fn convert_to_markdown(
        &self,
        html: &str,
        screenshot: Option<&ScreenshotRef>,
    ) -> Result<String> {
        let request = EnrichmentRequest::markdown(html, screenshot.cloned());
        let request = &request;
        self.with_retries(|| async move { self.backend.complete(request).await })
            .await
    }

    /// Analyze a screenshot for navigation affordances.
    ///
    /// The response must parse as a JSON object; anything else counts as a
    /// retryable failure, because transient backend glitches sometimes
    /// truncate output.
    #[instrument(skip_all, fields(screenshot = %screenshot))]
    pub async fn analyze_for_navigation(&self, screenshot: &ScreenshotRef) -> Result<Value> {
        let request = EnrichmentRequest::navigation(screenshot.clone());
        let request = &request;
        self.with_retries(|| async move {
            let text = self.backend.complete(request).await?;
            let value: Value = serde_json::from_str(&text).map_err(|e| {
                TrainCrawlError::Enrichment(format!("navigation response is not JSON: {e}"))
            })?;
            if !value.is_object() {
                return Err(TrainCrawlError::Enrichment(
                    "navigation response is not a JSON object".into(),
                ));
            }
            Ok(value)
        })
        .await
    }

    /// Run `op` up to `max_attempts` times, acquiring rate-limiter
    /// admission before each attempt and backing off between retryable
    /// failures.
    async fn with_retries<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.limiter.acquire().await;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "enrichment attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    /// Backend that pops a scripted outcome per call and counts calls.
    struct ScriptedBackend {
        outcomes: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn new(outcomes: Vec<Result<String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EnrichmentBackend for ScriptedBackend {
        async fn complete(&self, _request: &EnrichmentRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TrainCrawlError::Enrichment("exhausted script".into())))
        }
    }

    fn client(backend: ScriptedBackend) -> EnrichmentClient<ScriptedBackend> {
        EnrichmentClient::new(backend, RateLimiter::new(1000), RetryPolicy::default())
    }

    fn http_500() -> Result<String> {
        Err(TrainCrawlError::Enrichment("HTTP 500".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let client = client(ScriptedBackend::new(vec![
            http_500(),
            http_500(),
            Ok("# Module".into()),
        ]));

        let markdown = client.convert_to_markdown("<h1>Module</h1>", None).await.unwrap();
        assert_eq!(markdown, "# Module");
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_call_hits_exact_attempt_ceiling() {
        let client = client(ScriptedBackend::new(vec![http_500(), http_500(), http_500()]));

        let err = client.convert_to_markdown("<p>x</p>", None).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_is_attempted_once() {
        let backend = ScriptedBackend::new(vec![Err(TrainCrawlError::io(
            "/missing/shot.png",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        ))]);
        let client = client(backend);

        let err = client.convert_to_markdown("<p>x</p>", None).await.unwrap_err();
        assert!(matches!(err, TrainCrawlError::Io { .. }));
        assert_eq!(client.backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_follow_the_policy() {
        let client = client(ScriptedBackend::new(vec![
            http_500(),
            http_500(),
            Ok("done".into()),
        ]));

        let start = tokio::time::Instant::now();
        client.convert_to_markdown("<p>x</p>", None).await.unwrap();
        // 4s after the first failure, 8s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_navigation_json_is_retried() {
        let client = client(ScriptedBackend::new(vec![
            Ok("not json at all".into()),
            Ok("[1, 2, 3]".into()),
            Ok(r#"{"elements": [], "description": "dashboard"}"#.into()),
        ]));

        let value = client
            .analyze_for_navigation(&ScreenshotRef::new("mem:shot"))
            .await
            .unwrap();
        assert_eq!(value["description"], "dashboard");
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistently_malformed_navigation_json_surfaces_error() {
        let client = client(ScriptedBackend::new(vec![
            Ok("truncated {".into()),
            Ok("truncated {".into()),
            Ok("truncated {".into()),
        ]));

        let err = client
            .analyze_for_navigation(&ScreenshotRef::new("mem:shot"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_passes_through_the_rate_limiter() {
        let backend = ScriptedBackend::new(vec![http_500(), http_500(), Ok("ok".into())]);
        // Ceiling of one call per minute: the second and third attempts
        // must each wait out the window on top of the backoff.
        let client = EnrichmentClient::new(backend, RateLimiter::new(1), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        client.convert_to_markdown("<p>x</p>", None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(120));
        assert_eq!(client.backend.calls(), 3);
    }
}
