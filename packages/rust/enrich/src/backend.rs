//! Enrichment backend contract and the OpenRouter HTTP implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use traincrawl_shared::{Result, ScreenshotRef, TrainCrawlError};

/// Default OpenRouter API root.
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Per-request timeout for backend calls.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("traincrawl/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request model
// ---------------------------------------------------------------------------

/// What kind of output the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentMode {
    /// Free-form markdown conversion of page content.
    Markdown,
    /// Structured navigation analysis; the response must be a JSON object.
    NavigationAnalysis,
}

/// One enrichment request: text, optional screenshot, mode.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub text: String,
    pub screenshot: Option<ScreenshotRef>,
    pub mode: EnrichmentMode,
}

impl EnrichmentRequest {
    pub fn markdown(text: impl Into<String>, screenshot: Option<ScreenshotRef>) -> Self {
        Self {
            text: text.into(),
            screenshot,
            mode: EnrichmentMode::Markdown,
        }
    }

    pub fn navigation(screenshot: ScreenshotRef) -> Self {
        Self {
            text: String::new(),
            screenshot: Some(screenshot),
            mode: EnrichmentMode::NavigationAnalysis,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// One request/response call against the enrichment model.
///
/// Implementations map non-success status, timeouts, and malformed bodies to
/// [`TrainCrawlError::Enrichment`] so the client can retry them; local
/// failures (an unreadable screenshot file) use their own terminal variants.
#[async_trait]
pub trait EnrichmentBackend: Send + Sync {
    async fn complete(&self, request: &EnrichmentRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenRouter backend
// ---------------------------------------------------------------------------

/// Vision-capable chat-completions backend on OpenRouter.
pub struct OpenRouterBackend {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenRouterBackend {
    /// Create a backend with a bounded-timeout HTTP client.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                TrainCrawlError::Enrichment(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.into(),
        })
    }

    /// Point the backend at a different API root (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the chat message content for a request, inlining the
    /// screenshot as a base64 data URL when present.
    async fn build_content(&self, request: &EnrichmentRequest) -> Result<Vec<Value>> {
        let prompt = match request.mode {
            EnrichmentMode::Markdown => format!(
                "Convert this HTML to markdown. Describe and integrate any \
                 image visually: {}",
                request.text
            ),
            EnrichmentMode::NavigationAnalysis => "Analyze this image for navigation purposes. \
                 Identify buttons, text, or landmarks that can guide navigation, and return a \
                 JSON object with 'elements' (list of detected items) and 'description' \
                 (summary)."
                .to_string(),
        };

        let mut content = vec![json!({ "type": "text", "text": prompt })];

        if let Some(screenshot) = &request.screenshot {
            let path = Path::new(screenshot.as_str());
            // An unreadable screenshot is a local failure, not a backend
            // glitch: terminal, never retried.
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| TrainCrawlError::io(path, e))?;
            let encoded = BASE64.encode(bytes);
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{encoded}") }
            }));
        }

        Ok(content)
    }
}

#[async_trait]
impl EnrichmentBackend for OpenRouterBackend {
    #[instrument(skip_all, fields(mode = ?request.mode))]
    async fn complete(&self, request: &EnrichmentRequest) -> Result<String> {
        let content = self.build_content(request).await?;

        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        });
        match request.mode {
            EnrichmentMode::Markdown => {
                body["temperature"] = json!(0.7);
                body["max_tokens"] = json!(2000);
            }
            EnrichmentMode::NavigationAnalysis => {
                body["temperature"] = json!(0.5);
                body["max_tokens"] = json!(1000);
                body["response_format"] = json!({ "type": "json_object" });
            }
        }

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TrainCrawlError::Enrichment(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrainCrawlError::Enrichment(format!(
                "{url}: HTTP {status}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| TrainCrawlError::Enrichment(format!("{url}: invalid body: {e}")))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                TrainCrawlError::Enrichment(format!("{url}: response has no message content"))
            })?;

        debug!(chars = text.len(), "enrichment response received");
        Ok(text.to_string())
    }
}
