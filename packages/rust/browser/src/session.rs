//! The browser-session capability contract.
//!
//! The crawl core drives a JavaScript-rendering browser through this trait;
//! the concrete driver (chromedriver, CDP, ...) is an external collaborator.
//! A session handle is owned by exactly one crawl at a time and must only be
//! called sequentially — the scheduler guarantees this by holding an async
//! lock across each page's navigate/read/screenshot sequence.

use async_trait::async_trait;
use url::Url;

use traincrawl_shared::{Cookie, Result, ScreenshotRef};

/// One live browser session.
///
/// Methods take `&mut self`: the type system enforces that a handle never
/// sees concurrent calls. All failures surface as
/// [`TrainCrawlError::Navigation`](traincrawl_shared::TrainCrawlError::Navigation)
/// unless they are session-fatal.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate to `url` and wait for the page to render.
    async fn navigate_to(&mut self, url: &Url) -> Result<()>;

    /// The rendered HTML of the current page.
    async fn rendered_content(&mut self) -> Result<String>;

    /// The URL the browser currently shows (may differ from the requested
    /// one after redirects).
    async fn current_url(&mut self) -> Result<Url>;

    /// Snapshot of all cookies in this session.
    async fn cookies(&mut self) -> Result<Vec<Cookie>>;

    /// Install cookies into this session. Used by the cloner before any
    /// navigation happens.
    async fn add_cookies(&mut self, cookies: &[Cookie]) -> Result<()>;

    /// Capture a screenshot of the current page and return an opaque
    /// reference to it.
    async fn take_screenshot(&mut self) -> Result<ScreenshotRef>;

    /// Close the session and release the underlying browser. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Launches fresh, unauthenticated browser sessions.
///
/// The dispatch orchestrator holds one factory and launches one session per
/// module crawl; launch failure is a
/// [`TrainCrawlError::Session`](traincrawl_shared::TrainCrawlError::Session)
/// and is fatal for that module only.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn launch(&self) -> Result<Self::Session>;
}
