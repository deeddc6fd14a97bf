//! Scripted in-memory sessions for tests.
//!
//! These play the role a wiremock server plays for an HTTP crawler: canned
//! page content per URL, recorded call logs, and injectable failures. They
//! live in the library (not behind `cfg(test)`) so the crawler crate's tests
//! can drive the scheduler and dispatcher against them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use traincrawl_shared::{Cookie, Result, ScreenshotRef, TrainCrawlError};

use crate::session::{BrowserSession, SessionFactory};

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// One recorded call on a scripted session, in invocation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    NavigateTo(String),
    RenderedContent,
    CurrentUrl,
    Cookies,
    /// Number of cookies installed.
    AddCookies(usize),
    TakeScreenshot,
    Close,
}

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

/// Scripted behavior, shared by every session a factory launches.
#[derive(Debug, Clone, Default)]
struct Script {
    /// URL → rendered HTML. Unscripted URLs render an empty page.
    pages: HashMap<String, String>,
    /// URLs whose navigation fails.
    nav_failures: HashSet<String>,
    /// URLs whose navigation hangs for the given duration before completing.
    nav_delays: HashMap<String, Duration>,
    /// If set, `add_cookies` fails with this message.
    add_cookies_error: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    current: Option<Url>,
    cookies: Vec<Cookie>,
    calls: Vec<SessionCall>,
    closed: bool,
    screenshots: usize,
}

/// An in-memory [`BrowserSession`] following a script.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// inspection while the crawl owns the session. Use
/// [`ScriptedFactory`] to stamp out independent sessions from one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    script: Script,
    state: Arc<Mutex<SessionState>>,
}

impl ScriptedSession {
    /// Script `url` to render `html`.
    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.script.pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Script navigation to `url` to fail.
    pub fn fail_navigation(mut self, url: &str) -> Self {
        self.script.nav_failures.insert(url.to_string());
        self
    }

    /// Script navigation to `url` to stall for `delay` before completing.
    pub fn delay_navigation(mut self, url: &str, delay: Duration) -> Self {
        self.script.nav_delays.insert(url.to_string(), delay);
        self
    }

    /// Script `add_cookies` to fail with `message`.
    pub fn fail_add_cookies(mut self, message: &str) -> Self {
        self.script.add_cookies_error = Some(message.to_string());
        self
    }

    /// Same script, fresh state — what a factory launch produces.
    fn fresh(&self) -> Self {
        Self {
            script: self.script.clone(),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    fn record(&self, call: SessionCall) {
        self.state.lock().expect("session state lock").calls.push(call);
    }

    // --- inspection -------------------------------------------------------

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<SessionCall> {
        self.state.lock().expect("session state lock").calls.clone()
    }

    /// URLs navigated to, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SessionCall::NavigateTo(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    /// Cookies currently installed in this session.
    pub fn cookie_snapshot(&self) -> Vec<Cookie> {
        self.state.lock().expect("session state lock").cookies.clone()
    }

    /// Whether `close` has been called.
    pub fn closed(&self) -> bool {
        self.state.lock().expect("session state lock").closed
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate_to(&mut self, url: &Url) -> Result<()> {
        self.record(SessionCall::NavigateTo(url.to_string()));

        if let Some(delay) = self.script.nav_delays.get(url.as_str()) {
            tokio::time::sleep(*delay).await;
        }
        if self.script.nav_failures.contains(url.as_str()) {
            return Err(TrainCrawlError::Navigation(format!(
                "scripted failure for {url}"
            )));
        }

        self.state.lock().expect("session state lock").current = Some(url.clone());
        Ok(())
    }

    async fn rendered_content(&mut self) -> Result<String> {
        self.record(SessionCall::RenderedContent);
        let current = self
            .state
            .lock()
            .expect("session state lock")
            .current
            .clone()
            .ok_or_else(|| TrainCrawlError::Navigation("no page loaded".into()))?;

        Ok(self
            .script
            .pages
            .get(current.as_str())
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string()))
    }

    async fn current_url(&mut self) -> Result<Url> {
        self.record(SessionCall::CurrentUrl);
        self.state
            .lock()
            .expect("session state lock")
            .current
            .clone()
            .ok_or_else(|| TrainCrawlError::Navigation("no page loaded".into()))
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>> {
        self.record(SessionCall::Cookies);
        Ok(self.cookie_snapshot())
    }

    async fn add_cookies(&mut self, cookies: &[Cookie]) -> Result<()> {
        self.record(SessionCall::AddCookies(cookies.len()));
        if let Some(message) = &self.script.add_cookies_error {
            return Err(TrainCrawlError::Navigation(message.clone()));
        }
        self.state
            .lock()
            .expect("session state lock")
            .cookies
            .extend_from_slice(cookies);
        Ok(())
    }

    async fn take_screenshot(&mut self) -> Result<ScreenshotRef> {
        self.record(SessionCall::TakeScreenshot);
        let mut state = self.state.lock().expect("session state lock");
        state.screenshots += 1;
        let url = state
            .current
            .as_ref()
            .map(|u| u.as_str().to_string())
            .unwrap_or_default();
        Ok(ScreenshotRef::new(format!(
            "mem:{url}#{}",
            state.screenshots
        )))
    }

    async fn close(&mut self) -> Result<()> {
        self.record(SessionCall::Close);
        self.state.lock().expect("session state lock").closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedFactory
// ---------------------------------------------------------------------------

/// Launches independent [`ScriptedSession`]s from one template script.
///
/// Keeps a handle to every launched session so tests can assert on call
/// logs and close state after the crawl finishes.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    template: ScriptedSession,
    launch_error: Option<String>,
    /// 0-based launch indexes that fail (for per-module failure injection).
    failing_launches: HashSet<usize>,
    launch_counter: AtomicUsize,
    launched: Mutex<Vec<ScriptedSession>>,
}

impl ScriptedFactory {
    pub fn new(template: ScriptedSession) -> Self {
        Self {
            template,
            ..Default::default()
        }
    }

    /// A factory whose every launch fails (browser binary missing, etc.).
    pub fn failing(message: &str) -> Self {
        Self {
            launch_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Make the `index`-th launch (0-based) fail while others succeed.
    pub fn fail_launch(mut self, index: usize) -> Self {
        self.failing_launches.insert(index);
        self
    }

    /// Handles to every session launched so far.
    pub fn launched(&self) -> Vec<ScriptedSession> {
        self.launched.lock().expect("launched lock").clone()
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Session = ScriptedSession;

    async fn launch(&self) -> Result<ScriptedSession> {
        let index = self.launch_counter.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.launch_error {
            return Err(TrainCrawlError::Session(message.clone()));
        }
        if self.failing_launches.contains(&index) {
            return Err(TrainCrawlError::Session(format!(
                "scripted launch failure (launch {index})"
            )));
        }

        let session = self.template.fresh();
        self.launched
            .lock()
            .expect("launched lock")
            .push(session.clone());
        Ok(session)
    }
}
