//! Sliding-window rate limiter for enrichment calls.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Width of the admission window.
const WINDOW: Duration = Duration::from_secs(60);

/// A best-effort sliding-window admission gate bounding calls-per-minute.
///
/// One limiter is shared by every concurrent enrichment call. The window is
/// a queue of admission timestamps under a single async mutex; `acquire`
/// holds the lock across its sleep, which keeps the prune/check/admit
/// sequence atomic and makes blocked callers drain in FIFO order. The bound
/// is best-effort, not hard real-time: under pathological interleavings up
/// to `C` plus the number of already-blocked callers can land in one window,
/// which the enrichment backend tolerates as a brief burst.
#[derive(Debug)]
pub struct RateLimiter {
    calls_per_minute: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting at most `calls_per_minute` per sliding
    /// 60-second window. A ceiling of zero is clamped to one.
    pub fn new(calls_per_minute: usize) -> Self {
        Self {
            calls_per_minute: calls_per_minute.max(1),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspend until the call is admitted, then record the admission.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;

        let now = Instant::now();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.calls_per_minute {
            // Window full: wait until the oldest admission falls out.
            let oldest = *window.front().expect("non-empty window");
            let sleep_time = WINDOW.saturating_sub(now.duration_since(oldest));
            if !sleep_time.is_zero() {
                debug!(sleep_ms = sleep_time.as_millis() as u64, "rate window full, waiting");
                tokio::time::sleep(sleep_time).await;
            }
            window.pop_front();
        }

        window.push_back(Instant::now());
    }
}
