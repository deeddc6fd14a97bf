//! Crawl engine: scope rules, crawl-session state, module classification,
//! bounded-depth scheduling, and multi-module dispatch over cloned
//! browser sessions.
//!
//! The flow, top to bottom:
//! 1. [`dispatch::Dispatcher::clone_site`] reads the authenticated
//!    dashboard, discovers module entry points, and snapshots cookies.
//! 2. Each module crawls in its own cloned session under a bounded worker
//!    pool, driven by a [`scheduler::CrawlScheduler`].
//! 3. Pages classified as modules by [`classify::detect_module`] are
//!    enriched to markdown through the shared enrichment client.

pub mod classify;
pub mod dispatch;
pub mod rules;
pub mod scheduler;
pub mod state;

pub use dispatch::{Dispatcher, ModuleEntry, extract_module_entries};
pub use scheduler::CrawlScheduler;
pub use state::CrawlState;
