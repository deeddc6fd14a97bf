//! Browser-session capability contract and session cloning.
//!
//! This crate provides:
//! - [`BrowserSession`] / [`SessionFactory`] — the capability contract the
//!   crawl core consumes; the driver implementation lives elsewhere
//! - [`clone_session`] — cookie-replay session cloning for parallel crawls
//! - [`testing`] — scripted in-memory sessions for crawl tests

pub mod cloning;
pub mod session;
pub mod testing;

pub use cloning::clone_session;
pub use session::{BrowserSession, SessionFactory};
