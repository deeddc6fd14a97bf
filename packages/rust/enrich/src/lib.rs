//! Rate-limited, retrying enrichment client.
//!
//! This crate bridges crawl workers to the vision-capable enrichment
//! backend. It provides:
//! - [`RateLimiter`] — sliding-window admission gate shared by all calls
//! - [`EnrichmentBackend`] — the backend call contract, with an
//!   [`OpenRouterBackend`] HTTP implementation
//! - [`EnrichmentClient`] — bounded retries with exponential backoff

pub mod backend;
pub mod client;
pub mod rate;

pub use backend::{EnrichmentBackend, EnrichmentMode, EnrichmentRequest, OpenRouterBackend};
pub use client::EnrichmentClient;
pub use rate::RateLimiter;
