//! Shared types, error model, and configuration for traincrawl.
//!
//! This crate is the foundation depended on by all other traincrawl crates.
//! It provides:
//! - [`TrainCrawlError`] — the unified error type
//! - Domain types ([`PageRecord`], [`ModuleRecord`], [`CrawlResult`], [`Cookie`])
//! - Configuration ([`AppConfig`], [`CrawlerConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlerConfig, DefaultsConfig, OpenRouterConfig, RateLimitConfig, RetryConfig,
    RetryPolicy, SiteConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{Result, TrainCrawlError};
pub use types::{
    Cookie, CrawlResult, ModuleRecord, PageRecord, ScreenshotRef, mermaid_mindmap,
};
