//! Application configuration for traincrawl.
//!
//! User config lives at `~/.traincrawl/traincrawl.toml`. The runtime
//! [`CrawlerConfig`] is derived from [`AppConfig`] and passed explicitly to
//! the dispatch orchestrator — no process-wide config singleton.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainCrawlError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "traincrawl.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".traincrawl";

// ---------------------------------------------------------------------------
// Config structs (matching traincrawl.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crawl defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Target site settings.
    #[serde(default)]
    pub site: SiteConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Enrichment rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Enrichment retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Worker-pool size: the number of simultaneously open browser sessions.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Crawl depth for each module entry point.
    #[serde(default = "default_module_depth")]
    pub module_depth: u32,

    /// Join timeout in seconds for each child page task.
    #[serde(default = "default_child_timeout")]
    pub child_timeout_secs: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            module_depth: default_module_depth(),
            child_timeout_secs: default_child_timeout(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_module_depth() -> u32 {
    1
}
fn default_child_timeout() -> u64 {
    30
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// The authenticated dashboard URL crawls start from.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Extra path substrings to exclude beyond the built-in denylist.
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            exclude_paths: Vec::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://cyberskyline.com/competition/dashboard".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Vision-capable model used for enrichment.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "qwen/qwen3-vl-235b-a22b-instruct".into()
}

/// `[rate_limit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding-window admission ceiling for enrichment calls.
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
        }
    }
}

fn default_calls_per_minute() -> usize {
    50
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per enrichment call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in seconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    /// Backoff delay ceiling in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    4
}
fn default_max_delay() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Runtime configs (derived, passed explicitly)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration handed to the dispatch orchestrator.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Worker-pool size (bounds open browser sessions).
    pub worker_count: usize,
    /// Depth for each per-module crawl.
    pub module_depth: u32,
    /// Join timeout for each child page task.
    pub child_timeout: Duration,
    /// Extra excluded path substrings.
    pub exclude_paths: Vec<String>,
}

impl From<&AppConfig> for CrawlerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_count: config.defaults.worker_count,
            module_depth: config.defaults.module_depth,
            child_timeout: Duration::from_secs(config.defaults.child_timeout_secs),
            exclude_paths: config.site.exclude_paths.clone(),
        }
    }
}

/// Exponential backoff policy for enrichment retries.
///
/// Delay for attempt `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. Each call instance tracks its own attempt count.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay to sleep after a failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.traincrawl/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TrainCrawlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.traincrawl/traincrawl.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrainCrawlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TrainCrawlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrainCrawlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrainCrawlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrainCrawlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(TrainCrawlError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("worker_count"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.worker_count, 4);
        assert_eq!(parsed.defaults.module_depth, 1);
        assert_eq!(parsed.rate_limit.calls_per_minute, 50);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
worker_count = 8

[site]
base_url = "https://training.example.com/dashboard"
exclude_paths = ["/logout"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.worker_count, 8);
        assert_eq!(config.defaults.module_depth, 1);
        assert_eq!(config.site.exclude_paths, vec!["/logout".to_string()]);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn crawler_config_from_app_config() {
        let app = AppConfig::default();
        let crawler = CrawlerConfig::from(&app);
        assert_eq!(crawler.worker_count, 4);
        assert_eq!(crawler.module_depth, 1);
        assert_eq!(crawler.child_timeout, Duration::from_secs(30));
    }

    #[test]
    fn retry_policy_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(4));
        assert_eq!(policy.delay_after(2), Duration::from_secs(8));
        // 16s would exceed the cap
        assert_eq!(policy.delay_after(3), Duration::from_secs(10));
        assert_eq!(policy.delay_after(10), Duration::from_secs(10));
    }

    #[test]
    fn retry_policy_floors_attempts_at_one() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            base_delay_secs: 1,
            max_delay_secs: 2,
        });
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "TC_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
