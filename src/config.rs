//! Configuration loading.
//!
//! The configuration is a TOML file whose sections all carry defaults, so a
//! missing file is valid as long as the credential arrives through the
//! environment. Environment variables override file values:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DIFY_API_KEY` | `upstream.api_key` |
//! | `DIFY_BASE_URL` | `upstream.base_url` |
//! | `DIFY_TIMEOUT` | `upstream.timeout_secs` |
//! | `DIFY_MAX_RETRIES` | `retry.max_retries` |
//!
//! The resulting [`Config`] is immutable for the lifetime of the process.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.dify.ai/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("dify-rag-mcp/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fraction of the computed delay applied as ± random jitter.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_jitter() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Sse,
    Websocket,
}

impl std::str::FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stdio" => Ok(TransportKind::Stdio),
            "sse" => Ok(TransportKind::Sse),
            "websocket" | "ws" => Ok(TransportKind::Websocket),
            other => bail!(
                "Unknown transport: '{}'. Must be stdio, sse, or websocket.",
                other
            ),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Websocket => "websocket",
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_drain_timeout_secs() -> u64 {
    10
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Loads the configuration file (if present), applies environment
/// overrides and validates the result.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config: Config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Applies `DIFY_*` overrides using the given lookup (the process
/// environment in production, a map in tests).
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("DIFY_API_KEY") {
        config.upstream.api_key = key;
    }
    if let Some(url) = lookup("DIFY_BASE_URL") {
        config.upstream.base_url = url;
    }
    if let Some(timeout) = lookup("DIFY_TIMEOUT") {
        config.upstream.timeout_secs = timeout
            .parse()
            .with_context(|| format!("DIFY_TIMEOUT must be an integer, got '{}'", timeout))?;
    }
    if let Some(retries) = lookup("DIFY_MAX_RETRIES") {
        config.retry.max_retries = retries.parse().with_context(|| {
            format!("DIFY_MAX_RETRIES must be an integer, got '{}'", retries)
        })?;
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.upstream.api_key.trim().is_empty() {
        bail!("upstream.api_key must be set (or DIFY_API_KEY exported)");
    }

    let url = &config.upstream.base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("upstream.base_url must be an http(s) URL, got '{}'", url);
    }

    if config.upstream.timeout_secs == 0 {
        bail!("upstream.timeout_secs must be > 0");
    }

    if !(0.0..1.0).contains(&config.retry.jitter) {
        bail!("retry.jitter must be in [0.0, 1.0)");
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
    }

    let s = &config.search;
    for (name, w) in [
        ("semantic_weight", s.semantic_weight),
        ("keyword_weight", s.keyword_weight),
    ] {
        if !(0.0..=1.0).contains(&w) {
            bail!("search.{} must be in [0.0, 1.0]", name);
        }
    }
    if s.semantic_weight + s.keyword_weight <= 0.0 {
        bail!("search weights must not both be zero");
    }

    if s.max_top_k == 0 {
        bail!("search.max_top_k must be >= 1");
    }
    if s.default_top_k == 0 || s.default_top_k > s.max_top_k {
        bail!(
            "search.default_top_k must be in [1, {}] (search.max_top_k)",
            s.max_top_k
        );
    }

    Ok(())
}
