//! Gateway configuration
//!
//! Defaults first, then chainable setters for embedding, environment
//! overrides for deployment, and a TOML file for everything at once.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::resilience::RetryPolicy;
use crate::window::WindowPolicy;

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on
    pub bind_addr: SocketAddr,
    /// Base URL traffic is replayed against once allowed
    pub upstream_url: String,
    /// Model answering the first-tier judgment
    pub oracle_model: String,
    /// Model driving the tool-augmented review tier
    pub reasoner_model: String,
    /// Number of nearest-neighbor examples pulled into the review prompt
    pub few_shot_k: usize,
    /// Budgets for the review conversation window
    pub window: WindowPolicy,
    /// Retry behavior for judgment calls
    pub retry: RetryPolicy,
    /// Wall-clock budget for one judgment; expiry blocks the request
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8100".parse().expect("valid default bind addr"),
            upstream_url: "http://127.0.0.1:8000".to_string(),
            oracle_model: "gpt-4o-mini".to_string(),
            reasoner_model: "gpt-4o".to_string(),
            few_shot_k: 3,
            window: WindowPolicy::default(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_upstream_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_url = url.into();
        self
    }

    pub fn with_oracle_model(mut self, model: impl Into<String>) -> Self {
        self.oracle_model = model.into();
        self
    }

    pub fn with_reasoner_model(mut self, model: impl Into<String>) -> Self {
        self.reasoner_model = model.into();
        self
    }

    pub fn with_few_shot_k(mut self, k: usize) -> Self {
        self.few_shot_k = k;
        self
    }

    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = window;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Defaults overridden by `GATEWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("GATEWAY_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| GatewayError::Other(format!("invalid GATEWAY_BIND_ADDR: {addr}")))?;
        }
        if let Ok(url) = std::env::var("GATEWAY_UPSTREAM_URL") {
            config.upstream_url = url;
        }
        if let Ok(model) = std::env::var("GATEWAY_ORACLE_MODEL") {
            config.oracle_model = model;
        }
        if let Ok(model) = std::env::var("GATEWAY_REASONER_MODEL") {
            config.reasoner_model = model;
        }
        if let Ok(seconds) = std::env::var("GATEWAY_REQUEST_TIMEOUT_SECS") {
            let parsed = seconds.parse().map_err(|_| {
                GatewayError::Other(format!("invalid GATEWAY_REQUEST_TIMEOUT_SECS: {seconds}"))
            })?;
            config.request_timeout = Duration::from_secs(parsed);
        }
        Ok(config)
    }

    /// Load the configuration from a TOML file. Absent keys fall back to
    /// their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|err| GatewayError::Other(format!("config parse error: {err}")))
    }
}
