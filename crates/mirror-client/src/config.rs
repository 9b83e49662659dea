//! Client configuration.

use reqwest::Url;
use std::time::Duration;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Timing knobs for the live engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period after the last change notification before flushing
    pub debounce: Duration,
    /// Upper bound between the first notification of a batch and its flush
    pub max_wait: Duration,
    /// How long flushed paths stay flagged as recently changed
    pub recently_changed_ttl: Duration,
    /// Bound on a single directory listing fetch
    pub listing_timeout: Duration,
    /// How long a changed content block stays highlighted
    pub highlight_duration: Duration,
    /// Delay before the single retry of a coalesced read
    pub retry_delay: Duration,
    /// Number of entries requested for the recent-changes list
    pub recent_limit: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            max_wait: Duration::from_secs(2),
            recently_changed_ttl: Duration::from_secs(5),
            listing_timeout: Duration::from_secs(10),
            highlight_duration: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            recent_limit: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme: {0} (expected http or https)")]
    UnsupportedScheme(String),
}

/// Where the server lives and which repository to mirror.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:8000`
    pub base_url: Url,
    /// Repository name on multi-repo servers
    pub repo: Option<String>,
}

impl ServerConfig {
    pub fn new(base_url: &str, repo: Option<String>) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        match base_url.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        Ok(Self {
            base_url,
            repo: repo.filter(|r| !r.is_empty()),
        })
    }

    /// URL of the push channel (`/api/ws` on the same host).
    pub fn ws_url(&self) -> String {
        let mut url = self.base_url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always an allowed scheme change for special schemes
        let _ = url.set_scheme(scheme);
        url.set_query(None);
        url.set_path(&format!("{}/api/ws", self.base_url.path().trim_end_matches('/')));
        url.to_string()
    }
}
