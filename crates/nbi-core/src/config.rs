//! Pipeline configuration
//!
//! Every field has a default matching the embedded notebook application, so
//! a TOML file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Message type accepted for ingestion
pub const LOAD_NOTEBOOK_TYPE: &str = "load-notebook";

/// Message type announced to the opener on activation
pub const READY_MESSAGE_TYPE: &str = "jupyterlite-ready";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Ingest pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Database holding notebook files
    pub database_name: String,
    /// Store holding notebook files
    pub store_name: String,
    /// Host command that opens a document
    pub open_command: String,
    /// Host command that runs every cell of the active notebook
    pub run_all_command: String,
    /// Document factory passed to the open command
    pub document_factory: String,
    /// Local storage key for the bearer token
    pub token_key: String,
    /// `type` of the notification sent to the opener on activation
    pub ready_message_type: String,
    /// Text shown on the loading overlay
    pub overlay_message: String,
    /// Default tracing filter directive
    pub log_filter: String,
    /// Capability polling cadence
    pub poller: PollerConfig,
    /// Fallback delays
    pub grace: GraceConfig,
}

impl IngestConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With primary store address
    #[inline]
    #[must_use]
    pub fn with_store(mut self, database: impl Into<String>, store: impl Into<String>) -> Self {
        self.database_name = database.into();
        self.store_name = store.into();
        self
    }

    /// With poller settings
    #[inline]
    #[must_use]
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// With grace delays
    #[inline]
    #[must_use]
    pub fn with_grace(mut self, grace: GraceConfig) -> Self {
        self.grace = grace;
        self
    }

    /// With token key
    #[inline]
    #[must_use]
    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        self.token_key = key.into();
        self
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_name: "JupyterLite Storage".to_string(),
            store_name: "files".to_string(),
            open_command: "docmanager:open".to_string(),
            run_all_command: "notebook:run-all-cells".to_string(),
            document_factory: "Notebook".to_string(),
            token_key: "bearerToken".to_string(),
            ready_message_type: READY_MESSAGE_TYPE.to_string(),
            overlay_message: "Loading notebook...".to_string(),
            log_filter: "info".to_string(),
            poller: PollerConfig::default(),
            grace: GraceConfig::default(),
        }
    }
}

/// Capability polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Give up after this many milliseconds
    pub timeout_ms: u64,
    /// Check every this many milliseconds
    pub interval_ms: u64,
}

impl PollerConfig {
    /// Create with explicit timing
    #[inline]
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout_ms: duration_ms(timeout),
            interval_ms: duration_ms(interval),
        }
    }

    /// Timeout as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval as a duration, never zero
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            interval_ms: 100,
        }
    }
}

/// Fixed delays used when the host offers no readiness signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceConfig {
    /// Wait when the document has no session-readiness signal
    pub session_fallback_ms: u64,
    /// Wait after run-all when the host cannot report rendering settled
    pub render_settle_ms: u64,
}

impl GraceConfig {
    /// Create with explicit delays
    #[inline]
    #[must_use]
    pub fn new(session_fallback: Duration, render_settle: Duration) -> Self {
        Self {
            session_fallback_ms: duration_ms(session_fallback),
            render_settle_ms: duration_ms(render_settle),
        }
    }

    /// Session fallback delay
    #[inline]
    #[must_use]
    pub fn session_fallback(&self) -> Duration {
        Duration::from_millis(self.session_fallback_ms)
    }

    /// Render settle delay
    #[inline]
    #[must_use]
    pub fn render_settle(&self) -> Duration {
        Duration::from_millis(self.render_settle_ms)
    }
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            session_fallback_ms: 5_000,
            render_settle_ms: 3_000,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_environment() {
        let config = IngestConfig::default();
        assert_eq!(config.database_name, "JupyterLite Storage");
        assert_eq!(config.store_name, "files");
        assert_eq!(config.poller.timeout(), Duration::from_secs(10));
        assert_eq!(config.poller.interval(), Duration::from_millis(100));
        assert_eq!(config.grace.session_fallback(), Duration::from_secs(5));
        assert_eq!(config.grace.render_settle(), Duration::from_secs(3));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml_str(
            r#"
            token_key = "authToken"

            [poller]
            timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.token_key, "authToken");
        assert_eq!(config.poller.timeout_ms, 2500);
        assert_eq!(config.poller.interval_ms, 100);
        assert_eq!(config.open_command, "docmanager:open");
    }

    #[test]
    fn bad_toml_is_an_error() {
        let result = IngestConfig::from_toml_str("poller = 3");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nbi.toml");
        std::fs::write(&path, "store_name = \"notebooks\"\n").unwrap();

        let config = IngestConfig::load(&path).unwrap();
        assert_eq!(config.store_name, "notebooks");
    }

    #[test]
    fn zero_interval_is_clamped() {
        let poller = PollerConfig::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(poller.interval(), Duration::from_millis(1));
    }
}
