// ⚙️ Monitor Configuration - one JSON file, every field optional
//
// A missing settings file is not an error: the built-in defaults apply.
// A settings file that exists but cannot be parsed is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregator::AggregatorSettings;
use crate::entities::{default_sources, Source};
use crate::error::MonitorError;
use crate::extractor::KeywordSets;
use crate::scoring::ScoringConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/settings.json";

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum aggregate confidence for has_signal
    pub alert: u32,
    /// Counted as high confidence in the daily summary
    pub high_confidence: u32,
    /// Minimum confidence for sending an alert
    pub notify: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            alert: 30,
            high_confidence: 60,
            notify: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Destination identifier handed to the notifier (chat id, group name)
    pub channel: String,
    /// When set, reports are POSTed here; otherwise they are only logged
    pub webhook_url: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            channel: "funding-alerts".to_string(),
            webhook_url: None,
        }
    }
}

// ============================================================================
// MONITOR CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub data_dir: PathBuf,
    /// Relative paths are resolved against `data_dir`
    pub database_file: PathBuf,
    pub entities_file: PathBuf,
    pub thresholds: Thresholds,
    pub scoring: ScoringConfig,
    pub aggregator: AggregatorSettings,
    pub sources: Vec<Source>,
    pub keywords: KeywordSets,
    pub notification: NotificationSettings,
    /// Pause between entities in `check-all`
    pub entity_delay_ms: u64,
    /// Environment variable holding the Firecrawl API key
    pub firecrawl_api_key_env: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            data_dir: PathBuf::from("data"),
            database_file: PathBuf::from("funding_watch.db"),
            entities_file: PathBuf::from("companies.json"),
            thresholds: Thresholds::default(),
            scoring: ScoringConfig::default(),
            aggregator: AggregatorSettings::default(),
            sources: default_sources(),
            keywords: KeywordSets::default(),
            notification: NotificationSettings::default(),
            entity_delay_ms: 2_000,
            firecrawl_api_key_env: "FIRECRAWL_API_KEY".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Load from `path`; defaults when the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            return Ok(MonitorConfig::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: MonitorConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Reject settings that would make every check meaningless
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.aggregator.concurrency == 0 {
            return Err(MonitorError::Config("aggregator.concurrency must be at least 1".into()));
        }
        if self.aggregator.per_call_timeout_secs == 0 || self.aggregator.overall_timeout_secs == 0 {
            return Err(MonitorError::Config("aggregator timeouts must be positive".into()));
        }
        let mut ids: Vec<&str> = self.sources.iter().map(|s| s.id.as_str()).collect();
        ids.sort();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(MonitorError::Config(format!("duplicate source id: {}", pair[0])));
        }
        if self.scoring.class_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(MonitorError::Config("class weights must be finite and non-negative".into()));
        }
        Ok(())
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.database_file)
    }

    pub fn entities_path(&self) -> PathBuf {
        self.resolve(&self.entities_file)
    }

    /// Firecrawl key from the configured environment variable, if set
    pub fn firecrawl_api_key(&self) -> Option<String> {
        std::env::var(&self.firecrawl_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}
