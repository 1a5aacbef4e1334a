use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use harvester_core::HarvestConfig;
use harvester_engine::{HttpSettings, DEFAULT_TOKEN_ENV};
use serde::{Deserialize, Serialize};

/// Contents of the RON settings file. Every field has a default, so a file
/// only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub harvest: HarvestConfig,
    pub work_source_url: String,
    /// Rendering service; also serves the collector endpoints.
    pub browser_url: String,
    /// Products go here when set, otherwise to `output_dir`.
    pub upload_url: Option<String>,
    pub output_dir: PathBuf,
    /// Name of the environment variable holding the bearer token.
    pub token_env: String,
    /// Log to this file in addition to the terminal.
    pub log_file: Option<PathBuf>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let http = HttpSettings::default();
        Self {
            harvest: HarvestConfig::default(),
            work_source_url: "http://127.0.0.1:8080/api".to_string(),
            browser_url: "http://127.0.0.1:9222".to_string(),
            upload_url: None,
            output_dir: PathBuf::from("harvest_output"),
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            log_file: None,
            connect_timeout_ms: http.connect_timeout.as_millis() as u64,
            request_timeout_ms: http.request_timeout.as_millis() as u64,
        }
    }
}

impl AppSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        Self::from_ron(&content).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn from_ron(content: &str) -> Result<Self> {
        let settings: Self = ron::from_str(content)?;
        settings.harvest.validate()?;
        Ok(settings)
    }

    pub fn to_ron(&self) -> Result<String> {
        let pretty = ron::ser::PrettyConfig::new();
        Ok(ron::ser::to_string_pretty(self, pretty)?)
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
