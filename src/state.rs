use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::db::{OutcomeDb, StoreError};
use crate::error::ConfigError;
use crate::google_api::sheets::SheetsAuth;
use crate::source::SheetSource;
use crate::store::OutcomeStore;
use crate::types::{LayoutMode, RangeSpec, SyncReport};

/// Env var pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PORTFOLIO_SYNC_CONFIG";

fn default_port() -> u16 {
    3000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_sync_interval_minutes() -> u64 {
    15
}

fn default_source_timeout_secs() -> u64 {
    30
}

fn default_store_timeout_ms() -> u64 {
    5000
}

/// Credentials for the spreadsheet source. An API key wins when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleSourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default)]
    pub ranges: Vec<RangeSpec>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u64,
    /// SQLite file; `~/.portfolio-sync/portfolio.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub google: GoogleSourceConfig,
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            ranges: Vec::new(),
            port: default_port(),
            bind_address: default_bind_address(),
            sync_interval_minutes: default_sync_interval_minutes(),
            database_path: None,
            google: GoogleSourceConfig::default(),
            source_timeout_secs: default_source_timeout_secs(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl Config {
    /// Apply environment overrides. `lookup` is `std::env::var` in
    /// production; blank values count as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(id) = get("SHEET_ID") {
            self.spreadsheet_id = id;
        }
        if let Some(raw) = get("SHEET_RANGES") {
            self.ranges = raw
                .split(';')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(|r| RangeSpec {
                    range: r.to_string(),
                    group: None,
                    layout: LayoutMode::default(),
                    name_order: Default::default(),
                })
                .collect();
        }
        if let Some(raw) = get("PORT") {
            self.port = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                value: raw.clone(),
            })?;
        }
        if let Some(addr) = get("BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(raw) = get("SYNC_INTERVAL_MINUTES") {
            self.sync_interval_minutes = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "SYNC_INTERVAL_MINUTES",
                value: raw.clone(),
            })?;
        }
        if let Some(path) = get("DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(key) = get("GOOGLE_API_KEY") {
            self.google.api_key = Some(key);
        }
        if let Some(path) = get("GOOGLE_TOKEN_PATH") {
            self.google.token_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Invalid("spreadsheetId is required".to_string()));
        }
        if self.ranges.is_empty() {
            return Err(ConfigError::Invalid("at least one range is required".to_string()));
        }
        if self.sync_interval_minutes == 0 {
            return Err(ConfigError::Invalid(
                "syncIntervalMinutes must be at least 1".to_string(),
            ));
        }
        for (i, spec) in self.ranges.iter().enumerate() {
            if spec.range.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("ranges[{}] has an empty range", i)));
            }
            if let LayoutMode::Narrow(narrow) = &spec.layout {
                let headers = [
                    &narrow.full_name_header,
                    &narrow.subject_header,
                    &narrow.status_header,
                ];
                if headers.iter().any(|h| h.trim().is_empty())
                    || narrow.group_header.as_deref().is_some_and(|h| h.trim().is_empty())
                {
                    return Err(ConfigError::Invalid(format!(
                        "ranges[{}] ({}) has a blank narrow-layout header",
                        i, spec.range
                    )));
                }
            }
        }
        self.sheets_auth().map(|_| ())
    }

    pub fn sheets_auth(&self) -> Result<SheetsAuth, ConfigError> {
        if let Some(key) = self.google.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(SheetsAuth::ApiKey(key.to_string()));
        }
        match &self.google.token_path {
            Some(path) => Ok(SheetsAuth::OAuthToken { path: path.clone() }),
            None => Err(ConfigError::Invalid(
                "google.apiKey or google.tokenPath is required".to_string(),
            )),
        }
    }

    pub fn database_path(&self) -> Result<PathBuf, StoreError> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => OutcomeDb::default_path(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.saturating_mul(60))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Default config location: `~/.portfolio-sync/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".portfolio-sync").join("config.json"))
}

/// Read a config file. `None` (or a missing optional file) yields defaults.
fn read_config_file(path: Option<&Path>, required: bool) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    if !required && !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the config file, apply env overrides and validate.
pub fn load_config_with<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = lookup(CONFIG_PATH_ENV)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    let mut config = match explicit {
        Some(path) => read_config_file(Some(path.as_path()), true)?,
        None => read_config_file(default_config_path().as_deref(), false)?,
    };
    config.apply_env(&lookup)?;
    config.validate()?;
    Ok(config)
}

pub fn load_config() -> Result<Config, ConfigError> {
    load_config_with(|name| std::env::var(name).ok())
}

/// Shared handles for the poller and the HTTP server.
pub struct AppContext {
    pub config: Config,
    pub source: Arc<dyn SheetSource>,
    pub store: Arc<dyn OutcomeStore>,
    /// Wakes the sync poller ahead of its interval.
    pub sync_wake: Notify,
    pub last_sync: RwLock<Option<SyncReport>>,
}

impl AppContext {
    pub fn new(config: Config, source: Arc<dyn SheetSource>, store: Arc<dyn OutcomeStore>) -> Self {
        Self {
            config,
            source,
            store,
            sync_wake: Notify::new(),
            last_sync: RwLock::new(None),
        }
    }
}
