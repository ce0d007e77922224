// src/config.rs
//! Runtime configuration and recipient credentials.
//!
//! Lookup order for the config file:
//! 1) `$WATCH_CONFIG_PATH`
//! 2) `config/watch.toml`
//! 3) built-in defaults (no sources)

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::Recipient;
use crate::snapshot::RetentionPolicy;

pub const ENV_CONFIG_PATH: &str = "WATCH_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/watch.toml";
const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
const ENV_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub watch: WatchSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub notify: NotifySection,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// When a snapshot is written after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistPolicy {
    /// Every completed run (keeps last-seen times fresh).
    #[default]
    Always,
    /// Only runs with new or delisted listings.
    OnChange,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_source_delay_ms")]
    pub source_delay_ms: u64,
    #[serde(default = "default_scrape_timeout_secs")]
    pub scrape_timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default)]
    pub maintenance_skip: bool,
    #[serde(default)]
    pub persist: PersistPolicy,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_source_delay_ms() -> u64 {
    1000
}
fn default_scrape_timeout_secs() -> u64 {
    60
}
fn default_grace_period_secs() -> u64 {
    4 * 3600
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            interval_secs: default_interval_secs(),
            source_delay_ms: default_source_delay_ms(),
            scrape_timeout_secs: default_scrape_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            maintenance_skip: false,
            persist: PersistPolicy::default(),
        }
    }
}

impl WatchSection {
    /// Grace period, saturating at `chrono::Duration::MAX` for huge values.
    pub fn grace_period(&self) -> chrono::Duration {
        i64::try_from(self.grace_period_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Persist policy actually applied. Skipping quiet runs leaves last-seen
    /// times stale, so `on_change` only holds with the grace rule disabled.
    pub fn effective_persist(&self) -> PersistPolicy {
        match self.persist {
            PersistPolicy::OnChange if self.grace_period_secs > 0 => PersistPolicy::Always,
            p => p,
        }
    }

    pub fn source_delay(&self) -> Duration {
        Duration::from_millis(self.source_delay_ms)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs.max(1))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "default_keep_last")]
    pub keep_last: usize,
}

fn default_keep_last() -> usize {
    10
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            keep_last: default_keep_last(),
        }
    }
}

impl RetentionSection {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::keep_last(self.keep_last)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifySection {
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default = "default_caption_limit")]
    pub caption_limit: usize,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u8,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

fn default_message_limit() -> usize {
    4096
}
fn default_caption_limit() -> usize {
    1024
}
fn default_rate_limit_backoff_ms() -> u64 {
    2000
}
fn default_rate_limit_retries() -> u8 {
    1
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_credentials_path() -> PathBuf {
    PathBuf::from("creds.json")
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            message_limit: default_message_limit(),
            caption_limit: default_caption_limit(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            rate_limit_retries: default_rate_limit_retries(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            credentials_path: default_credentials_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Rss(RssSourceConfig),
    Json(JsonSourceConfig),
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Rss(c) => &c.name,
            SourceConfig::Json(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonSourceConfig {
    pub name: String,
    pub url: String,
    /// JSON pointer to the array of items; empty means the document root.
    #[serde(default)]
    pub items_pointer: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default)]
    pub link_field: Option<String>,
    /// e.g. `https://jobs.example.com/{id}`
    #[serde(default)]
    pub link_template: Option<String>,
    /// Extra item fields copied into the listing.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Query parameter carrying the page number (1-based); no paging if unset.
    #[serde(default)]
    pub page_param: Option<String>,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

fn default_id_field() -> String {
    "id".to_string()
}
fn default_title_field() -> String {
    "title".to_string()
}
fn default_max_pages() -> u32 {
    20
}

impl WatchConfig {
    /// Reject combinations that would break the delisting rules.
    pub fn validate(&self) -> Result<()> {
        if self.watch.persist == PersistPolicy::OnChange && self.watch.grace_period_secs > 0 {
            return Err(anyhow!(
                "persist = \"on_change\" requires grace_period_secs = 0 \
                 (quiet runs would leave last-seen times stale)"
            ));
        }
        Ok(())
    }
}

/// Load config from an explicit TOML path.
pub fn load_config_from(path: &Path) -> Result<WatchConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let cfg: WatchConfig =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

/// Load config using env var + fallbacks (see module docs).
pub fn load_config_default() -> Result<WatchConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    if default.exists() {
        return load_config_from(&default);
    }
    tracing::info!("no config file found, using defaults");
    Ok(WatchConfig::default())
}

/// Load recipients from a JSON array or a TOML `[[recipients]]` file.
pub fn load_recipients_from(path: &Path) -> Result<Vec<Recipient>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading credentials from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_recipients(&content, &ext)
}

/// Credentials file if present, else `TELEGRAM_BOT_TOKEN` + `TELEGRAM_CHAT_ID`,
/// else no recipients.
pub fn load_recipients(notify: &NotifySection) -> Result<Vec<Recipient>> {
    if notify.credentials_path.exists() {
        return load_recipients_from(&notify.credentials_path);
    }
    match (std::env::var(ENV_BOT_TOKEN), std::env::var(ENV_CHAT_ID)) {
        (Ok(token), Ok(chat_id)) if !token.trim().is_empty() && !chat_id.trim().is_empty() => {
            Ok(vec![Recipient::new(token.trim(), chat_id.trim())])
        }
        _ => Ok(Vec::new()),
    }
}

fn parse_recipients(s: &str, hint_ext: &str) -> Result<Vec<Recipient>> {
    #[derive(Deserialize)]
    struct TomlCreds {
        recipients: Vec<Recipient>,
    }

    if hint_ext == "toml" {
        let v: TomlCreds = toml::from_str(s).context("parsing TOML credentials")?;
        return Ok(v.recipients);
    }
    if let Ok(v) = serde_json::from_str::<Vec<Recipient>>(s) {
        return Ok(v);
    }
    // Extensionless files may still be TOML.
    if let Ok(v) = toml::from_str::<TomlCreds>(s) {
        return Ok(v.recipients);
    }
    Err(anyhow!("unsupported credentials format"))
}

/// Chat ids come as strings or bare numbers depending on who wrote the file.
pub(crate) fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        S(String),
        I(i64),
    }
    Ok(match Raw::deserialize(de)? {
        Raw::S(s) => s,
        Raw::I(i) => i.to_string(),
    })
}
