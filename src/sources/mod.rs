// src/sources/mod.rs
pub mod json_feed;
pub mod rss;

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::listing::{ListingCodec, ListingRecord};

/// An external system that yields listings once per run.
///
/// Implementations should log and swallow their own failures where they can,
/// but an `Err` is still contained by the orchestrator and treated as an
/// empty scrape for that source only.
#[async_trait::async_trait]
pub trait Source: ListingCodec + Send + Sync {
    /// Human-readable name used in logs and notification headers.
    fn name(&self) -> &str;

    /// Directory-safe key for the snapshot namespace.
    fn key(&self) -> String {
        source_key(self.name())
    }

    /// Fetch the current set of listings.
    async fn scrape(&self) -> Result<Vec<ListingRecord>>;

    /// One-line rendering for a new listing. `None` uses the default
    /// `"<title> - <link>"` line.
    fn render(&self, _record: &ListingRecord) -> Option<String> {
        None
    }

    /// Image sent along with the first notification chunk, if it exists.
    fn image_path(&self) -> Option<&Path> {
        None
    }
}

/// Lowercase alphanumerics, everything else collapsed to `-`.
pub fn source_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "source".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize scraped text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    if let Some(re) = regex_once(&RE_TAGS, r"(?is)</?[^>]+>") {
        out = re.replace_all(&out, " ").to_string();
    }

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    if let Some(re) = regex_once(&RE_WS, r"\s+") {
        out = re.replace_all(&out, " ").to_string();
    }
    out = out.trim().to_string();

    // Length cap: 1500 chars
    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

fn regex_once<'a>(cell: &'a OnceCell<regex::Regex>, pattern: &str) -> Option<&'a regex::Regex> {
    cell.get_or_try_init(|| regex::Regex::new(pattern)).ok()
}

/// Build the configured sources. Unknown or invalid entries fail loudly at
/// startup rather than silently dropping a source.
pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<Arc<dyn Source>>> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("listing-watch/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mut out: Vec<Arc<dyn Source>> = Vec::with_capacity(configs.len());
    for cfg in configs {
        let source: Arc<dyn Source> = match cfg {
            SourceConfig::Rss(c) => Arc::new(rss::RssSource::from_config(c, client.clone())),
            SourceConfig::Json(c) => {
                Arc::new(json_feed::JsonFeedSource::from_config(c, client.clone())?)
            }
        };
        tracing::debug!(source = source.name(), key = %source.key(), "source configured");
        out.push(source);
    }
    ensure_unique_keys(&out)?;
    Ok(out)
}

/// Each source owns its snapshot directory; two names mapping to the same
/// key would read and prune each other's files.
pub fn ensure_unique_keys(sources: &[Arc<dyn Source>]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(sources.len());
    for s in sources {
        if let Some(other) = seen.insert(s.key(), s.name()) {
            return Err(anyhow!(
                "sources `{other}` and `{}` share the snapshot key `{}`",
                s.name(),
                s.key()
            ));
        }
    }
    Ok(())
}
