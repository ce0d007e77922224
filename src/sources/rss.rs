// src/sources/rss.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcOffset};

use crate::config::RssSourceConfig;
use crate::listing::{ListingCodec, ListingRecord};
use crate::sources::{normalize_text, Source};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    category: Vec<String>,
}

/// RFC 2822 `pubDate` → RFC 3339 UTC, or `None` when unparseable.
fn pub_date_to_rfc3339(ts: &str) -> Option<String> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
        .and_then(|dt| dt.format(&Rfc3339).ok())
}

/// Generic RSS 2.0 feed. Listing id is the item `guid`, else its link, else
/// a hash of the title.
pub struct RssSource {
    name: String,
    image: Option<PathBuf>,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssSource {
    pub fn from_config(cfg: &RssSourceConfig, client: reqwest::Client) -> Self {
        Self {
            name: cfg.name.clone(),
            image: cfg.image.clone(),
            mode: Mode::Http {
                url: cfg.url.clone(),
                client,
            },
        }
    }

    /// Parse a fixed XML document instead of fetching (tests, dry runs).
    pub fn from_fixture(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }

    fn parse_items_from_str(s: &str) -> Result<Vec<ListingRecord>> {
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = normalize_text(it.title.as_deref().unwrap_or_default());
            let link = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
            let id = match (it.guid.as_deref().map(str::trim), &link) {
                (Some(g), _) if !g.is_empty() => g.to_string(),
                (_, Some(l)) => l.clone(),
                _ if !title.is_empty() => format!("{:x}", Sha256::digest(title.as_bytes())),
                _ => {
                    tracing::debug!("rss item without guid, link or title skipped");
                    continue;
                }
            };

            let mut rec = ListingRecord::new(id).with_field("title", title);
            if let Some(l) = link {
                rec = rec.with_field("link", l);
            }
            let categories: Vec<String> = it
                .category
                .iter()
                .map(|c| normalize_text(c))
                .filter(|c| !c.is_empty())
                .collect();
            if !categories.is_empty() {
                rec = rec.with_field("category", categories.join(", "));
            }
            if let Some(p) = it.pub_date.as_deref().and_then(pub_date_to_rfc3339) {
                rec = rec.with_field("published", p);
            }
            if let Some(d) = it.description.map(|d| normalize_text(&d)).filter(|d| !d.is_empty()) {
                rec = rec.with_field("description", d);
            }
            out.push(rec);
        }
        Ok(out)
    }
}

impl ListingCodec for RssSource {}

#[async_trait]
impl Source for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?
                    .error_for_status()
                    .with_context(|| format!("GET {url}"))?
                    .text()
                    .await
                    .context("reading rss body")?;
                Self::parse_items_from_str(&body)
            }
        }
    }

    fn image_path(&self) -> Option<&Path> {
        self.image.as_deref()
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
