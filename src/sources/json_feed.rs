// src/sources/json_feed.rs
//! Generic JSON API source.
//!
//! Most career sites expose a JSON endpoint returning an array of postings,
//! sometimes paged by a page-number query parameter. Items are located with
//! a JSON pointer and mapped to listings by configured field names.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::config::JsonSourceConfig;
use crate::listing::{ListingCodec, ListingRecord};
use crate::sources::{normalize_text, Source};

pub struct JsonFeedSource {
    cfg: JsonSourceConfig,
    client: reqwest::Client,
}

impl JsonFeedSource {
    pub fn from_config(cfg: &JsonSourceConfig, client: reqwest::Client) -> Result<Self> {
        if !cfg.items_pointer.is_empty() && !cfg.items_pointer.starts_with('/') {
            return Err(anyhow!(
                "source `{}`: items_pointer must start with '/'",
                cfg.name
            ));
        }
        Ok(Self {
            cfg: cfg.clone(),
            client,
        })
    }

    async fn fetch_page(&self, page: Option<u32>) -> Result<Value> {
        let mut req = self.client.get(&self.cfg.url);
        if let (Some(param), Some(p)) = (self.cfg.page_param.as_deref(), page) {
            req = req.query(&[(param, p.to_string())]);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {}", self.cfg.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.cfg.url))?;
        resp.json::<Value>().await.context("decoding json body")
    }

    fn items<'a>(&self, doc: &'a Value) -> Option<&'a Vec<Value>> {
        doc.pointer(&self.cfg.items_pointer).and_then(Value::as_array)
    }

    /// Map one API document to listings. Items without a usable id are skipped.
    pub fn extract(&self, doc: &Value) -> Result<Vec<ListingRecord>> {
        let items = self
            .items(doc)
            .ok_or_else(|| anyhow!("no array at pointer `{}`", self.cfg.items_pointer))?;

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = item.get(&self.cfg.id_field).and_then(scalar_to_string) else {
                tracing::debug!(source = %self.cfg.name, "item without id skipped");
                continue;
            };

            let title = item
                .get(&self.cfg.title_field)
                .and_then(Value::as_str)
                .map(normalize_text)
                .unwrap_or_default();
            let mut rec = ListingRecord::new(id.clone()).with_field("title", title);

            let link = match (&self.cfg.link_field, &self.cfg.link_template) {
                (Some(f), _) => item.get(f).and_then(Value::as_str).map(str::to_string),
                (None, Some(t)) => Some(t.replace("{id}", &id)),
                (None, None) => None,
            };
            if let Some(l) = link {
                rec = rec.with_field("link", l);
            }

            for f in &self.cfg.fields {
                if let Some(v) = item.get(f) {
                    rec = rec.with_field(f.clone(), v.clone());
                }
            }
            out.push(rec);
        }
        Ok(out)
    }

    /// Listings of one page, or `None` once paging should stop. Past the
    /// first page a missing items array ends paging like an empty one.
    pub fn page(&self, page: u32, doc: &Value) -> Result<Option<Vec<ListingRecord>>> {
        if page > 1 && self.items(doc).is_none() {
            tracing::debug!(source = %self.cfg.name, page, "no items array, paging stopped");
            return Ok(None);
        }
        let batch = self.extract(doc)?;
        Ok((!batch.is_empty()).then_some(batch))
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl ListingCodec for JsonFeedSource {}

#[async_trait]
impl Source for JsonFeedSource {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        if self.cfg.page_param.is_none() {
            let doc = self.fetch_page(None).await?;
            return self.extract(&doc);
        }

        let mut all = Vec::new();
        for page in 1..=self.cfg.max_pages.max(1) {
            let doc = self.fetch_page(Some(page)).await?;
            let Some(batch) = self.page(page, &doc)? else {
                break;
            };
            tracing::trace!(source = %self.cfg.name, page, items = batch.len(), "page fetched");
            all.extend(batch);
        }
        Ok(all)
    }

    fn image_path(&self) -> Option<&Path> {
        self.cfg.image.as_deref()
    }
}
