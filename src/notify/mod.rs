// src/notify/mod.rs
//! # Notification Dispatcher
//! Renders a diff into text lines, packs them into transport-sized chunks
//! and fans them out to every recipient.
//!
//! Delivery is best effort: one attempt per chunk and recipient, plus a
//! bounded retry when the transport reports rate limiting.

pub mod telegram;

use metrics::counter;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::NotifySection;
use crate::error::WatchError;
use crate::listing::ListingRecord;

/// One chat to notify.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub token: String,
    #[serde(deserialize_with = "crate::config::string_or_number")]
    pub chat_id: String,
}

impl Recipient {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }
}

// Tokens must not end up in logs.
impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipient")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat {}", self.chat_id)
    }
}

/// Outcome of a single transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Delivered,
    /// "Too many requests"; worth one more try after a pause.
    RateLimited,
    /// Any other failure, with a reason for the log.
    Failed(String),
}

/// A messaging channel able to send text and captioned images.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_image(&self, to: &Recipient, image: &Path, caption: &str) -> SendStatus;
    async fn send_text(&self, to: &Recipient, text: &str) -> SendStatus;
}

/// Header line plus one line per listing.
///
/// New listings use `line_for` when it yields a line, otherwise
/// `"<title> - <link>"`. Delisted listings are title-only since their link
/// may no longer resolve.
pub fn render<F>(
    new: &[ListingRecord],
    delisted: &[ListingRecord],
    source_name: &str,
    line_for: F,
) -> Vec<String>
where
    F: Fn(&ListingRecord) -> Option<String>,
{
    let mut lines = Vec::with_capacity(new.len() + delisted.len() + 2);
    if !new.is_empty() {
        lines.push(format!("NEW ({source_name})"));
        for rec in new {
            lines.push(line_for(rec).unwrap_or_else(|| default_line(rec)));
        }
    }
    if !delisted.is_empty() {
        lines.push(format!("DELISTED ({source_name})"));
        for rec in delisted {
            lines.push(rec.title().to_string());
        }
    }
    lines
}

fn default_line(rec: &ListingRecord) -> String {
    match rec.link() {
        Some(link) => format!("{} - {}", rec.title(), link),
        None => rec.title().to_string(),
    }
}

/// Greedily pack lines into blocks of at most `max_len` characters, counting
/// one newline per line. Blocks only break between lines; joining the blocks
/// with `\n` gives back the input lines, except that a line which alone
/// exceeds the limit is cut short and ends with `…`.
pub fn chunk(lines: &[String], max_len: usize) -> Vec<String> {
    chunk_with_head(lines, max_len, max_len)
}

/// Like [`chunk`], but the first block has its own limit (image captions are
/// shorter than plain messages).
pub fn chunk_with_head(lines: &[String], head_len: usize, max_len: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut used = 0usize;

    for line in lines {
        let limit = if blocks.is_empty() { head_len } else { max_len };
        let mut cost = line.chars().count() + 1;

        if used > 0 && used + cost > limit {
            blocks.push(std::mem::take(&mut current));
            used = 0;
        }

        let limit = if blocks.is_empty() { head_len } else { max_len };
        let line = if cost > limit {
            tracing::warn!(chars = cost - 1, limit, "line longer than transport limit, truncated");
            let t = truncate_line(line, limit.saturating_sub(1).max(1));
            cost = t.chars().count() + 1;
            t
        } else {
            line.clone()
        };

        if used > 0 {
            current.push('\n');
        }
        current.push_str(&line);
        used += cost;
    }
    if used > 0 {
        blocks.push(current);
    }
    blocks
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = line.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// Knobs for the dispatcher; built from `[notify]`.
#[derive(Debug, Clone)]
pub struct DispatchLimits {
    pub message_limit: usize,
    pub caption_limit: usize,
    pub rate_limit_backoff: Duration,
    pub rate_limit_retries: u8,
}

impl From<&NotifySection> for DispatchLimits {
    fn from(n: &NotifySection) -> Self {
        Self {
            message_limit: n.message_limit.max(1),
            caption_limit: n.caption_limit.max(1),
            rate_limit_backoff: Duration::from_millis(n.rate_limit_backoff_ms),
            rate_limit_retries: n.rate_limit_retries,
        }
    }
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&NotifySection::default())
    }
}

/// Per-call delivery tally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    transport: Box<dyn Transport>,
    recipients: Vec<Recipient>,
    limits: DispatchLimits,
}

impl Dispatcher {
    pub fn new(transport: Box<dyn Transport>, recipients: Vec<Recipient>, limits: DispatchLimits) -> Self {
        Self {
            transport,
            recipients,
            limits,
        }
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Split `lines` for delivery, honouring the caption limit when an image
    /// goes along with the first chunk.
    pub fn chunks_for(&self, lines: &[String], with_image: bool) -> Vec<String> {
        if with_image {
            let head = self.limits.caption_limit.min(self.limits.message_limit);
            chunk_with_head(lines, head, self.limits.message_limit)
        } else {
            chunk(lines, self.limits.message_limit)
        }
    }

    /// Chunk and deliver one source's rendered lines. A missing image falls
    /// back to plain text.
    pub async fn notify(&self, lines: &[String], image: Option<&Path>) -> DeliveryReport {
        let image = match image {
            Some(p) if tokio::fs::try_exists(p).await.unwrap_or(false) => Some(p),
            Some(p) => {
                tracing::debug!(image = %p.display(), "image not found, sending text only");
                None
            }
            None => None,
        };
        let chunks = self.chunks_for(lines, image.is_some());
        self.deliver(&chunks, image).await
    }

    /// Send `chunks` to every recipient. With an image the first chunk is the
    /// caption; the rest go as plain messages. Recipients are independent.
    pub async fn deliver(&self, chunks: &[String], image: Option<&Path>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if chunks.is_empty() {
            return report;
        }
        if self.recipients.is_empty() {
            tracing::info!(chunks = chunks.len(), "no recipients configured, notification dropped");
            return report;
        }

        for to in &self.recipients {
            for (i, text) in chunks.iter().enumerate() {
                let img = if i == 0 { image } else { None };
                match self.send_with_retry(to, text, img).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        tracing::warn!(error = %e, chunk = i, "notification chunk dropped");
                        counter!("watch_transport_failures_total").increment(1);
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    async fn send_with_retry(&self, to: &Recipient, text: &str, image: Option<&Path>) -> Result<(), WatchError> {
        let mut attempt: u8 = 0;
        loop {
            let status = match image {
                Some(path) => self.transport.send_image(to, path, text).await,
                None => self.transport.send_text(to, text).await,
            };
            match status {
                SendStatus::Delivered => return Ok(()),
                SendStatus::RateLimited if attempt < self.limits.rate_limit_retries => {
                    attempt += 1;
                    counter!("watch_rate_limited_total").increment(1);
                    tracing::debug!(recipient = %to, attempt, "rate limited, backing off");
                    tokio::time::sleep(self.limits.rate_limit_backoff).await;
                }
                SendStatus::RateLimited => {
                    counter!("watch_rate_limited_total").increment(1);
                    return Err(WatchError::Transport {
                        recipient: to.to_string(),
                        reason: "rate limited after retry".to_string(),
                    });
                }
                SendStatus::Failed(reason) => {
                    return Err(WatchError::Transport {
                        recipient: to.to_string(),
                        reason,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn render_has_headers_and_title_only_delistings() {
        let new = vec![ListingRecord::new("1")
            .with_field("title", "Engineer")
            .with_field("link", "https://x/1")];
        let gone = vec![ListingRecord::new("2")
            .with_field("title", "Analyst")
            .with_field("link", "https://x/2")];
        let out = render(&new, &gone, "Acme", |_| None);
        assert_eq!(
            out,
            lines(&["NEW (Acme)", "Engineer - https://x/1", "DELISTED (Acme)", "Analyst"])
        );
    }

    #[test]
    fn render_skips_empty_sets_and_uses_custom_line() {
        let new = vec![ListingRecord::new("1").with_field("title", "Engineer")];
        let out = render(&new, &[], "Acme", |r| Some(format!("* {}", r.title())));
        assert_eq!(out, lines(&["NEW (Acme)", "* Engineer"]));
        assert!(render(&[], &[], "Acme", |_| None).is_empty());
    }

    #[test]
    fn chunk_respects_limit_and_round_trips() {
        let input: Vec<String> = (0..50).map(|i| format!("listing number {i}")).collect();
        for max in [20usize, 33, 64, 100, 4096] {
            let blocks = chunk(&input, max);
            assert!(blocks.iter().all(|b| b.chars().count() <= max), "max={max}");
            let rejoined: Vec<String> = blocks
                .iter()
                .flat_map(|b| b.split('\n').map(str::to_string))
                .collect();
            assert_eq!(rejoined, input, "max={max}");
        }
    }

    #[test]
    fn chunk_counts_newline_per_line() {
        // "aaaa\n" + "bbbb\n" = 10
        let blocks = chunk(&lines(&["aaaa", "bbbb", "cccc"]), 10);
        assert_eq!(blocks, lines(&["aaaa\nbbbb", "cccc"]));
    }

    #[test]
    fn chunk_counts_chars_not_bytes() {
        let blocks = chunk(&lines(&["üüüü", "ääää"]), 10);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn oversized_line_is_truncated_to_fit() {
        let long = "x".repeat(50);
        let blocks = chunk(&lines(&["short", &long]), 20);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].chars().count(), 19);
        assert!(blocks[1].ends_with('…'));
    }

    #[test]
    fn truncation_is_the_only_round_trip_exception() {
        let long = "y".repeat(30);
        let input = lines(&["alpha", &long, "omega"]);
        let rejoined: Vec<String> = chunk(&input, 12)
            .iter()
            .flat_map(|b| b.split('\n').map(str::to_string))
            .collect();
        assert_eq!(rejoined.len(), input.len());
        assert_eq!(rejoined[0], "alpha");
        assert_eq!(rejoined[2], "omega");
        assert_ne!(rejoined[1], long);
        assert_eq!(rejoined[1], format!("{}…", "y".repeat(10)));
    }

    #[test]
    fn one_char_limit_keeps_a_marker() {
        let blocks = chunk(&lines(&["abc", "de"]), 1);
        assert_eq!(blocks, lines(&["…", "…"]));
    }

    #[test]
    fn head_chunk_uses_its_own_limit() {
        let input: Vec<String> = (0..10).map(|i| format!("line-{i:02}")).collect();
        // each line costs 8
        let blocks = chunk_with_head(&input, 16, 80);
        assert_eq!(blocks[0], "line-00\nline-01");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn recipient_debug_hides_token() {
        let r = Recipient::new("123:secret", "-100");
        let dbg = format!("{r:?}");
        assert!(!dbg.contains("secret"));
        assert_eq!(r.to_string(), "chat -100");
    }
}
