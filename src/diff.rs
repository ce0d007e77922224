// src/diff.rs
//! # Diff Engine
//! Compares the previous snapshot with a fresh scrape.
//!
//! A listing missing from the scrape is not delisted straight away. It stays
//! *pending* with its old last-seen timestamp until it has been missing for
//! longer than the grace period, so a single failed or partial scrape never
//! produces a wave of false delistings.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

use crate::listing::ListingRecord;
use crate::snapshot::LastSeen;

/// Result of comparing two scrapes of one source.
#[derive(Debug, Clone, Default)]
pub struct DiffOutcome {
    /// Present now, absent before. In scrape order.
    pub new: Vec<ListingRecord>,
    /// Missing for longer than the grace period. In previous-snapshot order.
    pub delisted: Vec<ListingRecord>,
    /// Missing, but still inside the grace period.
    pub pending: Vec<ListingRecord>,
    /// Listings for the next snapshot: the scrape plus pending records.
    pub retained: Vec<ListingRecord>,
    /// Last-seen map for the next snapshot.
    pub last_seen: LastSeen,
}

impl DiffOutcome {
    /// True when there is something to notify about.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.delisted.is_empty()
    }
}

/// Compute new, delisted and pending listings.
///
/// A zero grace period disables the grace rule: every missing id is delisted
/// on the first run it is missing. Ids without a last-seen entry (legacy
/// snapshots) start their grace clock at `now`.
pub fn diff_listings(
    old: &[ListingRecord],
    old_last_seen: &LastSeen,
    scraped: &[ListingRecord],
    now: DateTime<Utc>,
    grace: Duration,
) -> DiffOutcome {
    let old_ids: HashSet<&str> = old.iter().map(|r| r.id.as_str()).collect();

    let mut out = DiffOutcome::default();
    let mut seen_now: HashSet<&str> = HashSet::with_capacity(scraped.len());

    for rec in scraped {
        // duplicate ids inside one scrape count once
        if !seen_now.insert(rec.id.as_str()) {
            continue;
        }
        if !old_ids.contains(rec.id.as_str()) {
            out.new.push(rec.clone());
        }
        out.last_seen.insert(rec.id.clone(), now);
        out.retained.push(rec.clone());
    }

    let mut handled: HashSet<&str> = HashSet::new();
    for rec in old {
        let id = rec.id.as_str();
        if seen_now.contains(id) || !handled.insert(id) {
            continue;
        }
        let last = old_last_seen.get(id).copied().unwrap_or(now);
        let expired = grace <= Duration::zero() || now.signed_duration_since(last) > grace;
        if expired {
            out.delisted.push(rec.clone());
        } else {
            out.last_seen.insert(rec.id.clone(), last);
            out.pending.push(rec.clone());
            out.retained.push(rec.clone());
        }
    }

    out
}
