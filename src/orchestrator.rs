// src/orchestrator.rs
//! # Orchestrator
//! Runs every configured source through
//! `LOAD_STATE → SCRAPE → (maintenance skip?) → DIFF → PERSIST → NOTIFY`.
//!
//! Sources are processed one after another with a short pause in between.
//! A failing source is logged under its name and the batch carries on.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{PersistPolicy, WatchConfig, WatchSection};
use crate::diff::diff_listings;
use crate::error::WatchError;
use crate::listing::ListingRecord;
use crate::notify::{render, DeliveryReport, DispatchLimits, Dispatcher, Recipient, Transport};
use crate::snapshot::SnapshotStore;
use crate::sources::Source;
use crate::telemetry::ensure_metrics_described;

/// What happened to one source in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Changed {
        new: usize,
        delisted: usize,
        pending: usize,
        delivery: DeliveryReport,
    },
    NoChanges {
        pending: usize,
    },
    /// Empty scrape against a non-empty history; nothing sent or saved.
    MaintenanceSkip {
        previous: usize,
    },
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
    /// Set when the scrape failed and was treated as empty.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn total_new(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Changed { new, .. } => new,
                _ => 0,
            })
            .sum()
    }

    pub fn total_delisted(&self) -> usize {
        self.sources
            .iter()
            .map(|s| match s.outcome {
                SourceOutcome::Changed { delisted, .. } => delisted,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

pub struct Orchestrator {
    settings: WatchSection,
    store: SnapshotStore,
    dispatcher: Dispatcher,
    sources: Vec<Arc<dyn Source>>,
}

impl Orchestrator {
    pub fn new(
        settings: WatchSection,
        store: SnapshotStore,
        dispatcher: Dispatcher,
        sources: Vec<Arc<dyn Source>>,
    ) -> Self {
        ensure_metrics_described();
        if settings.effective_persist() != settings.persist {
            tracing::warn!(
                grace_secs = settings.grace_period_secs,
                "persist = on_change ignored while a grace period is set, saving every run"
            );
        }

        // A second source on an already-used key would share its snapshot files.
        let mut keys = HashSet::with_capacity(sources.len());
        let sources = sources
            .into_iter()
            .filter(|s| {
                let unique = keys.insert(s.key());
                if !unique {
                    tracing::error!(
                        source = s.name(),
                        key = %s.key(),
                        "duplicate snapshot key, source disabled"
                    );
                }
                unique
            })
            .collect();

        Self {
            settings,
            store,
            dispatcher,
            sources,
        }
    }

    /// Wire store and dispatcher from a loaded config.
    pub fn from_config(
        cfg: &WatchConfig,
        sources: Vec<Arc<dyn Source>>,
        transport: Box<dyn Transport>,
        recipients: Vec<Recipient>,
    ) -> Self {
        let store = SnapshotStore::new(cfg.watch.state_dir.clone(), cfg.retention.policy());
        let dispatcher = Dispatcher::new(transport, recipients, DispatchLimits::from(&cfg.notify));
        Self::new(cfg.watch.clone(), store, dispatcher, sources)
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// One full cycle over all sources.
    pub async fn run_once(&self) -> RunReport {
        self.run_once_at(Utc::now()).await
    }

    /// One cycle with an explicit clock (tests, replays).
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();
        for (i, source) in self.sources.iter().enumerate() {
            if i > 0 && !self.settings.source_delay().is_zero() {
                time::sleep(self.settings.source_delay()).await;
            }
            report.sources.push(self.process_source(source, now).await);
        }

        counter!("watch_runs_total").increment(1);
        gauge!("watch_last_run_ts").set(now.timestamp() as f64);
        report
    }

    /// Run `run_once` every `interval_secs`, forever.
    pub async fn run_forever(&self) {
        let mut ticker = time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_once().await;
            tracing::info!(
                sources = report.sources.len(),
                new = report.total_new(),
                delisted = report.total_delisted(),
                failed = report.failed_sources(),
                "watch cycle finished"
            );
        }
    }

    async fn process_source(&self, source: &Arc<dyn Source>, now: DateTime<Utc>) -> SourceReport {
        let name = source.name().to_string();
        let key = source.key();
        tracing::info!("Starting source {name}");

        let previous = self.store.load(&key, &**source).await;

        let (scraped, error) = match self.scrape(source).await {
            Ok(v) => (v, None),
            Err(e) => {
                tracing::warn!(source = %name, error = %e, "scrape failed, treating as empty");
                counter!("watch_source_errors_total").increment(1);
                (Vec::new(), Some(e.to_string()))
            }
        };

        if self.settings.maintenance_skip && scraped.is_empty() && !previous.is_empty() {
            tracing::info!(
                "{name} - maintenance skip (0 of {} listings)",
                previous.listings.len()
            );
            counter!("watch_maintenance_skips_total").increment(1);
            return SourceReport {
                source: name,
                outcome: SourceOutcome::MaintenanceSkip {
                    previous: previous.listings.len(),
                },
                error,
            };
        }

        let diff = diff_listings(
            &previous.listings,
            &previous.last_seen,
            &scraped,
            now,
            self.settings.grace_period(),
        );
        let changed = diff.has_changes();

        if changed || self.settings.effective_persist() == PersistPolicy::Always {
            self.store
                .save_at(&key, &**source, &diff.retained, &diff.last_seen, now)
                .await;
        }

        if !changed {
            tracing::info!("{name} - no changes");
            return SourceReport {
                source: name,
                outcome: SourceOutcome::NoChanges {
                    pending: diff.pending.len(),
                },
                error,
            };
        }

        tracing::info!(
            "{name} - {} new, {} delisted listings",
            diff.new.len(),
            diff.delisted.len()
        );
        counter!("watch_new_listings_total").increment(diff.new.len() as u64);
        counter!("watch_delisted_listings_total").increment(diff.delisted.len() as u64);

        let lines = render(&diff.new, &diff.delisted, &name, |r: &ListingRecord| {
            source.render(r)
        });
        let delivery = self.dispatcher.notify(&lines, source.image_path()).await;

        SourceReport {
            source: name,
            outcome: SourceOutcome::Changed {
                new: diff.new.len(),
                delisted: diff.delisted.len(),
                pending: diff.pending.len(),
                delivery,
            },
            error,
        }
    }

    /// Scrape on its own task so a panicking source cannot take the batch
    /// down, bounded by the scrape timeout.
    async fn scrape(&self, source: &Arc<dyn Source>) -> Result<Vec<ListingRecord>, WatchError> {
        let name = source.name().to_string();
        let task = {
            let s = Arc::clone(source);
            tokio::spawn(async move { s.scrape().await })
        };
        let abort = task.abort_handle();

        match time::timeout(self.settings.scrape_timeout(), task).await {
            Ok(Ok(Ok(listings))) => Ok(listings),
            Ok(Ok(Err(e))) => Err(WatchError::source_failure(&name, &e)),
            Ok(Err(join)) => Err(WatchError::Source {
                source_name: name,
                reason: format!("scrape task died: {join}"),
            }),
            Err(_) => {
                abort.abort();
                Err(WatchError::Timeout {
                    source_name: name,
                    secs: self.settings.scrape_timeout().as_secs(),
                })
            }
        }
    }
}
