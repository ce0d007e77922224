// src/telemetry.rs
//! Logging and metrics setup.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "listing_watch=info,warn";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to
/// JSON lines. Calling twice is harmless (the second call is ignored).
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("watch_runs_total", "Completed orchestrator cycles.");
        describe_counter!("watch_new_listings_total", "Listings reported as new.");
        describe_counter!(
            "watch_delisted_listings_total",
            "Listings reported as delisted."
        );
        describe_counter!(
            "watch_source_errors_total",
            "Scrape failures and timeouts, absorbed as empty scrapes."
        );
        describe_counter!(
            "watch_maintenance_skips_total",
            "Runs skipped because a source returned nothing."
        );
        describe_counter!(
            "watch_transport_failures_total",
            "Notification chunks that could not be delivered."
        );
        describe_counter!("watch_rate_limited_total", "Transport rate-limit responses.");
        describe_counter!("watch_snapshot_errors_total", "Snapshot read/write failures.");
        describe_gauge!("watch_last_run_ts", "Unix ts when the last cycle finished.");
    });
}

/// Serve Prometheus metrics on `addr`. Must be called inside a Tokio runtime.
pub fn install_prometheus(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    ensure_metrics_described();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
