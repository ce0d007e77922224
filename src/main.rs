//! listing-watch binary entrypoint.
//! Loads config and credentials, builds the sources and runs the watch loop.
//!
//! Env:
//!   WATCH_CONFIG_PATH  config file (default `config/watch.toml`)
//!   WATCH_ONCE=1       run a single cycle and exit
//!   METRICS_ADDR       serve Prometheus metrics, e.g. `0.0.0.0:9100`

use anyhow::Context;
use listing_watch::config::{load_config_default, load_recipients};
use listing_watch::notify::telegram::TelegramTransport;
use listing_watch::sources::build_sources;
use listing_watch::telemetry::{init_tracing, install_prometheus};
use listing_watch::Orchestrator;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading watch config")?;

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr = addr.parse::<std::net::SocketAddr>().context("parsing METRICS_ADDR")?;
        if let Err(e) = install_prometheus(addr) {
            warn!(error = ?e, "metrics exporter not started");
        }
    }

    let recipients = load_recipients(&cfg.notify).context("loading recipients")?;
    if recipients.is_empty() {
        warn!("no recipients configured; changes will only be logged");
    }

    let sources = build_sources(&cfg.sources).context("building sources")?;
    info!(
        sources = sources.len(),
        recipients = recipients.len(),
        state_dir = %cfg.watch.state_dir.display(),
        "listing-watch starting"
    );

    let transport = TelegramTransport::new()
        .with_api_base(cfg.notify.api_base.clone())
        .with_timeout(cfg.notify.timeout_secs);
    let orchestrator = Orchestrator::from_config(&cfg, sources, Box::new(transport), recipients);

    let once = std::env::var("WATCH_ONCE").is_ok_and(|v| v == "1");
    if once {
        let report = orchestrator.run_once().await;
        info!(
            new = report.total_new(),
            delisted = report.total_delisted(),
            failed = report.failed_sources(),
            "single cycle finished"
        );
        return Ok(());
    }

    tokio::select! {
        _ = orchestrator.run_forever() => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("shutdown requested");
        }
    }
    Ok(())
}
