//! Trend pipeline: binary entrypoint.
//! Reads newline-delimited JSON `RawContentItem`s from stdin, runs the
//! pipeline, and on EOF or Ctrl-C drains and prints the final status and
//! active trends as JSON.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trend_pipeline::{JsonLinesFeed, PipelineConfig, PipelineController};

const STATUS_LOG_EVERY: Duration = Duration::from_secs(30);

/// Compact logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trend_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // logs go to stderr; stdout carries the final JSON report
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

/// Prometheus scrape endpoint when `METRICS_ADDR` is set.
fn init_metrics() -> Result<()> {
    let Ok(addr) = std::env::var("METRICS_ADDR") else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("METRICS_ADDR {addr:?} is not a socket address"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing prometheus exporter")?;
    info!(target: "controller", %addr, "metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();
    init_metrics()?;

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let controller = Arc::new(PipelineController::new(cfg)?);
    controller.start().await;

    let status_task = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_LOG_EVERY);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let s = controller.status();
                info!(
                    target: "controller",
                    processed = s.events_processed,
                    rejected = s.events_rejected,
                    rate = s.processing_rate,
                    active_trends = s.active_trends,
                    anomalies = s.anomalies_found,
                    "status"
                );
            }
        })
    };

    let mut feed = JsonLinesFeed::new("stdin", BufReader::new(tokio::io::stdin()));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!(target: "controller", "interrupted");
                break;
            }
            res = controller.ingest_stream(&mut feed) => match res {
                // stdin was merely quiet; keep reading
                Ok(report) if report.timed_out => continue,
                Ok(report) => {
                    info!(target: "controller", enqueued = report.enqueued, errors = report.feed_errors, "stdin exhausted");
                    break;
                }
                Err(e) => {
                    warn!(target: "controller", error = %e, "ingestion refused");
                    break;
                }
            }
        }
    }

    let drain = controller.stop().await;
    status_task.abort();
    controller.run_detection_pass();

    let report = serde_json::json!({
        "drain": drain,
        "status": controller.status(),
        "trends": controller.list_active_trends(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
