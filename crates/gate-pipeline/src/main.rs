use std::sync::Arc;

use anyhow::{Context, Result};
use gate_core::AccountContext;
use gate_pipeline::{GateConfig, GatePipeline, JsonlSnapshotFeed, SnapshotFeed};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting signal quality gate");

    let config = GateConfig::from_env()?;
    config.validate()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Max snapshot age: {}ms", config.pipeline.max_snapshot_age_ms);
    tracing::info!("  Evaluation deadline: {}ms", config.pipeline.deadline_ms);
    tracing::info!(
        "  Breaker: {} consecutive losses, {}/h, {}/day",
        config.breaker.max_consecutive_losses,
        config.breaker.max_signals_per_hour,
        config.breaker.max_signals_per_day
    );
    match &config.pipeline.data_dir {
        Some(dir) => tracing::info!("  Data dir: {}", dir.display()),
        None => tracing::info!("  Data dir: none (state is in-memory)"),
    }

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SNAPSHOT_FILE").ok())
        .context("usage: signal-gate <snapshots.jsonl> (or set SNAPSHOT_FILE)")?;

    let pipeline = Arc::new(GatePipeline::new(config)?);
    let mut feed = JsonlSnapshotFeed::open(&path).await?;
    let account = AccountContext::default();

    loop {
        let snapshot = tokio::select! {
            next = feed.next_snapshot() => match next? {
                Some(snapshot) => snapshot,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, stopping");
                break;
            }
        };

        let decision = pipeline
            .evaluate_with_deadline(snapshot, account.clone())
            .await;
        println!("{}", serde_json::to_string(&decision)?);
    }

    if feed.skipped() > 0 {
        tracing::warn!("Skipped {} unparseable snapshot lines", feed.skipped());
    }
    pipeline.metrics().log_metrics();
    tracing::info!("Signal gate stopped");
    Ok(())
}
