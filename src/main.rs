//! Geo Risk Engine - Main Entry Point
//!
//! Answers risk, route, anomaly and area requests over NATS against the published profile
//! snapshot, and periodically rebuilds the profiles from the archive export.

use anyhow::{Context, Result};
use futures::StreamExt;
use geo_risk_engine::{
    config::{AppConfig, LoggingConfig, StorageConfig},
    consumer::{handle_request, Outcome, RequestConsumer},
    error::RecomputeError,
    metrics::{MetricsReporter, ServiceMetrics},
    models::{engine::AnalyticsEngine, loader::ProfileLoader},
    producer::ResponsePublisher,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Geo Risk Engine");
    info!(
        "Flag threshold: {:.2}, implausible speed: {:.0} km/h, risk levels: moderate>={:.2}, high>={:.2}, critical>={:.2}",
        config.anomaly.flag_threshold,
        config.anomaly.implausible_speed_kmh,
        config.risk.risk_levels.moderate,
        config.risk.risk_levels.high,
        config.risk.risk_levels.critical
    );

    let profiles = ProfileLoader::load_or_empty(&config.storage.profiles_path)?;
    let engine = Arc::new(AnalyticsEngine::with_profiles(&config, profiles));
    let metrics = Arc::new(ServiceMetrics::new());
    let interrupt = Arc::new(AtomicBool::new(false));

    let client = async_nats::connect(&config.nats.url)
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RequestConsumer::new(client.clone(), &config.nats);
    let publisher = ResponsePublisher::new(client.clone());

    tokio::spawn(MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs).start());

    if config.pipeline.recompute_interval_secs > 0 {
        tokio::spawn(run_recompute_loop(
            engine.clone(),
            metrics.clone(),
            interrupt.clone(),
            config.storage.clone(),
            config.pipeline.recompute_interval_secs,
        ));
    } else {
        info!("Periodic recomputation disabled");
    }

    let num_workers = config.pipeline.workers.max(1);
    info!(
        "Starting request loop with {} parallel workers on {}, {}, {} and {}",
        num_workers,
        config.nats.risk_subject,
        config.nats.route_subject,
        config.nats.anomaly_subject,
        config.nats.area_subject
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let handled_count = Arc::new(AtomicU64::new(0));

    let mut requests = consumer.subscribe_all().await?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (kind, message) = tokio::select! {
            next = requests.next() => match next {
                Some(request) => request,
                None => break,
            },
            _ = &mut shutdown => {
                info!("Shutdown requested");
                interrupt.store(true, Ordering::Relaxed);
                break;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;

        let engine = engine.clone();
        let publisher = publisher.clone();
        let metrics = metrics.clone();
        let handled_count = handled_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            match handle_request(&engine, kind, &message.payload) {
                Ok(handled) => {
                    let processing_time = start_time.elapsed();
                    metrics.record_request(kind, &handled.outcome, processing_time);

                    match &handled.outcome {
                        Outcome::Rejected(e) => {
                            warn!(kind = kind.as_str(), error = %e, "Request rejected");
                        }
                        Outcome::Anomaly {
                            evaluated,
                            flags,
                            erratic,
                        } if !flags.is_empty() || *erratic => {
                            info!(
                                evaluated = evaluated,
                                flagged = flags.len(),
                                erratic = erratic,
                                processing_time_us = processing_time.as_micros() as u64,
                                "Anomalies detected"
                            );
                        }
                        outcome => {
                            debug!(
                                kind = kind.as_str(),
                                outcome = ?outcome,
                                processing_time_us = processing_time.as_micros() as u64,
                                "Request handled"
                            );
                        }
                    }

                    match message.reply {
                        Some(reply_to) => {
                            if let Err(e) = publisher.reply(reply_to, handled.reply).await {
                                error!(kind = kind.as_str(), error = %e, "Failed to publish reply");
                            }
                        }
                        None => {
                            warn!(kind = kind.as_str(), "Request has no reply subject, dropping result");
                        }
                    }
                }
                Err(e) => {
                    error!(kind = kind.as_str(), error = %e, "Failed to build reply");
                }
            }

            let count = handled_count.fetch_add(1, Ordering::Relaxed) + 1;
            // Log progress every 100 requests
            if count % 100 == 0 {
                let stats = metrics.get_processing_stats();
                info!(
                    handled = count,
                    throughput = format!("{:.1} req/s", metrics.get_throughput()),
                    avg_latency_us = stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Service shutting down...");
    if let Err(e) = publisher.flush().await {
        warn!(error = %e, "Failed to flush pending replies");
    }
    metrics.print_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("geo_risk_engine={}", logging.level).parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Rebuild profiles from the archive on a fixed interval. The first run
/// happens one interval after startup; until then the loaded profiles serve.
async fn run_recompute_loop(
    engine: Arc<AnalyticsEngine>,
    metrics: Arc<ServiceMetrics>,
    interrupt: Arc<AtomicBool>,
    storage: StorageConfig,
    interval_secs: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if interrupt.load(Ordering::Relaxed) {
            break;
        }

        let engine = engine.clone();
        let interrupt = interrupt.clone();
        let storage = storage.clone();
        let run = tokio::task::spawn_blocking(move || recompute_once(&engine, &interrupt, &storage));

        match run.await {
            Ok(Ok(Some((generation, skipped)))) => {
                metrics.record_recompute(Some(generation), skipped);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                let skipped = match e.downcast_ref::<RecomputeError>() {
                    Some(RecomputeError::TooManyCorruptRecords { skipped, .. }) => *skipped,
                    _ => 0,
                };
                error!(error = %e, "Pattern recomputation failed, keeping current profiles");
                metrics.record_recompute(None, skipped);
            }
            Err(e) => {
                error!(error = %e, "Pattern recomputation task panicked");
                metrics.record_recompute(None, 0);
            }
        }
    }
}

/// One load, recompute, publish and persist cycle. Returns the published
/// generation and the number of archive records left out (undecodable
/// lines plus invalid records), or `None` when there is no archive to read.
fn recompute_once(
    engine: &AnalyticsEngine,
    interrupt: &AtomicBool,
    storage: &StorageConfig,
) -> Result<Option<(u64, usize)>> {
    if !Path::new(&storage.archive_path).exists() {
        warn!(path = %storage.archive_path, "Archive not found, skipping recomputation");
        return Ok(None);
    }

    let archive = ProfileLoader::load_archive(&storage.archive_path)?;
    let published = engine.recompute_and_publish(&archive, interrupt)?;
    ProfileLoader::save(&storage.profiles_path, &published.snapshot)?;

    Ok(Some((published.snapshot.generation, published.skipped_records)))
}
