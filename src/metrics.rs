//! Request and recompute statistics for the geo risk service.

use crate::consumer::{Outcome, RequestKind};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for the request loop and the recompute task
pub struct ServiceMetrics {
    /// Requests handled, any outcome
    pub requests_handled: AtomicU64,
    /// Requests rejected by validation
    pub validation_rejections: AtomicU64,
    /// Observations flagged as anomalous
    pub anomalies_flagged: AtomicU64,
    /// Observations evaluated by the anomaly detector
    pub observations_evaluated: AtomicU64,
    /// Sequences judged erratic as a whole
    pub erratic_sequences: AtomicU64,
    /// Insights attached to area analyses
    pub insights_reported: AtomicU64,
    requests_by_kind: RwLock<BTreeMap<&'static str, u64>>,
    flags_by_class: RwLock<BTreeMap<&'static str, u64>>,
    risk_by_level: RwLock<BTreeMap<&'static str, u64>>,
    /// Handling times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Risk score distribution buckets
    score_buckets: RwLock<[u64; 10]>,
    recompute_runs: AtomicU64,
    recompute_failures: AtomicU64,
    records_skipped: AtomicU64,
    last_generation: AtomicU64,
    /// Start time for rate calculation
    start_time: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_handled: AtomicU64::new(0),
            validation_rejections: AtomicU64::new(0),
            anomalies_flagged: AtomicU64::new(0),
            observations_evaluated: AtomicU64::new(0),
            erratic_sequences: AtomicU64::new(0),
            insights_reported: AtomicU64::new(0),
            requests_by_kind: RwLock::new(BTreeMap::new()),
            flags_by_class: RwLock::new(BTreeMap::new()),
            risk_by_level: RwLock::new(BTreeMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            recompute_runs: AtomicU64::new(0),
            recompute_failures: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            last_generation: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one handled request and what it produced
    pub fn record_request(&self, kind: RequestKind, outcome: &Outcome, processing_time: Duration) {
        self.requests_handled.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.requests_by_kind.write() {
            *by_kind.entry(kind.as_str()).or_insert(0) += 1;
        }

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        match outcome {
            Outcome::Risk { score, level } | Outcome::Route { score, level } => {
                let bucket = (score * 10.0).clamp(0.0, 9.0) as usize;
                if let Ok(mut buckets) = self.score_buckets.write() {
                    buckets[bucket] += 1;
                }
                if let Ok(mut by_level) = self.risk_by_level.write() {
                    *by_level.entry(level.as_str()).or_insert(0) += 1;
                }
            }
            Outcome::Anomaly {
                evaluated,
                flags,
                erratic,
            } => {
                self.observations_evaluated
                    .fetch_add(*evaluated as u64, Ordering::Relaxed);
                if *erratic {
                    self.erratic_sequences.fetch_add(1, Ordering::Relaxed);
                }
                self.anomalies_flagged
                    .fetch_add(flags.len() as u64, Ordering::Relaxed);
                if let Ok(mut by_class) = self.flags_by_class.write() {
                    for class in flags {
                        *by_class.entry(class.as_str()).or_insert(0) += 1;
                    }
                }
            }
            Outcome::Area { insights, .. } => {
                self.insights_reported
                    .fetch_add(*insights as u64, Ordering::Relaxed);
            }
            Outcome::Rejected(_) => {
                self.validation_rejections.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a finished recompute run; `generation` is `None` on failure
    pub fn record_recompute(&self, generation: Option<u64>, skipped_records: usize) {
        self.records_skipped
            .fetch_add(skipped_records as u64, Ordering::Relaxed);
        match generation {
            Some(g) => {
                self.recompute_runs.fetch_add(1, Ordering::Relaxed);
                self.last_generation.store(g, Ordering::Relaxed);
            }
            None => {
                self.recompute_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let Ok(times) = self.processing_times.read() else {
            return ProcessingStats::default();
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.5),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Get current throughput (requests per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.requests_handled.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    pub fn get_requests_by_kind(&self) -> BTreeMap<&'static str, u64> {
        self.requests_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_flags_by_class(&self) -> BTreeMap<&'static str, u64> {
        self.flags_by_class
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_risk_by_level(&self) -> BTreeMap<&'static str, u64> {
        self.risk_by_level
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_recompute_stats(&self) -> RecomputeStats {
        RecomputeStats {
            runs: self.recompute_runs.load(Ordering::Relaxed),
            failures: self.recompute_failures.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            generation: self.last_generation.load(Ordering::Relaxed),
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let handled = self.requests_handled.load(Ordering::Relaxed);
        let rejected = self.validation_rejections.load(Ordering::Relaxed);
        let flagged = self.anomalies_flagged.load(Ordering::Relaxed);
        let evaluated = self.observations_evaluated.load(Ordering::Relaxed);
        let erratic = self.erratic_sequences.load(Ordering::Relaxed);
        let insights = self.insights_reported.load(Ordering::Relaxed);
        let flag_rate = if evaluated > 0 {
            (flagged as f64 / evaluated as f64) * 100.0
        } else {
            0.0
        };

        let processing = self.get_processing_stats();
        let recompute = self.get_recompute_stats();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              GEO RISK ENGINE - METRICS SUMMARY               ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Requests Handled: {:>8}  │  Throughput: {:>6.1} req/s     ║",
            handled,
            self.get_throughput()
        );
        info!(
            "║ Rejected:         {:>8}  │  Flag Rate:  {:>6.1}%          ║",
            rejected, flag_rate
        );
        info!(
            "║ Erratic Seqs:     {:>8}  │  Insights:   {:>8}          ║",
            erratic, insights
        );
        for (kind, count) in self.get_requests_by_kind() {
            info!("║   {:10}: {:>8}                                        ║", kind, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Handling Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Profiles: generation={:>6} runs={:>4} failed={:>4} skipped={:>6} ║",
            recompute.generation, recompute.runs, recompute.failures, recompute.records_skipped
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Flags by Classification:                                     ║");
        for (class, count) in self.get_flags_by_class() {
            let pct = if flagged > 0 {
                (count as f64 / flagged as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", class, count, pct);
        }
        info!("║ Risk Levels:                                                 ║");
        for (level, count) in self.get_risk_by_level() {
            info!("║   {:10}: {:>6}                                          ║", level, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Default, PartialEq)]
pub struct RecomputeStats {
    pub runs: u64,
    pub failures: u64,
    pub records_skipped: u64,
    /// Generation of the last successfully published profile set
    pub generation: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<ServiceMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServiceMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
