//! Pattern profiles produced by the analyzer and read by the scorers.
//!
//! A [`ProfileSet`] is the unit of publication: it is built in full by one
//! recomputation run and never modified afterwards.

use crate::geo::haversine_km;
use crate::types::assessment::TimeBucket;
use crate::types::observation::IncidentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version written into every serialized profile set.
pub const PROFILE_SCHEMA_VERSION: u32 = 1;

/// Region of historically frequent activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCluster {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    /// Number of points assigned to the cluster
    pub count: usize,
}

impl GeoCluster {
    /// Distance from the centroid in kilometres
    pub fn distance_km(&self, latitude: f64, longitude: f64) -> f64 {
        haversine_km(self.latitude, self.longitude, latitude, longitude)
    }

    /// Distance beyond the cluster radius, zero inside it
    pub fn distance_to_edge_km(&self, latitude: f64, longitude: f64) -> f64 {
        (self.distance_km(latitude, longitude) - self.radius_km).max(0.0)
    }
}

/// Typical-speed distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedStats {
    pub mean_kmh: f64,
    pub std_kmh: f64,
    pub p95_kmh: f64,
    pub p99_kmh: f64,
    /// Samples the distribution was fitted on
    pub samples: usize,
    /// Samples dropped as physically implausible
    pub discarded: usize,
}

impl SpeedStats {
    /// Fit on speed samples in km/h. Sorts `samples` in place so the
    /// summation order (and therefore the result) is independent of input order.
    pub fn fit(samples: &mut [f64], discarded: usize) -> Self {
        if samples.is_empty() {
            return Self {
                discarded,
                ..Self::empty()
            };
        }

        samples.sort_by(f64::total_cmp);

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean_kmh: mean,
            std_kmh: variance.sqrt(),
            p95_kmh: nearest_rank(samples, 0.95),
            p99_kmh: nearest_rank(samples, 0.99),
            samples: samples.len(),
            discarded,
        }
    }

    /// Combine two fitted distributions.
    ///
    /// Mean and variance are exact for the union of the samples.
    /// Percentiles are sample-weighted averages, an approximation used when
    /// the raw samples behind a fit are no longer available.
    pub fn pool(&self, other: &SpeedStats) -> SpeedStats {
        let discarded = self.discarded + other.discarded;
        if other.samples == 0 {
            return SpeedStats {
                discarded,
                ..self.clone()
            };
        }
        if self.samples == 0 {
            return SpeedStats {
                discarded,
                ..other.clone()
            };
        }

        let (na, nb) = (self.samples as f64, other.samples as f64);
        let n = na + nb;
        let mean = (na * self.mean_kmh + nb * other.mean_kmh) / n;
        let spread = |s: &SpeedStats| s.std_kmh.powi(2) + (s.mean_kmh - mean).powi(2);
        let variance = (na * spread(self) + nb * spread(other)) / n;

        SpeedStats {
            mean_kmh: mean,
            std_kmh: variance.sqrt(),
            p95_kmh: (na * self.p95_kmh + nb * other.p95_kmh) / n,
            p99_kmh: (na * self.p99_kmh + nb * other.p99_kmh) / n,
            samples: self.samples + other.samples,
            discarded,
        }
    }

    pub fn empty() -> Self {
        Self {
            mean_kmh: 0.0,
            std_kmh: 0.0,
            p95_kmh: 0.0,
            p99_kmh: 0.0,
            samples: 0,
            discarded: 0,
        }
    }

    /// Generic baseline for subjects and populations without history
    pub fn default_baseline() -> Self {
        Self {
            mean_kmh: 25.0,
            std_kmh: 15.0,
            p95_kmh: 80.0,
            p99_kmh: 120.0,
            samples: 0,
            discarded: 0,
        }
    }
}

fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Hour-of-day activity distribution (UTC hours)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHistogram {
    pub counts: [u64; 24],
    /// Normalized counts; all zero when there are no samples
    pub probabilities: [f64; 24],
    pub samples: u64,
}

impl TimeHistogram {
    pub fn empty() -> Self {
        Self {
            counts: [0; 24],
            probabilities: [0.0; 24],
            samples: 0,
        }
    }

    /// Build from hours in 0..24; out-of-range hours are ignored.
    pub fn from_hours<I: IntoIterator<Item = u32>>(hours: I) -> Self {
        let mut counts = [0u64; 24];
        for hour in hours {
            if let Some(slot) = counts.get_mut(hour as usize) {
                *slot += 1;
            }
        }
        Self::from_counts(counts)
    }

    pub fn from_counts(counts: [u64; 24]) -> Self {
        let samples: u64 = counts.iter().sum();
        let mut probabilities = [0.0; 24];
        if samples > 0 {
            for (p, &c) in probabilities.iter_mut().zip(counts.iter()) {
                *p = c as f64 / samples as f64;
            }
        }
        Self {
            counts,
            probabilities,
            samples,
        }
    }

    pub fn probability(&self, hour: u32) -> f64 {
        self.probabilities.get(hour as usize).copied().unwrap_or(0.0)
    }

    pub fn bucket_probability(&self, bucket: TimeBucket) -> f64 {
        bucket.hours().map(|h| self.probability(h)).sum()
    }

    pub fn bucket_count(&self, bucket: TimeBucket) -> u64 {
        bucket
            .hours()
            .map(|h| self.counts.get(h as usize).copied().unwrap_or(0))
            .sum()
    }

    /// Hour with the most samples, earliest hour on ties
    pub fn peak_hour(&self) -> Option<u32> {
        if self.samples == 0 {
            return None;
        }
        let mut best = 0usize;
        for (hour, &count) in self.counts.iter().enumerate() {
            if count > self.counts[best] {
                best = hour;
            }
        }
        Some(best as u32)
    }
}

/// Statistical baselines for one subject (or the whole population)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternProfile {
    pub speed: SpeedStats,
    pub clusters: Vec<GeoCluster>,
    pub activity: TimeHistogram,
    pub observation_count: usize,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PatternProfile {
    pub fn empty() -> Self {
        Self {
            speed: SpeedStats::empty(),
            clusters: Vec::new(),
            activity: TimeHistogram::empty(),
            observation_count: 0,
            last_seen: None,
        }
    }

    /// Nearest cluster and the distance beyond its radius
    pub fn nearest_cluster(&self, latitude: f64, longitude: f64) -> Option<(&GeoCluster, f64)> {
        self.clusters
            .iter()
            .map(|c| (c, c.distance_to_edge_km(latitude, longitude)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Cluster of historical incidents with its accumulated risk weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub cluster: GeoCluster,
    /// Sum of type weight x severity x recency over member incidents
    pub risk_weight: f64,
    /// Saturating transform of `risk_weight` into [0, 1)
    pub intensity: f64,
    pub dominant_kind: IncidentKind,
    pub breakdown: BTreeMap<IncidentKind, usize>,
    /// Members within a week of the newest incident in the batch
    pub recent_incidents: usize,
}

/// Direction of incident frequency over the analyzed period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Region-level incident baselines used as risk priors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentProfile {
    pub hotspots: Vec<Hotspot>,
    pub hourly: TimeHistogram,
    pub total_incidents: usize,
    pub breakdown: BTreeMap<IncidentKind, usize>,
    pub trend: TrendDirection,
    pub peak_hour: Option<u32>,
}

impl IncidentProfile {
    pub fn empty() -> Self {
        Self {
            hotspots: Vec::new(),
            hourly: TimeHistogram::empty(),
            total_incidents: 0,
            breakdown: BTreeMap::new(),
            trend: TrendDirection::InsufficientData,
            peak_hour: None,
        }
    }
}

/// Complete set of profiles current at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub schema_version: u32,
    /// Incremented by every successful recomputation
    pub generation: u64,
    pub subjects: BTreeMap<String, PatternProfile>,
    pub population: PatternProfile,
    pub incidents: IncidentProfile,
}

impl ProfileSet {
    pub fn empty() -> Self {
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            generation: 0,
            subjects: BTreeMap::new(),
            population: PatternProfile::empty(),
            incidents: IncidentProfile::empty(),
        }
    }

    pub fn subject(&self, subject_id: &str) -> Option<&PatternProfile> {
        self.subjects.get(subject_id)
    }
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self::empty()
    }
}
