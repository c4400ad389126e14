//! Batch recomputation of pattern profiles from a historical archive.
//!
//! A run reads an [`ObservationArchive`] and the currently published
//! [`ProfileSet`] and builds a complete replacement set. The result depends
//! only on the archive contents, the previous set and the configuration; the
//! order of records in the archive does not matter.

use crate::config::PatternConfig;
use crate::error::RecomputeError;
use crate::feature_extractor::FeatureExtractor;
use crate::geo::{haversine_km, is_valid_coordinate, latitude_span_deg, spherical_centroid};
use crate::types::observation::{IncidentKind, IncidentRecord, Observation, ObservationArchive};
use crate::types::profile::{
    GeoCluster, Hotspot, IncidentProfile, PatternProfile, ProfileSet, SpeedStats, TimeHistogram,
    TrendDirection, PROFILE_SCHEMA_VERSION,
};
use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Incidents within this window of the newest one count as recent
const RECENT_WINDOW_DAYS: i64 = 7;
/// Lowest recency factor an old incident decays to
const RECENCY_FLOOR: f64 = 0.1;
const TREND_MIN_INCIDENTS: usize = 4;
const TREND_MIN_SPAN_DAYS: i64 = 7;
const TREND_UP_RATIO: f64 = 1.2;
const TREND_DOWN_RATIO: f64 = 0.8;

/// Result of one successful recomputation run
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputation {
    pub profiles: ProfileSet,
    /// Archive records left out: rejected at load plus invalid ones
    pub skipped_records: usize,
    pub total_records: usize,
}

pub struct PatternAnalyzer {
    config: PatternConfig,
    extractor: FeatureExtractor,
}

impl PatternAnalyzer {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::default(),
        }
    }

    /// Build the next profile set.
    ///
    /// Subjects and incidents absent from `archive` keep their profiles from
    /// `previous`, and carried subjects stay part of the population
    /// baseline. `interrupt` is checked between subjects.
    pub fn recompute(
        &self,
        archive: &ObservationArchive,
        previous: &ProfileSet,
        interrupt: &AtomicBool,
    ) -> Result<Recomputation, RecomputeError> {
        let started = Instant::now();
        let total = archive.total_records();
        let mut skipped = archive.rejected_records;

        let mut by_subject: BTreeMap<&str, Vec<Observation>> = BTreeMap::new();
        for (record, obs) in archive.observations.iter().enumerate() {
            if obs.is_well_formed() {
                by_subject
                    .entry(obs.subject_id.as_str())
                    .or_default()
                    .push(obs.clone());
            } else {
                warn!(
                    record = record,
                    subject_id = %obs.subject_id,
                    latitude = obs.latitude,
                    longitude = obs.longitude,
                    "Skipping malformed observation"
                );
                skipped += 1;
            }
        }

        let mut incidents = Vec::with_capacity(archive.incidents.len());
        for (record, incident) in archive.incidents.iter().enumerate() {
            if is_valid_coordinate(incident.latitude, incident.longitude) {
                incidents.push(incident.clone());
            } else {
                warn!(
                    record = record,
                    latitude = incident.latitude,
                    longitude = incident.longitude,
                    "Skipping incident with invalid coordinates"
                );
                skipped += 1;
            }
        }

        if total > 0 && skipped as f64 / total as f64 > self.config.max_skipped_fraction {
            return Err(RecomputeError::TooManyCorruptRecords {
                skipped,
                total,
                threshold: self.config.max_skipped_fraction,
            });
        }

        let mut next = ProfileSet {
            schema_version: PROFILE_SCHEMA_VERSION,
            generation: previous.generation + 1,
            subjects: previous.subjects.clone(),
            population: previous.population.clone(),
            incidents: previous.incidents.clone(),
        };

        let mut population = PopulationAccumulator::default();
        let batch_subjects = by_subject.len();
        let batch: BTreeSet<String> = by_subject.keys().map(|id| id.to_string()).collect();

        for (completed, (subject_id, mut observations)) in by_subject.into_iter().enumerate() {
            if interrupt.load(Ordering::Relaxed) {
                warn!(
                    completed_subjects = completed,
                    remaining = batch_subjects - completed,
                    "Pattern recomputation interrupted"
                );
                return Err(RecomputeError::Interrupted {
                    completed_subjects: completed,
                });
            }

            sort_observations(&mut observations);
            let (profile, retained) = self.subject_profile(&observations);

            debug!(
                subject_id = %subject_id,
                observations = profile.observation_count,
                clusters = profile.clusters.len(),
                speed_samples = profile.speed.samples,
                discarded = profile.speed.discarded,
                "Subject profile rebuilt"
            );

            population.add(&profile, retained);
            next.subjects.insert(subject_id.to_string(), profile);
        }

        if batch_subjects > 0 {
            for (subject_id, profile) in &previous.subjects {
                if !batch.contains(subject_id.as_str()) {
                    population.carry(profile);
                }
            }
            next.population = population.finish();
        }
        if !incidents.is_empty() {
            next.incidents = self.incident_profile(incidents);
        }

        info!(
            generation = next.generation,
            records = total,
            skipped = skipped,
            batch_subjects = batch_subjects,
            subjects = next.subjects.len(),
            hotspots = next.incidents.hotspots.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Pattern recomputation finished"
        );

        Ok(Recomputation {
            profiles: next,
            skipped_records: skipped,
            total_records: total,
        })
    }

    /// Profile of one subject plus its retained speed samples (sorted).
    fn subject_profile(&self, observations: &[Observation]) -> (PatternProfile, Vec<f64>) {
        let ceiling = self.config.speed_ceiling_kmh;
        let (mut retained, dropped): (Vec<f64>, Vec<f64>) = self
            .extractor
            .speeds(observations)
            .into_iter()
            .partition(|&s| s <= ceiling);

        let speed = SpeedStats::fit(&mut retained, dropped.len());

        let points: Vec<(f64, f64)> = {
            let mut sorted: Vec<&Observation> = observations.iter().collect();
            sorted.sort_by(|a, b| {
                a.latitude
                    .total_cmp(&b.latitude)
                    .then(a.longitude.total_cmp(&b.longitude))
                    .then(a.timestamp.cmp(&b.timestamp))
            });
            sorted.iter().map(|o| (o.latitude, o.longitude)).collect()
        };
        let clusters = build_clusters(
            &points,
            self.config.cluster_radius_km,
            self.config.min_cluster_points,
            self.config.min_cluster_radius_km,
        )
        .into_iter()
        .map(|(cluster, _)| cluster)
        .collect();

        let profile = PatternProfile {
            speed,
            clusters,
            activity: TimeHistogram::from_hours(observations.iter().map(|o| o.timestamp.hour())),
            observation_count: observations.len(),
            last_seen: observations.last().map(|o| o.timestamp),
        };
        (profile, retained)
    }

    fn incident_profile(&self, mut incidents: Vec<IncidentRecord>) -> IncidentProfile {
        incidents.sort_by(|a, b| {
            a.latitude
                .total_cmp(&b.latitude)
                .then(a.longitude.total_cmp(&b.longitude))
                .then(a.timestamp.cmp(&b.timestamp))
                .then(a.kind.cmp(&b.kind))
                .then(a.severity.cmp(&b.severity))
        });

        let mut breakdown = BTreeMap::new();
        for incident in &incidents {
            *breakdown.entry(incident.kind).or_insert(0) += 1;
        }

        let hourly = TimeHistogram::from_hours(incidents.iter().map(|i| i.timestamp.hour()));
        let mut timestamps: Vec<DateTime<Utc>> = incidents.iter().map(|i| i.timestamp).collect();
        timestamps.sort();

        IncidentProfile {
            hotspots: self.hotspots(&incidents, timestamps.last().copied()),
            peak_hour: hourly.peak_hour(),
            hourly,
            total_incidents: incidents.len(),
            breakdown,
            trend: trend_direction(&timestamps),
        }
    }

    /// Hotspots over incidents sorted by (latitude, longitude, ...).
    fn hotspots(&self, incidents: &[IncidentRecord], newest: Option<DateTime<Utc>>) -> Vec<Hotspot> {
        let Some(newest) = newest else {
            return Vec::new();
        };

        let points: Vec<(f64, f64)> = incidents.iter().map(|i| (i.latitude, i.longitude)).collect();
        let clusters = build_clusters(
            &points,
            self.config.hotspot_radius_km,
            self.config.min_incidents_for_hotspot,
            self.config.hotspot_radius_km,
        );

        let decay_days = self.config.recency_decay_days.max(f64::EPSILON);
        let saturation = self.config.intensity_saturation.max(f64::EPSILON);

        let mut hotspots: Vec<Hotspot> = clusters
            .into_iter()
            .map(|(cluster, members)| {
                let mut risk_weight = 0.0;
                let mut breakdown: BTreeMap<IncidentKind, usize> = BTreeMap::new();
                let mut recent_incidents = 0;

                for &m in &members {
                    let incident = &incidents[m];
                    let age = newest - incident.timestamp;
                    let age_days = age.num_seconds() as f64 / 86_400.0;
                    let recency = (1.0 - age_days / decay_days).max(RECENCY_FLOOR);

                    risk_weight += incident.base_weight() * recency;
                    *breakdown.entry(incident.kind).or_insert(0) += 1;
                    if age <= Duration::days(RECENT_WINDOW_DAYS) {
                        recent_incidents += 1;
                    }
                }

                // Most frequent kind; BTreeMap order breaks ties
                let mut dominant_kind = IncidentKind::Other;
                let mut best = 0;
                for (&kind, &count) in &breakdown {
                    if count > best {
                        best = count;
                        dominant_kind = kind;
                    }
                }

                Hotspot {
                    cluster,
                    risk_weight,
                    intensity: 1.0 - (-risk_weight / saturation).exp(),
                    dominant_kind,
                    breakdown,
                    recent_incidents,
                }
            })
            .collect();

        hotspots.sort_by(|a, b| {
            b.risk_weight
                .total_cmp(&a.risk_weight)
                .then(a.cluster.latitude.total_cmp(&b.cluster.latitude))
                .then(a.cluster.longitude.total_cmp(&b.cluster.longitude))
        });
        hotspots.truncate(self.config.max_hotspots);
        hotspots
    }
}

/// Sums subject profiles into the population baseline.
#[derive(Default)]
struct PopulationAccumulator {
    speeds: Vec<f64>,
    /// Fitted speeds of subjects carried over without raw samples
    carried: Option<SpeedStats>,
    discarded: usize,
    hour_counts: [u64; 24],
    observations: usize,
    last_seen: Option<DateTime<Utc>>,
}

impl PopulationAccumulator {
    fn add(&mut self, profile: &PatternProfile, retained: Vec<f64>) {
        self.speeds.extend(retained);
        self.discarded += profile.speed.discarded;
        for (total, count) in self.hour_counts.iter_mut().zip(profile.activity.counts.iter()) {
            *total += count;
        }
        self.observations += profile.observation_count;
        self.last_seen = self.last_seen.max(profile.last_seen);
    }

    fn carry(&mut self, profile: &PatternProfile) {
        self.carried = Some(match self.carried.take() {
            Some(stats) => stats.pool(&profile.speed),
            None => profile.speed.clone(),
        });
        for (total, count) in self.hour_counts.iter_mut().zip(profile.activity.counts.iter()) {
            *total += count;
        }
        self.observations += profile.observation_count;
        self.last_seen = self.last_seen.max(profile.last_seen);
    }

    fn finish(mut self) -> PatternProfile {
        let mut speed = SpeedStats::fit(&mut self.speeds, self.discarded);
        if let Some(carried) = &self.carried {
            speed = speed.pool(carried);
        }
        PatternProfile {
            speed,
            clusters: Vec::new(),
            activity: TimeHistogram::from_counts(self.hour_counts),
            observation_count: self.observations,
            last_seen: self.last_seen,
        }
    }
}

fn sort_observations(observations: &mut [Observation]) {
    observations.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.latitude.total_cmp(&b.latitude))
            .then(a.longitude.total_cmp(&b.longitude))
    });
}

/// Compare the incident rate of the second half of the period with the first.
fn trend_direction(sorted_timestamps: &[DateTime<Utc>]) -> TrendDirection {
    let (Some(&first), Some(&last)) = (sorted_timestamps.first(), sorted_timestamps.last()) else {
        return TrendDirection::InsufficientData;
    };
    let span = last - first;
    if sorted_timestamps.len() < TREND_MIN_INCIDENTS || span < Duration::days(TREND_MIN_SPAN_DAYS)
    {
        return TrendDirection::InsufficientData;
    }

    let midpoint = first + span / 2;
    let early = sorted_timestamps.iter().filter(|&&t| t < midpoint).count();
    let late = sorted_timestamps.len() - early;

    if early == 0 {
        return TrendDirection::Increasing;
    }
    let ratio = late as f64 / early as f64;
    if ratio > TREND_UP_RATIO {
        TrendDirection::Increasing
    } else if ratio < TREND_DOWN_RATIO {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Label {
    Unvisited,
    Noise,
    Cluster,
}

/// Density-based clustering (DBSCAN) over points sorted by latitude.
///
/// A point is a core point when at least `min_points` points, itself
/// included, lie within `radius_km`. Returns member indices per cluster,
/// each list ascending; border points join the first cluster reaching them.
fn dbscan(points: &[(f64, f64)], radius_km: f64, min_points: usize) -> Vec<Vec<usize>> {
    let window = latitude_span_deg(radius_km) * (1.0 + 1e-9);
    let neighbours = |i: usize| -> Vec<usize> {
        let (lat, lon) = points[i];
        let start = points.partition_point(|p| p.0 < lat - window);
        points[start..]
            .iter()
            .enumerate()
            .take_while(|(_, p)| p.0 <= lat + window)
            .filter(|(_, p)| haversine_km(lat, lon, p.0, p.1) <= radius_km)
            .map(|(offset, _)| start + offset)
            .collect()
    };

    let min_points = min_points.max(1);
    let mut labels = vec![Label::Unvisited; points.len()];
    let mut clusters = Vec::new();

    for i in 0..points.len() {
        if labels[i] != Label::Unvisited {
            continue;
        }
        let seeds = neighbours(i);
        if seeds.len() < min_points {
            labels[i] = Label::Noise;
            continue;
        }

        labels[i] = Label::Cluster;
        let mut members = vec![i];
        let mut queue: VecDeque<usize> = seeds.into();

        while let Some(j) = queue.pop_front() {
            match labels[j] {
                Label::Cluster => {}
                Label::Noise => {
                    labels[j] = Label::Cluster;
                    members.push(j);
                }
                Label::Unvisited => {
                    labels[j] = Label::Cluster;
                    members.push(j);
                    let expansion = neighbours(j);
                    if expansion.len() >= min_points {
                        queue.extend(expansion);
                    }
                }
            }
        }

        members.sort_unstable();
        clusters.push(members);
    }

    clusters
}

/// Cluster `points` and describe each cluster, ordered by (count desc,
/// latitude, longitude).
fn build_clusters(
    points: &[(f64, f64)],
    radius_km: f64,
    min_points: usize,
    min_radius_km: f64,
) -> Vec<(GeoCluster, Vec<usize>)> {
    let mut clusters: Vec<(GeoCluster, Vec<usize>)> = dbscan(points, radius_km, min_points)
        .into_iter()
        .map(|members| {
            let (latitude, longitude) = spherical_centroid(members.iter().map(|&m| points[m]))
                .unwrap_or(points[members[0]]);
            let spread = members
                .iter()
                .map(|&m| haversine_km(latitude, longitude, points[m].0, points[m].1))
                .fold(0.0, f64::max);

            let cluster = GeoCluster {
                latitude,
                longitude,
                radius_km: spread.max(min_radius_km),
                count: members.len(),
            };
            (cluster, members)
        })
        .collect();

    clusters.sort_by(|(a, _), (b, _)| {
        b.count
            .cmp(&a.count)
            .then(a.latitude.total_cmp(&b.latitude))
            .then(a.longitude.total_cmp(&b.longitude))
    });
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::observation::Severity;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::new(PatternConfig::default())
    }

    /// Thirty ten-minute steps around one spot, then a short trip.
    fn commuter(subject: &str, lat: f64, lon: f64) -> Vec<Observation> {
        let mut observations: Vec<Observation> = (0..30)
            .map(|i| {
                let jitter = (i % 5) as f64 * 0.0001;
                Observation::new(
                    subject,
                    lat + jitter,
                    lon - jitter,
                    t0() + Duration::minutes(10 * i),
                )
            })
            .collect();
        observations.push(Observation::new(
            subject,
            lat + 0.05,
            lon,
            t0() + Duration::minutes(330),
        ));
        observations
    }

    fn crime(lat: f64, lon: f64, at: DateTime<Utc>) -> IncidentRecord {
        IncidentRecord::new(lat, lon, at, IncidentKind::Crime, Severity::High)
    }

    fn archive() -> ObservationArchive {
        let mut observations = commuter("u1", 20.30, 85.82);
        observations.extend(commuter("u2", 20.35, 85.90));

        let mut incidents: Vec<IncidentRecord> = (0..6)
            .map(|i| crime(20.300 + i as f64 * 0.0005, 85.820, t0() - Duration::days(i)))
            .collect();
        incidents.push(IncidentRecord::new(
            21.0,
            86.0,
            t0(),
            IncidentKind::Medical,
            Severity::Low,
        ));

        ObservationArchive::new(observations, incidents)
    }

    #[test]
    fn test_subject_profile() {
        let set = analyzer()
            .recompute(&archive(), &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;

        let u1 = set.subject("u1").unwrap();
        assert_eq!(u1.observation_count, 31);
        assert_eq!(u1.speed.samples, 30);
        assert_eq!(u1.activity.samples, 31);
        assert_eq!(u1.clusters.len(), 1);
        assert_eq!(u1.clusters[0].count, 30);
        assert_eq!(u1.nearest_cluster(20.3002, 85.8198).unwrap().1, 0.0);
        assert_eq!(u1.last_seen, Some(t0() + Duration::minutes(330)));

        assert_eq!(set.generation, 1);
        assert_eq!(set.schema_version, PROFILE_SCHEMA_VERSION);
        assert_eq!(set.population.observation_count, 62);
        assert_eq!(set.population.speed.samples, 60);
        assert!(set.population.clusters.is_empty());
    }

    #[test]
    fn test_record_order_does_not_matter() {
        let ordered = archive();
        let mut shuffled = archive();
        shuffled.observations.reverse();
        shuffled.observations.rotate_left(7);
        shuffled.incidents.reverse();

        let a = analyzer()
            .recompute(&ordered, &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;
        let b = analyzer()
            .recompute(&shuffled, &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;

        assert_eq!(a, b);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let previous = ProfileSet::empty();
        let a = analyzer()
            .recompute(&archive(), &previous, &AtomicBool::new(false))
            .unwrap()
            .profiles;
        let b = analyzer()
            .recompute(&archive(), &previous, &AtomicBool::new(false))
            .unwrap()
            .profiles;

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_too_many_corrupt_records() {
        let mut observations = commuter("u1", 20.30, 85.82);
        observations.truncate(8);
        observations.push(Observation::new("u1", 95.0, 85.82, t0()));
        observations.push(Observation::new("u1", 20.30, f64::NAN, t0()));
        let archive = ObservationArchive::new(observations, Vec::new());

        let err = analyzer()
            .recompute(&archive, &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap_err();

        assert_eq!(
            err,
            RecomputeError::TooManyCorruptRecords {
                skipped: 2,
                total: 10,
                threshold: 0.1,
            }
        );
    }

    #[test]
    fn test_few_corrupt_records_are_skipped() {
        let mut archive = archive();
        archive.observations.push(Observation::new("u3", 95.0, 85.82, t0()));
        archive.rejected_records = 1;

        let run = analyzer()
            .recompute(&archive, &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap();

        assert!(run.profiles.subject("u3").is_none());
        assert_eq!(run.profiles.subjects.len(), 2);
        assert_eq!(run.skipped_records, 2);
        assert_eq!(run.total_records, 71);
    }

    #[test]
    fn test_interrupt_produces_nothing() {
        let err = analyzer()
            .recompute(&archive(), &ProfileSet::empty(), &AtomicBool::new(true))
            .unwrap_err();

        assert_eq!(err, RecomputeError::Interrupted { completed_subjects: 0 });
    }

    #[test]
    fn test_carry_over_from_previous() {
        let first = analyzer()
            .recompute(&archive(), &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;

        let only_u3 = ObservationArchive::new(commuter("u3", 19.0, 84.0), Vec::new());
        let second = analyzer()
            .recompute(&only_u3, &first, &AtomicBool::new(false))
            .unwrap()
            .profiles;

        assert_eq!(second.generation, 2);
        assert_eq!(second.subjects.len(), 3);
        assert_eq!(second.subject("u1"), first.subject("u1"));
        assert_eq!(second.incidents, first.incidents);

        // u1 and u2 stay in the baseline next to u3
        let population = &second.population;
        assert_eq!(population.observation_count, 93);
        assert_eq!(population.activity.samples, 93);
        assert_eq!(population.speed.samples, 90);
        let expected_mean = (first.population.speed.mean_kmh * 60.0
            + second.subject("u3").unwrap().speed.mean_kmh * 30.0)
            / 90.0;
        assert!((population.speed.mean_kmh - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn test_implausible_speeds_are_discarded() {
        let mut observations = commuter("u1", 20.30, 85.82);
        // 55 km in one minute
        observations.push(Observation::new(
            "u1",
            20.85,
            85.82,
            t0() + Duration::minutes(331),
        ));
        let archive = ObservationArchive::new(observations, Vec::new());

        let set = analyzer()
            .recompute(&archive, &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;
        let speed = &set.subject("u1").unwrap().speed;

        assert_eq!(speed.discarded, 1);
        assert_eq!(speed.samples, 30);
        assert!(speed.p99_kmh <= 300.0);
    }

    #[test]
    fn test_incident_hotspots() {
        let set = analyzer()
            .recompute(&archive(), &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;
        let incidents = &set.incidents;

        assert_eq!(incidents.total_incidents, 7);
        assert_eq!(incidents.breakdown.get(&IncidentKind::Crime), Some(&6));
        assert_eq!(incidents.hotspots.len(), 1);

        let hotspot = &incidents.hotspots[0];
        assert_eq!(hotspot.cluster.count, 6);
        assert_eq!(hotspot.dominant_kind, IncidentKind::Crime);
        assert!(hotspot.cluster.radius_km >= 0.5);
        assert!(hotspot.intensity > 0.0 && hotspot.intensity < 1.0);
        assert_eq!(hotspot.recent_incidents, 6);
        // Crime x High = 4.5 per incident, decayed by age in days
        let expected: f64 = (0..6).map(|d| 4.5 * (1.0 - d as f64 / 30.0)).sum();
        assert!((hotspot.risk_weight - expected).abs() < 1e-9);
        assert_eq!(incidents.peak_hour, Some(8));
    }

    #[test]
    fn test_trend_direction() {
        let day = |d: i64| t0() + Duration::days(d);

        assert_eq!(trend_direction(&[day(0), day(1), day(2)]), TrendDirection::InsufficientData);
        assert_eq!(
            trend_direction(&[day(0), day(1), day(2), day(3)]),
            TrendDirection::InsufficientData
        );
        assert_eq!(
            trend_direction(&[day(0), day(10), day(11), day(12), day(13), day(14)]),
            TrendDirection::Increasing
        );
        assert_eq!(
            trend_direction(&[day(0), day(1), day(2), day(3), day(14)]),
            TrendDirection::Decreasing
        );
        assert_eq!(
            trend_direction(&[day(0), day(2), day(12), day(14)]),
            TrendDirection::Stable
        );
    }

    #[test]
    fn test_dbscan_noise_and_border_points() {
        // Three tight points, one 80 m away, one far away
        let points = vec![
            (20.0000, 85.0),
            (20.0001, 85.0),
            (20.0002, 85.0),
            (20.0009, 85.0),
            (20.5000, 85.0),
        ];
        let clusters = dbscan(&points, 0.1, 3);

        assert_eq!(clusters, vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn test_cluster_across_antimeridian() {
        // Alternating sides of the 180th meridian, about 30 m apart
        let mut points: Vec<(f64, f64)> = (0..20)
            .map(|i| {
                let lon = if i % 2 == 0 { 179.99985 } else { -179.99985 };
                (-17.0 + i as f64 * 1e-6, lon)
            })
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let clusters = build_clusters(&points, 0.1, 3, 0.1);

        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0].0;
        assert_eq!(cluster.count, 20);
        assert!(cluster.longitude.abs() > 179.99);
        assert!((cluster.latitude + 17.0).abs() < 1e-3);
        assert!(cluster.radius_km <= 0.1 + 1e-9);
    }

    #[test]
    fn test_empty_archive_keeps_previous() {
        let first = analyzer()
            .recompute(&archive(), &ProfileSet::empty(), &AtomicBool::new(false))
            .unwrap()
            .profiles;
        let next = analyzer()
            .recompute(&ObservationArchive::default(), &first, &AtomicBool::new(false))
            .unwrap()
            .profiles;

        assert_eq!(next.generation, first.generation + 1);
        assert_eq!(next.subjects, first.subjects);
        assert_eq!(next.population, first.population);
        assert_eq!(next.incidents, first.incidents);
    }
}
