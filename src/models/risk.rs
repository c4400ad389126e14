//! Location risk scoring.
//!
//! The score blends a geographic prior taken from nearby incident hotspots
//! with a temporal modifier from the hour-of-day incident distribution, plus
//! a small bounded adjustment keyed by the caller's profile tag. The
//! confidence interval is a function of how many historical samples back
//! each factor, so sparse areas and quiet hours yield wider intervals.
//!
//! Routes are scored point by point and scaled by a bounded modifier for
//! length and number of stops.

use crate::config::RiskConfig;
use crate::error::ValidationError;
use crate::geo::{haversine_km, validate_coordinate};
use crate::models::aggregator::ScoreAggregator;
use crate::models::insight::{AreaFacts, InsightGenerator};
use crate::types::assessment::{
    ConfidenceInterval, RiskAssessment, RiskLevel, RouteAssessment, TimeBucket, TimeContext,
};
use crate::types::insight::Insight;
use crate::types::observation::IncidentKind;
use crate::types::profile::{IncidentProfile, ProfileSet, TimeHistogram, TrendDirection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const GEOGRAPHIC: &str = "geographic";
const TEMPORAL: &str = "temporal";
const PROFILE: &str = "profile";
const ROUTE: &str = "route";

/// Geographic prior and the evidence behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPrior {
    pub value: f64,
    /// Hotspot member counts weighted by proximity
    pub effective_samples: f64,
    /// Distance to the edge of the nearest hotspot
    pub nearest_km: Option<f64>,
}

/// Temporal factor and the evidence behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalFactor {
    pub value: f64,
    /// Relative incident density after shrinkage toward the bucket prior
    pub density_ratio: f64,
    pub samples: f64,
}

/// Incident picture around a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaSummary {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub hotspots: usize,
    pub incidents: usize,
    pub breakdown: BTreeMap<IncidentKind, usize>,
    /// Regional incident trend
    pub trend: TrendDirection,
    /// Regional peak incident hour (UTC)
    pub peak_hour: Option<u32>,
    pub insights: Vec<Insight>,
}

pub struct RiskScorer {
    config: RiskConfig,
    aggregator: ScoreAggregator,
    /// Profile tag adjustments keyed by lowercase tag
    profile_adjustments: HashMap<String, f64>,
    insights: InsightGenerator,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        let aggregator = ScoreAggregator::new([
            (GEOGRAPHIC, config.geographic_weight),
            (TEMPORAL, config.temporal_weight),
        ]);
        let profile_adjustments = config
            .profile_adjustments
            .iter()
            .map(|(tag, &adj)| (tag.to_ascii_lowercase(), adj))
            .collect();
        let insights =
            InsightGenerator::new(config.high_density_incidents, config.predominant_share);
        Self {
            config,
            aggregator,
            profile_adjustments,
            insights,
        }
    }

    /// Score a location. Pure function of the inputs and `snapshot`.
    ///
    /// Low confidence is never an error; it shows up as a wide interval.
    pub fn predict(
        &self,
        latitude: f64,
        longitude: f64,
        time: TimeContext,
        user_profile: Option<&str>,
        snapshot: &ProfileSet,
    ) -> Result<RiskAssessment, ValidationError> {
        validate_coordinate(0, latitude, longitude)?;

        let bucket = time.bucket();
        let geo = self.geographic_prior(latitude, longitude, &snapshot.incidents);
        let temporal = self.temporal_factor(bucket, &snapshot.incidents.hourly);
        let adjustment = self.profile_adjustment(user_profile);

        let mut factors = BTreeMap::new();
        factors.insert(GEOGRAPHIC.to_string(), geo.value);
        factors.insert(TEMPORAL.to_string(), temporal.value);

        let blended = self
            .aggregator
            .aggregate(&factors)
            .unwrap_or(self.config.base_prior);
        let score = (blended + adjustment).clamp(0.0, 1.0);

        let mut contributing_factors = self.aggregator.contributions(&factors);
        contributing_factors.insert(PROFILE.to_string(), adjustment);

        let confidence_interval =
            self.confidence_interval(score, geo.effective_samples, temporal.samples);
        let risk_level = RiskLevel::from_score(score, &self.config.risk_levels);

        debug!(
            latitude = latitude,
            longitude = longitude,
            bucket = bucket.as_str(),
            risk_score = score,
            geo_prior = geo.value,
            geo_samples = geo.effective_samples,
            nearest_hotspot_km = ?geo.nearest_km,
            temporal = temporal.value,
            temporal_samples = temporal.samples,
            "Risk assessment complete"
        );

        Ok(RiskAssessment {
            score,
            confidence_interval,
            contributing_factors,
            risk_level,
            recommendations: risk_level.recommendations(),
        })
    }

    /// Inverse-distance blend of the nearest hotspot intensities, fading to
    /// the base prior as the nearest hotspot gets further away.
    pub fn geographic_prior(
        &self,
        latitude: f64,
        longitude: f64,
        incidents: &IncidentProfile,
    ) -> GeoPrior {
        let mut nearby: Vec<(f64, usize)> = incidents
            .hotspots
            .iter()
            .enumerate()
            .map(|(i, h)| (h.cluster.distance_to_edge_km(latitude, longitude), i))
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        nearby.truncate(self.config.nearest_hotspots.max(1));

        if nearby.is_empty() {
            return GeoPrior {
                value: self.config.base_prior,
                effective_samples: 0.0,
                nearest_km: None,
            };
        }

        let scale = self.config.distance_scale_km.max(f64::EPSILON);
        let mut weight_sum = 0.0;
        let mut weighted_intensity = 0.0;
        let mut coverage: f64 = 0.0;
        let mut effective_samples = 0.0;

        for &(distance, i) in &nearby {
            let hotspot = &incidents.hotspots[i];
            let weight = 1.0 / (1.0 + distance / scale).powi(2);
            weight_sum += weight;
            weighted_intensity += weight * hotspot.intensity;
            coverage = coverage.max(weight);
            effective_samples += weight * hotspot.cluster.count as f64;
        }

        let idw = weighted_intensity / weight_sum;
        GeoPrior {
            value: (coverage * idw + (1.0 - coverage) * self.config.base_prior).clamp(0.0, 1.0),
            effective_samples,
            nearest_km: Some(nearby[0].0),
        }
    }

    /// Incident density of the bucket relative to a uniform day, shrunk
    /// toward the bucket's prior ratio, mapped into [0, 1) by `r / (1 + r)`.
    pub fn temporal_factor(&self, bucket: TimeBucket, hourly: &TimeHistogram) -> TemporalFactor {
        let samples = hourly.bucket_count(bucket) as f64;
        let observed_ratio = if hourly.samples > 0 {
            hourly.bucket_probability(bucket) / (bucket.hour_count() as f64 / 24.0)
        } else {
            0.0
        };

        let strength = self.config.temporal_prior_strength.max(0.0);
        let prior = bucket.prior_ratio();
        let density_ratio = if samples + strength > 0.0 {
            (samples * observed_ratio + strength * prior) / (samples + strength)
        } else {
            prior
        };

        TemporalFactor {
            value: density_ratio / (1.0 + density_ratio),
            density_ratio,
            samples,
        }
    }

    /// Bounded additive adjustment for a profile tag, ignoring case;
    /// unknown tags add nothing.
    pub fn profile_adjustment(&self, user_profile: Option<&str>) -> f64 {
        let limit = self.config.max_profile_adjustment.abs();
        user_profile
            .and_then(|tag| self.profile_adjustments.get(&tag.to_ascii_lowercase()))
            .map_or(0.0, |adj| adj.clamp(-limit, limit))
    }

    /// Score a route through `waypoints` from `start` to `end`.
    ///
    /// Every point is scored like a single location; the mean is scaled by
    /// the route modifier. Coordinate errors carry the point's position in
    /// route order (start 0, waypoints from 1, end last).
    pub fn predict_route(
        &self,
        start: (f64, f64),
        waypoints: &[(f64, f64)],
        end: (f64, f64),
        time: TimeContext,
        user_profile: Option<&str>,
        snapshot: &ProfileSet,
    ) -> Result<RouteAssessment, ValidationError> {
        let mut points = Vec::with_capacity(waypoints.len() + 2);
        points.push(start);
        points.extend_from_slice(waypoints);
        points.push(end);

        for (index, &(latitude, longitude)) in points.iter().enumerate() {
            validate_coordinate(index, latitude, longitude)?;
        }

        let assessments = points
            .iter()
            .map(|&(lat, lon)| self.predict(lat, lon, time, user_profile, snapshot))
            .collect::<Result<Vec<_>, _>>()?;

        let n = assessments.len() as f64;
        let point_scores: Vec<f64> = assessments.iter().map(|a| a.score).collect();
        let mean = point_scores.iter().sum::<f64>() / n;
        let half_width = assessments
            .iter()
            .map(|a| a.confidence_interval.width() / 2.0)
            .sum::<f64>()
            / n;

        let distance_km = haversine_km(start.0, start.1, end.0, end.1);
        let route_modifier = self.route_modifier(distance_km, waypoints.len());
        let score = (mean * route_modifier).clamp(0.0, 1.0);

        let mut contributing_factors: BTreeMap<String, f64> = BTreeMap::new();
        for assessment in &assessments {
            for (factor, value) in &assessment.contributing_factors {
                *contributing_factors.entry(factor.clone()).or_insert(0.0) += value / n;
            }
        }
        contributing_factors.insert(ROUTE.to_string(), score - mean);

        let risk_level = RiskLevel::from_score(score, &self.config.risk_levels);

        debug!(
            points = points.len(),
            distance_km = distance_km,
            route_modifier = route_modifier,
            mean_point_score = mean,
            risk_score = score,
            "Route assessment complete"
        );

        Ok(RouteAssessment {
            assessment: RiskAssessment {
                score,
                confidence_interval: ConfidenceInterval {
                    low: (score - half_width).clamp(0.0, 1.0),
                    high: (score + half_width).clamp(0.0, 1.0),
                },
                contributing_factors,
                risk_level,
                recommendations: risk_level.recommendations(),
            },
            point_scores,
            distance_km,
            route_modifier,
        })
    }

    /// Grows with route length and stop count, capped at `max_route_modifier`.
    pub fn route_modifier(&self, distance_km: f64, waypoints: usize) -> f64 {
        let step = self.config.route_distance_step_km.max(f64::EPSILON);
        let distance = 1.0 + distance_km / step * self.config.route_distance_increment;
        let stops = 1.0 + waypoints as f64 * self.config.route_waypoint_increment;
        (distance * stops).min(self.config.max_route_modifier)
    }

    /// Half-width scales with `1 / sqrt(1 + n)` per factor, weighted like the score.
    pub fn confidence_interval(
        &self,
        score: f64,
        geo_samples: f64,
        temporal_samples: f64,
    ) -> ConfidenceInterval {
        let w_geo = self.aggregator.weight(GEOGRAPHIC);
        let w_time = self.aggregator.weight(TEMPORAL);
        let total = w_geo + w_time;

        let uncertainty = if total > 0.0 {
            (w_geo / (1.0 + geo_samples.max(0.0)).sqrt()
                + w_time / (1.0 + temporal_samples.max(0.0)).sqrt())
                / total
        } else {
            1.0
        };

        let half_width = self.config.max_half_width.max(0.0) * uncertainty;
        ConfidenceInterval {
            low: (score - half_width).clamp(0.0, 1.0),
            high: (score + half_width).clamp(0.0, 1.0),
        }
    }

    /// Hotspots whose centroid lies within `radius_km` of a point, with the
    /// insights they support.
    pub fn area_summary(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        snapshot: &ProfileSet,
    ) -> Result<AreaSummary, ValidationError> {
        validate_coordinate(0, latitude, longitude)?;
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(ValidationError::InvalidRadius { radius_km });
        }

        let mut hotspots = 0;
        let mut incidents = 0;
        let mut miss = 1.0;
        let mut breakdown = BTreeMap::new();
        let mut top_hotspot = None;

        // Hotspots are stored heaviest first
        for hotspot in &snapshot.incidents.hotspots {
            if hotspot.cluster.distance_km(latitude, longitude) > radius_km {
                continue;
            }
            if top_hotspot.is_none() {
                top_hotspot = Some(hotspot);
            }
            hotspots += 1;
            incidents += hotspot.cluster.count;
            miss *= 1.0 - hotspot.intensity;
            for (kind, count) in &hotspot.breakdown {
                *breakdown.entry(*kind).or_insert(0) += count;
            }
        }

        let risk_score: f64 = 1.0 - miss;
        let trend = snapshot.incidents.trend;
        let peak_hour = snapshot.incidents.peak_hour;
        let insights = self.insights.generate(&AreaFacts {
            top_hotspot,
            total_incidents: incidents,
            breakdown: &breakdown,
            trend,
            peak_hour,
        });

        Ok(AreaSummary {
            risk_score,
            risk_level: RiskLevel::from_score(risk_score, &self.config.risk_levels),
            hotspots,
            incidents,
            breakdown,
            trend,
            peak_hour,
            insights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::assessment::TimeBucket;
    use crate::types::insight::InsightKind;
    use crate::types::profile::{GeoCluster, Hotspot};
    use std::io::Write;

    fn hotspot(lat: f64, lon: f64, count: usize, intensity: f64) -> Hotspot {
        let mut breakdown = BTreeMap::new();
        breakdown.insert(IncidentKind::Crime, count);
        Hotspot {
            cluster: GeoCluster {
                latitude: lat,
                longitude: lon,
                radius_km: 0.5,
                count,
            },
            risk_weight: count as f64 * 3.0,
            intensity,
            dominant_kind: IncidentKind::Crime,
            breakdown,
            recent_incidents: 0,
        }
    }

    fn snapshot() -> ProfileSet {
        let mut set = ProfileSet::empty();
        set.incidents.hotspots = vec![hotspot(20.30, 85.82, 50, 0.95)];
        set.incidents.hourly = TimeHistogram::from_hours((0..50).map(|i| (i % 24) as u32));
        set
    }

    fn night() -> TimeContext {
        TimeContext::Bucket(TimeBucket::Night)
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let result = scorer.predict(95.0, 10.0, night(), None, &snapshot());
        assert!(matches!(
            result,
            Err(ValidationError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn test_score_and_interval_bounds() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();

        for &(lat, lon) in &[
            (20.30, 85.82),
            (-90.0, 180.0),
            (90.0, -180.0),
            (0.0, 0.0),
            (20.31, 85.83),
        ] {
            for bucket in TimeBucket::ALL {
                let a = scorer
                    .predict(lat, lon, TimeContext::Bucket(bucket), None, &snap)
                    .unwrap();
                assert!((0.0..=1.0).contains(&a.score));
                assert!(a.confidence_interval.low <= a.score);
                assert!(a.score <= a.confidence_interval.high);
            }
        }
    }

    #[test]
    fn test_far_location_has_wider_interval() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();

        let near = scorer.predict(20.30, 85.82, night(), None, &snap).unwrap();
        // About 66 km north of the only hotspot
        let far = scorer.predict(20.90, 85.82, night(), None, &snap).unwrap();

        assert!(far.confidence_interval.width() > near.confidence_interval.width());
        assert!(near.score > far.score);
    }

    #[test]
    fn test_empty_snapshot_uses_base_prior() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let geo = scorer.geographic_prior(20.0, 85.0, &IncidentProfile::empty());

        assert_eq!(geo.value, RiskConfig::default().base_prior);
        assert_eq!(geo.effective_samples, 0.0);
        assert_eq!(geo.nearest_km, None);
    }

    #[test]
    fn test_temporal_factor_without_history_uses_prior() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let empty = TimeHistogram::empty();

        let late = scorer.temporal_factor(TimeBucket::LateNight, &empty);
        let morning = scorer.temporal_factor(TimeBucket::Morning, &empty);

        assert!((late.density_ratio - 1.5).abs() < 1e-12);
        assert!(late.value > morning.value);
        assert_eq!(late.samples, 0.0);
    }

    #[test]
    fn test_temporal_factor_follows_history() {
        let scorer = RiskScorer::new(RiskConfig::default());
        // Every incident happened in the morning
        let hist = TimeHistogram::from_hours(std::iter::repeat(8).take(500));

        let morning = scorer.temporal_factor(TimeBucket::Morning, &hist);
        let night = scorer.temporal_factor(TimeBucket::Night, &hist);

        assert!(morning.value > night.value);
        assert!(morning.density_ratio > 3.0);
    }

    #[test]
    fn test_profile_adjustment_is_bounded() {
        let mut config = RiskConfig::default();
        config.profile_adjustments.insert("commuter".to_string(), -0.05);
        config.profile_adjustments.insert("courier".to_string(), 0.9);
        let scorer = RiskScorer::new(config);

        assert_eq!(scorer.profile_adjustment(Some("commuter")), -0.05);
        assert_eq!(scorer.profile_adjustment(Some("courier")), 0.1);
        assert_eq!(scorer.profile_adjustment(Some("unknown")), 0.0);
        assert_eq!(scorer.profile_adjustment(None), 0.0);

        let a = scorer
            .predict(20.30, 85.82, night(), Some("courier"), &snapshot())
            .unwrap();
        assert_eq!(a.contributing_factors.get("profile"), Some(&0.1));
    }

    #[test]
    fn test_profile_tags_ignore_case() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[risk.profile_adjustments]\nNight_Worker = 0.05\n").unwrap();
        let config = AppConfig::load_from_path(file.path()).unwrap();

        let scorer = RiskScorer::new(config.risk);

        assert_eq!(scorer.profile_adjustment(Some("Night_Worker")), 0.05);
        assert_eq!(scorer.profile_adjustment(Some("NIGHT_WORKER")), 0.05);
        assert_eq!(scorer.profile_adjustment(Some("night_worker")), 0.05);
    }

    #[test]
    fn test_route_modifier() {
        let scorer = RiskScorer::new(RiskConfig::default());

        assert_eq!(scorer.route_modifier(0.0, 0), 1.0);
        // +10% per 100 km, +5% per waypoint
        assert!((scorer.route_modifier(100.0, 0) - 1.1).abs() < 1e-12);
        assert!((scorer.route_modifier(100.0, 2) - 1.1 * 1.1).abs() < 1e-12);
        assert_eq!(scorer.route_modifier(2000.0, 20), 1.5);
    }

    #[test]
    fn test_route_through_hotspot() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();
        let start = (20.25, 85.82);
        let end = (20.35, 85.82);

        let direct = scorer
            .predict_route(start, &[], end, night(), None, &snap)
            .unwrap();
        let via_hotspot = scorer
            .predict_route(start, &[(20.30, 85.82)], end, night(), None, &snap)
            .unwrap();

        assert_eq!(direct.point_scores.len(), 2);
        assert_eq!(via_hotspot.point_scores.len(), 3);
        assert!(via_hotspot.assessment.score > direct.assessment.score);
        assert!((direct.distance_km - 11.12).abs() < 0.05);

        let mean = via_hotspot.point_scores.iter().sum::<f64>() / 3.0;
        let expected = (mean * via_hotspot.route_modifier).clamp(0.0, 1.0);
        assert!((via_hotspot.assessment.score - expected).abs() < 1e-12);
        let route_factor = via_hotspot.assessment.contributing_factors["route"];
        assert!((route_factor - (expected - mean)).abs() < 1e-12);

        let ci = via_hotspot.assessment.confidence_interval;
        assert!(ci.low <= via_hotspot.assessment.score);
        assert!(via_hotspot.assessment.score <= ci.high);
    }

    #[test]
    fn test_route_rejects_bad_waypoint_with_its_position() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();

        let result = scorer.predict_route(
            (20.25, 85.82),
            &[(20.30, 85.82), (20.31, 185.0)],
            (20.35, 85.82),
            night(),
            None,
            &snap,
        );
        assert!(matches!(
            result,
            Err(ValidationError::InvalidCoordinates { index: 2, .. })
        ));

        let result =
            scorer.predict_route((20.25, 85.82), &[], (f64::NAN, 85.82), night(), None, &snap);
        assert!(matches!(
            result,
            Err(ValidationError::InvalidCoordinates { index: 1, .. })
        ));
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();
        let a = scorer.predict(20.305, 85.81, night(), None, &snap).unwrap();
        let b = scorer.predict(20.305, 85.81, night(), None, &snap).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_area_summary() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let mut snap = snapshot();
        snap.incidents.hotspots.push(hotspot(21.5, 86.0, 7, 0.3));

        let summary = scorer.area_summary(20.30, 85.82, 5.0, &snap).unwrap();

        assert_eq!(summary.hotspots, 1);
        assert_eq!(summary.incidents, 50);
        assert_eq!(summary.breakdown.get(&IncidentKind::Crime), Some(&50));
        assert!((summary.risk_score - 0.95).abs() < 1e-12);
        assert_eq!(summary.risk_level, RiskLevel::Critical);

        let kinds: Vec<InsightKind> = summary.insights.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InsightKind::Hotspot,
                InsightKind::IncidentPattern,
                InsightKind::Safety
            ]
        );
        assert_eq!(
            summary.insights[0].message,
            "Critical hotspot identified with 50 incidents. Primary incident type: crime"
        );
    }

    #[test]
    fn test_area_summary_rejects_bad_radius() {
        let scorer = RiskScorer::new(RiskConfig::default());
        let snap = snapshot();

        for radius in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                scorer.area_summary(20.30, 85.82, radius, &snap),
                Err(ValidationError::InvalidRadius { .. })
            ));
        }

        let empty = scorer.area_summary(-30.0, 10.0, 5.0, &snap).unwrap();
        assert_eq!(empty.hotspots, 0);
        assert!(empty.insights.is_empty());
    }
}
