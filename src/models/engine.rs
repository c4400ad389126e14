//! Analytics engine: the three components over one published snapshot

use crate::config::AppConfig;
use crate::error::{RecomputeError, ValidationError};
use crate::models::anomaly::AnomalyDetector;
use crate::models::pattern::PatternAnalyzer;
use crate::models::risk::{AreaSummary, RiskScorer};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::types::anomaly::AnomalyFlag;
use crate::types::assessment::{RiskAssessment, TimeContext};
use crate::types::observation::ObservationArchive;
use crate::types::profile::ProfileSet;
use crate::types::request::{
    AnomalyRequest, AnomalyResponse, AreaRequest, AreaResponse, FlagRecord, RiskRequest,
    RiskResponse, RouteRiskRequest, RouteRiskResponse,
};
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Outcome of a published recomputation
#[derive(Debug, Clone)]
pub struct Published {
    pub snapshot: Snapshot,
    pub skipped_records: usize,
    pub total_records: usize,
}

/// Risk scoring, anomaly detection and pattern recomputation sharing a
/// [`SnapshotStore`].
///
/// Every scoring call takes one snapshot handle at its start and uses it
/// throughout, so a concurrent publish never mixes two profile sets in a
/// single answer.
pub struct AnalyticsEngine {
    store: SnapshotStore,
    risk: RiskScorer,
    anomaly: AnomalyDetector,
    pattern: PatternAnalyzer,
    default_area_radius_km: f64,
}

impl AnalyticsEngine {
    /// Create an engine with no profiles published yet
    pub fn new(config: &AppConfig) -> Self {
        Self::with_profiles(config, ProfileSet::empty())
    }

    pub fn with_profiles(config: &AppConfig, profiles: ProfileSet) -> Self {
        info!(
            generation = profiles.generation,
            subjects = profiles.subjects.len(),
            hotspots = profiles.incidents.hotspots.len(),
            flag_threshold = config.anomaly.flag_threshold,
            "Analytics engine initialized"
        );

        Self {
            store: SnapshotStore::new(profiles),
            risk: RiskScorer::new(config.risk.clone()),
            anomaly: AnomalyDetector::new(config.anomaly.clone()),
            pattern: PatternAnalyzer::new(config.pattern.clone()),
            default_area_radius_km: config.risk.default_area_radius_km,
        }
    }

    /// Handle to the currently published profile set
    pub fn snapshot(&self) -> Snapshot {
        self.store.current()
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn risk_scorer(&self) -> &RiskScorer {
        &self.risk
    }

    pub fn anomaly_detector(&self) -> &AnomalyDetector {
        &self.anomaly
    }

    /// Score a location against the current snapshot.
    pub fn predict_risk(
        &self,
        latitude: f64,
        longitude: f64,
        time: TimeContext,
        user_profile: Option<&str>,
    ) -> Result<RiskAssessment, ValidationError> {
        let snapshot = self.store.current();
        self.risk
            .predict(latitude, longitude, time, user_profile, &snapshot)
    }

    pub fn assess_risk(&self, request: &RiskRequest) -> Result<RiskResponse, ValidationError> {
        let time = request.time_context()?;
        self.predict_risk(
            request.latitude,
            request.longitude,
            time,
            request.user_profile.as_deref(),
        )
        .map(RiskResponse::from)
    }

    pub fn assess_route(
        &self,
        request: &RouteRiskRequest,
    ) -> Result<RouteRiskResponse, ValidationError> {
        let time = request.time_context()?;
        let snapshot = self.store.current();
        self.risk
            .predict_route(
                request.route.start.pair(),
                &request.waypoints(),
                request.route.end.pair(),
                time,
                request.user_profile.as_deref(),
                &snapshot,
            )
            .map(RouteRiskResponse::from)
    }

    pub fn area_summary(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<AreaSummary, ValidationError> {
        let snapshot = self.store.current();
        self.risk
            .area_summary(latitude, longitude, radius_km, &snapshot)
    }

    /// Hotspots, trend and insights around the requested centre.
    pub fn analyze_area(&self, request: &AreaRequest) -> Result<AreaResponse, ValidationError> {
        let (latitude, longitude) = request.area.center.pair();
        let radius_km = request.area.radius_km.unwrap_or(self.default_area_radius_km);
        let summary = self.area_summary(latitude, longitude, radius_km)?;

        debug!(
            latitude = latitude,
            longitude = longitude,
            radius_km = radius_km,
            hotspots = summary.hotspots,
            insights = summary.insights.len(),
            "Area analysis complete"
        );

        Ok(AreaResponse {
            risk_score: summary.risk_score,
            risk_level: summary.risk_level,
            hotspots: summary.hotspots,
            incidents: summary.incidents,
            breakdown: summary.breakdown,
            trend: summary.trend,
            peak_hour: summary.peak_hour,
            insights: summary.insights,
        })
    }

    /// Evaluate a movement sequence and collect its flags in input order.
    pub fn detect_anomalies(
        &self,
        request: &AnomalyRequest,
    ) -> Result<AnomalyResponse, ValidationError> {
        let observations = request.to_observations();
        let snapshot = self.store.current();

        let detection = self
            .anomaly
            .detect(&request.subject_id, &observations, &snapshot)?;
        let flags: Vec<AnomalyFlag> = detection.iter().collect();
        let summary = detection.summarize(&flags);

        debug!(
            subject_id = %request.subject_id,
            evaluated = summary.evaluated,
            flagged = summary.flagged,
            erratic = summary.erratic_movement,
            confidence = summary.confidence,
            generation = snapshot.generation,
            "Anomaly detection complete"
        );

        Ok(AnomalyResponse {
            subject_id: request.subject_id.clone(),
            flags: flags.iter().map(FlagRecord::from).collect(),
            summary,
        })
    }

    /// Recompute profiles from `archive` and publish the result. At most one
    /// recomputation runs at a time; on error the current snapshot stays.
    pub fn recompute_and_publish(
        &self,
        archive: &ObservationArchive,
        interrupt: &AtomicBool,
    ) -> Result<Published, RecomputeError> {
        let mut counts = (0, 0);
        let snapshot = self.store.recompute_with(|previous| {
            let run = self.pattern.recompute(archive, previous, interrupt)?;
            counts = (run.skipped_records, run.total_records);
            Ok::<_, RecomputeError>(run.profiles)
        })?;

        Ok(Published {
            snapshot,
            skipped_records: counts.0,
            total_records: counts.1,
        })
    }

    /// Replace the published profile set, e.g. after loading one from disk.
    pub fn publish(&self, profiles: ProfileSet) -> Snapshot {
        self.store.publish(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::anomaly::AnomalyClass;
    use crate::types::insight::InsightKind;
    use crate::types::assessment::TimeBucket;
    use crate::types::observation::{IncidentKind, IncidentRecord, Observation, Severity};
    use crate::types::request::decode;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(&AppConfig::default())
    }

    /// Regular walkers around a home point plus a cluster of night-time crimes.
    fn archive() -> ObservationArchive {
        let mut observations = Vec::new();
        for subject in ["u1", "u2", "u3"] {
            for i in 0..40 {
                let jitter = (i % 4) as f64 * 0.0002;
                observations.push(Observation::new(
                    subject,
                    20.30 + jitter,
                    85.82 + jitter,
                    t0() + Duration::minutes(15 * i),
                ));
            }
        }

        let incidents = (0..30)
            .map(|i| {
                IncidentRecord::new(
                    20.30 + (i % 6) as f64 * 0.0005,
                    85.82,
                    Utc.with_ymd_and_hms(2024, 4, 20, 22, 0, 0).unwrap() + Duration::days(i % 10),
                    IncidentKind::Crime,
                    Severity::High,
                )
            })
            .collect();

        ObservationArchive::new(observations, incidents)
    }

    #[test]
    fn test_assess_risk_request() {
        let engine = engine();

        let request: RiskRequest =
            decode(br#"{"lat":20.30,"lng":85.82,"time_of_day":"night"}"#).unwrap();
        let response = engine.assess_risk(&request).unwrap();
        assert!((0.0..=1.0).contains(&response.score));
        assert!(response.confidence_interval.low <= response.score);
        assert!(response.score <= response.confidence_interval.high);

        let bad: RiskRequest = decode(br#"{"lat":95.0,"lng":85.82,"time_of_day":"night"}"#).unwrap();
        assert!(matches!(
            engine.assess_risk(&bad),
            Err(ValidationError::InvalidCoordinates { .. })
        ));

        let untimed: RiskRequest = decode(br#"{"lat":20.30,"lng":85.82}"#).unwrap();
        assert_eq!(
            engine.assess_risk(&untimed),
            Err(ValidationError::MissingTimeContext)
        );
    }

    #[test]
    fn test_detect_teleport_request() {
        let engine = engine();
        let request: AnomalyRequest = decode(
            br#"{"subject_id":"u9","locations":[
                {"lat":20.30,"lon":85.82,"timestamp":"2024-05-01T09:00:00Z"},
                {"lat":20.30,"lon":85.82,"timestamp":"2024-05-01T09:01:00Z"},
                {"lat":20.90,"lon":85.82,"timestamp":"2024-05-01T09:01:01Z"}
            ]}"#,
        )
        .unwrap();

        let response = engine.detect_anomalies(&request).unwrap();

        assert_eq!(response.subject_id, "u9");
        assert_eq!(response.flags.len(), 1);
        assert_eq!(response.flags[0].observation_index, 2);
        assert_eq!(response.flags[0].classification, AnomalyClass::Speed);
        assert!(response.summary.is_anomaly);
    }

    #[test]
    fn test_recompute_publishes_and_old_readers_keep_values() {
        let engine = engine();
        let before = engine.snapshot();

        let published = engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        assert_eq!(before.generation, 0);
        assert!(before.subjects.is_empty());
        assert_eq!(published.snapshot.generation, 1);
        assert_eq!(engine.generation(), 1);
        assert_eq!(published.snapshot.subjects.len(), 3);
        assert_eq!(published.snapshot.incidents.hotspots.len(), 1);
        assert_eq!(published.skipped_records, 0);
        assert_eq!(published.total_records, 150);
    }

    #[test]
    fn test_recompute_reports_invalid_records_as_skipped() {
        let engine = engine();
        let mut archive = archive();
        archive.rejected_records = 2;
        archive
            .observations
            .push(Observation::new("u4", 20.30, 181.0, t0()));
        archive.incidents.push(IncidentRecord::new(
            -91.0,
            85.82,
            t0(),
            IncidentKind::Fire,
            Severity::Low,
        ));

        let published = engine
            .recompute_and_publish(&archive, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(published.skipped_records, 4);
        assert_eq!(published.total_records, 154);
    }

    #[test]
    fn test_failed_recompute_keeps_snapshot() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let result = engine.recompute_and_publish(&archive(), &AtomicBool::new(true));

        assert!(matches!(result, Err(RecomputeError::Interrupted { .. })));
        assert_eq!(engine.generation(), 1);
    }

    #[test]
    fn test_far_location_is_less_certain() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let night = TimeContext::Bucket(TimeBucket::Night);
        let near = engine.predict_risk(20.301, 85.82, night, None).unwrap();
        let far = engine.predict_risk(23.0, 88.0, night, None).unwrap();

        assert!(near.score > far.score);
        assert!(far.confidence_interval.width() > near.confidence_interval.width());
    }

    #[test]
    fn test_unknown_subject_uses_population_baseline() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let request = AnomalyRequest {
            subject_id: "newcomer".to_string(),
            locations: Vec::new(),
        };
        assert_eq!(
            engine.detect_anomalies(&request),
            Err(ValidationError::EmptySequence)
        );

        let snapshot = engine.snapshot();
        let observations = vec![
            Observation::new("newcomer", 20.30, 85.82, t0()),
            Observation::new("newcomer", 20.31, 85.82, t0() + Duration::minutes(30)),
        ];
        let detection = engine
            .anomaly_detector()
            .detect("newcomer", &observations, &snapshot)
            .unwrap();

        assert_eq!(
            detection.baseline_source(),
            crate::models::anomaly::BaselineSource::Population
        );
        assert_eq!(detection.iter().count(), 0);
    }

    #[test]
    fn test_area_summary_after_recompute() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let summary = engine.area_summary(20.30, 85.82, 2.0).unwrap();
        assert_eq!(summary.hotspots, 1);
        assert_eq!(summary.incidents, 30);
        assert_eq!(summary.breakdown.get(&IncidentKind::Crime), Some(&30));
    }

    #[test]
    fn test_analyze_area_request() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let request: AreaRequest =
            decode(br#"{"area":{"center":{"lat":20.30,"lng":85.82}}}"#).unwrap();
        let response = engine.analyze_area(&request).unwrap();

        assert_eq!(response.hotspots, 1);
        assert_eq!(response.incidents, 30);
        // Every incident was recorded at 22:00
        assert_eq!(response.peak_hour, Some(22));
        let kinds: Vec<InsightKind> = response.insights.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                InsightKind::Hotspot,
                InsightKind::Temporal,
                InsightKind::IncidentPattern,
                InsightKind::Safety,
            ]
        );

        let far: AreaRequest =
            decode(br#"{"area":{"center":{"lat":-33.9,"lng":18.4},"radius_km":1.0}}"#).unwrap();
        let quiet = engine.analyze_area(&far).unwrap();
        assert_eq!(quiet.hotspots, 0);
        assert!(quiet.insights.is_empty());

        let bad: AreaRequest =
            decode(br#"{"area":{"center":{"lat":20.30,"lng":85.82},"radius_km":-2}}"#).unwrap();
        assert_eq!(
            engine.analyze_area(&bad),
            Err(ValidationError::InvalidRadius { radius_km: -2.0 })
        );
    }

    #[test]
    fn test_assess_route_request() {
        let engine = engine();
        engine
            .recompute_and_publish(&archive(), &AtomicBool::new(false))
            .unwrap();

        let request: RouteRiskRequest = decode(
            br#"{"route":{"start":{"lat":20.25,"lng":85.82},"end":{"lat":20.35,"lng":85.82},
                "waypoints":[{"lat":20.30,"lng":85.82}]},"time_of_day":"night"}"#,
        )
        .unwrap();
        let response = engine.assess_route(&request).unwrap();

        assert_eq!(response.point_scores.len(), 3);
        assert!(response.point_scores[1] > response.point_scores[0]);
        assert!(response.route_modifier > 1.0);
        assert!(response.factors.contains_key("route"));
        assert!(response.confidence_interval.low <= response.score);

        let untimed: RouteRiskRequest = decode(
            br#"{"route":{"start":{"lat":20.25,"lng":85.82},"end":{"lat":20.35,"lng":85.82}}}"#,
        )
        .unwrap();
        assert_eq!(
            engine.assess_route(&untimed),
            Err(ValidationError::MissingTimeContext)
        );
    }
}
