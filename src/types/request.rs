//! Request and response records exchanged with the service layer

use crate::error::ValidationError;
use crate::types::anomaly::{AnomalyClass, AnomalyFlag, AnomalySummary};
use crate::types::assessment::{
    ConfidenceInterval, RiskAssessment, RiskLevel, RouteAssessment, TimeBucket, TimeContext,
};
use crate::types::insight::Insight;
use crate::types::observation::{IncidentKind, Observation};
use crate::types::profile::TrendDirection;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Decode a JSON payload into a request record.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(payload).map_err(|e| ValidationError::MalformedRequest(e.to_string()))
}

/// Location risk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskRequest {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,
    #[serde(default)]
    pub time_of_day: Option<TimeBucket>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_profile: Option<String>,
}

impl RiskRequest {
    pub fn time_context(&self) -> Result<TimeContext, ValidationError> {
        time_context(self.time_of_day, self.timestamp)
    }
}

/// Exactly one of `time_of_day` / `timestamp` must be present.
fn time_context(
    time_of_day: Option<TimeBucket>,
    timestamp: Option<DateTime<Utc>>,
) -> Result<TimeContext, ValidationError> {
    match (time_of_day, timestamp) {
        (Some(bucket), None) => Ok(TimeContext::Bucket(bucket)),
        (None, Some(ts)) => Ok(TimeContext::At(ts)),
        (None, None) => Err(ValidationError::MissingTimeContext),
        (Some(_), Some(_)) => Err(ValidationError::AmbiguousTimeContext),
    }
}

/// A bare coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoPoint {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "lng", alias = "longitude")]
    pub lon: f64,
}

impl GeoPoint {
    pub fn pair(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutePlan {
    pub start: GeoPoint,
    pub end: GeoPoint,
    #[serde(default)]
    pub waypoints: Vec<GeoPoint>,
}

/// Route risk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteRiskRequest {
    pub route: RoutePlan,
    #[serde(default)]
    pub time_of_day: Option<TimeBucket>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_profile: Option<String>,
}

impl RouteRiskRequest {
    pub fn time_context(&self) -> Result<TimeContext, ValidationError> {
        time_context(self.time_of_day, self.timestamp)
    }

    pub fn waypoints(&self) -> Vec<(f64, f64)> {
        self.route.waypoints.iter().map(GeoPoint::pair).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRiskResponse {
    pub score: f64,
    pub confidence_interval: ConfidenceInterval,
    pub factors: BTreeMap<String, f64>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
    pub point_scores: Vec<f64>,
    pub distance_km: f64,
    pub route_modifier: f64,
}

impl From<RouteAssessment> for RouteRiskResponse {
    fn from(route: RouteAssessment) -> Self {
        let assessment = route.assessment;
        Self {
            score: assessment.score,
            confidence_interval: assessment.confidence_interval,
            factors: assessment.contributing_factors,
            risk_level: assessment.risk_level,
            recommendations: assessment.recommendations,
            point_scores: route.point_scores,
            distance_km: route.distance_km,
            route_modifier: route.route_modifier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaQuery {
    pub center: GeoPoint,
    /// Falls back to the configured default radius
    #[serde(default)]
    pub radius_km: Option<f64>,
}

/// Area pattern analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaRequest {
    pub area: AreaQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaResponse {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub hotspots: usize,
    pub incidents: usize,
    pub breakdown: BTreeMap<IncidentKind, usize>,
    pub trend: TrendDirection,
    pub peak_hour: Option<u32>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResponse {
    pub score: f64,
    pub confidence_interval: ConfidenceInterval,
    pub factors: BTreeMap<String, f64>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

impl From<RiskAssessment> for RiskResponse {
    fn from(assessment: RiskAssessment) -> Self {
        Self {
            score: assessment.score,
            confidence_interval: assessment.confidence_interval,
            factors: assessment.contributing_factors,
            risk_level: assessment.risk_level,
            recommendations: assessment.recommendations,
        }
    }
}

/// One position in an anomaly request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationPoint {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "lng", alias = "longitude")]
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

/// Movement anomaly request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnomalyRequest {
    pub subject_id: String,
    #[serde(alias = "location_data")]
    pub locations: Vec<LocationPoint>,
}

impl AnomalyRequest {
    pub fn to_observations(&self) -> Vec<Observation> {
        self.locations
            .iter()
            .map(|p| Observation {
                subject_id: self.subject_id.clone(),
                latitude: p.lat,
                longitude: p.lon,
                timestamp: p.timestamp,
                speed_kmh: p.speed,
                heading_deg: p.heading,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub observation_index: usize,
    pub anomaly_score: f64,
    pub classification: AnomalyClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
}

impl From<&AnomalyFlag> for FlagRecord {
    fn from(flag: &AnomalyFlag) -> Self {
        Self {
            observation_index: flag.observation_index,
            anomaly_score: flag.anomaly_score,
            classification: flag.classification,
            speed_kmh: flag.speed_kmh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResponse {
    pub subject_id: String,
    pub flags: Vec<FlagRecord>,
    pub summary: AnomalySummary,
}

/// Error body returned to callers; only validation failures are user-facing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Envelope for every reply published by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReply<T> {
    pub response_id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ServiceReply<T> {
    pub fn success(result: T) -> Self {
        Self {
            response_id: Uuid::new_v4(),
            ok: true,
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn rejected(error: &ValidationError) -> Self {
        Self {
            response_id: Uuid::new_v4(),
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: "validation".to_string(),
                message: error.to_string(),
            }),
            timestamp: Utc::now(),
        }
    }
}
