//! Risk assessment data structures

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Categorical time of day (UTC hours)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    /// 00:00 - 04:59
    LateNight,
    /// 05:00 - 11:59
    Morning,
    /// 12:00 - 16:59
    #[serde(alias = "day")]
    Afternoon,
    /// 17:00 - 20:59
    Evening,
    /// 21:00 - 23:59
    Night,
}

impl TimeBucket {
    pub const ALL: [TimeBucket; 5] = [
        TimeBucket::LateNight,
        TimeBucket::Morning,
        TimeBucket::Afternoon,
        TimeBucket::Evening,
        TimeBucket::Night,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=4 => TimeBucket::LateNight,
            5..=11 => TimeBucket::Morning,
            12..=16 => TimeBucket::Afternoon,
            17..=20 => TimeBucket::Evening,
            _ => TimeBucket::Night,
        }
    }

    pub fn hours(&self) -> RangeInclusive<u32> {
        match self {
            TimeBucket::LateNight => 0..=4,
            TimeBucket::Morning => 5..=11,
            TimeBucket::Afternoon => 12..=16,
            TimeBucket::Evening => 17..=20,
            TimeBucket::Night => 21..=23,
        }
    }

    pub fn hour_count(&self) -> u32 {
        let range = self.hours();
        range.end() - range.start() + 1
    }

    /// Prior incident density relative to a uniform day, used when the
    /// bucket has little history of its own.
    pub fn prior_ratio(&self) -> f64 {
        match self {
            TimeBucket::LateNight => 1.5,
            TimeBucket::Morning => 0.8,
            TimeBucket::Afternoon => 0.9,
            TimeBucket::Evening => 1.1,
            TimeBucket::Night => 1.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::LateNight => "late_night",
            TimeBucket::Morning => "morning",
            TimeBucket::Afternoon => "afternoon",
            TimeBucket::Evening => "evening",
            TimeBucket::Night => "night",
        }
    }
}

/// Time information attached to a risk request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeContext {
    At(DateTime<Utc>),
    Bucket(TimeBucket),
}

impl TimeContext {
    pub fn bucket(&self) -> TimeBucket {
        match self {
            TimeContext::At(ts) => TimeBucket::from_hour(ts.hour()),
            TimeContext::Bucket(bucket) => *bucket,
        }
    }
}

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Advice handed back to travellers at this level
    pub fn recommendations(&self) -> Vec<String> {
        let advice: &[&str] = match self {
            RiskLevel::Low => &[
                "Maintain normal safety awareness",
                "Keep emergency contacts updated",
            ],
            RiskLevel::Moderate => &[
                "Stay alert",
                "Share your location with trusted contacts",
                "Avoid isolated areas",
            ],
            RiskLevel::High => &[
                "Consider alternative routes",
                "Travel in groups if possible",
                "Inform others of your plans",
            ],
            RiskLevel::Critical => &[
                "Strongly consider avoiding this area",
                "Use alternative transportation",
                "Contact local authorities if necessary",
            ],
        };
        advice.iter().map(|s| s.to_string()).collect()
    }
}

/// Configurable risk level thresholds (lower bounds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLevelThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.25,
            high: 0.5,
            critical: 0.75,
        }
    }
}

/// Uncertainty band around a risk score, serialized as `[low, high]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

impl From<[f64; 2]> for ConfidenceInterval {
    fn from([low, high]: [f64; 2]) -> Self {
        Self { low, high }
    }
}

impl From<ConfidenceInterval> for [f64; 2] {
    fn from(ci: ConfidenceInterval) -> Self {
        [ci.low, ci.high]
    }
}

/// Result of scoring one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Blended risk score (0.0 - 1.0)
    pub score: f64,
    pub confidence_interval: ConfidenceInterval,
    /// Contribution of each factor to the score
    pub contributing_factors: BTreeMap<String, f64>,
    pub risk_level: RiskLevel,
    pub recommendations: Vec<String>,
}

/// Result of scoring a route: the blended assessment plus its inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteAssessment {
    #[serde(flatten)]
    pub assessment: RiskAssessment,
    /// Scores of start, waypoints and end, in route order
    pub point_scores: Vec<f64>,
    /// Great-circle distance from start to end
    pub distance_km: f64,
    /// Multiplier for route length and stop count
    pub route_modifier: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(0.1, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3, &thresholds), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.6, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.9, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_bucket_hours_cover_the_day() {
        let total: u32 = TimeBucket::ALL.iter().map(|b| b.hour_count()).sum();
        assert_eq!(total, 24);
        for hour in 0..24 {
            assert!(TimeBucket::from_hour(hour).hours().contains(&hour));
        }
    }

    #[test]
    fn test_time_context_bucket() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 3, 30, 0).unwrap();
        assert_eq!(TimeContext::At(ts).bucket(), TimeBucket::LateNight);
        assert_eq!(
            TimeContext::Bucket(TimeBucket::Evening).bucket(),
            TimeBucket::Evening
        );
    }

    #[test]
    fn test_confidence_interval_wire_format() {
        let ci = ConfidenceInterval {
            low: 0.25,
            high: 0.5,
        };
        assert_eq!(serde_json::to_string(&ci).unwrap(), "[0.25,0.5]");
        let back: ConfidenceInterval = serde_json::from_str("[0.25,0.5]").unwrap();
        assert_eq!(back, ci);
    }

    #[test]
    fn test_bucket_alias() {
        let bucket: TimeBucket = serde_json::from_str("\"day\"").unwrap();
        assert_eq!(bucket, TimeBucket::Afternoon);
    }
}
