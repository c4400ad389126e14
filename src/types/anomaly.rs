//! Anomaly flag data structures

use serde::{Deserialize, Serialize};

/// Dominant reason an observation was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyClass {
    Speed,
    Location,
    Time,
    Combined,
    /// Sequence-level: frequent sharp direction changes
    Erratic,
}

impl AnomalyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyClass::Speed => "speed",
            AnomalyClass::Location => "location",
            AnomalyClass::Time => "time",
            AnomalyClass::Combined => "combined",
            AnomalyClass::Erratic => "erratic",
        }
    }
}

/// Per-factor scores behind a flag, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub speed: f64,
    pub location: f64,
    pub time: f64,
}

/// An observation that deviates from the subject's baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub subject_id: String,
    /// Position of the observation in the submitted sequence
    pub observation_index: usize,
    pub anomaly_score: f64,
    pub classification: AnomalyClass,
    pub sub_scores: SubScores,
    /// Implied speed from the previous observation, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implied_speed_kmh: Option<f64>,
    /// Speed the step was scored with: device-reported when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
}

/// Direction changes over a whole sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementPattern {
    /// Moves long enough to carry a direction
    pub directions: usize,
    /// Consecutive directions differing by more than the turn angle
    pub sharp_turns: usize,
    pub erratic: bool,
}

/// Whole-sequence verdict in the shape the service layer reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub is_anomaly: bool,
    /// Highest anomaly score among the flags, 0 when none
    pub confidence: f64,
    pub dominant: Option<AnomalyClass>,
    pub flagged: usize,
    pub evaluated: usize,
    #[serde(default)]
    pub erratic_movement: bool,
}

impl AnomalySummary {
    /// Fold flags of a sequence of `evaluated` observations; the strongest
    /// flag (earliest on ties) sets confidence and dominant class.
    pub fn from_flags(flags: &[AnomalyFlag], evaluated: usize) -> Self {
        let mut strongest: Option<&AnomalyFlag> = None;
        for flag in flags {
            if strongest.map_or(true, |s| flag.anomaly_score > s.anomaly_score) {
                strongest = Some(flag);
            }
        }

        Self {
            is_anomaly: !flags.is_empty(),
            confidence: strongest.map_or(0.0, |f| f.anomaly_score),
            dominant: strongest.map(|f| f.classification),
            flagged: flags.len(),
            evaluated,
            erratic_movement: false,
        }
    }

    /// Fold in the sequence-level movement verdict. An erratic sequence is
    /// anomalous with at least `erratic_score` confidence; it is the
    /// dominant class only when no observation was flagged.
    pub fn with_movement(mut self, pattern: &MovementPattern, erratic_score: f64) -> Self {
        if pattern.erratic {
            self.erratic_movement = true;
            self.is_anomaly = true;
            self.confidence = self.confidence.max(erratic_score.clamp(0.0, 1.0));
            if self.dominant.is_none() {
                self.dominant = Some(AnomalyClass::Erratic);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_serialization() {
        let flag = AnomalyFlag {
            subject_id: "u1".to_string(),
            observation_index: 2,
            anomaly_score: 1.0,
            classification: AnomalyClass::Speed,
            sub_scores: SubScores {
                speed: 1.0,
                ..SubScores::default()
            },
            implied_speed_kmh: None,
            speed_kmh: None,
        };

        let json = serde_json::to_value(&flag).unwrap();
        assert_eq!(json["classification"], "speed");
        assert!(json.get("implied_speed_kmh").is_none());
    }

    #[test]
    fn test_summary_from_flags() {
        let flag = |index: usize, score: f64, classification: AnomalyClass| AnomalyFlag {
            subject_id: "u1".to_string(),
            observation_index: index,
            anomaly_score: score,
            classification,
            sub_scores: SubScores::default(),
            implied_speed_kmh: None,
            speed_kmh: None,
        };
        let flags = vec![
            flag(1, 0.8, AnomalyClass::Time),
            flag(3, 0.95, AnomalyClass::Location),
            flag(4, 0.95, AnomalyClass::Speed),
        ];

        let summary = AnomalySummary::from_flags(&flags, 6);
        assert!(summary.is_anomaly);
        assert_eq!(summary.confidence, 0.95);
        assert_eq!(summary.dominant, Some(AnomalyClass::Location));
        assert_eq!(summary.flagged, 3);

        let quiet = AnomalySummary::from_flags(&[], 6);
        assert!(!quiet.is_anomaly);
        assert_eq!(quiet.dominant, None);
        assert_eq!(quiet.evaluated, 6);
    }

    #[test]
    fn test_summary_with_erratic_movement() {
        let erratic = MovementPattern {
            directions: 6,
            sharp_turns: 5,
            erratic: true,
        };

        let quiet = AnomalySummary::from_flags(&[], 7).with_movement(&erratic, 0.6);
        assert!(quiet.is_anomaly);
        assert!(quiet.erratic_movement);
        assert_eq!(quiet.confidence, 0.6);
        assert_eq!(quiet.dominant, Some(AnomalyClass::Erratic));
        assert_eq!(quiet.flagged, 0);

        let steady =
            AnomalySummary::from_flags(&[], 7).with_movement(&MovementPattern::default(), 0.6);
        assert!(!steady.is_anomaly);
        assert!(!steady.erratic_movement);
    }
}
