//! Actionable insights attached to area analyses

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Hotspot,
    Temporal,
    Trend,
    IncidentPattern,
    Safety,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Hotspot => "hotspot",
            InsightKind::Temporal => "temporal",
            InsightKind::Trend => "trend",
            InsightKind::IncidentPattern => "incident_pattern",
            InsightKind::Safety => "safety",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Medium,
    High,
}

/// One observation about an area plus what to do about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub severity: InsightSeverity,
    pub message: String,
    pub recommendation: String,
}

impl Insight {
    pub fn new(
        kind: InsightKind,
        severity: InsightSeverity,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            recommendation: recommendation.into(),
        }
    }
}
