//! Type definitions for the analysis core

pub mod anomaly;
pub mod assessment;
pub mod insight;
pub mod observation;
pub mod profile;
pub mod request;

pub use anomaly::{AnomalyClass, AnomalyFlag, AnomalySummary, SubScores};
pub use assessment::{
    ConfidenceInterval, RiskAssessment, RiskLevel, RiskLevelThresholds, RouteAssessment,
    TimeBucket, TimeContext,
};
pub use insight::{Insight, InsightKind, InsightSeverity};
pub use observation::{
    ArchiveRecord, IncidentKind, IncidentRecord, Observation, ObservationArchive, Severity,
};
pub use profile::{
    GeoCluster, Hotspot, IncidentProfile, PatternProfile, ProfileSet, SpeedStats, TimeHistogram,
    TrendDirection, PROFILE_SCHEMA_VERSION,
};
