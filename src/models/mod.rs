//! Risk scoring, anomaly detection and pattern analysis

pub mod aggregator;
pub mod anomaly;
pub mod engine;
pub mod insight;
pub mod loader;
pub mod pattern;
pub mod risk;

pub use aggregator::ScoreAggregator;
pub use anomaly::{AnomalyDetector, BaselineSource, Detection};
pub use engine::{AnalyticsEngine, Published};
pub use insight::{AreaFacts, InsightGenerator};
pub use loader::ProfileLoader;
pub use pattern::{PatternAnalyzer, Recomputation};
pub use risk::{AreaSummary, RiskScorer};
