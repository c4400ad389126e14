//! Geo Risk Engine Library
//!
//! Location risk scoring, movement anomaly detection and batch pattern
//! analysis over a copy-on-write profile snapshot, served over NATS.

pub mod config;
pub mod consumer;
pub mod error;
pub mod feature_extractor;
pub mod geo;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod snapshot;
pub mod types;

pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{RecomputeError, ValidationError};
pub use feature_extractor::FeatureExtractor;
pub use models::engine::AnalyticsEngine;
pub use producer::ResponsePublisher;
pub use snapshot::{Snapshot, SnapshotStore};
pub use types::{Observation, ProfileSet, RiskAssessment};
