//! Configuration management for the geo risk engine

use crate::types::assessment::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub pattern: PatternConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for location risk requests
    pub risk_subject: String,
    /// Subject for route risk requests
    pub route_subject: String,
    /// Subject for anomaly detection requests
    pub anomaly_subject: String,
    /// Subject for area pattern analysis requests
    pub area_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            risk_subject: "risk.predict".to_string(),
            route_subject: "risk.route".to_string(),
            anomaly_subject: "anomaly.detect".to_string(),
            area_subject: "patterns.analyze".to_string(),
        }
    }
}

/// Where profile sets and archives live on disk
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Serialized profile set loaded at startup and rewritten after each recompute
    pub profiles_path: String,
    /// JSON-lines historical export read by the pattern analyzer
    pub archive_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            profiles_path: "data/profiles.json".to_string(),
            archive_path: "data/archive.jsonl".to_string(),
        }
    }
}

/// Risk scorer tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Number of nearest hotspots blended into the geographic prior
    pub nearest_hotspots: usize,
    /// Distance (beyond a hotspot edge) at which its weight falls to 1/4
    pub distance_scale_km: f64,
    /// Geographic prior used where no hotspot is near
    pub base_prior: f64,
    pub geographic_weight: f64,
    pub temporal_weight: f64,
    /// Pseudo-count pulling sparse time buckets toward their prior ratio
    pub temporal_prior_strength: f64,
    /// Interval half-width when there is no supporting data at all
    pub max_half_width: f64,
    /// Bound on any profile-based adjustment
    pub max_profile_adjustment: f64,
    /// Additive adjustment per user profile tag, matched case-insensitively
    pub profile_adjustments: HashMap<String, f64>,
    pub risk_levels: RiskLevelThresholds,
    /// Route length over which `route_distance_increment` is added
    pub route_distance_step_km: f64,
    pub route_distance_increment: f64,
    /// Added to the route modifier per waypoint
    pub route_waypoint_increment: f64,
    pub max_route_modifier: f64,
    /// Area radius used when a request gives none
    pub default_area_radius_km: f64,
    /// Incident count above which an area is reported as high density
    pub high_density_incidents: usize,
    /// Share of an area's incidents one kind needs to be reported as predominant
    pub predominant_share: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            nearest_hotspots: 3,
            distance_scale_km: 1.0,
            base_prior: 0.2,
            geographic_weight: 0.7,
            temporal_weight: 0.3,
            temporal_prior_strength: 10.0,
            max_half_width: 0.5,
            max_profile_adjustment: 0.1,
            profile_adjustments: HashMap::new(),
            risk_levels: RiskLevelThresholds::default(),
            route_distance_step_km: 100.0,
            route_distance_increment: 0.1,
            route_waypoint_increment: 0.05,
            max_route_modifier: 1.5,
            default_area_radius_km: 5.0,
            high_density_incidents: 20,
            predominant_share: 0.4,
        }
    }
}

/// Anomaly detector tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Minimum combined score for an observation to be flagged
    pub flag_threshold: f64,
    /// Speeds above this are anomalous for anyone
    pub implausible_speed_kmh: f64,
    /// Standard deviations above the typical speed before scoring starts
    pub z_threshold: f64,
    /// Standard deviations over the threshold per e-fold of the speed score
    pub z_scale: f64,
    /// Floor on the baseline standard deviation
    pub min_speed_std_kmh: f64,
    /// Distance beyond a cluster edge per e-fold of the location score
    pub location_scale_km: f64,
    /// Hour probability under which activity counts as unusual
    pub rare_hour_probability: f64,
    /// Samples a subject profile needs before it replaces the population baseline
    pub min_profile_samples: usize,
    /// Floor on the interval between observations when computing speed
    pub min_interval_secs: f64,
    /// Multiple of the baseline p99 beyond which a speed is unusual
    pub unusual_speed_factor: f64,
    /// Speed score floor for unusual speeds
    pub unusual_speed_score: f64,
    /// Change from the previous step speed that counts as a sudden jump
    pub speed_jump_kmh: f64,
    /// Speed score floor for sudden jumps
    pub speed_jump_score: f64,
    /// Moves shorter than this carry no direction for erratic-movement checks
    pub erratic_min_move_m: f64,
    /// Direction change that counts as a turn
    pub erratic_turn_deg: f64,
    /// Fraction of turns above which a sequence is erratic
    pub erratic_ratio: f64,
    /// Confidence reported for an erratic sequence
    pub erratic_score: f64,
    pub speed_weight: f64,
    pub location_weight: f64,
    pub time_weight: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            flag_threshold: 0.7,
            implausible_speed_kmh: 200.0,
            z_threshold: 3.0,
            z_scale: 2.0,
            min_speed_std_kmh: 5.0,
            location_scale_km: 10.0,
            rare_hour_probability: 0.01,
            min_profile_samples: 10,
            min_interval_secs: 1.0,
            unusual_speed_factor: 1.5,
            unusual_speed_score: 0.8,
            speed_jump_kmh: 50.0,
            speed_jump_score: 0.7,
            erratic_min_move_m: 10.0,
            erratic_turn_deg: 90.0,
            erratic_ratio: 0.7,
            erratic_score: 0.6,
            speed_weight: 1.0,
            location_weight: 0.9,
            time_weight: 0.75,
        }
    }
}

/// Pattern analyzer tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Neighbourhood radius for movement clustering
    pub cluster_radius_km: f64,
    /// Points needed to form a movement cluster
    pub min_cluster_points: usize,
    /// Smallest radius reported for a cluster
    pub min_cluster_radius_km: f64,
    /// Speeds above this are discarded before fitting
    pub speed_ceiling_kmh: f64,
    /// Abort the run when more than this fraction of records is unusable
    pub max_skipped_fraction: f64,
    /// Neighbourhood radius for incident hotspots
    pub hotspot_radius_km: f64,
    pub min_incidents_for_hotspot: usize,
    pub max_hotspots: usize,
    /// Days over which incident weight decays to its floor
    pub recency_decay_days: f64,
    /// Risk weight at which hotspot intensity reaches 1 - 1/e
    pub intensity_saturation: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            cluster_radius_km: 0.1,
            min_cluster_points: 3,
            min_cluster_radius_km: 0.1,
            speed_ceiling_kmh: 300.0,
            max_skipped_fraction: 0.1,
            hotspot_radius_km: 0.5,
            min_incidents_for_hotspot: 5,
            max_hotspots: 50,
            recency_decay_days: 30.0,
            intensity_saturation: 20.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum requests processed concurrently
    pub workers: usize,
    /// Seconds between pattern recomputations (0 disables)
    pub recompute_interval_secs: u64,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            recompute_interval_secs: 3600,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, then apply `GEORISK__*`
    /// environment overrides (e.g. `GEORISK__NATS__URL`).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("GEORISK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
