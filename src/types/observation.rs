//! Raw historical records consumed by the analysis core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single recorded position of a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Subject the position belongs to
    pub subject_id: String,

    /// Latitude in degrees
    #[serde(alias = "lat")]
    pub latitude: f64,

    /// Longitude in degrees
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,

    /// Time of the fix
    pub timestamp: DateTime<Utc>,

    /// Device-reported speed in km/h
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,

    /// Device-reported heading in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
}

impl Observation {
    /// Create an observation without device speed/heading
    pub fn new(subject_id: &str, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            latitude,
            longitude,
            timestamp,
            speed_kmh: None,
            heading_deg: None,
        }
    }

    /// Coordinates valid and optional readings finite.
    pub fn is_well_formed(&self) -> bool {
        crate::geo::is_valid_coordinate(self.latitude, self.longitude)
            && self.speed_kmh.map_or(true, f64::is_finite)
            && self.heading_deg.map_or(true, f64::is_finite)
            && !self.subject_id.is_empty()
    }
}

/// Incident categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Crime,
    Accident,
    Medical,
    Fire,
    PanicAlert,
    #[serde(other)]
    Other,
}

impl IncidentKind {
    /// Relative weight of the incident type in risk priors
    pub fn weight(&self) -> f64 {
        match self {
            IncidentKind::Crime => 3.0,
            IncidentKind::PanicAlert => 3.0,
            IncidentKind::Fire => 2.5,
            IncidentKind::Accident => 2.0,
            IncidentKind::Medical => 1.5,
            IncidentKind::Other => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentKind::Crime => "crime",
            IncidentKind::Accident => "accident",
            IncidentKind::Medical => "medical",
            IncidentKind::Fire => "fire",
            IncidentKind::PanicAlert => "panic_alert",
            IncidentKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Severity::Low => 0.5,
            Severity::Medium => 1.0,
            Severity::High => 1.5,
            Severity::Critical => 2.0,
        }
    }
}

/// A historical incident or panic alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: IncidentKind,
    #[serde(default)]
    pub severity: Severity,
}

impl IncidentRecord {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        kind: IncidentKind,
        severity: Severity,
    ) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            kind,
            severity,
        }
    }

    /// Type weight times severity multiplier
    pub fn base_weight(&self) -> f64 {
        self.kind.weight() * self.severity.multiplier()
    }
}

/// One line of a bulk historical export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArchiveRecord {
    Observation(Observation),
    Incident(IncidentRecord),
}

/// Bulk historical export handed to the pattern analyzer.
#[derive(Debug, Clone, Default)]
pub struct ObservationArchive {
    pub observations: Vec<Observation>,
    pub incidents: Vec<IncidentRecord>,
    /// Records that could not be decoded at all
    pub rejected_records: usize,
}

impl ObservationArchive {
    pub fn new(observations: Vec<Observation>, incidents: Vec<IncidentRecord>) -> Self {
        Self {
            observations,
            incidents,
            rejected_records: 0,
        }
    }

    /// Add a decoded record
    pub fn push(&mut self, record: ArchiveRecord) {
        match record {
            ArchiveRecord::Observation(obs) => self.observations.push(obs),
            ArchiveRecord::Incident(incident) => self.incidents.push(incident),
        }
    }

    /// Every record seen, including undecodable ones
    pub fn total_records(&self) -> usize {
        self.observations.len() + self.incidents.len() + self.rejected_records
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}
