//! Error types for the analysis core

use thiserror::Error;

/// Input rejected at the boundary. Never retried internally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Latitude/longitude out of range or not finite.
    #[error("invalid coordinates at index {index}: ({latitude}, {longitude})")]
    InvalidCoordinates {
        index: usize,
        latitude: f64,
        longitude: f64,
    },

    /// An observation sequence with no elements.
    #[error("observation sequence is empty")]
    EmptySequence,

    /// A timestamp earlier than its predecessor.
    #[error("observation {index} is earlier than its predecessor")]
    OutOfOrder { index: usize },

    /// An observation recorded for a different subject.
    #[error("observation {index} belongs to subject '{found}', expected '{expected}'")]
    SubjectMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// Area radius not a positive finite number of kilometres.
    #[error("invalid area radius {radius_km} km")]
    InvalidRadius { radius_km: f64 },

    /// Neither a timestamp nor a time-of-day bucket was supplied.
    #[error("request needs either time_of_day or timestamp")]
    MissingTimeContext,

    /// Both a timestamp and a time-of-day bucket were supplied.
    #[error("request must not carry both time_of_day and timestamp")]
    AmbiguousTimeContext,

    /// Serialized profile set written by an incompatible schema.
    #[error("unsupported profile schema version {found} (expected {expected})")]
    UnsupportedProfileVersion { found: u32, expected: u32 },

    /// Payload could not be decoded into a request record.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl ValidationError {
    /// Coordinate error for a single location (index 0).
    pub fn coordinates(latitude: f64, longitude: f64) -> Self {
        Self::InvalidCoordinates {
            index: 0,
            latitude,
            longitude,
        }
    }
}

/// Failures of a pattern recomputation batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecomputeError {
    /// Too many archive records were unusable to trust the result.
    #[error("skipped {skipped} of {total} archive records, above the {threshold} fraction limit")]
    TooManyCorruptRecords {
        skipped: usize,
        total: usize,
        threshold: f64,
    },

    /// The run was stopped between subjects; nothing was published.
    #[error("recomputation interrupted after {completed_subjects} subjects")]
    Interrupted { completed_subjects: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_message() {
        let err = ValidationError::OutOfOrder { index: 3 };
        assert_eq!(
            err.to_string(),
            "observation 3 is earlier than its predecessor"
        );
    }

    #[test]
    fn test_corrupt_records_message() {
        let err = RecomputeError::TooManyCorruptRecords {
            skipped: 30,
            total: 100,
            threshold: 0.2,
        };
        assert_eq!(
            err.to_string(),
            "skipped 30 of 100 archive records, above the 0.2 fraction limit"
        );
    }
}
