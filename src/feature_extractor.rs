//! Movement feature extraction.
//!
//! Turns an ordered observation sequence into per-step features shared by the
//! anomaly detector (live sequences) and the pattern analyzer (history).

use crate::geo::{haversine_km, initial_bearing_deg};
use crate::types::observation::Observation;
use chrono::Timelike;

/// Derived features of one observation relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementStep {
    /// Position in the input sequence
    pub index: usize,
    /// Great-circle distance from the previous observation
    pub distance_km: f64,
    /// Seconds since the previous observation (0 for the first)
    pub interval_secs: f64,
    /// Implied speed; `None` for the first observation
    pub implied_speed_kmh: Option<f64>,
    /// Device-reported speed when positive, otherwise the implied speed
    pub speed_kmh: Option<f64>,
    /// Device heading when reported, otherwise the great-circle bearing
    /// from the previous observation
    pub bearing_deg: Option<f64>,
    /// UTC hour of the observation
    pub hour: u32,
}

/// Extracts movement features from observation sequences.
pub struct FeatureExtractor {
    /// Floor applied to intervals before dividing
    min_interval_secs: f64,
}

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new(min_interval_secs: f64) -> Self {
        Self {
            min_interval_secs: min_interval_secs.max(f64::EPSILON),
        }
    }

    /// Features of `current` given its predecessor.
    pub fn step(
        &self,
        index: usize,
        previous: Option<&Observation>,
        current: &Observation,
    ) -> MovementStep {
        let hour = current.timestamp.hour();
        let reported_speed = current.speed_kmh.filter(|&s| s > 0.0);

        let Some(prev) = previous else {
            return MovementStep {
                index,
                distance_km: 0.0,
                interval_secs: 0.0,
                implied_speed_kmh: None,
                speed_kmh: None,
                bearing_deg: current.heading_deg,
                hour,
            };
        };

        let distance_km = haversine_km(
            prev.latitude,
            prev.longitude,
            current.latitude,
            current.longitude,
        );
        let interval_secs =
            (current.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        let effective = interval_secs.max(self.min_interval_secs);
        let implied = distance_km / effective * 3600.0;
        let bearing = current.heading_deg.unwrap_or_else(|| {
            initial_bearing_deg(
                prev.latitude,
                prev.longitude,
                current.latitude,
                current.longitude,
            )
        });

        MovementStep {
            index,
            distance_km,
            interval_secs,
            implied_speed_kmh: Some(implied),
            speed_kmh: Some(reported_speed.unwrap_or(implied)),
            bearing_deg: Some(bearing),
            hour,
        }
    }

    /// Extract features for a whole sequence, in input order.
    pub fn extract(&self, observations: &[Observation]) -> Vec<MovementStep> {
        observations
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let prev = i.checked_sub(1).map(|p| &observations[p]);
                self.step(i, prev, obs)
            })
            .collect()
    }

    /// Step speeds over steps with a positive interval.
    pub fn speeds(&self, observations: &[Observation]) -> Vec<f64> {
        self.extract(observations)
            .into_iter()
            .filter(|s| s.interval_secs > 0.0)
            .filter_map(|s| s.speed_kmh)
            .collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn obs(lat: f64, lon: f64, offset_secs: i64) -> Observation {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        Observation::new("u1", lat, lon, t0 + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_first_step_has_no_speed() {
        let extractor = FeatureExtractor::default();
        let steps = extractor.extract(&[obs(20.30, 85.82, 0)]);

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].implied_speed_kmh, None);
        assert_eq!(steps[0].speed_kmh, None);
        assert_eq!(steps[0].bearing_deg, None);
        assert_eq!(steps[0].hour, 9);
    }

    #[test]
    fn test_reported_readings_take_precedence() {
        let extractor = FeatureExtractor::default();
        let mut moving = obs(20.31, 85.82, 60);
        moving.speed_kmh = Some(42.0);
        moving.heading_deg = Some(270.0);
        let mut stopped = obs(20.32, 85.82, 120);
        stopped.speed_kmh = Some(0.0);

        let steps = extractor.extract(&[obs(20.30, 85.82, 0), moving.clone(), stopped]);

        assert_eq!(steps[1].speed_kmh, Some(42.0));
        assert_eq!(steps[1].bearing_deg, Some(270.0));
        // A zero reading falls back to the implied speed and bearing
        assert_eq!(steps[2].speed_kmh, steps[2].implied_speed_kmh);
        assert!(steps[2].bearing_deg.unwrap().abs() < 1e-6);
        assert_eq!(extractor.speeds(&[obs(20.30, 85.82, 0), moving]), vec![42.0]);
    }

    #[test]
    fn test_implied_speed() {
        let extractor = FeatureExtractor::default();
        let steps = extractor.extract(&[
            obs(20.30, 85.82, 0),
            obs(20.30, 85.82, 60),
            obs(20.90, 85.82, 61),
        ]);

        assert_eq!(steps[1].implied_speed_kmh, Some(0.0));
        let speed = steps[2].implied_speed_kmh.unwrap();
        assert!(speed > 200_000.0);
        assert_eq!(steps[2].interval_secs, 1.0);
    }

    #[test]
    fn test_zero_interval_is_floored() {
        let extractor = FeatureExtractor::new(2.0);
        let steps = extractor.extract(&[obs(20.30, 85.82, 0), obs(20.31, 85.82, 0)]);

        let expected = steps[1].distance_km / 2.0 * 3600.0;
        assert!((steps[1].implied_speed_kmh.unwrap() - expected).abs() < 1e-9);
        // Not counted as a historical speed sample
        assert!(extractor
            .speeds(&[obs(20.30, 85.82, 0), obs(20.31, 85.82, 0)])
            .is_empty());
    }
}
