//! Movement anomaly detection against subject and population baselines.
//!
//! Input is validated eagerly in [`AnomalyDetector::detect`]; evaluation is
//! lazy. The returned [`Detection`] can be iterated any number of times and
//! always yields the same flags in input order. Erratic movement is a
//! property of the whole sequence and is reported through
//! [`Detection::movement_pattern`] rather than as a per-observation flag.

use crate::config::AnomalyConfig;
use crate::error::ValidationError;
use crate::feature_extractor::{FeatureExtractor, MovementStep};
use crate::geo::{bearing_change_deg, validate_coordinate};
use crate::models::aggregator::ScoreAggregator;
use crate::types::anomaly::{
    AnomalyClass, AnomalyFlag, AnomalySummary, MovementPattern, SubScores,
};
use crate::types::assessment::TimeBucket;
use crate::types::observation::Observation;
use crate::types::profile::{PatternProfile, ProfileSet, SpeedStats};
use std::collections::BTreeMap;
use tracing::debug;

const SPEED: &str = "speed";
const LOCATION: &str = "location";
const TIME: &str = "time";

/// Where the speed baseline of a detection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    Subject,
    Population,
    /// Built-in generic baseline; no history available at all
    Default,
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    extractor: FeatureExtractor,
    aggregator: ScoreAggregator,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        let extractor = FeatureExtractor::new(config.min_interval_secs);
        let aggregator = ScoreAggregator::new([
            (SPEED, config.speed_weight),
            (LOCATION, config.location_weight),
            (TIME, config.time_weight),
        ]);
        Self {
            config,
            extractor,
            aggregator,
        }
    }

    /// Validate a sequence and prepare its lazy evaluation.
    ///
    /// Out-of-order input is rejected rather than reordered; equal
    /// timestamps are accepted.
    pub fn detect<'a>(
        &'a self,
        subject_id: &'a str,
        observations: &'a [Observation],
        snapshot: &'a ProfileSet,
    ) -> Result<Detection<'a>, ValidationError> {
        validate_sequence(subject_id, observations)?;

        let min_samples = self.config.min_profile_samples;
        let personal = snapshot.subject(subject_id);

        let (speed, source) = match personal {
            Some(p) if p.speed.samples >= min_samples => (p.speed.clone(), BaselineSource::Subject),
            _ if snapshot.population.speed.samples >= min_samples => (
                snapshot.population.speed.clone(),
                BaselineSource::Population,
            ),
            _ => (SpeedStats::default_baseline(), BaselineSource::Default),
        };

        debug!(
            subject_id = %subject_id,
            observations = observations.len(),
            baseline = ?source,
            has_profile = personal.is_some(),
            generation = snapshot.generation,
            "Anomaly detection prepared"
        );

        Ok(Detection {
            detector: self,
            subject_id,
            observations,
            personal,
            speed,
            source,
        })
    }

    /// Speed score of `step`; `previous` is the step before it, used for
    /// sudden changes of pace.
    fn speed_score(
        &self,
        step: &MovementStep,
        previous: Option<&MovementStep>,
        baseline: &SpeedStats,
    ) -> f64 {
        let Some(speed) = step.speed_kmh else {
            return 0.0;
        };
        let fastest = step.implied_speed_kmh.map_or(speed, |implied| implied.max(speed));
        if fastest > self.config.implausible_speed_kmh {
            return 1.0;
        }

        let mut score: f64 = 0.0;
        let std = baseline.std_kmh.max(self.config.min_speed_std_kmh).max(f64::EPSILON);
        let z = (speed - baseline.mean_kmh) / std;
        if z > self.config.z_threshold && speed > baseline.p95_kmh {
            let scale = self.config.z_scale.max(f64::EPSILON);
            score = 1.0 - (-(z - self.config.z_threshold) / scale).exp();
            if speed > baseline.p99_kmh * self.config.unusual_speed_factor {
                score = score.max(self.config.unusual_speed_score);
            }
        }

        if let Some(before) = previous.and_then(|p| p.speed_kmh) {
            if (speed - before).abs() > self.config.speed_jump_kmh {
                score = score.max(self.config.speed_jump_score);
            }
        }
        score.clamp(0.0, 1.0)
    }

    /// Share of sharp turns between consecutive directions of travel.
    fn movement_pattern(&self, steps: &[MovementStep]) -> MovementPattern {
        if steps.len() < 3 {
            return MovementPattern::default();
        }

        let min_move_km = self.config.erratic_min_move_m / 1000.0;
        let directions: Vec<f64> = steps
            .iter()
            .filter(|s| s.distance_km > min_move_km)
            .filter_map(|s| s.bearing_deg)
            .collect();

        let sharp_turns = directions
            .windows(2)
            .filter(|pair| bearing_change_deg(pair[0], pair[1]) > self.config.erratic_turn_deg)
            .count();
        let erratic = directions.len() >= 3
            && sharp_turns as f64 / (directions.len() - 1) as f64 > self.config.erratic_ratio;

        MovementPattern {
            directions: directions.len(),
            sharp_turns,
            erratic,
        }
    }

    fn location_score(&self, obs: &Observation, profile: Option<&PatternProfile>) -> f64 {
        let Some((_, excess)) = profile.and_then(|p| p.nearest_cluster(obs.latitude, obs.longitude))
        else {
            return 0.0;
        };
        if excess > 0.0 {
            let scale = self.config.location_scale_km.max(f64::EPSILON);
            1.0 - (-excess / scale).exp()
        } else {
            0.0
        }
    }

    fn time_score(&self, step: &MovementStep, profile: Option<&PatternProfile>) -> f64 {
        let Some(profile) = profile else {
            return 0.0;
        };
        if (profile.activity.samples as usize) < self.config.min_profile_samples {
            return 0.0;
        }

        let rare = self.config.rare_hour_probability;
        let presence = profile
            .activity
            .bucket_probability(TimeBucket::from_hour(step.hour));
        if rare > 0.0 && presence < rare {
            1.0 - presence / rare
        } else {
            0.0
        }
    }

    fn classify(&self, scores: &BTreeMap<String, f64>) -> AnomalyClass {
        if self
            .aggregator
            .count_at_least(scores, self.config.flag_threshold)
            >= 2
        {
            return AnomalyClass::Combined;
        }
        match self.aggregator.dominant(scores) {
            Some((name, _)) if name == LOCATION => AnomalyClass::Location,
            Some((name, _)) if name == TIME => AnomalyClass::Time,
            _ => AnomalyClass::Speed,
        }
    }
}

fn validate_sequence(subject_id: &str, observations: &[Observation]) -> Result<(), ValidationError> {
    if observations.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (i, obs) in observations.iter().enumerate() {
        validate_coordinate(i, obs.latitude, obs.longitude)?;
        if obs.subject_id != subject_id {
            return Err(ValidationError::SubjectMismatch {
                index: i,
                expected: subject_id.to_string(),
                found: obs.subject_id.clone(),
            });
        }
        if i > 0 && obs.timestamp < observations[i - 1].timestamp {
            return Err(ValidationError::OutOfOrder { index: i });
        }
    }
    Ok(())
}

/// A validated sequence ready for evaluation
pub struct Detection<'a> {
    detector: &'a AnomalyDetector,
    subject_id: &'a str,
    observations: &'a [Observation],
    /// Subject profile; `None` for subjects without history
    personal: Option<&'a PatternProfile>,
    speed: SpeedStats,
    source: BaselineSource,
}

impl<'a> Detection<'a> {
    /// Iterate the flags from the start of the sequence.
    pub fn iter(&self) -> Flags<'_, 'a> {
        Flags {
            detection: self,
            next: 0,
        }
    }

    pub fn baseline_source(&self) -> BaselineSource {
        self.source
    }

    pub fn subject_id(&self) -> &str {
        self.subject_id
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Whole-sequence verdict: anomalous if any observation is flagged or
    /// the movement is erratic.
    pub fn summary(&self) -> AnomalySummary {
        let flags: Vec<AnomalyFlag> = self.iter().collect();
        self.summarize(&flags)
    }

    /// Summary over flags already collected from this detection.
    pub fn summarize(&self, flags: &[AnomalyFlag]) -> AnomalySummary {
        AnomalySummary::from_flags(flags, self.observations.len())
            .with_movement(&self.movement_pattern(), self.detector.config.erratic_score)
    }

    pub fn movement_pattern(&self) -> MovementPattern {
        let steps = self.detector.extractor.extract(self.observations);
        let pattern = self.detector.movement_pattern(&steps);
        if pattern.erratic {
            debug!(
                subject_id = %self.subject_id,
                directions = pattern.directions,
                sharp_turns = pattern.sharp_turns,
                "Erratic movement detected"
            );
        }
        pattern
    }

    fn step_at(&self, index: usize) -> MovementStep {
        let previous = index.checked_sub(1).map(|p| &self.observations[p]);
        self.detector
            .extractor
            .step(index, previous, &self.observations[index])
    }

    fn evaluate(&self, index: usize) -> Option<AnomalyFlag> {
        let detector = self.detector;
        let obs = &self.observations[index];
        let step = self.step_at(index);
        let previous_step = index.checked_sub(1).map(|p| self.step_at(p));

        let sub_scores = SubScores {
            speed: detector.speed_score(&step, previous_step.as_ref(), &self.speed),
            location: detector.location_score(obs, self.personal),
            time: detector.time_score(&step, self.personal),
        };

        let mut scores = BTreeMap::new();
        scores.insert(SPEED.to_string(), sub_scores.speed);
        scores.insert(LOCATION.to_string(), sub_scores.location);
        scores.insert(TIME.to_string(), sub_scores.time);

        let anomaly_score = detector.aggregator.noisy_or(&scores);
        if anomaly_score < detector.config.flag_threshold {
            return None;
        }

        Some(AnomalyFlag {
            subject_id: self.subject_id.to_string(),
            observation_index: index,
            anomaly_score,
            classification: detector.classify(&scores),
            sub_scores,
            implied_speed_kmh: step.implied_speed_kmh,
            speed_kmh: step.speed_kmh,
        })
    }
}

impl<'d, 'a> IntoIterator for &'d Detection<'a> {
    type Item = AnomalyFlag;
    type IntoIter = Flags<'d, 'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over the flags of a [`Detection`]
#[derive(Clone)]
pub struct Flags<'d, 'a> {
    detection: &'d Detection<'a>,
    next: usize,
}

impl Iterator for Flags<'_, '_> {
    type Item = AnomalyFlag;

    fn next(&mut self) -> Option<AnomalyFlag> {
        while self.next < self.detection.observations.len() {
            let index = self.next;
            self.next += 1;
            if let Some(flag) = self.detection.evaluate(index) {
                return Some(flag);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.detection.observations.len() - self.next))
    }
}
