//! Rule-based insights over the incident picture of an area.
//!
//! Rules are evaluated in a fixed order (hotspot, temporal, trend,
//! incident pattern, safety) so the same facts always yield the same list.

use crate::types::insight::{Insight, InsightKind, InsightSeverity};
use crate::types::observation::IncidentKind;
use crate::types::profile::{Hotspot, TrendDirection};
use std::collections::BTreeMap;

/// Incident facts an insight list is derived from
#[derive(Debug, Clone, Copy)]
pub struct AreaFacts<'a> {
    /// Highest-weighted hotspot inside the area
    pub top_hotspot: Option<&'a Hotspot>,
    pub total_incidents: usize,
    pub breakdown: &'a BTreeMap<IncidentKind, usize>,
    pub trend: TrendDirection,
    pub peak_hour: Option<u32>,
}

pub struct InsightGenerator {
    /// Incident count above which an area is called high density
    high_density_incidents: usize,
    /// Share of all incidents one kind needs to count as predominant
    predominant_share: f64,
}

impl InsightGenerator {
    pub fn new(high_density_incidents: usize, predominant_share: f64) -> Self {
        Self {
            high_density_incidents,
            predominant_share: predominant_share.clamp(0.0, 1.0),
        }
    }

    pub fn generate(&self, facts: &AreaFacts<'_>) -> Vec<Insight> {
        let mut insights = Vec::new();
        let total = facts.total_incidents;

        if let Some(hotspot) = facts.top_hotspot {
            insights.push(Insight::new(
                InsightKind::Hotspot,
                InsightSeverity::High,
                format!(
                    "Critical hotspot identified with {} incidents. Primary incident type: {}",
                    hotspot.cluster.count,
                    hotspot.dominant_kind.as_str()
                ),
                "Increase patrol frequency and consider safety infrastructure improvements.",
            ));
        }

        if total > 0 {
            if let Some(hour) = facts.peak_hour.filter(|&h| is_night_hour(h)) {
                insights.push(Insight::new(
                    InsightKind::Temporal,
                    InsightSeverity::Medium,
                    format!("Peak incident time is {hour}:00 (night hours)"),
                    "Enhance night-time security measures and lighting.",
                ));
            }

            if facts.trend == TrendDirection::Increasing {
                insights.push(Insight::new(
                    InsightKind::Trend,
                    InsightSeverity::High,
                    "Incident trend is increasing over the analyzed period",
                    "Immediate intervention and additional safety measures required.",
                ));
            }

            if let Some((kind, count)) = most_common(facts.breakdown) {
                if count as f64 >= total as f64 * self.predominant_share {
                    insights.push(Insight::new(
                        InsightKind::IncidentPattern,
                        InsightSeverity::Medium,
                        format!(
                            "{} incidents are predominant ({count} out of {total})",
                            kind.as_str()
                        ),
                        format!(
                            "Implement targeted prevention strategies for {} incidents.",
                            kind.as_str()
                        ),
                    ));
                }
            }
        }

        if total > self.high_density_incidents {
            insights.push(Insight::new(
                InsightKind::Safety,
                InsightSeverity::High,
                format!("High incident density detected ({total} incidents in analyzed period)"),
                "Consider this area as high-risk and advise increased caution for travelers.",
            ));
        }

        insights
    }
}

/// 22:00 through 05:59
fn is_night_hour(hour: u32) -> bool {
    hour >= 22 || hour <= 5
}

/// Kind with the highest count; the first kind in order wins ties.
fn most_common(breakdown: &BTreeMap<IncidentKind, usize>) -> Option<(IncidentKind, usize)> {
    breakdown
        .iter()
        .filter(|(_, count)| **count > 0)
        .fold(None, |best, (&kind, &count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((kind, count)),
        })
}
