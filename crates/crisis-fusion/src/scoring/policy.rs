use super::config::{FusionPolicy, ScoringConfig};
use super::rules::ComponentSignals;
use crate::domain::clamp_unit;
use serde::{Deserialize, Serialize};

/// Display banding on the 0-10 scale operators read from the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_estimate(point_estimate: f64) -> Self {
        let scaled = clamp_unit(point_estimate) * 10.0;
        if scaled >= 8.5 {
            RiskLevel::Critical
        } else if scaled >= 7.0 {
            RiskLevel::High
        } else if scaled >= 5.0 {
            RiskLevel::Moderate
        } else if scaled >= 3.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn is_high_risk(self) -> bool {
        self >= RiskLevel::High
    }
}

/// Combines components into a point estimate.
///
/// An unknown hazard drops out and the remaining weights are renormalized, so
/// a zone without evidence is scored on exposure and vulnerability alone.
pub(crate) fn fuse(components: &ComponentSignals, config: &ScoringConfig) -> f64 {
    let weights = &config.weights;
    let mut terms = vec![
        (components.exposure, weights.exposure),
        (components.vulnerability, weights.vulnerability),
    ];
    if let Some(hazard) = components.hazard {
        terms.insert(0, (hazard, weights.hazard));
    }

    let total_weight: f64 = terms.iter().map(|(_, weight)| weight).sum();
    if total_weight <= 0.0 {
        return 0.0;
    }

    let estimate = match config.policy {
        FusionPolicy::Arithmetic => {
            terms
                .iter()
                .map(|(value, weight)| value * weight)
                .sum::<f64>()
                / total_weight
        }
        FusionPolicy::Geometric => terms
            .iter()
            .map(|(value, weight)| {
                value
                    .max(config.component_floor)
                    .powf(weight / total_weight)
            })
            .product(),
    };
    clamp_unit(estimate)
}

/// Half-width of the band: `min + (max - min)·f`.
pub(crate) fn half_width(components: &ComponentSignals, config: &ScoringConfig) -> f64 {
    let band = &config.uncertainty;
    let factor = if components.hazard.is_none() || components.evidence_count == 0 {
        1.0
    } else {
        band.count_weight / (1.0 + components.evidence_count as f64)
            + band.dispersion_weight * components.dispersion
            + band.staleness_weight * components.staleness
    };
    band.min_half_width + (band.max_half_width - band.min_half_width) * clamp_unit(factor)
}
