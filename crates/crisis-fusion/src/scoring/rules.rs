use super::config::{HazardAggregation, ScoringConfig};
use super::Contribution;
use crate::domain::clamp_unit;
use crate::zones::Zone;
use chrono::{DateTime, Utc};

/// Per-zone inputs to fusion, before the policy combines them.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ComponentSignals {
    /// Signal-derived hazard combined with the zone baseline; `None` when no
    /// evidence reached the zone.
    pub hazard: Option<f64>,
    pub exposure: f64,
    pub vulnerability: f64,
    pub evidence_count: usize,
    pub dispersion: f64,
    pub staleness: f64,
}

/// `contributions` must already be sorted by signal id.
pub(crate) fn score_components(
    zone: &Zone,
    contributions: &[Contribution],
    as_of: DateTime<Utc>,
    config: &ScoringConfig,
) -> ComponentSignals {
    let exposure = (zone.population as f64 / config.reference_population).min(1.0);
    let vulnerability = clamp_unit(zone.vulnerability_index);

    if contributions.is_empty() {
        return ComponentSignals {
            hazard: None,
            exposure,
            vulnerability,
            evidence_count: 0,
            dispersion: 0.0,
            staleness: 1.0,
        };
    }

    let signal_hazard = aggregate_hazard(contributions, config);
    let baseline = clamp_unit(zone.baseline_hazard);
    let hazard = 1.0 - (1.0 - baseline) * (1.0 - signal_hazard);

    ComponentSignals {
        hazard: Some(clamp_unit(hazard)),
        exposure,
        vulnerability,
        evidence_count: contributions.len(),
        dispersion: severity_dispersion(contributions),
        staleness: staleness(contributions, as_of, config),
    }
}

fn aggregate_hazard(contributions: &[Contribution], config: &ScoringConfig) -> f64 {
    let weighted = contributions.iter().map(Contribution::weighted_severity);
    match config.aggregation {
        HazardAggregation::Max => weighted.fold(0.0, f64::max),
        HazardAggregation::DecayedSum => {
            let total: f64 = weighted.sum();
            1.0 - (-config.decay_k * total).exp()
        }
    }
}

/// Twice the population standard deviation of severities, capped at 1.
fn severity_dispersion(contributions: &[Contribution]) -> f64 {
    let count = contributions.len() as f64;
    let mean = contributions
        .iter()
        .map(|c| c.signal.severity())
        .sum::<f64>()
        / count;
    let variance = contributions
        .iter()
        .map(|c| (c.signal.severity() - mean).powi(2))
        .sum::<f64>()
        / count;
    (2.0 * variance.sqrt()).min(1.0)
}

/// `1 - 2^(-age/half_life)` of the most recent signal.
fn staleness(contributions: &[Contribution], as_of: DateTime<Utc>, config: &ScoringConfig) -> f64 {
    let newest = contributions
        .iter()
        .max_by(|a, b| {
            a.signal
                .observed_at()
                .cmp(&b.signal.observed_at())
                .then_with(|| b.signal.id().cmp(a.signal.id()))
        })
        .map(|c| &c.signal);

    let Some(newest) = newest else {
        return 1.0;
    };
    let age_hours = (as_of - newest.observed_at()).num_seconds().max(0) as f64 / 3600.0;
    let half_life = config
        .staleness_half_life_hours
        .get(newest.source_kind());
    if half_life <= 0.0 {
        return 0.0;
    }
    1.0 - 2f64.powf(-age_hours / half_life)
}
