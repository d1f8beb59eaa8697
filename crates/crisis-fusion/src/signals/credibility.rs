use super::config::CredibilityConfig;
use crate::domain::Signal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Output of a credibility pass: every input signal lands in exactly one list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilteredBatch {
    pub accepted: Vec<Signal>,
    pub suppressed: Vec<Signal>,
}

/// Revises credibility from prior trust, independent corroboration and recency.
pub struct CredibilityFilter {
    config: CredibilityConfig,
}

impl CredibilityFilter {
    pub fn new(config: CredibilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CredibilityConfig {
        &self.config
    }

    pub fn apply(&self, signals: Vec<Signal>, as_of: DateTime<Utc>) -> FilteredBatch {
        let revised: Vec<f64> = signals
            .iter()
            .map(|signal| self.revised_credibility(signal, &signals, as_of))
            .collect();

        let mut batch = FilteredBatch::default();
        for (signal, credibility) in signals.into_iter().zip(revised) {
            let signal = signal.with_credibility(credibility);
            if signal.credibility() < self.config.suppression_threshold {
                batch.suppressed.push(signal);
            } else {
                batch.accepted.push(signal);
            }
        }
        batch
    }

    pub(crate) fn revised_credibility(
        &self,
        signal: &Signal,
        batch: &[Signal],
        as_of: DateTime<Utc>,
    ) -> f64 {
        let corroborators = self.corroborators(signal, batch) as f64;
        let corroboration = corroborators / (corroborators + 1.0);
        let blended = self.config.base_weight * signal.credibility()
            + self.config.corroboration_weight * corroboration;

        let age_hours = (as_of - signal.observed_at()).num_seconds().max(0) as f64 / 3600.0;
        let half_life = self.config.half_life_hours.get(signal.source_kind());
        decayed_weight(blended, age_hours, half_life)
    }

    /// Distinct reporters, other than the signal's own, reporting a compatible
    /// severity nearby in space and time.
    fn corroborators(&self, signal: &Signal, batch: &[Signal]) -> usize {
        let window_secs = self.config.corroboration_window_minutes.max(0) * 60;
        let reporters: BTreeSet<&str> = batch
            .iter()
            .filter(|other| other.id() != signal.id())
            .filter(|other| other.reporter() != signal.reporter())
            .filter(|other| {
                (other.observed_at() - signal.observed_at()).num_seconds().abs() <= window_secs
            })
            .filter(|other| {
                (other.severity() - signal.severity()).abs() <= self.config.severity_tolerance
            })
            .filter(|other| {
                other.location().distance_km(&signal.location())
                    <= self.config.corroboration_radius_km
            })
            .map(|other| other.reporter())
            .collect();
        reporters.len()
    }
}

/// `base * 2^(-age / half_life)`
pub(crate) fn decayed_weight(base: f64, age_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 || age_hours <= 0.0 {
        return base;
    }
    base * 2f64.powf(-age_hours / half_life_hours)
}
