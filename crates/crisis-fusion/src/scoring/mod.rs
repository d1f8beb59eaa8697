//! Fusion of hazard, exposure and vulnerability into per-zone risk estimates.

mod config;
mod policy;
mod rules;

pub use config::{
    FusionPolicy, FusionWeights, HazardAggregation, ScoringConfig, ScoringConfigError,
    UncertaintyConfig,
};
pub use policy::RiskLevel;

use crate::domain::{clamp_unit, Signal, SignalId, ZoneId};
use crate::zones::{Zone, ZoneCatalog};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

/// An accepted signal together with the share of its footprint inside a zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub signal: Signal,
    pub overlap_weight: f64,
}

impl Contribution {
    pub fn weighted_severity(&self) -> f64 {
        self.signal.severity() * self.signal.credibility() * clamp_unit(self.overlap_weight)
    }
}

/// Fused estimate for one zone at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub zone_id: ZoneId,
    pub computed_at: DateTime<Utc>,
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// `None` when no evidence reached the zone.
    pub hazard: Option<f64>,
    pub exposure: f64,
    pub vulnerability: f64,
    pub risk_level: RiskLevel,
    pub contributing_signal_ids: Vec<SignalId>,
    pub low_confidence: bool,
}

impl RiskScore {
    pub fn band_width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }
}

/// Inputs shared by every zone scored in one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreContext {
    pub as_of: DateTime<Utc>,
    /// Reference data is older than its freshness bound.
    pub stale_reference: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring task for a zone failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Stateless scorer; shareable across tasks.
pub struct RiskScoringEngine {
    config: ScoringConfig,
}

impl RiskScoringEngine {
    pub fn new(config: ScoringConfig) -> Result<Self, ScoringConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Never fails for a catalog-validated zone; missing evidence yields a
    /// wide, low-confidence score rather than an error.
    pub fn score(
        &self,
        zone: &Zone,
        contributions: &[Contribution],
        context: ScoreContext,
    ) -> RiskScore {
        let mut ordered: Vec<Contribution> = contributions.to_vec();
        ordered.sort_by(|a, b| a.signal.id().cmp(b.signal.id()));

        let components = rules::score_components(zone, &ordered, context.as_of, &self.config);
        let point_estimate = policy::fuse(&components, &self.config);
        let half_width = policy::half_width(&components, &self.config);

        let score = RiskScore {
            zone_id: zone.id.clone(),
            computed_at: context.as_of,
            point_estimate,
            lower_bound: (point_estimate - half_width).max(0.0),
            upper_bound: (point_estimate + half_width).min(1.0),
            hazard: components.hazard,
            exposure: components.exposure,
            vulnerability: components.vulnerability,
            risk_level: RiskLevel::from_estimate(point_estimate),
            contributing_signal_ids: ordered.iter().map(|c| c.signal.id().clone()).collect(),
            low_confidence: context.stale_reference || components.hazard.is_none(),
        };

        debug!(
            zone = %score.zone_id,
            estimate = score.point_estimate,
            width = score.band_width(),
            signals = score.contributing_signal_ids.len(),
            "zone scored"
        );
        score
    }

    /// Scores every zone in the catalog concurrently; output is ordered by zone id.
    pub async fn score_all(
        self: &Arc<Self>,
        catalog: Arc<ZoneCatalog>,
        mut contributions: BTreeMap<ZoneId, Vec<Contribution>>,
        context: ScoreContext,
    ) -> Result<Vec<RiskScore>, ScoringError> {
        let mut tasks = JoinSet::new();
        for index in 0..catalog.len() {
            let engine = Arc::clone(self);
            let catalog = Arc::clone(&catalog);
            let zone_contributions = contributions
                .remove(&catalog.zones()[index].id)
                .unwrap_or_default();
            tasks.spawn(async move {
                let zone = &catalog.zones()[index];
                engine.score(zone, &zone_contributions, context)
            });
        }

        let mut scores = Vec::with_capacity(catalog.len());
        while let Some(joined) = tasks.join_next().await {
            scores.push(joined?);
        }
        scores.sort_by(|a, b| a.zone_id.cmp(&b.zone_id));
        Ok(scores)
    }
}

/// Zones banded High or Critical, most severe first.
pub fn high_risk_zones(scores: &[RiskScore]) -> Vec<&RiskScore> {
    let mut flagged: Vec<&RiskScore> = scores
        .iter()
        .filter(|score| score.risk_level.is_high_risk())
        .collect();
    flagged.sort_by(|a, b| {
        b.point_estimate
            .total_cmp(&a.point_estimate)
            .then_with(|| a.zone_id.cmp(&b.zone_id))
    });
    flagged
}
