//! One serialized normalize, filter, score, allocate and commit pass.

use crate::allocation::{
    AllocationPlan, DemandPlanner, Requirement, ResourceAllocator, StraightLineEstimator,
    TravelEstimator,
};
use crate::config::{CycleConfig, EngineConfig};
use crate::domain::{CycleId, ZoneId};
use crate::ledger::{AuditEntry, AuditKind, CommitOutcome, CycleRecord, DecisionLedger, LedgerError};
use crate::pool::{PoolError, ResourcePool};
use crate::scoring::{
    Contribution, RiskScore, RiskScoringEngine, ScoreContext, ScoringConfigError, ScoringError,
};
use crate::signals::{
    digest_hex, CredibilityFilter, IngestReport, RawPayload, SignalNormalizer, SignalWindow,
    WindowConfig,
};
use crate::zones::{ZoneError, ZoneModel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Caller-supplied inputs besides the raw feed.
#[derive(Debug, Clone, Default)]
pub struct CycleInput {
    pub as_of: Option<DateTime<Utc>>,
    pub demand_overrides: BTreeMap<ZoneId, Vec<Requirement>>,
}

impl CycleInput {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of: Some(as_of),
            demand_overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub cycle_id: CycleId,
    pub commit: CommitOutcome,
    pub as_of: DateTime<Utc>,
    pub scores: Vec<RiskScore>,
    pub plan: AllocationPlan,
    pub ingest: IngestReport,
    /// Signals from earlier cycles still inside their retention window.
    pub carried_over: usize,
    pub suppressed: usize,
    pub unassigned: usize,
    pub stale_reference: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("signal feed did not respond within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl CycleError {
    /// Aborted cycles leave no trace, so these can simply be run again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CycleError::Timeout(_) | CycleError::Pool(PoolError::Conflict { .. })
        )
    }
}

/// Orchestrates decision cycles against shared zone, pool and ledger state.
pub struct DecisionCycle<L> {
    normalizer: SignalNormalizer,
    filter: CredibilityFilter,
    window_config: WindowConfig,
    scoring: Arc<RiskScoringEngine>,
    planner: DemandPlanner,
    allocator: ResourceAllocator,
    travel: Arc<dyn TravelEstimator>,
    zones: Arc<ZoneModel>,
    pool: Arc<ResourcePool>,
    ledger: Arc<L>,
    settings: CycleConfig,
    /// Held for a whole cycle; the window only advances when a cycle commits.
    running: Mutex<SignalWindow>,
}

impl<L> DecisionCycle<L>
where
    L: DecisionLedger + 'static,
{
    pub fn new(
        config: &EngineConfig,
        zones: Arc<ZoneModel>,
        pool: Arc<ResourcePool>,
        ledger: Arc<L>,
    ) -> Result<Self, ScoringConfigError> {
        Ok(Self {
            normalizer: SignalNormalizer::new(config.normalizer.clone()),
            filter: CredibilityFilter::new(config.credibility.clone()),
            window_config: config.window.clone(),
            scoring: Arc::new(RiskScoringEngine::new(config.scoring.clone())?),
            planner: DemandPlanner::new(config.demand.clone()),
            allocator: ResourceAllocator::new(config.allocator.clone()),
            travel: Arc::new(StraightLineEstimator::new(config.travel_speed_kmh)),
            zones,
            pool,
            ledger,
            settings: config.cycle.clone(),
            running: Mutex::new(SignalWindow::default()),
        })
    }

    /// Swaps in a routing collaborator other than the straight-line default.
    pub fn with_travel(mut self, travel: Arc<dyn TravelEstimator>) -> Self {
        self.travel = travel;
        self
    }

    pub fn zones(&self) -> &Arc<ZoneModel> {
        &self.zones
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub async fn run(
        &self,
        payloads: Vec<RawPayload>,
        input: CycleInput,
    ) -> Result<CycleOutcome, CycleError> {
        self.run_with_feed(async move { payloads }, input).await
    }

    /// Awaits `feed` under the configured timeout, then runs the cycle.
    ///
    /// Scores the batch together with the signals earlier cycles accepted.
    /// Nothing is written until the final commit, so a timeout, an error, or
    /// dropping this future leaves ledger, pool and signal window unchanged.
    pub async fn run_with_feed<F>(
        &self,
        feed: F,
        input: CycleInput,
    ) -> Result<CycleOutcome, CycleError>
    where
        F: Future<Output = Vec<RawPayload>>,
    {
        let mut window = self.running.lock().await;

        let limit = Duration::from_secs(self.settings.timeout_secs);
        let payloads = match tokio::time::timeout(limit, feed).await {
            Ok(payloads) => payloads,
            Err(_) => {
                warn!(timeout_secs = self.settings.timeout_secs, "signal feed timed out");
                return Err(CycleError::Timeout(limit));
            }
        };

        let as_of = input.as_of.unwrap_or_else(Utc::now);
        info!(%as_of, payloads = payloads.len(), "decision cycle started");

        let catalog = self.zones.snapshot();
        let pool_snapshot = self.pool.snapshot()?;
        let stale_reference = self.is_stale(catalog.as_of(), as_of)
            || self.is_stale(pool_snapshot.refreshed_at, as_of);
        if stale_reference {
            warn!(
                zones_as_of = %catalog.as_of(),
                resources_as_of = %pool_snapshot.refreshed_at,
                "reference data older than freshness bound; scores flagged low confidence"
            );
        }

        let normalized = self.normalizer.normalize_batch(&payloads);
        let merge = window.merged(normalized.signals, as_of, &self.window_config);
        if merge.expired > 0 {
            debug!(expired = merge.expired, "signals aged out of the window");
        }
        let carried_over = merge.carried_over;
        let mut ingest = normalized.report;
        ingest.duplicates += merge.superseded.len();
        let filtered = self.filter.apply(merge.current, as_of);

        let mut audit: Vec<AuditEntry> = Vec::new();
        let audit_entry = |kind, signal| AuditEntry {
            kind,
            recorded_at: as_of,
            signal,
        };
        audit.extend(
            normalized
                .duplicates
                .into_iter()
                .chain(merge.superseded)
                .map(|signal| audit_entry(AuditKind::Duplicate, signal)),
        );
        let suppressed = filtered.suppressed.len();
        audit.extend(
            filtered
                .suppressed
                .into_iter()
                .map(|signal| audit_entry(AuditKind::Suppressed, signal)),
        );

        let mut contributions: BTreeMap<ZoneId, Vec<Contribution>> = BTreeMap::new();
        let mut unassigned = 0;
        for signal in filtered.accepted {
            match catalog.assign(&signal) {
                Ok(assignments) => {
                    for assignment in assignments {
                        contributions
                            .entry(assignment.zone_id)
                            .or_default()
                            .push(Contribution {
                                signal: signal.clone(),
                                overlap_weight: assignment.overlap_weight,
                            });
                    }
                }
                Err(ZoneError::UnassignedSignal(id)) => {
                    warn!(signal_id = %id, "signal outside every zone");
                    unassigned += 1;
                    audit.push(audit_entry(AuditKind::Unassigned, signal));
                }
                Err(other) => {
                    warn!(error = %other, "zone assignment failed");
                    unassigned += 1;
                    audit.push(audit_entry(AuditKind::Unassigned, signal));
                }
            }
        }
        audit.sort_by(|a, b| (a.kind, a.entity_id()).cmp(&(b.kind, b.entity_id())));

        let context = ScoreContext {
            as_of,
            stale_reference,
        };
        let scores = self
            .scoring
            .score_all(Arc::clone(&catalog), contributions, context)
            .await?;

        let demands = self
            .planner
            .plan(&catalog, &scores, &input.demand_overrides);
        let plan = self.allocator.allocate(
            &pool_snapshot.resources,
            &demands,
            as_of,
            self.travel.as_ref(),
        );

        let cycle_id = cycle_id(as_of, &scores, &plan, &audit);
        let record = CycleRecord {
            cycle_id: cycle_id.clone(),
            as_of,
            scores: scores.clone(),
            plan: plan.clone(),
            audit,
            ingest: ingest.clone(),
        };

        let ledger = Arc::clone(&self.ledger);
        let commit = self
            .pool
            .commit_with(pool_snapshot.version, &plan, move || {
                ledger.commit_cycle(record).map_err(CycleError::from)
            })?;
        if commit == CommitOutcome::Committed {
            *window = merge.window;
        }

        info!(
            cycle_id = %cycle_id,
            outcome = ?commit,
            zones = scores.len(),
            assignments = plan.assignments.len(),
            unmet = plan.unmet_demand.len(),
            carried_over,
            suppressed,
            unassigned,
            "decision cycle committed"
        );

        Ok(CycleOutcome {
            cycle_id,
            commit,
            as_of,
            scores,
            plan,
            ingest,
            carried_over,
            suppressed,
            unassigned,
            stale_reference,
        })
    }

    fn is_stale(&self, refreshed_at: DateTime<Utc>, as_of: DateTime<Utc>) -> bool {
        let age = as_of - refreshed_at;
        age.num_seconds() > self.settings.reference_max_age_secs as i64
    }
}

fn cycle_id(
    as_of: DateTime<Utc>,
    scores: &[RiskScore],
    plan: &AllocationPlan,
    audit: &[AuditEntry],
) -> CycleId {
    let material = serde_json::to_vec(&(as_of, scores, plan, audit)).unwrap_or_default();
    CycleId(format!("cycle-{}", &digest_hex(&material)[..16]))
}
