use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::allocation::{AllocationPlan, Requirement};
use crate::cycle::{CycleError, CycleInput, CycleOutcome, DecisionCycle};
use crate::domain::{PlanId, ZoneId};
use crate::ledger::{AuditEntry, DecisionLedger, LedgerError};
use crate::scoring::RiskScore;
use crate::signals::RawPayload;

/// Body accepted when a cycle is triggered on demand.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CycleRequest {
    pub as_of: Option<DateTime<Utc>>,
    pub demand_overrides: BTreeMap<ZoneId, Vec<Requirement>>,
}

impl From<CycleRequest> for CycleInput {
    fn from(request: CycleRequest) -> Self {
        CycleInput {
            as_of: request.as_of,
            demand_overrides: request.demand_overrides,
        }
    }
}

/// Service composing the decision cycle with a queue of not-yet-scored payloads.
pub struct EngineService<L> {
    cycle: DecisionCycle<L>,
    pending: Mutex<Vec<RawPayload>>,
}

impl<L> EngineService<L>
where
    L: DecisionLedger + 'static,
{
    pub fn new(cycle: DecisionCycle<L>) -> Self {
        Self {
            cycle,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn cycle(&self) -> &DecisionCycle<L> {
        &self.cycle
    }

    /// Queue payloads for the next cycle, returning the queue depth.
    pub fn enqueue(&self, payloads: Vec<RawPayload>) -> Result<usize, EngineServiceError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| EngineServiceError::QueuePoisoned)?;
        pending.extend(payloads);
        Ok(pending.len())
    }

    pub fn pending(&self) -> Result<usize, EngineServiceError> {
        let pending = self
            .pending
            .lock()
            .map_err(|_| EngineServiceError::QueuePoisoned)?;
        Ok(pending.len())
    }

    /// Runs a cycle over the queued payloads.
    ///
    /// The queue is drained only once the cycle lock is held, so a trigger
    /// waiting behind another cycle still sees what arrives meanwhile. Drained
    /// payloads return to the front of the queue unless the cycle succeeds,
    /// including when this future is dropped mid-cycle.
    pub async fn run_cycle(&self, input: CycleInput) -> Result<CycleOutcome, EngineServiceError> {
        let mut drained: Option<DrainedBatch<'_>> = None;
        let feed = async {
            let batch = DrainedBatch::take(&self.pending);
            let payloads = batch.payloads.clone();
            drained = Some(batch);
            payloads
        };

        let result = self.cycle.run_with_feed(feed, input).await;
        match result {
            Ok(outcome) => {
                if let Some(batch) = drained {
                    batch.settle();
                }
                Ok(outcome)
            }
            Err(err) => {
                let requeued = drained.as_ref().map_or(0, |batch| batch.payloads.len());
                warn!(error = %err, requeued, "cycle failed; payloads requeued");
                Err(err.into())
            }
        }
    }

    /// Scores for a zone; the window defaults to the trailing 24 hours.
    pub fn zone_scores(
        &self,
        zone_id: &ZoneId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<RiskScore>, EngineServiceError> {
        if self.cycle.zones().snapshot().get(zone_id).is_none() {
            return Err(EngineServiceError::UnknownZone(zone_id.clone()));
        }
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or(to - Duration::hours(24));
        Ok(self.cycle.ledger().scores_for_zone(zone_id, from, to)?)
    }

    pub fn latest_plan(&self) -> Result<AllocationPlan, EngineServiceError> {
        self.cycle
            .ledger()
            .latest_plan()?
            .ok_or(EngineServiceError::NoPlan)
    }

    pub fn plan(&self, plan_id: &PlanId) -> Result<AllocationPlan, EngineServiceError> {
        self.cycle
            .ledger()
            .plan(plan_id)?
            .ok_or_else(|| EngineServiceError::UnknownPlan(plan_id.clone()))
    }

    pub fn audit(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, EngineServiceError> {
        Ok(self.cycle.ledger().audit_entries(from, to)?)
    }
}

/// Payloads taken off the queue for one cycle; unless settled they go back to
/// the front of the queue when dropped.
struct DrainedBatch<'a> {
    queue: &'a Mutex<Vec<RawPayload>>,
    payloads: Vec<RawPayload>,
    settled: bool,
}

impl<'a> DrainedBatch<'a> {
    fn take(queue: &'a Mutex<Vec<RawPayload>>) -> Self {
        let payloads = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
        Self {
            queue,
            payloads,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for DrainedBatch<'_> {
    fn drop(&mut self) {
        if self.settled || self.payloads.is_empty() {
            return;
        }
        let mut pending = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let arrived = std::mem::replace(&mut *pending, std::mem::take(&mut self.payloads));
        pending.extend(arrived);
    }
}

/// Error raised by the engine service.
#[derive(Debug, thiserror::Error)]
pub enum EngineServiceError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("zone {0} is not in the current catalog")]
    UnknownZone(ZoneId),
    #[error("plan {0} not found")]
    UnknownPlan(PlanId),
    #[error("no plan has been committed yet")]
    NoPlan,
    #[error("payload queue lock poisoned")]
    QueuePoisoned,
}
