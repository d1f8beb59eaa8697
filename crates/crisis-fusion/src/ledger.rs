//! Append-only record of every committed decision cycle.

use crate::allocation::AllocationPlan;
use crate::domain::{CycleId, PlanId, Signal, ZoneId};
use crate::scoring::RiskScore;
use crate::signals::IngestReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Why a signal was kept out of scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Duplicate,
    Suppressed,
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub recorded_at: DateTime<Utc>,
    pub signal: Signal,
}

impl AuditEntry {
    pub fn entity_id(&self) -> &str {
        self.signal.id().as_str()
    }
}

/// Everything one cycle produced; committed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_id: CycleId,
    pub as_of: DateTime<Utc>,
    pub scores: Vec<RiskScore>,
    pub plan: AllocationPlan,
    pub audit: Vec<AuditEntry>,
    pub ingest: IngestReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    /// An identical cycle was already on record; nothing was written.
    Replayed,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("conflicting record already stored for {entity} at {at}")]
    Conflict { entity: String, at: DateTime<Utc> },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for cycle records.
pub trait DecisionLedger: Send + Sync {
    /// Writes every entry of the cycle or none of them.
    fn commit_cycle(&self, record: CycleRecord) -> Result<CommitOutcome, LedgerError>;
    fn cycle(&self, id: &CycleId) -> Result<Option<CycleRecord>, LedgerError>;
    /// Scores for a zone with `from <= computed_at <= to`, oldest first.
    fn scores_for_zone(
        &self,
        zone_id: &ZoneId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RiskScore>, LedgerError>;
    fn plan(&self, id: &PlanId) -> Result<Option<AllocationPlan>, LedgerError>;
    fn latest_plan(&self) -> Result<Option<AllocationPlan>, LedgerError>;
    fn audit_entries(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, LedgerError>;
}

#[derive(Default)]
struct LedgerState {
    cycles: BTreeMap<CycleId, CycleRecord>,
    scores: BTreeMap<(ZoneId, DateTime<Utc>), RiskScore>,
    plans: BTreeMap<PlanId, AllocationPlan>,
    plan_order: Vec<(DateTime<Utc>, PlanId)>,
    audit: BTreeMap<(String, DateTime<Utc>), AuditEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

fn conflict(entity: impl Into<String>, at: DateTime<Utc>) -> LedgerError {
    LedgerError::Conflict {
        entity: entity.into(),
        at,
    }
}

impl DecisionLedger for InMemoryLedger {
    fn commit_cycle(&self, record: CycleRecord) -> Result<CommitOutcome, LedgerError> {
        let mut state = self.lock()?;

        if let Some(existing) = state.cycles.get(&record.cycle_id) {
            return if existing == &record {
                Ok(CommitOutcome::Replayed)
            } else {
                Err(conflict(record.cycle_id.as_str(), record.as_of))
            };
        }

        // Validate every key before writing anything.
        for score in &record.scores {
            let key = (score.zone_id.clone(), score.computed_at);
            if matches!(state.scores.get(&key), Some(stored) if stored != score) {
                return Err(conflict(score.zone_id.as_str(), score.computed_at));
            }
        }
        if matches!(state.plans.get(&record.plan.plan_id), Some(stored) if stored != &record.plan) {
            return Err(conflict(
                record.plan.plan_id.as_str(),
                record.plan.generated_at,
            ));
        }
        for entry in &record.audit {
            let key = (entry.entity_id().to_string(), entry.recorded_at);
            if matches!(state.audit.get(&key), Some(stored) if stored != entry) {
                return Err(conflict(entry.entity_id(), entry.recorded_at));
            }
        }

        for score in &record.scores {
            state
                .scores
                .insert((score.zone_id.clone(), score.computed_at), score.clone());
        }
        for entry in &record.audit {
            state
                .audit
                .insert((entry.entity_id().to_string(), entry.recorded_at), entry.clone());
        }
        let plan = record.plan.clone();
        if !state.plans.contains_key(&plan.plan_id) {
            state
                .plan_order
                .push((plan.generated_at, plan.plan_id.clone()));
            state.plans.insert(plan.plan_id.clone(), plan);
        }
        state.cycles.insert(record.cycle_id.clone(), record);

        Ok(CommitOutcome::Committed)
    }

    fn cycle(&self, id: &CycleId) -> Result<Option<CycleRecord>, LedgerError> {
        Ok(self.lock()?.cycles.get(id).cloned())
    }

    fn scores_for_zone(
        &self,
        zone_id: &ZoneId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RiskScore>, LedgerError> {
        if from > to {
            return Ok(Vec::new());
        }
        let state = self.lock()?;
        Ok(state
            .scores
            .range((zone_id.clone(), from)..=(zone_id.clone(), to))
            .map(|(_, score)| score.clone())
            .collect())
    }

    fn plan(&self, id: &PlanId) -> Result<Option<AllocationPlan>, LedgerError> {
        Ok(self.lock()?.plans.get(id).cloned())
    }

    /// Most recent by `generated_at`; ties go to the later commit.
    fn latest_plan(&self) -> Result<Option<AllocationPlan>, LedgerError> {
        let state = self.lock()?;
        let latest = state
            .plan_order
            .iter()
            .enumerate()
            .max_by(|(ia, (a, _)), (ib, (b, _))| a.cmp(b).then(ia.cmp(ib)))
            .and_then(|(_, (_, id))| state.plans.get(id))
            .cloned();
        Ok(latest)
    }

    fn audit_entries(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, LedgerError> {
        let state = self.lock()?;
        let mut entries: Vec<AuditEntry> = state
            .audit
            .values()
            .filter(|entry| entry.recorded_at >= from && entry.recorded_at <= to)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            (a.recorded_at, a.entity_id()).cmp(&(b.recorded_at, b.entity_id()))
        });
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Footprint, GeoPoint, SignalId, SignalParts, SourceKind};
    use crate::scoring::RiskLevel;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn score(zone: &str, computed_at: DateTime<Utc>, point_estimate: f64) -> RiskScore {
        RiskScore {
            zone_id: ZoneId::from(zone),
            computed_at,
            point_estimate,
            lower_bound: point_estimate,
            upper_bound: point_estimate,
            hazard: Some(point_estimate),
            exposure: 0.5,
            vulnerability: 0.5,
            risk_level: RiskLevel::from_estimate(point_estimate),
            contributing_signal_ids: Vec::new(),
            low_confidence: false,
        }
    }

    fn record(cycle: &str, as_of: DateTime<Utc>, point_estimate: f64) -> CycleRecord {
        let signal = Signal::new(SignalParts {
            id: SignalId::from(format!("social:{cycle}").as_str()),
            source_kind: SourceKind::Social,
            reporter: "@someone".to_string(),
            observed_at: as_of,
            location: GeoPoint::new(0.0, 0.0),
            footprint: Footprint::Point,
            raw_payload_digest: String::new(),
            dedup_key: cycle.to_string(),
            credibility: 0.05,
            severity: 0.2,
            headline: String::new(),
        });
        CycleRecord {
            cycle_id: CycleId::from(cycle),
            as_of,
            scores: vec![score("z1", as_of, point_estimate)],
            plan: AllocationPlan {
                plan_id: PlanId::from(format!("plan-{cycle}").as_str()),
                generated_at: as_of,
                assignments: Vec::new(),
                unmet_demand: Vec::new(),
            },
            audit: vec![AuditEntry {
                kind: AuditKind::Suppressed,
                recorded_at: as_of,
                signal,
            }],
            ingest: IngestReport::default(),
        }
    }

    #[test]
    fn identical_recommit_is_replayed() {
        let ledger = InMemoryLedger::new();
        let first = record("c1", at(10), 0.4);
        assert_eq!(
            ledger.commit_cycle(first.clone()).expect("commits"),
            CommitOutcome::Committed
        );
        assert_eq!(
            ledger.commit_cycle(first).expect("replays"),
            CommitOutcome::Replayed
        );
        assert_eq!(
            ledger
                .scores_for_zone(&ZoneId::from("z1"), at(0), at(23))
                .expect("query")
                .len(),
            1
        );
    }

    #[test]
    fn conflicting_record_is_rejected_without_partial_writes() {
        let ledger = InMemoryLedger::new();
        ledger
            .commit_cycle(record("c1", at(10), 0.4))
            .expect("commits");

        let mut clash = record("c2", at(10), 0.9);
        clash.scores.insert(0, score("z0", at(10), 0.1));
        let err = ledger.commit_cycle(clash).expect_err("conflict");
        assert!(matches!(err, LedgerError::Conflict { .. }));

        assert!(ledger
            .scores_for_zone(&ZoneId::from("z0"), at(0), at(23))
            .expect("query")
            .is_empty());
        assert!(ledger.cycle(&CycleId::from("c2")).expect("query").is_none());
    }

    #[test]
    fn queries_respect_time_ranges_and_latest_plan() {
        let ledger = InMemoryLedger::new();
        for (cycle, hour) in [("c1", 8), ("c3", 12), ("c2", 10)] {
            ledger
                .commit_cycle(record(cycle, at(hour), 0.5))
                .expect("commits");
        }

        let window = ledger
            .scores_for_zone(&ZoneId::from("z1"), at(9), at(12))
            .expect("query");
        let times: Vec<DateTime<Utc>> = window.iter().map(|s| s.computed_at).collect();
        assert_eq!(times, vec![at(10), at(12)]);

        let latest = ledger.latest_plan().expect("query").expect("has plan");
        assert_eq!(latest.plan_id.as_str(), "plan-c3");
        assert!(ledger
            .plan(&PlanId::from("plan-c1"))
            .expect("query")
            .is_some());

        let audit = ledger
            .audit_entries(at(8), at(10) + Duration::minutes(1))
            .expect("query");
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].kind, AuditKind::Suppressed);
        assert!(ledger
            .scores_for_zone(&ZoneId::from("z1"), at(12), at(9))
            .expect("query")
            .is_empty());
    }
}
