//! Versioned availability state for dispatchable resources.

use crate::allocation::AllocationPlan;
use crate::domain::{PlanId, Resource, ResourceId};
use crate::ledger::CommitOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, info};

/// Immutable view handed to a cycle at its start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolSnapshot {
    pub version: u64,
    pub refreshed_at: DateTime<Utc>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("resource pool changed since version {expected} (now {actual}); retry the cycle")]
    Conflict { expected: u64, actual: u64 },
    #[error("plan references unknown resource {0}")]
    UnknownResource(ResourceId),
    #[error("resource {0} is assigned more than once in the plan")]
    DoubleClaim(ResourceId),
    #[error("resource pool lock poisoned")]
    Poisoned,
}

struct PoolState {
    version: u64,
    refreshed_at: DateTime<Utc>,
    resources: BTreeMap<ResourceId, Resource>,
    claims: BTreeMap<ResourceId, PlanId>,
}

/// Resource availability shared between cycles and external dispatch updates.
///
/// Every mutation bumps the version; a plan commits only against the version
/// its snapshot was taken from.
pub struct ResourcePool {
    state: RwLock<PoolState>,
}

impl ResourcePool {
    pub fn new(resources: Vec<Resource>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            state: RwLock::new(PoolState {
                version: 0,
                refreshed_at,
                resources: index(resources),
                claims: BTreeMap::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        let state = self.state.read().map_err(|_| PoolError::Poisoned)?;
        Ok(PoolSnapshot {
            version: state.version,
            refreshed_at: state.refreshed_at,
            resources: state.resources.values().cloned().collect(),
        })
    }

    /// Replaces the resource set from a fresh reference snapshot; claims on
    /// units that disappeared are dropped.
    pub fn replace_resources(
        &self,
        resources: Vec<Resource>,
        refreshed_at: DateTime<Utc>,
    ) -> Result<u64, PoolError> {
        let mut state = self.state.write().map_err(|_| PoolError::Poisoned)?;
        state.resources = index(resources);
        let PoolState {
            resources, claims, ..
        } = &mut *state;
        claims.retain(|id, _| resources.contains_key(id));
        state.refreshed_at = refreshed_at;
        state.version += 1;
        Ok(state.version)
    }

    /// Removes a unit from service, e.g. when dispatch reports it unavailable.
    pub fn withdraw(&self, id: &ResourceId) -> Result<Option<Resource>, PoolError> {
        let mut state = self.state.write().map_err(|_| PoolError::Poisoned)?;
        let removed = state.resources.remove(id);
        if removed.is_some() {
            state.claims.remove(id);
            state.version += 1;
        }
        Ok(removed)
    }

    pub fn claim_of(&self, id: &ResourceId) -> Result<Option<PlanId>, PoolError> {
        let state = self.state.read().map_err(|_| PoolError::Poisoned)?;
        Ok(state.claims.get(id).cloned())
    }

    pub fn claims(&self) -> Result<BTreeMap<ResourceId, PlanId>, PoolError> {
        let state = self.state.read().map_err(|_| PoolError::Poisoned)?;
        Ok(state.claims.clone())
    }

    /// Single commit step for a plan.
    ///
    /// Holds the write lock throughout: checks `expected_version`, runs `write`
    /// (the ledger commit), and replaces all claims with the plan's only when
    /// the write reports `Committed`. A replayed cycle or any error leaves the
    /// pool untouched.
    pub fn commit_with<E, F>(
        &self,
        expected_version: u64,
        plan: &AllocationPlan,
        write: F,
    ) -> Result<CommitOutcome, E>
    where
        F: FnOnce() -> Result<CommitOutcome, E>,
        E: From<PoolError>,
    {
        let mut state = self.state.write().map_err(|_| PoolError::Poisoned)?;
        if state.version != expected_version {
            return Err(PoolError::Conflict {
                expected: expected_version,
                actual: state.version,
            }
            .into());
        }

        let mut claims = BTreeMap::new();
        for resource_id in plan.claimed_resources() {
            if !state.resources.contains_key(resource_id) {
                return Err(PoolError::UnknownResource(resource_id.clone()).into());
            }
            if claims
                .insert(resource_id.clone(), plan.plan_id.clone())
                .is_some()
            {
                return Err(PoolError::DoubleClaim(resource_id.clone()).into());
            }
        }

        let outcome = write()?;
        if outcome == CommitOutcome::Replayed {
            debug!(plan_id = %plan.plan_id, "plan already on record; claims kept");
            return Ok(outcome);
        }

        state.claims = claims;
        state.version += 1;
        info!(
            plan_id = %plan.plan_id,
            claimed = state.claims.len(),
            version = state.version,
            "resource claims committed"
        );
        Ok(outcome)
    }
}

fn index(resources: Vec<Resource>) -> BTreeMap<ResourceId, Resource> {
    resources
        .into_iter()
        .map(|resource| (resource.id.clone(), resource))
        .collect()
}
