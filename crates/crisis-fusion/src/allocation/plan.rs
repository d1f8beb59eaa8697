use crate::domain::{PlanId, ResourceId, ResourceKind, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resource dispatched to one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub resource_id: ResourceId,
    pub zone_id: ZoneId,
    pub kind: ResourceKind,
    pub quantity: u32,
    pub departure: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    pub travel_minutes: f64,
    pub distance_km: f64,
}

/// Demand the plan could not cover; `requested == fulfilled + shortfall`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmetDemand {
    pub zone_id: ZoneId,
    pub kind: ResourceKind,
    pub requested: u32,
    pub fulfilled: u32,
    pub shortfall: u32,
}

/// Immutable output of one allocation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub plan_id: PlanId,
    pub generated_at: DateTime<Utc>,
    pub assignments: Vec<Assignment>,
    pub unmet_demand: Vec<UnmetDemand>,
}

impl AllocationPlan {
    pub fn fulfilled(&self, zone_id: &ZoneId, kind: ResourceKind) -> u32 {
        self.assignments
            .iter()
            .filter(|a| &a.zone_id == zone_id && a.kind == kind)
            .map(|a| a.quantity)
            .sum()
    }

    pub fn assignment_for(&self, resource_id: &ResourceId) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|assignment| &assignment.resource_id == resource_id)
    }

    pub fn claimed_resources(&self) -> impl Iterator<Item = &ResourceId> {
        self.assignments.iter().map(|assignment| &assignment.resource_id)
    }

    pub fn total_shortfall(&self) -> u64 {
        self.unmet_demand
            .iter()
            .map(|unmet| u64::from(unmet.shortfall))
            .sum()
    }
}
