//! Constrained assignment of scarce resources to prioritized zone demand.
//!
//! Allocation runs in two phases. A greedy pass walks zones in priority order
//! and gives each required kind the best-fitting feasible unit: the smallest
//! one covering what is still needed, else the largest available. This makes
//! the plan priority-monotone. A local search then applies exchange moves in
//! two tiers. Shortfall moves raise some zone's fulfilment without lowering
//! any other zone's, so the priority-weighted shortfall strictly drops. Travel
//! moves keep every quantity and strictly lower the priority-weighted travel
//! time.

mod demand;
mod plan;
mod travel;

pub use demand::{DemandConfig, DemandPlanner, PerKind, Requirement, ZoneDemand};
pub use plan::{AllocationPlan, Assignment, UnmetDemand};
pub use travel::{StraightLineEstimator, TravelEstimate, TravelEstimator};

use crate::domain::{GeoPoint, PlanId, Resource, ResourceKind};
use crate::signals::digest_hex;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const COST_EPSILON: f64 = 1e-9;

/// How zones with equal priority are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    PopulationThenZoneId,
    ZoneId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub tie_break: TieBreak,
    /// Upper bound on improvement sweeps in the exchange phase.
    pub max_search_passes: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::default(),
            max_search_passes: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Leg {
    departure: DateTime<Utc>,
    eta: DateTime<Utc>,
    minutes: f64,
    distance_km: f64,
}

#[derive(Debug, Clone)]
struct Slot {
    resource: usize,
    demand: usize,
    kind: ResourceKind,
    quantity: u32,
    leg: Leg,
}

/// Requested quantities per `(demand, kind)`, with the keys in priority order.
struct Needs {
    order: Vec<(usize, ResourceKind)>,
    requested: BTreeMap<(usize, ResourceKind), u32>,
}

impl Needs {
    fn shortfall(&self, slots: &[Slot], demand: usize, kind: ResourceKind) -> u32 {
        let requested = self.requested.get(&(demand, kind)).copied().unwrap_or(0);
        requested.saturating_sub(fulfilled(slots, demand, kind))
    }
}

/// Search state shared by every move.
struct Search<'a> {
    pool: &'a [&'a Resource],
    demands: &'a [ZoneDemand],
    needs: &'a Needs,
    as_of: DateTime<Utc>,
    travel: &'a dyn TravelEstimator,
}

impl Search<'_> {
    fn leg(&self, resource: usize, demand: usize) -> Option<Leg> {
        feasible_leg(
            self.pool[resource],
            self.demands[demand].location,
            self.as_of,
            self.travel,
        )
    }

    fn weight(&self, slot: &Slot) -> f64 {
        1.0 + self.demands[slot.demand].priority.max(0.0)
    }
}

pub struct ResourceAllocator {
    config: AllocatorConfig,
}

impl ResourceAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        Self { config }
    }

    pub fn allocate(
        &self,
        resources: &[Resource],
        demands: &[ZoneDemand],
        as_of: DateTime<Utc>,
        travel: &dyn TravelEstimator,
    ) -> AllocationPlan {
        let mut pool: Vec<&Resource> = resources.iter().collect();
        pool.sort_by(|a, b| a.id.cmp(&b.id));
        pool.dedup_by(|a, b| a.id == b.id);

        let mut needs = Needs {
            order: Vec::new(),
            requested: BTreeMap::new(),
        };
        for demand_index in self.priority_order(demands) {
            for (kind, requested) in merged_requirements(&demands[demand_index]) {
                needs.order.push((demand_index, kind));
                needs.requested.insert((demand_index, kind), requested);
            }
        }

        let search = Search {
            pool: &pool,
            demands,
            needs: &needs,
            as_of,
            travel,
        };
        let mut used = vec![false; pool.len()];
        let mut slots: Vec<Slot> = Vec::new();

        fill_shortfalls(&search, &mut slots, &mut used);
        let passes = self.improve(&search, &mut slots, &mut used);

        let mut unmet: Vec<UnmetDemand> = needs
            .order
            .iter()
            .filter_map(|&(demand, kind)| {
                let requested = needs.requested.get(&(demand, kind)).copied().unwrap_or(0);
                let fulfilled = fulfilled(&slots, demand, kind).min(requested);
                (fulfilled < requested).then(|| UnmetDemand {
                    zone_id: demands[demand].zone_id.clone(),
                    kind,
                    requested,
                    fulfilled,
                    shortfall: requested - fulfilled,
                })
            })
            .collect();
        debug!(
            assignments = slots.len(),
            unmet = unmet.len(),
            passes,
            "allocation complete"
        );

        let mut assignments: Vec<Assignment> = slots
            .into_iter()
            .map(|slot| Assignment {
                resource_id: pool[slot.resource].id.clone(),
                zone_id: demands[slot.demand].zone_id.clone(),
                kind: slot.kind,
                quantity: slot.quantity,
                departure: slot.leg.departure,
                eta: slot.leg.eta,
                travel_minutes: slot.leg.minutes,
                distance_km: slot.leg.distance_km,
            })
            .collect();
        assignments.sort_by(|a, b| {
            (&a.zone_id, a.kind, &a.resource_id).cmp(&(&b.zone_id, b.kind, &b.resource_id))
        });
        unmet.sort_by(|a, b| (&a.zone_id, a.kind).cmp(&(&b.zone_id, b.kind)));

        AllocationPlan {
            plan_id: plan_id(&pool, demands, as_of),
            generated_at: as_of,
            assignments,
            unmet_demand: unmet,
        }
    }

    fn priority_order(&self, demands: &[ZoneDemand]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..demands.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&demands[a], &demands[b]);
            let by_priority = b.priority.total_cmp(&a.priority);
            let tie = match self.config.tie_break {
                TieBreak::PopulationThenZoneId => b
                    .population
                    .cmp(&a.population)
                    .then_with(|| a.zone_id.cmp(&b.zone_id)),
                TieBreak::ZoneId => a.zone_id.cmp(&b.zone_id),
            };
            by_priority.then(tie)
        });
        order
    }

    /// First-improvement search; returns the number of sweeps run.
    fn improve(&self, search: &Search<'_>, slots: &mut Vec<Slot>, used: &mut [bool]) -> usize {
        for pass in 0..self.config.max_search_passes {
            let mut improved = swap_to_cover(search, slots);
            improved |= substitute_and_redeploy(search, slots, used);
            improved |= fill_shortfalls(search, slots, used);
            improved |= swap_for_travel(search, slots);
            improved |= replace_for_travel(search, slots, used);

            if !improved {
                return pass + 1;
            }
        }
        self.config.max_search_passes
    }
}

/// Greedy step: serves every need in priority order from unused units.
fn fill_shortfalls(search: &Search<'_>, slots: &mut Vec<Slot>, used: &mut [bool]) -> bool {
    let mut added = false;
    for &(demand, kind) in &search.needs.order {
        let mut remaining = search.needs.shortfall(slots, demand, kind);
        while remaining > 0 {
            let Some((resource, leg)) = best_fit(search, used, kind, remaining, demand) else {
                break;
            };
            used[resource] = true;
            let quantity = search.pool[resource].capacity.min(remaining);
            remaining -= quantity;
            slots.push(Slot {
                resource,
                demand,
                kind,
                quantity,
                leg,
            });
            added = true;
        }
    }
    added
}

/// Gives slot `b` the unit of slot `a` when that unit covers more of `b`'s
/// need and `a` keeps its quantity with `b`'s unit.
fn swap_to_cover(search: &Search<'_>, slots: &mut [Slot]) -> bool {
    let mut improved = false;
    for a in 0..slots.len() {
        for b in 0..slots.len() {
            if a == b || slots[a].kind != slots[b].kind || slots[a].demand == slots[b].demand {
                continue;
            }
            let (ra, rb) = (slots[a].resource, slots[b].resource);
            if search.pool[rb].capacity < slots[a].quantity {
                continue;
            }
            let short_b = search.needs.shortfall(slots, slots[b].demand, slots[b].kind);
            let grown = search.pool[ra]
                .capacity
                .min(slots[b].quantity.saturating_add(short_b));
            if grown <= slots[b].quantity {
                continue;
            }
            let (Some(leg_a), Some(leg_b)) =
                (search.leg(rb, slots[a].demand), search.leg(ra, slots[b].demand))
            else {
                continue;
            };
            slots[a].resource = rb;
            slots[a].leg = leg_a;
            slots[b].resource = ra;
            slots[b].leg = leg_b;
            slots[b].quantity = grown;
            improved = true;
        }
    }
    improved
}

/// Moves a slot onto an unused unit that still covers its quantity, freeing
/// the original unit for the highest-priority need it can reach.
fn substitute_and_redeploy(search: &Search<'_>, slots: &mut Vec<Slot>, used: &mut [bool]) -> bool {
    let mut improved = false;
    for index in 0..slots.len() {
        let view: &[Slot] = slots;
        let (freed, kind, home, quantity) = (
            view[index].resource,
            view[index].kind,
            view[index].demand,
            view[index].quantity,
        );
        let target = search.needs.order.iter().find_map(|&(demand, need_kind)| {
            if need_kind != kind || demand == home {
                return None;
            }
            let shortfall = search.needs.shortfall(view, demand, kind);
            if shortfall == 0 {
                return None;
            }
            search.leg(freed, demand).map(|leg| (demand, shortfall, leg))
        });
        let Some((demand, shortfall, redeployed_leg)) = target else {
            continue;
        };

        let substitute = (0..search.pool.len())
            .filter(|&candidate| {
                !used[candidate]
                    && search.pool[candidate].kind == kind
                    && search.pool[candidate].capacity >= quantity
            })
            .find_map(|candidate| search.leg(candidate, home).map(|leg| (candidate, leg)));
        let Some((substitute, substitute_leg)) = substitute else {
            continue;
        };

        used[substitute] = true;
        slots[index].resource = substitute;
        slots[index].leg = substitute_leg;
        slots.push(Slot {
            resource: freed,
            demand,
            kind,
            quantity: search.pool[freed].capacity.min(shortfall),
            leg: redeployed_leg,
        });
        improved = true;
    }
    improved
}

/// Swaps the units of two same-kind slots when both still cover their
/// quantities and the weighted travel time drops.
fn swap_for_travel(search: &Search<'_>, slots: &mut [Slot]) -> bool {
    let mut improved = false;
    for a in 0..slots.len() {
        for b in (a + 1)..slots.len() {
            if slots[a].kind != slots[b].kind || slots[a].demand == slots[b].demand {
                continue;
            }
            let (ra, rb) = (slots[a].resource, slots[b].resource);
            if search.pool[ra].capacity < slots[b].quantity
                || search.pool[rb].capacity < slots[a].quantity
            {
                continue;
            }
            let (Some(leg_a), Some(leg_b)) =
                (search.leg(rb, slots[a].demand), search.leg(ra, slots[b].demand))
            else {
                continue;
            };
            let (wa, wb) = (search.weight(&slots[a]), search.weight(&slots[b]));
            let before = slots[a].leg.minutes * wa + slots[b].leg.minutes * wb;
            let after = leg_a.minutes * wa + leg_b.minutes * wb;
            if after < before - COST_EPSILON {
                slots[a].resource = rb;
                slots[a].leg = leg_a;
                slots[b].resource = ra;
                slots[b].leg = leg_b;
                improved = true;
            }
        }
    }
    improved
}

/// Replaces a slot's unit by a closer unused one of sufficient capacity.
fn replace_for_travel(search: &Search<'_>, slots: &mut [Slot], used: &mut [bool]) -> bool {
    let mut improved = false;
    for slot in slots.iter_mut() {
        let (kind, quantity) = (slot.kind, slot.quantity);
        let current = slot.leg.minutes * search.weight(slot);
        let slot_weight = search.weight(slot);
        let replacement = (0..search.pool.len())
            .filter(|&index| {
                !used[index]
                    && search.pool[index].kind == kind
                    && search.pool[index].capacity >= quantity
            })
            .filter_map(|index| search.leg(index, slot.demand).map(|leg| (index, leg)))
            .filter(|(_, leg)| leg.minutes * slot_weight < current - COST_EPSILON)
            .min_by(|a, b| {
                a.1.minutes
                    .total_cmp(&b.1.minutes)
                    .then_with(|| a.0.cmp(&b.0))
            });
        if let Some((index, leg)) = replacement {
            used[slot.resource] = false;
            used[index] = true;
            slot.resource = index;
            slot.leg = leg;
            improved = true;
        }
    }
    improved
}

fn fulfilled(slots: &[Slot], demand: usize, kind: ResourceKind) -> u32 {
    slots
        .iter()
        .filter(|slot| slot.demand == demand && slot.kind == kind)
        .fold(0u32, |total, slot| total.saturating_add(slot.quantity))
}

fn merged_requirements(demand: &ZoneDemand) -> BTreeMap<ResourceKind, u32> {
    let mut merged = BTreeMap::new();
    for requirement in &demand.requirements {
        let entry = merged.entry(requirement.kind).or_insert(0u32);
        *entry = entry.saturating_add(requirement.quantity);
    }
    merged
}

/// Smallest feasible unit covering `remaining`, else the largest one; ties go
/// to the earliest arrival, then the lowest id.
fn best_fit(
    search: &Search<'_>,
    used: &[bool],
    kind: ResourceKind,
    remaining: u32,
    demand: usize,
) -> Option<(usize, Leg)> {
    let candidates: Vec<(usize, Leg)> = (0..search.pool.len())
        .filter(|&index| {
            !used[index] && search.pool[index].kind == kind && search.pool[index].capacity > 0
        })
        .filter_map(|index| search.leg(index, demand).map(|leg| (index, leg)))
        .collect();
    let capacity = |index: usize| search.pool[index].capacity;

    let covering = candidates
        .iter()
        .filter(|(index, _)| capacity(*index) >= remaining)
        .min_by(|a, b| {
            capacity(a.0)
                .cmp(&capacity(b.0))
                .then(a.1.eta.cmp(&b.1.eta))
                .then(a.0.cmp(&b.0))
        });
    covering
        .or_else(|| {
            candidates.iter().min_by(|a, b| {
                capacity(b.0)
                    .cmp(&capacity(a.0))
                    .then(a.1.eta.cmp(&b.1.eta))
                    .then(a.0.cmp(&b.0))
            })
        })
        .copied()
}

/// Departs at `max(as_of, available_from)`; feasible only when a route exists
/// and the unit arrives before its window closes.
fn feasible_leg(
    resource: &Resource,
    destination: GeoPoint,
    as_of: DateTime<Utc>,
    travel: &dyn TravelEstimator,
) -> Option<Leg> {
    let estimate = travel.estimate(resource.location, destination)?;
    let millis = (estimate.minutes * 60_000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
        return None;
    }
    let departure = as_of.max(resource.available_from);
    let eta = departure.checked_add_signed(Duration::milliseconds(millis as i64))?;
    (eta <= resource.available_until).then_some(Leg {
        departure,
        eta,
        minutes: estimate.minutes,
        distance_km: estimate.distance_km,
    })
}

fn plan_id(pool: &[&Resource], demands: &[ZoneDemand], as_of: DateTime<Utc>) -> PlanId {
    let material = serde_json::to_vec(&(as_of, demands, pool)).unwrap_or_default();
    PlanId(format!("plan-{}", &digest_hex(&material)[..16]))
}
