use crate::domain::{GeoPoint, ResourceKind, ZoneId};
use crate::scoring::RiskScore;
use crate::zones::ZoneCatalog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One value per resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerKind<T> {
    pub personnel: T,
    pub vehicle: T,
    pub shelter: T,
    pub medical: T,
}

impl<T: Copy> PerKind<T> {
    pub fn get(&self, kind: ResourceKind) -> T {
        match kind {
            ResourceKind::Personnel => self.personnel,
            ResourceKind::Vehicle => self.vehicle,
            ResourceKind::Shelter => self.shelter,
            ResourceKind::Medical => self.medical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub kind: ResourceKind,
    pub quantity: u32,
}

/// What a zone needs this cycle and how urgently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDemand {
    pub zone_id: ZoneId,
    pub priority: f64,
    pub population: u64,
    /// Destination used for travel estimates.
    pub location: GeoPoint,
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandConfig {
    /// Zones scoring below this point estimate generate no demand.
    pub activation_threshold: f64,
    /// Units needed per resident at a point estimate of 1.
    pub rates: PerKind<f64>,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.5,
            rates: PerKind {
                personnel: 0.002,
                vehicle: 0.01,
                shelter: 0.05,
                medical: 0.0005,
            },
        }
    }
}

/// Turns risk scores into prioritized demands.
pub struct DemandPlanner {
    config: DemandConfig,
}

impl DemandPlanner {
    pub fn new(config: DemandConfig) -> Self {
        Self { config }
    }

    /// Overrides replace the derived requirements for their zone, even when the
    /// zone sits below the activation threshold; priority always comes from
    /// the score.
    pub fn plan(
        &self,
        catalog: &ZoneCatalog,
        scores: &[RiskScore],
        overrides: &BTreeMap<ZoneId, Vec<Requirement>>,
    ) -> Vec<ZoneDemand> {
        scores
            .iter()
            .filter_map(|score| {
                let zone = catalog.get(&score.zone_id)?;
                let requirements = match overrides.get(&score.zone_id) {
                    Some(explicit) => explicit.clone(),
                    None if score.point_estimate >= self.config.activation_threshold => {
                        self.derive(zone.population, score.point_estimate)
                    }
                    None => Vec::new(),
                };
                let requirements: Vec<Requirement> = requirements
                    .into_iter()
                    .filter(|requirement| requirement.quantity > 0)
                    .collect();
                if requirements.is_empty() {
                    return None;
                }
                Some(ZoneDemand {
                    zone_id: zone.id.clone(),
                    priority: score.point_estimate,
                    population: zone.population,
                    location: zone.centroid(),
                    requirements,
                })
            })
            .collect()
    }

    fn derive(&self, population: u64, point_estimate: f64) -> Vec<Requirement> {
        ResourceKind::ordered()
            .into_iter()
            .map(|kind| {
                let rate = self.config.rates.get(kind).max(0.0);
                // Absorb float noise so exact products do not round up.
                let quantity = (population as f64 * rate * point_estimate - 1e-9)
                    .ceil()
                    .max(0.0);
                Requirement {
                    kind,
                    quantity: quantity.min(u32::MAX as f64) as u32,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::RiskLevel;
    use crate::zones::{Zone, ZoneBoundary};
    use chrono::{TimeZone, Utc};

    fn catalog() -> ZoneCatalog {
        let zone = |id: &str, population: u64| Zone {
            id: ZoneId::from(id),
            name: id.to_string(),
            boundary: ZoneBoundary::Cell {
                min_lat: 0.0,
                min_lon: 0.0,
                max_lat: 1.0,
                max_lon: 1.0,
            },
            population,
            vulnerability_index: 0.5,
            baseline_hazard: 0.0,
        };
        ZoneCatalog::new(
            vec![zone("calm", 1_000), zone("hot", 10_000)],
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
                .single()
                .expect("valid timestamp"),
        )
        .expect("valid catalog")
    }

    fn score(zone: &str, point_estimate: f64) -> RiskScore {
        RiskScore {
            zone_id: ZoneId::from(zone),
            computed_at: Utc
                .with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
            point_estimate,
            lower_bound: point_estimate,
            upper_bound: point_estimate,
            hazard: None,
            exposure: 0.0,
            vulnerability: 0.0,
            risk_level: RiskLevel::from_estimate(point_estimate),
            contributing_signal_ids: Vec::new(),
            low_confidence: false,
        }
    }

    #[test]
    fn derives_requirements_above_threshold_only() {
        let planner = DemandPlanner::new(DemandConfig::default());
        let demands = planner.plan(
            &catalog(),
            &[score("calm", 0.2), score("hot", 0.8)],
            &BTreeMap::new(),
        );
        assert_eq!(demands.len(), 1);
        let hot = &demands[0];
        assert_eq!(hot.zone_id.as_str(), "hot");
        assert_eq!(hot.priority, 0.8);
        let quantities: Vec<(ResourceKind, u32)> = hot
            .requirements
            .iter()
            .map(|r| (r.kind, r.quantity))
            .collect();
        assert_eq!(
            quantities,
            vec![
                (ResourceKind::Personnel, 16),
                (ResourceKind::Vehicle, 80),
                (ResourceKind::Shelter, 400),
                (ResourceKind::Medical, 4),
            ]
        );
    }

    #[test]
    fn overrides_replace_derived_requirements() {
        let planner = DemandPlanner::new(DemandConfig::default());
        let mut overrides = BTreeMap::new();
        overrides.insert(
            ZoneId::from("calm"),
            vec![Requirement {
                kind: ResourceKind::Vehicle,
                quantity: 3,
            }],
        );
        let demands = planner.plan(&catalog(), &[score("calm", 0.2)], &overrides);
        assert_eq!(demands.len(), 1);
        assert_eq!(demands[0].priority, 0.2);
        assert_eq!(
            demands[0].requirements,
            vec![Requirement {
                kind: ResourceKind::Vehicle,
                quantity: 3
            }]
        );
    }
}
