use super::geometry::{disc_samples, BoundingBox};
use super::{Zone, ZoneError};
use crate::domain::{Footprint, GeoPoint, Signal, ZoneId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

const INDEX_CELL_DEGREES: f64 = 0.05;
const DISC_RESOLUTION: usize = 24;
/// Bounding boxes spanning more cells than this go to the overflow list.
const MAX_INDEXED_CELLS: i64 = 10_000;

/// Share of a signal's footprint falling inside one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneAssignment {
    pub zone_id: ZoneId,
    pub overlap_weight: f64,
}

/// Validated zone arena with a uniform grid index over bounding boxes.
#[derive(Debug, Clone)]
pub struct ZoneCatalog {
    zones: Vec<Zone>,
    positions: HashMap<ZoneId, usize>,
    grid: HashMap<(i64, i64), Vec<usize>>,
    overflow: Vec<usize>,
    as_of: DateTime<Utc>,
}

impl ZoneCatalog {
    /// Zones are stored sorted by id so every lookup order is deterministic.
    pub fn new(mut zones: Vec<Zone>, as_of: DateTime<Utc>) -> Result<Self, ZoneError> {
        zones.sort_by(|a, b| a.id.cmp(&b.id));

        let mut positions = HashMap::with_capacity(zones.len());
        for (index, zone) in zones.iter().enumerate() {
            validate(zone)?;
            if positions.insert(zone.id.clone(), index).is_some() {
                return Err(ZoneError::DuplicateZone(zone.id.clone()));
            }
        }

        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        let mut overflow = Vec::new();
        for (index, zone) in zones.iter().enumerate() {
            let bbox = zone.boundary.bounding_box();
            let (lat0, lon0) = cell_of(GeoPoint::new(bbox.min_lat, bbox.min_lon));
            let (lat1, lon1) = cell_of(GeoPoint::new(bbox.max_lat, bbox.max_lon));
            let span = (lat1 - lat0 + 1).checked_mul(lon1 - lon0 + 1);
            if span.map_or(true, |cells| cells > MAX_INDEXED_CELLS) {
                overflow.push(index);
                continue;
            }
            for lat in lat0..=lat1 {
                for lon in lon0..=lon1 {
                    grid.entry((lat, lon)).or_default().push(index);
                }
            }
        }

        Ok(Self {
            zones,
            positions,
            grid,
            overflow,
            as_of,
        })
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn get(&self, id: &ZoneId) -> Option<&Zone> {
        self.positions.get(id).map(|index| &self.zones[*index])
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Zones containing `point`, in id order.
    pub fn containing(&self, point: GeoPoint) -> Vec<&Zone> {
        let mut hits: BTreeSet<usize> = BTreeSet::new();
        if let Some(candidates) = self.grid.get(&cell_of(point)) {
            hits.extend(candidates.iter().copied());
        }
        hits.extend(self.overflow.iter().copied());

        hits.into_iter()
            .map(|index| &self.zones[index])
            .filter(|zone| zone.boundary.contains(point))
            .collect()
    }

    /// Maps a signal onto every zone its footprint touches.
    ///
    /// Weights are the share of the footprint inside each zone; where zones
    /// overlap the share is split evenly so the total never exceeds 1.
    pub fn assign(&self, signal: &Signal) -> Result<Vec<ZoneAssignment>, ZoneError> {
        let samples = match signal.footprint() {
            Footprint::Point => vec![signal.location()],
            Footprint::Circle { radius_km } => {
                disc_samples(signal.location(), radius_km, DISC_RESOLUTION)
            }
        };

        let total = samples.len() as f64;
        let mut weights: BTreeMap<ZoneId, f64> = BTreeMap::new();
        for sample in samples {
            let hits = self.containing(sample);
            if hits.is_empty() {
                continue;
            }
            let share = 1.0 / (hits.len() as f64 * total);
            for zone in hits {
                *weights.entry(zone.id.clone()).or_insert(0.0) += share;
            }
        }

        if weights.is_empty() {
            return Err(ZoneError::UnassignedSignal(signal.id().clone()));
        }

        Ok(weights
            .into_iter()
            .map(|(zone_id, overlap_weight)| ZoneAssignment {
                zone_id,
                overlap_weight: overlap_weight.min(1.0),
            })
            .collect())
    }
}

fn validate(zone: &Zone) -> Result<(), ZoneError> {
    if !zone.boundary.is_finite() || zone.boundary.area_km2() <= 0.0 {
        return Err(ZoneError::DegenerateBoundary(zone.id.clone()));
    }
    let BoundingBox {
        min_lat,
        min_lon,
        max_lat,
        max_lon,
    } = zone.boundary.bounding_box();
    let in_range = (-90.0..=90.0).contains(&min_lat)
        && (-90.0..=90.0).contains(&max_lat)
        && (-180.0..=180.0).contains(&min_lon)
        && (-180.0..=180.0).contains(&max_lon);
    if !in_range || min_lat >= max_lat || min_lon >= max_lon {
        return Err(ZoneError::DegenerateBoundary(zone.id.clone()));
    }

    for (field, value) in [
        ("vulnerability_index", zone.vulnerability_index),
        ("baseline_hazard", zone.baseline_hazard),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ZoneError::OutOfRange {
                zone: zone.id.clone(),
                field,
                value,
            });
        }
    }
    Ok(())
}

fn cell_of(point: GeoPoint) -> (i64, i64) {
    (
        (point.lat / INDEX_CELL_DEGREES).floor() as i64,
        (point.lon / INDEX_CELL_DEGREES).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SignalId, SignalParts, SourceKind};
    use crate::zones::ZoneBoundary;
    use chrono::TimeZone;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn cell_zone(id: &str, min_lon: f64, max_lon: f64) -> Zone {
        Zone {
            id: ZoneId::from(id),
            name: id.to_uppercase(),
            boundary: ZoneBoundary::Cell {
                min_lat: 40.0,
                min_lon,
                max_lat: 40.2,
                max_lon,
            },
            population: 1_000,
            vulnerability_index: 0.4,
            baseline_hazard: 0.0,
        }
    }

    fn signal(location: GeoPoint, footprint: Footprint) -> Signal {
        Signal::new(SignalParts {
            id: SignalId::from("sig"),
            source_kind: SourceKind::Weather,
            reporter: "station".to_string(),
            observed_at: as_of(),
            location,
            footprint,
            raw_payload_digest: String::new(),
            dedup_key: String::new(),
            credibility: 0.9,
            severity: 0.8,
            headline: String::new(),
        })
    }

    fn two_zone_catalog() -> ZoneCatalog {
        ZoneCatalog::new(
            vec![cell_zone("west", -74.2, -74.0), cell_zone("east", -74.0, -73.8)],
            as_of(),
        )
        .expect("valid catalog")
    }

    #[test]
    fn point_signal_maps_fully_to_containing_zone() {
        let catalog = two_zone_catalog();
        let assigned = catalog
            .assign(&signal(GeoPoint::new(40.1, -74.1), Footprint::Point))
            .expect("assigned");
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].zone_id.as_str(), "west");
        assert_eq!(assigned[0].overlap_weight, 1.0);
    }

    #[test]
    fn circle_straddling_border_splits_weight() {
        let catalog = two_zone_catalog();
        let assigned = catalog
            .assign(&signal(
                GeoPoint::new(40.1, -74.0),
                Footprint::Circle { radius_km: 3.0 },
            ))
            .expect("assigned");
        assert_eq!(assigned.len(), 2);
        let total: f64 = assigned.iter().map(|a| a.overlap_weight).sum();
        assert!(total <= 1.0 + 1e-9);
        assert!(total > 0.99);
        for assignment in &assigned {
            assert!((assignment.overlap_weight - 0.5).abs() < 0.1);
        }
    }

    #[test]
    fn signals_outside_every_zone_are_unassigned() {
        let catalog = two_zone_catalog();
        let err = catalog
            .assign(&signal(GeoPoint::new(10.0, 10.0), Footprint::Point))
            .expect_err("outside all zones");
        assert_eq!(err, ZoneError::UnassignedSignal(SignalId::from("sig")));
    }

    #[test]
    fn rejects_degenerate_and_duplicate_zones() {
        let mut flat = cell_zone("flat", -74.0, -74.0);
        flat.name = "flat".to_string();
        assert_eq!(
            ZoneCatalog::new(vec![flat], as_of()).expect_err("degenerate"),
            ZoneError::DegenerateBoundary(ZoneId::from("flat"))
        );

        let duplicate = vec![cell_zone("a", -74.2, -74.0), cell_zone("a", -74.0, -73.8)];
        assert_eq!(
            ZoneCatalog::new(duplicate, as_of()).expect_err("duplicate"),
            ZoneError::DuplicateZone(ZoneId::from("a"))
        );

        let mut fragile = cell_zone("fragile", -74.2, -74.0);
        fragile.vulnerability_index = 1.4;
        assert!(matches!(
            ZoneCatalog::new(vec![fragile], as_of()),
            Err(ZoneError::OutOfRange { field: "vulnerability_index", .. })
        ));
    }

    #[test]
    fn cells_beyond_the_globe_are_degenerate() {
        let huge = cell_zone("huge", -1.0e300, 1.0e300);
        assert_eq!(
            ZoneCatalog::new(vec![huge], as_of()).expect_err("out of range"),
            ZoneError::DegenerateBoundary(ZoneId::from("huge"))
        );

        let inverted = cell_zone("inverted", -74.0, -74.2);
        assert_eq!(
            ZoneCatalog::new(vec![inverted], as_of()).expect_err("inverted"),
            ZoneError::DegenerateBoundary(ZoneId::from("inverted"))
        );
    }

    #[test]
    fn zones_spanning_many_index_cells_are_still_found() {
        let wide = Zone {
            boundary: ZoneBoundary::Cell {
                min_lat: -80.0,
                min_lon: -179.0,
                max_lat: 80.0,
                max_lon: 179.0,
            },
            ..cell_zone("wide", -74.2, -74.0)
        };
        let catalog = ZoneCatalog::new(vec![wide], as_of()).expect("valid catalog");
        let hits = catalog.containing(GeoPoint::new(12.0, 100.0));
        assert_eq!(hits.len(), 1);
    }
}
