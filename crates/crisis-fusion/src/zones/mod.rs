//! Static spatial partition that signals are mapped into.

mod catalog;
pub mod geometry;

pub use catalog::{ZoneAssignment, ZoneCatalog};
pub use geometry::ZoneBoundary;

use crate::domain::{GeoPoint, SignalId, ZoneId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Long-lived scoring unit built from reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub boundary: ZoneBoundary,
    pub population: u64,
    pub vulnerability_index: f64,
    #[serde(default)]
    pub baseline_hazard: f64,
}

impl Zone {
    pub fn centroid(&self) -> GeoPoint {
        self.boundary.centroid()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ZoneError {
    #[error("zone {0} has a degenerate boundary")]
    DegenerateBoundary(ZoneId),
    #[error("zone {0} appears more than once in the catalog")]
    DuplicateZone(ZoneId),
    #[error("zone {zone} has {field} {value} outside [0, 1]")]
    OutOfRange {
        zone: ZoneId,
        field: &'static str,
        value: f64,
    },
    #[error("signal {0} lies outside every zone")]
    UnassignedSignal(SignalId),
}

/// Holder for the current catalog; refreshes swap the whole snapshot so a
/// running cycle never sees a partial update.
pub struct ZoneModel {
    current: RwLock<Arc<ZoneCatalog>>,
}

impl ZoneModel {
    pub fn new(catalog: ZoneCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<ZoneCatalog> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, catalog: ZoneCatalog) {
        let next = Arc::new(catalog);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.snapshot().as_of()
    }
}
