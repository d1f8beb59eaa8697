use crate::domain::GeoPoint;
use serde::{Deserialize, Serialize};

/// Opaque routing cost between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TravelEstimate {
    pub distance_km: f64,
    pub minutes: f64,
}

/// Routing collaborator; `None` means no route exists.
pub trait TravelEstimator: Send + Sync {
    fn estimate(&self, from: GeoPoint, to: GeoPoint) -> Option<TravelEstimate>;
}

/// Great-circle distance at a constant speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightLineEstimator {
    speed_kmh: f64,
}

impl StraightLineEstimator {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }
}

impl Default for StraightLineEstimator {
    fn default() -> Self {
        Self::new(40.0)
    }
}

impl TravelEstimator for StraightLineEstimator {
    fn estimate(&self, from: GeoPoint, to: GeoPoint) -> Option<TravelEstimate> {
        if !(self.speed_kmh > 0.0) || !from.is_valid() || !to.is_valid() {
            return None;
        }
        let distance_km = from.distance_km(&to);
        Some(TravelEstimate {
            distance_km,
            minutes: distance_km / self.speed_kmh * 60.0,
        })
    }
}
