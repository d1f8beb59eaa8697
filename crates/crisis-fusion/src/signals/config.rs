use crate::domain::SourceKind;
use serde::{Deserialize, Serialize};

/// One value per provider family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerSource<T> {
    pub weather: T,
    pub social: T,
    pub seismic: T,
}

impl<T: Copy> PerSource<T> {
    pub fn get(&self, kind: SourceKind) -> T {
        match kind {
            SourceKind::Weather => self.weather,
            SourceKind::Social => self.social,
            SourceKind::Seismic => self.seismic,
        }
    }
}

/// Normalization and duplicate-suppression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Width of the time bucket folded into the dedup key.
    pub dedup_window_minutes: i64,
    /// Grid size (degrees) locations are snapped to for the dedup key.
    pub location_cell_degrees: f64,
    /// Prior trust per source before corroboration.
    pub prior_trust: PerSource<f64>,
    pub default_weather_radius_km: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            dedup_window_minutes: 30,
            location_cell_degrees: 0.01,
            prior_trust: PerSource {
                weather: 0.9,
                social: 0.4,
                seismic: 0.95,
            },
            default_weather_radius_km: 5.0,
        }
    }
}

/// Credibility revision and suppression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    pub suppression_threshold: f64,
    pub base_weight: f64,
    pub corroboration_weight: f64,
    pub corroboration_radius_km: f64,
    pub corroboration_window_minutes: i64,
    /// Maximum severity gap for two reports to count as compatible.
    pub severity_tolerance: f64,
    pub half_life_hours: PerSource<f64>,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            suppression_threshold: 0.15,
            base_weight: 0.7,
            corroboration_weight: 0.3,
            corroboration_radius_km: 10.0,
            corroboration_window_minutes: 180,
            severity_tolerance: 0.25,
            half_life_hours: PerSource {
                weather: 24.0,
                social: 2.0,
                seismic: 12.0,
            },
        }
    }
}
