use crate::signals::PerSource;
use serde::{Deserialize, Serialize};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Relative influence of each component in the fused estimate; must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub hazard: f64,
    pub exposure: f64,
    pub vulnerability: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            hazard: 1.0 / 3.0,
            exposure: 1.0 / 3.0,
            vulnerability: 1.0 / 3.0,
        }
    }
}

impl FusionWeights {
    pub fn total(&self) -> f64 {
        self.hazard + self.exposure + self.vulnerability
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// `Σ w·c`
    #[default]
    Arithmetic,
    /// `Π c^w` with every component floored.
    Geometric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardAggregation {
    Max,
    /// `1 - exp(-k·Σ w_i)`
    #[default]
    DecayedSum,
}

/// Shape of the uncertainty band around the point estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub min_half_width: f64,
    pub max_half_width: f64,
    pub count_weight: f64,
    pub dispersion_weight: f64,
    pub staleness_weight: f64,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            min_half_width: 0.02,
            max_half_width: 0.40,
            count_weight: 0.5,
            dispersion_weight: 0.25,
            staleness_weight: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: FusionWeights,
    pub policy: FusionPolicy,
    pub aggregation: HazardAggregation,
    pub decay_k: f64,
    pub reference_population: f64,
    pub component_floor: f64,
    pub uncertainty: UncertaintyConfig,
    /// Half-lives used to judge how stale the newest signal in a zone is.
    pub staleness_half_life_hours: PerSource<f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            policy: FusionPolicy::default(),
            aggregation: HazardAggregation::default(),
            decay_k: 1.5,
            reference_population: 10_000.0,
            component_floor: 0.01,
            uncertainty: UncertaintyConfig::default(),
            staleness_half_life_hours: PerSource {
                weather: 24.0,
                social: 2.0,
                seismic: 12.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringConfigError {
    #[error("fusion weights must sum to 1 (got {0:.4})")]
    WeightsDoNotSumToOne(f64),
    #[error("fusion weight '{0}' must be non-negative")]
    NegativeWeight(&'static str),
    #[error("{field} must be positive (got {value})")]
    NonPositive { field: &'static str, value: f64 },
    #[error("uncertainty half-widths must satisfy 0 <= min <= max <= 1")]
    InvalidBand,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ScoringConfigError> {
        for (name, weight) in [
            ("hazard", self.weights.hazard),
            ("exposure", self.weights.exposure),
            ("vulnerability", self.weights.vulnerability),
        ] {
            if !(weight >= 0.0) {
                return Err(ScoringConfigError::NegativeWeight(name));
            }
        }
        let total = self.weights.total();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ScoringConfigError::WeightsDoNotSumToOne(total));
        }

        for (field, value) in [
            ("decay_k", self.decay_k),
            ("reference_population", self.reference_population),
            ("component_floor", self.component_floor),
        ] {
            if !(value > 0.0) {
                return Err(ScoringConfigError::NonPositive { field, value });
            }
        }

        let band = &self.uncertainty;
        if !(0.0..=1.0).contains(&band.min_half_width)
            || !(0.0..=1.0).contains(&band.max_half_width)
            || band.min_half_width > band.max_half_width
        {
            return Err(ScoringConfigError::InvalidBand);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ScoringConfig::default()
            .validate()
            .expect("default scoring config is valid");
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let config = ScoringConfig {
            weights: FusionWeights {
                hazard: 0.5,
                exposure: 0.5,
                vulnerability: 0.5,
            },
            ..ScoringConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ScoringConfigError::WeightsDoNotSumToOne(total)) if (total - 1.5).abs() < 1e-9
        ));
    }

    #[test]
    fn rejects_inverted_band() {
        let config = ScoringConfig {
            uncertainty: UncertaintyConfig {
                min_half_width: 0.5,
                max_half_width: 0.1,
                ..UncertaintyConfig::default()
            },
            ..ScoringConfig::default()
        };
        assert_eq!(config.validate(), Err(ScoringConfigError::InvalidBand));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ScoringConfig =
            serde_json::from_str(r#"{ "policy": "geometric", "decay_k": 2.0 }"#)
                .expect("partial config parses");
        assert_eq!(config.policy, FusionPolicy::Geometric);
        assert_eq!(config.decay_k, 2.0);
        assert_eq!(config.reference_population, 10_000.0);
    }
}
