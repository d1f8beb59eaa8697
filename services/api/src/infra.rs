use chrono::{DateTime, Utc};
use crisis_fusion::config::{ConfigError, EngineConfig};
use crisis_fusion::cycle::CycleOutcome;
use crisis_fusion::domain::CycleId;
use crisis_fusion::error::AppError;
use crisis_fusion::ledger::CommitOutcome;
use crisis_fusion::reference::{
    load_resources, load_resources_from_path, load_zones, load_zones_from_path, snapshot_time,
};
use crisis_fusion::signals::RawPayload;
use crisis_fusion::{DecisionCycle, EngineService, InMemoryLedger, ResourcePool, ZoneModel};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

pub(crate) const DEMO_ZONES: &str = include_str!("../data/zones.csv");
pub(crate) const DEMO_RESOURCES: &str = include_str!("../data/resources.csv");
pub(crate) const DEMO_SIGNALS: &str = include_str!("../data/signals.jsonl");

pub(crate) type Engine = EngineService<InMemoryLedger>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) last_cycle: Arc<Mutex<Option<CycleSummary>>>,
}

impl AppState {
    pub(crate) fn record(&self, summary: CycleSummary) {
        if let Ok(mut slot) = self.last_cycle.lock() {
            *slot = Some(summary);
        }
    }

    pub(crate) fn last(&self) -> Option<CycleSummary> {
        self.last_cycle.lock().ok().and_then(|slot| slot.clone())
    }
}

/// What `/ready` reports about the most recent scheduled or triggered cycle.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CycleSummary {
    pub(crate) cycle_id: Option<CycleId>,
    pub(crate) commit: Option<CommitOutcome>,
    pub(crate) finished_at: DateTime<Utc>,
    pub(crate) error: Option<String>,
}

impl CycleSummary {
    pub(crate) fn from_outcome(outcome: &CycleOutcome) -> Self {
        Self {
            cycle_id: Some(outcome.cycle_id.clone()),
            commit: Some(outcome.commit),
            finished_at: Utc::now(),
            error: None,
        }
    }

    pub(crate) fn failed(error: String) -> Self {
        Self {
            cycle_id: None,
            commit: None,
            finished_at: Utc::now(),
            error: Some(error),
        }
    }
}

/// Where zone and resource snapshots come from; `None` means the bundled demo data.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReferenceSources {
    pub(crate) zones: Option<PathBuf>,
    pub(crate) resources: Option<PathBuf>,
}

impl ReferenceSources {
    pub(crate) fn load_zone_model(&self, demo_as_of: DateTime<Utc>) -> Result<ZoneModel, AppError> {
        let catalog = match &self.zones {
            Some(path) => load_zones_from_path(path)?,
            None => load_zones(DEMO_ZONES.as_bytes(), demo_as_of)?,
        };
        Ok(ZoneModel::new(catalog))
    }

    pub(crate) fn load_pool(&self, demo_as_of: DateTime<Utc>) -> Result<ResourcePool, AppError> {
        Ok(match &self.resources {
            Some(path) => ResourcePool::new(load_resources_from_path(path)?, snapshot_time(path)?),
            None => ResourcePool::new(load_resources(DEMO_RESOURCES.as_bytes())?, demo_as_of),
        })
    }

    /// Re-reads file-backed snapshots into the live zone model and pool.
    pub(crate) fn refresh(&self, engine: &Engine) -> Result<(), AppError> {
        if let Some(path) = &self.zones {
            let catalog = load_zones_from_path(path)?;
            if catalog.as_of() > engine.cycle().zones().as_of() {
                engine.cycle().zones().replace(catalog);
            }
        }
        if let Some(path) = &self.resources {
            let refreshed_at = snapshot_time(path)?;
            let pool = engine.cycle().pool();
            if refreshed_at > pool.snapshot()?.refreshed_at {
                pool.replace_resources(load_resources_from_path(path)?, refreshed_at)?;
            }
        }
        Ok(())
    }
}

pub(crate) fn build_engine(
    config: &EngineConfig,
    sources: &ReferenceSources,
    demo_as_of: DateTime<Utc>,
) -> Result<Arc<Engine>, AppError> {
    let zones = Arc::new(sources.load_zone_model(demo_as_of)?);
    let pool = Arc::new(sources.load_pool(demo_as_of)?);
    let ledger = Arc::new(InMemoryLedger::new());
    let cycle =
        DecisionCycle::new(config, zones, pool, ledger).map_err(ConfigError::Scoring)?;
    Ok(Arc::new(EngineService::new(cycle)))
}

pub(crate) fn demo_payloads() -> Result<Vec<RawPayload>, AppError> {
    RawPayload::read_json_lines(BufReader::new(DEMO_SIGNALS.as_bytes()))
        .map_err(|err| AppError::Reference(err.into()))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_reference_data_loads() {
        let as_of = parse_timestamp("2025-08-29T14:00:00Z").expect("valid timestamp");
        let sources = ReferenceSources::default();
        let zones = sources.load_zone_model(as_of).expect("demo zones load");
        assert_eq!(zones.snapshot().len(), 4);
        let pool = sources.load_pool(as_of).expect("demo resources load");
        assert_eq!(pool.snapshot().expect("snapshot").resources.len(), 9);
        assert_eq!(demo_payloads().expect("demo signals load").len(), 8);
    }

    #[test]
    fn rejects_non_rfc3339_timestamps() {
        let err = parse_timestamp("yesterday").expect_err("invalid");
        assert!(err.contains("yesterday"));
    }
}
