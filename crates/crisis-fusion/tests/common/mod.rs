#![allow(dead_code)]

use std::io::BufReader;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use crisis_fusion::config::EngineConfig;
use crisis_fusion::domain::SourceKind;
use crisis_fusion::reference::{load_resources, load_zones};
use crisis_fusion::signals::RawPayload;
use crisis_fusion::{DecisionCycle, InMemoryLedger, ResourcePool, ZoneModel};
use serde_json::json;

pub const ZONES_CSV: &[u8] = include_bytes!("../fixtures/zones.csv");
pub const RESOURCES_CSV: &[u8] = include_bytes!("../fixtures/resources.csv");
pub const SIGNALS_JSONL: &[u8] = include_bytes!("../fixtures/signals.jsonl");

pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn zone_model(refreshed_at: DateTime<Utc>) -> Arc<ZoneModel> {
    let catalog = load_zones(ZONES_CSV, refreshed_at).expect("zone fixture loads");
    Arc::new(ZoneModel::new(catalog))
}

pub fn resource_pool(refreshed_at: DateTime<Utc>) -> Arc<ResourcePool> {
    let resources = load_resources(RESOURCES_CSV).expect("resource fixture loads");
    Arc::new(ResourcePool::new(resources, refreshed_at))
}

pub fn payloads() -> Vec<RawPayload> {
    RawPayload::read_json_lines(BufReader::new(SIGNALS_JSONL)).expect("signal fixture loads")
}

pub struct Harness {
    pub cycle: DecisionCycle<InMemoryLedger>,
    pub zones: Arc<ZoneModel>,
    pub pool: Arc<ResourcePool>,
    pub ledger: Arc<InMemoryLedger>,
}

pub fn harness_with(config: EngineConfig, reference_at: DateTime<Utc>) -> Harness {
    let zones = zone_model(reference_at);
    let pool = resource_pool(reference_at);
    let ledger = Arc::new(InMemoryLedger::new());
    let cycle = DecisionCycle::new(
        &config,
        Arc::clone(&zones),
        Arc::clone(&pool),
        Arc::clone(&ledger),
    )
    .expect("default config is valid");
    Harness {
        cycle,
        zones,
        pool,
        ledger,
    }
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), as_of() - Duration::hours(1))
}

pub fn stray_weather_alert() -> RawPayload {
    RawPayload::new(
        SourceKind::Weather,
        json!({
            "id": "nws-far",
            "station": "PGUM",
            "event": "Typhoon Watch",
            "severity": "severe",
            "lat": 13.48,
            "lon": 144.79,
            "observed_at": "2025-03-01T11:00:00Z"
        }),
    )
}

pub fn locationless_report() -> RawPayload {
    RawPayload::new(
        SourceKind::Social,
        json!({
            "id": "tw-nowhere",
            "author": "@lost",
            "text": "water everywhere",
            "created_at": "2025-03-01T11:50:00Z"
        }),
    )
}
