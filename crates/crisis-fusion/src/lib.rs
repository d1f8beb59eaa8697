//! Risk fusion and resource allocation for disaster-response coordination.
//!
//! Heterogeneous hazard signals are normalized, weighted by credibility,
//! assigned to geographic zones and fused into banded risk scores. Scores
//! drive a deterministic allocation of scarce resources, and every cycle is
//! committed to an append-only decision ledger.

pub mod allocation;
pub mod config;
pub mod cycle;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod pool;
pub mod reference;
pub mod router;
pub mod scoring;
pub mod service;
pub mod signals;
pub mod telemetry;
pub mod zones;

pub use cycle::{CycleError, CycleInput, CycleOutcome, DecisionCycle};
pub use ledger::{DecisionLedger, InMemoryLedger};
pub use pool::ResourcePool;
pub use router::engine_router;
pub use service::EngineService;
pub use zones::ZoneModel;
