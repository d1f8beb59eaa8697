use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::cycle::CycleError;
use crate::domain::{PlanId, ZoneId};
use crate::ledger::{DecisionLedger, LedgerError};
use crate::pool::PoolError;
use crate::service::{CycleRequest, EngineService, EngineServiceError};
use crate::signals::RawPayload;

#[derive(Debug, Default, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Router exposing ingestion, cycle triggering and ledger queries.
pub fn engine_router<L>(service: Arc<EngineService<L>>) -> Router
where
    L: DecisionLedger + 'static,
{
    Router::new()
        .route("/api/v1/signals", post(enqueue_handler::<L>))
        .route("/api/v1/cycles", post(cycle_handler::<L>))
        .route(
            "/api/v1/zones/:zone_id/scores",
            get(zone_scores_handler::<L>),
        )
        .route("/api/v1/plans/latest", get(latest_plan_handler::<L>))
        .route("/api/v1/plans/:plan_id", get(plan_handler::<L>))
        .route("/api/v1/audit", get(audit_handler::<L>))
        .with_state(service)
}

pub(crate) async fn enqueue_handler<L>(
    State(service): State<Arc<EngineService<L>>>,
    axum::Json(payloads): axum::Json<Vec<RawPayload>>,
) -> Response
where
    L: DecisionLedger + 'static,
{
    let received = payloads.len();
    match service.enqueue(payloads) {
        Ok(queued) => {
            let payload = json!({ "received": received, "queued": queued });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn cycle_handler<L>(
    State(service): State<Arc<EngineService<L>>>,
    axum::Json(request): axum::Json<CycleRequest>,
) -> Response
where
    L: DecisionLedger + 'static,
{
    match service.run_cycle(request.into()).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn zone_scores_handler<L>(
    State(service): State<Arc<EngineService<L>>>,
    Path(zone_id): Path<String>,
    Query(window): Query<TimeWindow>,
) -> Response
where
    L: DecisionLedger + 'static,
{
    let zone_id = ZoneId(zone_id);
    match service.zone_scores(&zone_id, window.from, window.to) {
        Ok(scores) => {
            let payload = json!({ "zone_id": zone_id, "scores": scores });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn latest_plan_handler<L>(State(service): State<Arc<EngineService<L>>>) -> Response
where
    L: DecisionLedger + 'static,
{
    match service.latest_plan() {
        Ok(plan) => (StatusCode::OK, axum::Json(plan)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn plan_handler<L>(
    State(service): State<Arc<EngineService<L>>>,
    Path(plan_id): Path<String>,
) -> Response
where
    L: DecisionLedger + 'static,
{
    match service.plan(&PlanId(plan_id)) {
        Ok(plan) => (StatusCode::OK, axum::Json(plan)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn audit_handler<L>(
    State(service): State<Arc<EngineService<L>>>,
    Query(window): Query<TimeWindow>,
) -> Response
where
    L: DecisionLedger + 'static,
{
    let to = window.to.unwrap_or_else(Utc::now);
    let from = window.from.unwrap_or(to - Duration::hours(24));
    match service.audit(from, to) {
        Ok(entries) => {
            let payload = json!({ "from": from, "to": to, "entries": entries });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: EngineServiceError) -> Response {
    let status = match &err {
        EngineServiceError::UnknownZone(_)
        | EngineServiceError::UnknownPlan(_)
        | EngineServiceError::NoPlan => StatusCode::NOT_FOUND,
        EngineServiceError::Cycle(CycleError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        EngineServiceError::Cycle(CycleError::Pool(PoolError::Conflict { .. }))
        | EngineServiceError::Cycle(CycleError::Ledger(LedgerError::Conflict { .. }))
        | EngineServiceError::Ledger(LedgerError::Conflict { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let retryable = matches!(&err, EngineServiceError::Cycle(cycle) if cycle.is_retryable());
    let payload = json!({
        "error": err.to_string(),
        "retryable": retryable,
    });
    (status, axum::Json(payload)).into_response()
}
