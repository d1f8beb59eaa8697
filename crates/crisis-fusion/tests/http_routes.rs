mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{harness, payloads};
use crisis_fusion::{engine_router, EngineService, InMemoryLedger};
use serde_json::{json, Value};
use tower::ServiceExt;

fn service() -> Arc<EngineService<InMemoryLedger>> {
    Arc::new(EngineService::new(harness().cycle))
}

async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("route executes")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).expect("serializable")))
        .expect("valid request")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("valid request")
}

#[tokio::test]
async fn queued_signals_feed_the_next_triggered_cycle() {
    let service = service();
    let router = engine_router(Arc::clone(&service));

    let response = send(&router, get("/api/v1/plans/latest")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let batch = serde_json::to_value(payloads()).expect("payloads serialize");
    let response = send(&router, post_json("/api/v1/signals", &batch)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let queued = read_json_body(response).await;
    assert_eq!(queued["queued"], json!(4));

    let response = send(
        &router,
        post_json("/api/v1/cycles", &json!({ "as_of": "2025-03-01T12:00:00Z" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = read_json_body(response).await;
    assert_eq!(outcome["commit"], json!("committed"));
    assert_eq!(outcome["suppressed"], json!(1));
    assert_eq!(outcome["scores"].as_array().map(Vec::len), Some(2));
    assert_eq!(service.pending().expect("queue readable"), 0);

    let plan_id = outcome["plan"]["plan_id"]
        .as_str()
        .expect("plan id present")
        .to_string();
    let response = send(&router, get("/api/v1/plans/latest")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let latest = read_json_body(response).await;
    assert_eq!(latest["plan_id"], json!(plan_id));

    let response = send(&router, get(&format!("/api/v1/plans/{plan_id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn zone_score_history_honours_the_window() {
    let service = service();
    service.enqueue(payloads()).expect("queue accepts payloads");
    service
        .run_cycle(crisis_fusion::CycleInput::at(common::as_of()))
        .await
        .expect("cycle commits");
    let router = engine_router(service);

    let response = send(
        &router,
        get("/api/v1/zones/harbor/scores?from=2025-03-01T00:00:00Z&to=2025-03-02T00:00:00Z"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["zone_id"], json!("harbor"));
    let scores = body["scores"].as_array().expect("scores array");
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0]["low_confidence"], json!(false));

    let response = send(
        &router,
        get("/api/v1/zones/harbor/scores?from=2025-02-01T00:00:00Z&to=2025-02-02T00:00:00Z"),
    )
    .await;
    let body = read_json_body(response).await;
    assert_eq!(body["scores"].as_array().map(Vec::len), Some(0));

    let response = send(&router, get("/api/v1/zones/atlantis/scores")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &router,
        get("/api/v1/audit?from=2025-03-01T00:00:00Z&to=2025-03-02T00:00:00Z"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["entries"][0]["kind"], json!("suppressed"));
}

#[tokio::test]
async fn unknown_plan_ids_are_not_found() {
    let router = engine_router(service());
    let response = send(&router, get("/api/v1/plans/plan-missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json_body(response).await;
    assert_eq!(body["retryable"], json!(false));
}
