use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState, CycleSummary, Engine, ReferenceSources};
use crate::routes::with_engine_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use crisis_fusion::config::AppConfig;
use crisis_fusion::cycle::CycleInput;
use crisis_fusion::error::AppError;
use crisis_fusion::telemetry;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let sources = ReferenceSources {
        zones: args.zones.take(),
        resources: args.resources.take(),
    };
    let engine = build_engine(&config.engine, &sources, Utc::now())?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        last_cycle: Arc::new(Mutex::new(None)),
    };

    if !args.no_scheduler {
        let cadence = Duration::from_secs(config.engine.cycle.cadence_secs);
        tokio::spawn(schedule_cycles(
            Arc::clone(&engine),
            sources,
            app_state.clone(),
            cadence,
        ));
    }

    let app = with_engine_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        cadence_secs = config.engine.cycle.cadence_secs,
        "risk fusion engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs a cycle on every tick. A failed cycle leaves its payloads queued, so the
/// next tick retries them.
async fn schedule_cycles(
    engine: Arc<Engine>,
    sources: ReferenceSources,
    state: AppState,
    cadence: Duration,
) {
    let mut ticker = tokio::time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; wait a full period before cycling.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if let Err(err) = sources.refresh(&engine) {
            warn!(error = %err, "reference refresh failed; keeping previous snapshots");
        }

        match engine.run_cycle(CycleInput::default()).await {
            Ok(outcome) => {
                info!(
                    cycle_id = %outcome.cycle_id,
                    high_risk = crisis_fusion::scoring::high_risk_zones(&outcome.scores).len(),
                    shortfall = outcome.plan.total_shortfall(),
                    "scheduled cycle finished"
                );
                state.record(CycleSummary::from_outcome(&outcome));
            }
            Err(err) => {
                warn!(error = %err, "scheduled cycle failed");
                state.record(CycleSummary::failed(err.to_string()));
            }
        }
    }
}
