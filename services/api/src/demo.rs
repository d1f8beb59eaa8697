use crate::infra::{build_engine, demo_payloads, parse_timestamp, Engine, ReferenceSources};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use crisis_fusion::config::{AppConfig, EngineConfig};
use crisis_fusion::cycle::{CycleInput, CycleOutcome};
use crisis_fusion::error::AppError;
use crisis_fusion::ledger::DecisionLedger;
use crisis_fusion::reference::load_payloads_from_path;
use crisis_fusion::scoring::high_risk_zones;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct CycleArgs {
    /// Zone snapshot CSV (id,name,population,vulnerability_index,baseline_hazard,boundary)
    #[arg(long)]
    pub(crate) zones: PathBuf,
    /// Resource snapshot CSV (id,kind,lat,lon,capacity,available_from,available_until)
    #[arg(long)]
    pub(crate) resources: PathBuf,
    /// Raw payloads as JSON lines; omit to score on reference data alone
    #[arg(long)]
    pub(crate) signals: Option<PathBuf>,
    /// Cycle timestamp (RFC 3339). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_timestamp)]
    pub(crate) as_of: Option<DateTime<Utc>>,
    /// Print the full outcome as JSON instead of the text report
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print the full outcome as JSON instead of the text report
    #[arg(long)]
    pub(crate) json: bool,
    /// Skip the replay and ledger query walkthrough after the first cycle
    #[arg(long)]
    pub(crate) skip_replay: bool,
}

pub(crate) async fn run_cycle_report(args: CycleArgs) -> Result<(), AppError> {
    let CycleArgs {
        zones,
        resources,
        signals,
        as_of,
        json,
    } = args;

    let config = AppConfig::load()?;
    let sources = ReferenceSources {
        zones: Some(zones),
        resources: Some(resources),
    };
    let engine = build_engine(&config.engine, &sources, Utc::now())?;
    let payloads = match signals {
        Some(path) => load_payloads_from_path(path)?,
        None => Vec::new(),
    };

    let outcome = engine
        .cycle()
        .run(payloads, CycleInput { as_of, ..CycleInput::default() })
        .await?;
    print_outcome(&outcome, json)
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let as_of = parse_timestamp("2025-08-29T14:00:00Z").map_err(AppError::InvalidRequest)?;
    let engine = build_engine(
        &EngineConfig::default(),
        &ReferenceSources::default(),
        as_of - Duration::hours(1),
    )?;
    engine
        .enqueue(demo_payloads()?)
        .map_err(|err| AppError::InvalidRequest(err.to_string()))?;

    if !args.json {
        println!("Flood response demo: levee overtopping in Riverside Flats");
    }
    let outcome = run_queued(&engine, as_of).await?;
    print_outcome(&outcome, args.json)?;

    if args.skip_replay || args.json {
        return Ok(());
    }

    println!("\nReplaying the same inputs");
    engine
        .enqueue(demo_payloads()?)
        .map_err(|err| AppError::InvalidRequest(err.to_string()))?;
    let replay = run_queued(&engine, as_of).await?;
    println!(
        "- cycle {} -> {} (ledger unchanged)",
        replay.cycle_id,
        commit_label(&replay)
    );

    let ledger = engine.cycle().ledger();
    println!("\nLedger history");
    for score in &outcome.scores {
        let history = ledger.scores_for_zone(&score.zone_id, as_of - Duration::days(1), as_of)?;
        println!("- {}: {} score(s) on record", score.zone_id, history.len());
    }
    let audit = ledger.audit_entries(as_of - Duration::days(1), as_of)?;
    for entry in &audit {
        println!("- audit {:?}: {}", entry.kind, entry.entity_id());
    }
    Ok(())
}

async fn run_queued(engine: &Engine, as_of: DateTime<Utc>) -> Result<CycleOutcome, AppError> {
    engine
        .run_cycle(CycleInput::at(as_of))
        .await
        .map_err(|err| match err {
            crisis_fusion::service::EngineServiceError::Cycle(cycle) => AppError::Cycle(cycle),
            crisis_fusion::service::EngineServiceError::Ledger(ledger) => AppError::Ledger(ledger),
            other => AppError::InvalidRequest(other.to_string()),
        })
}

fn commit_label(outcome: &CycleOutcome) -> &'static str {
    match outcome.commit {
        crisis_fusion::ledger::CommitOutcome::Committed => "committed",
        crisis_fusion::ledger::CommitOutcome::Replayed => "replayed",
    }
}

fn print_outcome(outcome: &CycleOutcome, json: bool) -> Result<(), AppError> {
    if json {
        match serde_json::to_string_pretty(outcome) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => return Err(AppError::InvalidRequest(err.to_string())),
        }
        return Ok(());
    }

    println!(
        "Decision cycle {} ({}) as of {}",
        outcome.cycle_id,
        commit_label(outcome),
        outcome.as_of.to_rfc3339()
    );
    let ingest = &outcome.ingest;
    println!(
        "Signals: {} received | {} normalized | {} malformed | {} duplicates | {} carried over | {} suppressed | {} outside all zones",
        ingest.received,
        ingest.accepted,
        ingest.malformed,
        ingest.duplicates,
        outcome.carried_over,
        outcome.suppressed,
        outcome.unassigned
    );
    for sample in &ingest.error_samples {
        println!("  ! {}", sample);
    }
    if outcome.stale_reference {
        println!("Warning: reference data is stale; every score is low confidence");
    }

    println!("\nZone risk");
    for score in &outcome.scores {
        println!(
            "- {:<12} {:<8} {:.2} [{:.2}, {:.2}] from {} signal(s){}",
            score.zone_id.as_str(),
            score.risk_level.label(),
            score.point_estimate,
            score.lower_bound,
            score.upper_bound,
            score.contributing_signal_ids.len(),
            if score.low_confidence { " (low confidence)" } else { "" }
        );
    }

    let flagged = high_risk_zones(&outcome.scores);
    if !flagged.is_empty() {
        let names: Vec<&str> = flagged.iter().map(|score| score.zone_id.as_str()).collect();
        println!("High-risk zones: {}", names.join(", "));
    }

    let plan = &outcome.plan;
    println!("\nAllocation plan {}", plan.plan_id);
    if plan.assignments.is_empty() {
        println!("- no assignments");
    }
    for assignment in &plan.assignments {
        println!(
            "- {} -> {} ({} x{}) departs {} eta {} ({:.0} min, {:.1} km)",
            assignment.resource_id,
            assignment.zone_id,
            assignment.kind.label(),
            assignment.quantity,
            assignment.departure.format("%H:%M"),
            assignment.eta.format("%H:%M"),
            assignment.travel_minutes,
            assignment.distance_km
        );
    }

    if plan.unmet_demand.is_empty() {
        println!("Unmet demand: none");
    } else {
        println!("Unmet demand ({} units short)", plan.total_shortfall());
        for unmet in &plan.unmet_demand {
            println!(
                "- {} {}: {}/{} covered, short {}",
                unmet.zone_id,
                unmet.kind.label(),
                unmet.fulfilled,
                unmet.requested,
                unmet.shortfall
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_scenario_commits_then_replays() {
        let as_of = parse_timestamp("2025-08-29T14:00:00Z").expect("valid timestamp");
        let engine = build_engine(
            &EngineConfig::default(),
            &ReferenceSources::default(),
            as_of - Duration::hours(1),
        )
        .expect("engine builds");

        engine
            .enqueue(demo_payloads().expect("payloads"))
            .expect("queued");
        let first = run_queued(&engine, as_of).await.expect("first cycle");
        assert_eq!(commit_label(&first), "committed");
        assert_eq!(first.ingest.malformed, 1);
        assert_eq!(first.ingest.duplicates, 1);
        assert!(!first.stale_reference);

        let riverside = first
            .scores
            .iter()
            .find(|score| score.zone_id.as_str() == "riverside")
            .expect("riverside scored");
        let airport = first
            .scores
            .iter()
            .find(|score| score.zone_id.as_str() == "airport")
            .expect("airport scored");
        assert!(riverside.point_estimate > airport.point_estimate);
        assert!(!plan_is_empty(&first));

        engine
            .enqueue(demo_payloads().expect("payloads"))
            .expect("queued");
        let replay = run_queued(&engine, as_of).await.expect("replayed cycle");
        assert_eq!(commit_label(&replay), "replayed");
        assert_eq!(replay.cycle_id, first.cycle_id);
    }

    fn plan_is_empty(outcome: &CycleOutcome) -> bool {
        outcome.plan.assignments.is_empty()
    }
}
