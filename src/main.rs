use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use gridwarden::cancellation::{CancellationOutcome, PositionCloser};
use gridwarden::models::{ConcludedTrade, GridSnapshot, StrategySnapshot};
use gridwarden::notify::LogNotifier;
use gridwarden::ranking::{RankingReport, WinLossBundle};
use gridwarden::tracker::{Subject, TrackedGrid};
use gridwarden::{Engine, EngineConfig, TickSummary};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Replay polling ticks through the tracking and cancellation engine
#[derive(Debug, Parser)]
#[command(name = "gridwarden", version, about)]
struct Args {
    /// Tick files (JSON), applied in order
    #[arg(long = "tick", required = true, num_args = 1..)]
    ticks: Vec<PathBuf>,

    /// TOML config file; GRIDWARDEN__* environment variables override it
    #[arg(long)]
    config: Option<String>,

    /// Run each tick's cancellation plan through the simulated closer
    #[arg(long)]
    execute: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Deserialize)]
struct RemovalMark {
    position_id: i64,
    floor: f64,
    reason: String,
}

/// One polling cycle's worth of input
#[derive(Debug, Deserialize)]
struct TickInput {
    #[serde(default)]
    grids: Vec<GridSnapshot>,
    #[serde(default)]
    prices: HashMap<String, f64>,
    #[serde(default)]
    strategies: Vec<StrategySnapshot>,
    #[serde(default)]
    trades: Vec<ConcludedTrade>,
    #[serde(default)]
    marks: Vec<RemovalMark>,
    #[serde(default = "default_track_continuous")]
    track_continuous: bool,
}

fn default_track_continuous() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct TickReport {
    tick: String,
    summary: TickSummary,
    ranking: Option<RankingReport>,
    openable: Vec<i64>,
    win_loss: BTreeMap<i64, WinLossBundle>,
    cancellations: Vec<CancellationOutcome>,
}

/// Stands in for the exchange client: logs the close and reports success
struct DryRunCloser;

#[async_trait]
impl PositionCloser for DryRunCloser {
    async fn close_position(&self, grid: &TrackedGrid) -> anyhow::Result<()> {
        tracing::info!(position_id = grid.position_id(), "[dry run] close {}", grid);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = EngineConfig::load(args.config.as_deref())?;
    tracing::info!("Loaded config: {:?}", config.policy);

    let mut engine = Engine::new(config, Arc::new(LogNotifier));
    let mut reports = Vec::new();

    for path in &args.ticks {
        let raw = std::fs::read_to_string(path)?;
        let tick: TickInput = serde_json::from_str(&raw)?;
        reports.push(run_tick(&mut engine, path, tick, args.execute).await);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(())
}

async fn run_tick(engine: &mut Engine, path: &std::path::Path, tick: TickInput, execute: bool) -> TickReport {
    let now = Utc::now();
    tracing::info!("=== Tick {} ===", path.display());

    let strategies_by_id: HashMap<i64, StrategySnapshot> = tick
        .strategies
        .iter()
        .map(|s| (s.strategy_id, s.clone()))
        .collect();

    let summary = engine.observe_tick(tick.grids, &tick.prices, tick.track_continuous, now);
    for mark in tick.marks {
        engine.mark_for_removal(mark.position_id, mark.floor, &mark.reason);
    }

    for grid in engine.tracker().grids() {
        if let Some(subject) = Subject::new(strategies_by_id.get(&grid.strategy_id()), Some(grid)) {
            tracing::info!("{}", subject);
        }
    }

    let (ranking, openable) = if tick.strategies.is_empty() {
        (None, Vec::new())
    } else {
        let tracked = engine.rank_strategies(tick.strategies);
        let openable: Vec<i64> = engine
            .openable(&tracked, now)
            .iter()
            .map(|s| s.snapshot.strategy_id)
            .collect();
        tracing::info!(
            "Ranked {} strategies in {} cohorts, {} openable",
            tracked.len(),
            tracked.cohort_counts().len(),
            openable.len()
        );
        (Some(tracked.report()), openable)
    };

    let win_loss = engine.score_trades(&tick.trades);
    for bundle in win_loss.values() {
        let total = bundle.total();
        tracing::info!(
            "User {}: win ratio {:.3} over {} eligible trades ({} total, short-running {:.0}%)",
            bundle.user_id,
            total.win_ratio,
            total.eligible_trades,
            total.total_trades,
            total.short_running_ratio * 100.0
        );
    }

    let mut batch = engine.plan_cancellations(now);
    if execute && !batch.is_empty() {
        let report = engine.execute(&mut batch, &DryRunCloser, now).await;
        tracing::info!(
            "Cancelled {}, skipped {}, failed {}",
            report.cancelled.len(),
            report.skipped.len(),
            report.failures.len()
        );
    } else {
        for candidate in batch.candidates() {
            tracing::info!(
                "Would cancel #{} (floor {:.2}%): {}",
                candidate.grid_id,
                candidate.max_loss_threshold * 100.0,
                candidate.reasons.join("; ")
            );
        }
    }

    TickReport {
        tick: path.display().to_string(),
        summary,
        ranking,
        openable,
        win_loss,
        cancellations: batch.outcomes(),
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gridwarden=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
