//! RAMSTRAT: arbitrage decision and treasury ledger core.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! replays the journal into a fresh desk, and runs the
//! ingest → evaluate → approve → persist loop with graceful shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use ramstrat::config;
use ramstrat::engine::{CycleReport, Desk, DeskParts};
use ramstrat::llm::anthropic::AnthropicReasoner;
use ramstrat::llm::BoundedReasoner;
use ramstrat::storage;

const BANNER: &str = r#"
 ____      _    __  __ ____ _____ ____      _  _____
|  _ \    / \  |  \/  / ___|_   _|  _ \    / \|_   _|
| |_) |  / _ \ | |\/| \___ \ | | | |_) |  / _ \ | |
|  _ <  / ___ \| |  | |___) || | |  _ <  / ___ \| |
|_| \_\/_/   \_\_|  |_|____/ |_| |_| \_\/_/   \_\_|

  RAM Arbitrage Decision & Treasury Ledger Core
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        currency = %cfg.agent.currency,
        policy_version = cfg.agent.policy_version,
        "RAMSTRAT starting up"
    );

    // -- Components --------------------------------------------------------

    let mut parts = DeskParts::from_config(&cfg)?;
    if cfg.reasoning.enabled {
        match cfg.reasoning_api_key() {
            Ok(key) => {
                let client = AnthropicReasoner::new(
                    key,
                    cfg.reasoning.model.clone(),
                    cfg.reasoning.max_tokens,
                )?;
                let reasoner = BoundedReasoner::new(
                    Arc::new(client),
                    Duration::from_millis(cfg.reasoning.timeout_ms),
                    cfg.reasoning.fallback_confidence,
                );
                info!(model = %reasoner.model_name(), "Reasoning service enabled");
                parts.orchestrator = parts.orchestrator.with_reasoner(reasoner);
            }
            Err(e) => warn!(error = %e, "Reasoning enabled but no API key, using rule-based confidence only"),
        }
    }

    // -- Restore -----------------------------------------------------------

    let journal_path = cfg.storage.journal_path.as_str();
    let records = storage::load_journal(Some(journal_path))?;
    let fresh = records.is_empty();
    let desk = Desk::restore(parts, &records, Utc::now())
        .context("Journal replay failed; treasury halted")?;

    if fresh {
        if let Some(amount) = cfg.agent.initial_deposit.filter(|a| *a > Decimal::ZERO) {
            desk.deposit(amount, "initial-deposit", Utc::now())?;
            info!(amount = %amount, "Fresh start, initial deposit booked");
        }
    } else {
        info!(records = records.len(), "Resumed from journal");
    }
    persist(&desk, journal_path)?;

    // -- Main loop ---------------------------------------------------------

    let mut feed_offset = 0u64;
    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.cycle_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        feed = %cfg.market.feed_path,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match run_cycle(&desk, &cfg.market.feed_path, &mut feed_offset).await {
                    Ok(report) => log_cycle_report(&report),
                    Err(e) => error!(error = %e, "Cycle failed, continuing to next"),
                }
                if let Err(e) = persist(&desk, journal_path) {
                    error!(error = %e, "Failed to persist journal");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    persist(&desk, journal_path)?;
    let snapshot = desk.snapshot()?;
    info!(
        treasury = %snapshot.treasury,
        breaker = %snapshot.breaker,
        entries = snapshot.entries,
        open_lots = snapshot.open_lots.len(),
        "RAMSTRAT shut down cleanly."
    );
    Ok(())
}

/// Ingest new feed lines, evaluate, and hand cleared candidates to execution.
async fn run_cycle(desk: &Desk, feed_path: &str, offset: &mut u64) -> Result<CycleReport> {
    let now = Utc::now();

    let (observations, next) = storage::read_feed(feed_path, *offset)?;
    *offset = next;
    let seen = observations.len();
    let accepted = desk.ingest(observations)?;
    if seen > 0 {
        info!(seen, accepted, "Price observations ingested");
    }

    let report = desk.run_cycle(now).await?;

    for exec in desk.take_for_execution(now)? {
        info!(
            lot_id = %exec.lot_id,
            candidate_id = %exec.candidate.id,
            route = %exec.candidate.opportunity.route(),
            quantity = exec.candidate.proposed_quantity,
            capital = %exec.candidate.proposed_capital,
            "Handed to execution"
        );
    }
    for instruction in desk.custody_instructions()? {
        info!(
            entry_id = instruction.entry_id,
            kind = %instruction.kind,
            amount = %instruction.amount,
            reference = %instruction.reference,
            "Awaiting custody confirmation"
        );
    }

    desk.audit(now)?;
    Ok(report)
}

/// Append journal records produced since the last call.
fn persist(desk: &Desk, path: &str) -> Result<()> {
    let records = desk.drain_journal()?;
    storage::append_records(&records, Some(path))
}

/// Log a human-readable cycle summary.
fn log_cycle_report(report: &CycleReport) {
    if let Some(reason) = &report.halted {
        warn!(reason = %reason, "Cycle skipped: treasury halted");
        return;
    }
    info!(
        policy_version = report.policy_version,
        created = report.created,
        rejected = report.rejected,
        stale = report.stale_products,
        outstanding = report.outstanding,
        auto_approved = report.auto_approved,
        awaiting = report.awaiting_signoff,
        expired = report.expired,
        queued = report.queued,
        pruned = report.pruned,
        trip = report.trip.as_ref().map(|r| r.to_string()).unwrap_or_default(),
        "Cycle complete"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ramstrat=info"));

    let json_logging = std::env::var("RAMSTRAT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
