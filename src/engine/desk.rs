//! Trading desk: the composition root the collaborators talk to.
//!
//! Wires the snapshot store, strategy orchestrator, approval workflow,
//! treasury, supervisor and profit router together. Price feed, execution,
//! custody, signature and observability collaborators all go through the
//! methods here; none of them touches a component directly.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::approval::{ApprovalProgress, ApprovalWorkflow};
use super::breaker::{ResetOutcome, Supervisor};
use super::ledger::{Failure, Ledger, MarkToMarket};
use super::router::{Allocation, ProfitRouter};
use super::treasury::{CustodyConfirmation, CustodyInstruction, Execution, Treasury};
use crate::config::{AppConfig, PolicySnapshot};
use crate::market::{MarketConditions, SnapshotStore};
use crate::storage::JournalRecord;
use crate::strategy::accuracy::AccuracyTracker;
use crate::strategy::confidence::BlendedConfidence;
use crate::strategy::risk::RiskGate;
use crate::strategy::scorer::OpportunityScorer;
use crate::strategy::{Book, DecisionRecord, StrategyOrchestrator};
use crate::types::{
    ApprovalState, BreakerState, CandidateId, CoreError, EntryKind, InventoryLot, LedgerEntry,
    LotId, PriceObservation, ProductId, Route, TreasuryState, TripReason,
};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one evaluation cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub policy_version: u64,
    pub created: usize,
    pub rejected: usize,
    pub stale_products: usize,
    /// Routes skipped because a candidate for them is still unpaid.
    pub outstanding: usize,
    pub auto_approved: usize,
    pub awaiting_signoff: usize,
    pub expired: usize,
    /// Closed approval records dropped after their retention window.
    pub pruned: usize,
    /// Cleared candidates handed to the execution queue this cycle.
    pub queued: usize,
    pub trip: Option<TripReason>,
    pub halted: Option<String>,
    #[serde(skip)]
    pub decisions: Vec<DecisionRecord>,
}

/// Result of closing a lot, sold or failed.
#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub profit_entry: LedgerEntry,
    pub allocation: Option<Allocation>,
    pub trip: Option<TripReason>,
}

/// Read-only view for the observability collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct DeskSnapshot {
    pub treasury: TreasuryState,
    pub breaker: BreakerState,
    pub halted: Option<String>,
    pub entries: usize,
    pub open_lots: Vec<InventoryLot>,
    pub awaiting: Vec<ApprovalProgress>,
    pub queued: usize,
    pub observations: usize,
}

// ---------------------------------------------------------------------------
// Parts
// ---------------------------------------------------------------------------

/// Everything a desk is built from except the treasury.
pub struct DeskParts {
    pub store: SnapshotStore,
    pub orchestrator: StrategyOrchestrator,
    pub workflow: ApprovalWorkflow,
    pub supervisor: Supervisor,
    pub router: ProfitRouter,
    /// Price history window for market conditions.
    pub conditions_window: Duration,
    pub currency: String,
}

impl DeskParts {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let policy = cfg.policy()?;
        let scorer = OpportunityScorer::new(
            cfg.costs.clone(),
            Arc::new(BlendedConfidence::new(cfg.scorer.clone())),
            &cfg.agent.currency,
        );
        Ok(Self {
            store: SnapshotStore::new(Duration::seconds(cfg.market.freshness_window_secs as i64)),
            orchestrator: StrategyOrchestrator::new(
                scorer,
                RiskGate::new(policy.risk, policy.version),
                AccuracyTracker::default(),
            ),
            workflow: ApprovalWorkflow::new(policy.approval),
            supervisor: Supervisor::new(cfg.breaker.limits.clone(), cfg.reset_quorum()?),
            router: ProfitRouter::new(cfg.router.clone())?,
            conditions_window: Duration::seconds(cfg.market.conditions_window_secs as i64),
            currency: cfg.agent.currency.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Desk
// ---------------------------------------------------------------------------

/// Route and predicted profit of a lot bought from a candidate.
#[derive(Debug, Clone)]
struct Prediction {
    route: Route,
    predicted: Decimal,
}

pub struct Desk {
    store: SnapshotStore,
    orchestrator: StrategyOrchestrator,
    workflow: ApprovalWorkflow,
    treasury: Treasury,
    supervisor: Supervisor,
    router: ProfitRouter,
    conditions_window: Duration,
    currency: String,
    predictions: Mutex<HashMap<LotId, Prediction>>,
}

impl Desk {
    /// A desk over an empty ledger.
    pub fn new(parts: DeskParts) -> Self {
        Self::assemble(parts, Treasury::default())
    }

    fn assemble(parts: DeskParts, treasury: Treasury) -> Self {
        Self {
            store: parts.store,
            orchestrator: parts.orchestrator,
            workflow: parts.workflow,
            treasury,
            supervisor: parts.supervisor,
            router: parts.router,
            conditions_window: parts.conditions_window,
            currency: parts.currency,
            predictions: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild every derived state by replaying a journal from empty.
    ///
    /// Ledger entries rebuild balances and lots; realized outcomes and the
    /// breaker, halt and custody records rebuild the supervisor and the
    /// treasury flags. A sequence that does not fold is a
    /// `ReplayInconsistency`.
    pub fn restore(parts: DeskParts, records: &[JournalRecord], now: DateTime<Utc>) -> Result<Self, CoreError> {
        let entries: Vec<LedgerEntry> = records
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Entry(e) => Some(e.clone()),
                _ => None,
            })
            .collect();
        let ledger = Ledger::replay(entries)?;

        let mut halt: Option<String> = None;
        let mut confirmed = BTreeSet::new();
        for record in records {
            match record {
                JournalRecord::Entry(e) if e.kind == EntryKind::RealizedProfit => {
                    parts.supervisor.record_outcome(e.amount, e.timestamp)?;
                }
                JournalRecord::Entry(_) => {}
                JournalRecord::BreakerTrip { reason, at } => {
                    parts.supervisor.trip(reason.clone(), *at)?;
                }
                JournalRecord::BreakerReset { at, .. } => {
                    parts.supervisor.apply_reset(*at)?;
                }
                JournalRecord::Halt { reason, at } => {
                    parts.supervisor.trip(
                        TripReason::IntegrityViolation { detail: reason.clone() },
                        *at,
                    )?;
                    halt = Some(reason.clone());
                }
                JournalRecord::HaltCleared { .. } => halt = None,
                JournalRecord::CustodyConfirmed { entry_id, .. } => {
                    confirmed.insert(*entry_id);
                }
            }
        }

        let state = ledger.state().clone();
        parts.supervisor.assess(&state, &MarkToMarket::default(), now)?;
        info!(
            records = records.len(),
            treasury = %state,
            breaker = %parts.supervisor.state()?,
            halted = halt.is_some(),
            "Desk restored from journal"
        );
        Ok(Self::assemble(parts, Treasury::restore(ledger, halt, confirmed)))
    }

    fn predictions(&self) -> Result<MutexGuard<'_, HashMap<LotId, Prediction>>, CoreError> {
        self.predictions
            .lock()
            .map_err(|_| CoreError::LockPoisoned("predictions"))
    }

    // -- price feed ----------------------------------------------------------

    pub fn record_observation(&self, observation: PriceObservation) -> Result<(), CoreError> {
        self.store.record(observation)
    }

    /// Record a batch, skipping stale observations. Returns how many were kept.
    pub fn ingest(&self, observations: Vec<PriceObservation>) -> Result<usize, CoreError> {
        self.store.record_all(observations)
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    // -- evaluation ----------------------------------------------------------

    /// One evaluation cycle: expire overdue sign-offs, score and gate every
    /// product against the treasury net of unpaid candidates, route new
    /// candidates through approval, and queue whatever cleared. Nothing is
    /// evaluated while the treasury is halted.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, CoreError> {
        let mut report = CycleReport {
            at: now,
            expired: self.workflow.expire_due(now)?.len(),
            pruned: self.workflow.prune(now)?,
            ..Default::default()
        };

        if let Some(reason) = self.treasury.halt_reason()? {
            warn!(reason = %reason, "Treasury halted, skipping evaluation");
            report.halted = Some(reason);
            return Ok(report);
        }

        let book = self.book()?;
        let breaker = self.supervisor.state()?;
        let evaluation = self
            .orchestrator
            .evaluate(&self.store, &book, &breaker, now)
            .await?;
        report.policy_version = evaluation.policy_version;

        for decision in &evaluation.decisions {
            match decision {
                DecisionRecord::Created { .. } => report.created += 1,
                DecisionRecord::Rejected { .. } => report.rejected += 1,
                DecisionRecord::StaleData { .. } => report.stale_products += 1,
                DecisionRecord::Outstanding { .. } => report.outstanding += 1,
            }
        }

        for candidate in evaluation.candidates {
            match self.workflow.submit(candidate, now)? {
                ApprovalState::AutoApproved => report.auto_approved += 1,
                ApprovalState::AwaitingSignoff => report.awaiting_signoff += 1,
                _ => {}
            }
        }
        report.queued = self.queue_cleared()?;
        report.trip = self.assess(now)?;
        report.decisions = evaluation.decisions;
        Ok(report)
    }

    /// Treasury state, open lots per product, and every candidate approved
    /// or awaiting sign-off that has not been paid for yet.
    fn book(&self) -> Result<Book, CoreError> {
        let (treasury, open_lots) = self.treasury.read(|l| {
            let mut open: HashMap<ProductId, usize> = HashMap::new();
            for lot in l.open_lots() {
                *open.entry(lot.product_id.clone()).or_default() += 1;
            }
            (l.state().clone(), open)
        })?;
        let mut outstanding = self.workflow.outstanding()?;
        outstanding.extend(self.treasury.queued_candidates()?);
        Ok(Book {
            treasury,
            open_lots,
            outstanding,
        })
    }

    fn queue_cleared(&self) -> Result<usize, CoreError> {
        let cleared = self.workflow.drain_cleared()?;
        let count = cleared.len();
        for candidate in cleared {
            self.treasury.enqueue(candidate)?;
        }
        Ok(count)
    }

    /// Install a new policy snapshot. Candidates already created or awaiting
    /// sign-off keep the policy they were gated under.
    pub fn reload(&self, policy: PolicySnapshot) -> Result<(), CoreError> {
        self.orchestrator.reload(policy.risk, policy.version)?;
        self.workflow.reload(policy.approval)?;
        Ok(())
    }

    // -- approvals -----------------------------------------------------------

    pub fn approve(&self, id: CandidateId, signer: &str, now: DateTime<Utc>) -> Result<ApprovalState, CoreError> {
        let state = self.workflow.approve(id, signer, now)?;
        self.queue_cleared()?;
        Ok(state)
    }

    pub fn veto(&self, id: CandidateId, signer: &str, now: DateTime<Utc>) -> Result<ApprovalState, CoreError> {
        self.workflow.veto(id, signer, now)
    }

    /// Expire overdue sign-offs outside a cycle.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<CandidateId>, CoreError> {
        self.workflow.expire_due(now)
    }

    pub fn approval_progress(&self, id: CandidateId) -> Result<ApprovalProgress, CoreError> {
        self.workflow.progress(id)
    }

    pub fn awaiting(&self) -> Result<Vec<ApprovalProgress>, CoreError> {
        self.workflow.awaiting()
    }

    // -- execution -----------------------------------------------------------

    /// Pay for queued candidates and hand them to execution. Queued
    /// candidates wait while the breaker is tripped.
    pub fn take_for_execution(&self, now: DateTime<Utc>) -> Result<Vec<Execution>, CoreError> {
        if self.supervisor.is_tripped()? {
            debug!(queued = self.treasury.queued()?, "Breaker tripped, execution queue held");
            return Ok(Vec::new());
        }
        let executions = self.treasury.take_for_execution(now)?;
        let mut predictions = self.predictions()?;
        for exec in &executions {
            predictions.insert(
                exec.lot_id,
                Prediction {
                    route: exec.candidate.opportunity.route(),
                    predicted: exec.candidate.expected_profit(),
                },
            );
        }
        Ok(executions)
    }

    pub fn deposit(&self, amount: Decimal, tx_id: &str, now: DateTime<Utc>) -> Result<LedgerEntry, CoreError> {
        self.treasury.write(|l| l.deposit(amount, tx_id, now))
    }

    /// Direct purchase outside the candidate pipeline (manual trades).
    pub fn record_purchase(
        &self,
        product_id: &str,
        quantity: u32,
        cost_basis: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LotId, CoreError> {
        self.treasury
            .write(|l| l.record_purchase(product_id, quantity, cost_basis, now))
    }

    pub fn confirm_delivery(&self, lot_id: LotId, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        self.treasury.write(|l| l.confirm_delivery(lot_id, now))
    }

    pub fn list_for_sale(&self, lot_id: LotId, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        self.treasury.write(|l| l.list_for_sale(lot_id, now))
    }

    pub fn record_cost(
        &self,
        lot_id: LotId,
        amount: Decimal,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, CoreError> {
        self.treasury.write(|l| l.record_cost(lot_id, amount, tx_id, now))
    }

    fn conditions_for(&self, lot_id: LotId, now: DateTime<Utc>) -> Result<MarketConditions, CoreError> {
        let product_id = self.treasury.read(|l| l.lot(lot_id).map(|lot| lot.product_id.clone()))??;
        let history = self.store.history(&product_id, now - self.conditions_window)?;
        Ok(MarketConditions::from_history(&history))
    }

    /// Close a lot as sold, route the profit, and feed the outcome to the
    /// supervisor and the route accuracy tracker.
    pub fn record_sale(
        &self,
        lot_id: LotId,
        proceeds: Decimal,
        sale_costs: Decimal,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome, CoreError> {
        let conditions = self.conditions_for(lot_id, now)?;
        let (profit_entry, allocation) = self.treasury.write(|ledger| {
            let profit = ledger.record_sale(lot_id, proceeds, sale_costs, now)?;
            let allocation = match self.router.route(ledger, &profit, &conditions, now) {
                Ok(allocation) => allocation,
                Err(e) => {
                    error!(entry_id = profit.entry_id, error = %e, "Profit left unrouted");
                    None
                }
            };
            Ok((profit, allocation))
        })?;
        self.close(lot_id, profit_entry, allocation, now)
    }

    /// Write a lot off after an execution failure.
    pub fn report_failure(&self, lot_id: LotId, failure: &Failure, now: DateTime<Utc>) -> Result<CloseOutcome, CoreError> {
        let loss = self.treasury.write(|l| l.report_failure(lot_id, failure, now))?;
        self.close(lot_id, loss, None, now)
    }

    fn close(
        &self,
        lot_id: LotId,
        profit_entry: LedgerEntry,
        allocation: Option<Allocation>,
        now: DateTime<Utc>,
    ) -> Result<CloseOutcome, CoreError> {
        if let Some(p) = self.predictions()?.remove(&lot_id) {
            self.orchestrator.record_outcome(p.route, p.predicted, profit_entry.amount)?;
        }
        let mut trip = self.supervisor.record_outcome(profit_entry.amount, now)?;
        if let Some(reason) = &trip {
            self.treasury.journal(JournalRecord::BreakerTrip {
                reason: reason.clone(),
                at: now,
            })?;
        }
        if let Some(reason) = self.assess(now)? {
            trip = Some(reason);
        }
        Ok(CloseOutcome {
            profit_entry,
            allocation,
            trip,
        })
    }

    // -- supervision ---------------------------------------------------------

    /// Best fresh in-stock sell price per product with held inventory.
    pub fn marks(&self, now: DateTime<Utc>) -> Result<HashMap<ProductId, Decimal>, CoreError> {
        let products: BTreeSet<ProductId> = self.treasury.read(|l| {
            l.lots()
                .values()
                .filter(|lot| lot.status.is_held())
                .map(|lot| lot.product_id.clone())
                .collect()
        })?;

        let mut marks = HashMap::new();
        for product in products {
            let view = self.store.latest(&product, now)?;
            let best = view
                .fresh
                .iter()
                .filter(|o| o.is_in_stock() && o.currency == self.currency)
                .map(|o| o.unit_price)
                .max();
            if let Some(price) = best {
                marks.insert(product, price);
            }
        }
        Ok(marks)
    }

    /// Check aggregate treasury health and trip the breaker if needed.
    pub fn assess(&self, now: DateTime<Utc>) -> Result<Option<TripReason>, CoreError> {
        let marks = self.marks(now)?;
        let (state, valuation) = self.treasury.read(|l| (l.state().clone(), l.unrealized_loss(&marks)))?;
        let trip = self.supervisor.assess(&state, &valuation, now)?;
        if let Some(reason) = &trip {
            self.treasury.journal(JournalRecord::BreakerTrip {
                reason: reason.clone(),
                at: now,
            })?;
        }
        Ok(trip)
    }

    /// Record one reset approval. Refused while the treasury is halted.
    pub fn approve_reset(&self, signer: &str, now: DateTime<Utc>) -> Result<ResetOutcome, CoreError> {
        if let Some(reason) = self.treasury.halt_reason()? {
            return Err(CoreError::TreasuryHalted(reason));
        }
        let outcome = self.supervisor.approve_reset(signer, now)?;
        if let ResetOutcome::Rearmed { signers } = &outcome {
            self.treasury.journal(JournalRecord::BreakerReset {
                signers: signers.clone(),
                at: now,
            })?;
        }
        Ok(outcome)
    }

    fn integrity_violation(&self, err: &CoreError, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.treasury.halt(&err.to_string(), now)?;
        self.supervisor.trip(
            TripReason::IntegrityViolation { detail: err.to_string() },
            now,
        )?;
        Ok(())
    }

    // -- custody -------------------------------------------------------------

    pub fn custody_instructions(&self) -> Result<Vec<CustodyInstruction>, CoreError> {
        self.treasury.custody_instructions()
    }

    /// Reconcile one custody confirmation. A mismatch halts the treasury and
    /// trips the breaker; it is returned, never corrected.
    pub fn reconcile(&self, confirmation: &CustodyConfirmation, now: DateTime<Utc>) -> Result<(), CoreError> {
        match self.treasury.reconcile(confirmation, now) {
            Err(e) if e.is_integrity_violation() => {
                self.integrity_violation(&e, now)?;
                Err(e)
            }
            other => other,
        }
    }

    /// Re-fold the ledger and compare with the cached state.
    pub fn audit(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        match self.treasury.audit(now) {
            Err(e) if e.is_integrity_violation() => {
                self.integrity_violation(&e, now)?;
                Err(e)
            }
            other => other,
        }
    }

    /// Operator clears an integrity halt. The breaker stays tripped until
    /// its reset quorum signs off.
    pub fn resolve_halt(&self, note: &str, now: DateTime<Utc>) -> Result<bool, CoreError> {
        self.treasury.resolve_halt(note, now)
    }

    // -- observability -------------------------------------------------------

    pub fn treasury_state(&self) -> Result<TreasuryState, CoreError> {
        self.treasury.state()
    }

    pub fn breaker_state(&self) -> Result<BreakerState, CoreError> {
        self.supervisor.state()
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        self.treasury.entries()
    }

    pub fn lot(&self, lot_id: LotId) -> Result<InventoryLot, CoreError> {
        self.treasury.read(|l| l.lot(lot_id).cloned())?
    }

    pub fn snapshot(&self) -> Result<DeskSnapshot, CoreError> {
        let (treasury, entries, open_lots) = self.treasury.read(|l| {
            (
                l.state().clone(),
                l.len(),
                l.open_lots().into_iter().cloned().collect::<Vec<_>>(),
            )
        })?;
        Ok(DeskSnapshot {
            treasury,
            breaker: self.supervisor.state()?,
            halted: self.treasury.halt_reason()?,
            entries,
            open_lots,
            awaiting: self.workflow.awaiting()?,
            queued: self.treasury.queued()?,
            observations: self.store.len(),
        })
    }

    /// Journal records not yet persisted, in order.
    pub fn drain_journal(&self) -> Result<Vec<JournalRecord>, CoreError> {
        self.treasury.drain_journal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
