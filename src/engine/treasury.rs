//! Single-writer treasury handle.
//!
//! Owns the one `Ledger` of the process behind a lock: every mutation is
//! serialized through `write`, and readers get consistent snapshots. Also
//! holds the pending-execution queue of approved candidates, the custody
//! reconciliation state, the integrity halt flag, and the outbox of
//! journal records not yet persisted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use super::ledger::Ledger;
use crate::storage::JournalRecord;
use crate::types::{
    CoreError, EntryKind, EntryRef, LedgerEntry, LotId, TradeCandidate, TreasuryState,
};

// ---------------------------------------------------------------------------
// Custody types
// ---------------------------------------------------------------------------

/// An authorized outflow the custody collaborator must carry out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustodyInstruction {
    pub entry_id: u64,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub reference: EntryRef,
}

/// Custody's report that an instruction was carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustodyConfirmation {
    pub entry_id: u64,
    pub amount: Decimal,
    pub tx_id: String,
}

/// An approved candidate paid for and handed to execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub candidate: TradeCandidate,
    pub lot_id: LotId,
}

fn requires_custody(kind: EntryKind) -> bool {
    matches!(kind, EntryKind::CashOut | EntryKind::Buyback)
}

// ---------------------------------------------------------------------------
// Treasury
// ---------------------------------------------------------------------------

struct Inner {
    ledger: Ledger,
    halt: Option<String>,
    queue: VecDeque<TradeCandidate>,
    confirmed: BTreeSet<u64>,
    outbox: Vec<JournalRecord>,
}

impl Inner {
    fn ensure_running(&self) -> Result<(), CoreError> {
        match &self.halt {
            Some(reason) => Err(CoreError::TreasuryHalted(reason.clone())),
            None => Ok(()),
        }
    }

    fn set_halt(&mut self, reason: String, now: DateTime<Utc>) {
        if self.halt.is_some() {
            return;
        }
        error!(reason = %reason, "Treasury halted, operator intervention required");
        self.outbox.push(JournalRecord::Halt {
            reason: reason.clone(),
            at: now,
        });
        self.halt = Some(reason);
    }
}

pub struct Treasury {
    inner: RwLock<Inner>,
}

impl Default for Treasury {
    fn default() -> Self {
        Self::new(Ledger::new())
    }
}

impl Treasury {
    pub fn new(ledger: Ledger) -> Self {
        Self::restore(ledger, None, BTreeSet::new())
    }

    /// Rebuild from replayed journal state. Nothing is queued for
    /// persistence since it all came from the journal.
    pub fn restore(ledger: Ledger, halt: Option<String>, confirmed: BTreeSet<u64>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                ledger,
                halt,
                queue: VecDeque::new(),
                confirmed,
                outbox: Vec::new(),
            }),
        }
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, Inner>, CoreError> {
        self.inner.read().map_err(|_| CoreError::LockPoisoned("treasury"))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, Inner>, CoreError> {
        self.inner.write().map_err(|_| CoreError::LockPoisoned("treasury"))
    }

    // -- reads -------------------------------------------------------------

    /// Run `f` against a consistent snapshot of the ledger.
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> Result<R, CoreError> {
        let inner = self.read_lock()?;
        Ok(f(&inner.ledger))
    }

    pub fn state(&self) -> Result<TreasuryState, CoreError> {
        self.read(|l| l.state().clone())
    }

    pub fn entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        self.read(|l| l.entries().to_vec())
    }

    pub fn halt_reason(&self) -> Result<Option<String>, CoreError> {
        Ok(self.read_lock()?.halt.clone())
    }

    pub fn queued(&self) -> Result<usize, CoreError> {
        Ok(self.read_lock()?.queue.len())
    }

    // -- writes ------------------------------------------------------------

    /// Serialize one ledger mutation. Refused while halted. New entries are
    /// queued for the journal under the same lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut Ledger) -> Result<R, CoreError>) -> Result<R, CoreError> {
        let mut guard = self.write_lock()?;
        guard.ensure_running()?;
        let inner = &mut *guard;
        let before = inner.ledger.len() as u64;
        let result = f(&mut inner.ledger);
        inner.outbox.extend(
            inner
                .ledger
                .entries_since(before)
                .iter()
                .cloned()
                .map(JournalRecord::Entry),
        );
        result
    }

    /// Queue a journal record that is not a ledger entry.
    pub fn journal(&self, record: JournalRecord) -> Result<(), CoreError> {
        self.write_lock()?.outbox.push(record);
        Ok(())
    }

    /// Hand over journal records not yet persisted, in order.
    pub fn drain_journal(&self) -> Result<Vec<JournalRecord>, CoreError> {
        Ok(std::mem::take(&mut self.write_lock()?.outbox))
    }

    // -- execution queue ---------------------------------------------------

    /// Queue a cleared candidate for execution.
    pub fn enqueue(&self, candidate: TradeCandidate) -> Result<(), CoreError> {
        if !candidate.approval_state.is_cleared() {
            return Err(CoreError::CandidateClosed {
                id: candidate.id,
                state: candidate.approval_state,
            });
        }
        let mut inner = self.write_lock()?;
        info!(candidate_id = %candidate.id, capital = %candidate.proposed_capital, "Candidate queued for execution");
        inner.queue.push_back(candidate);
        Ok(())
    }

    /// Approved candidates waiting to be paid for, oldest first.
    pub fn queued_candidates(&self) -> Result<Vec<TradeCandidate>, CoreError> {
        Ok(self.read_lock()?.queue.iter().cloned().collect())
    }

    /// Pay for every queued candidate and hand them to execution.
    ///
    /// The whole drain runs under one write lock, so a halt cannot land
    /// between purchases. Candidates the ledger refuses (insufficient cash or
    /// an invalid size) are dropped with a warning; the rest still execute.
    pub fn take_for_execution(&self, now: DateTime<Utc>) -> Result<Vec<Execution>, CoreError> {
        let mut guard = self.write_lock()?;
        guard.ensure_running()?;
        let inner = &mut *guard;
        let before = inner.ledger.len() as u64;

        let mut out = Vec::with_capacity(inner.queue.len());
        while let Some(candidate) = inner.queue.pop_front() {
            let opp = &candidate.opportunity;
            match inner.ledger.record_purchase(
                &opp.product_id,
                candidate.proposed_quantity,
                candidate.proposed_capital,
                now,
            ) {
                Ok(lot_id) => out.push(Execution { candidate, lot_id }),
                Err(e @ CoreError::InsufficientCash { .. }) => {
                    warn!(candidate_id = %candidate.id, error = %e, "Dropping approved candidate");
                }
                Err(e) => {
                    error!(candidate_id = %candidate.id, error = %e, "Ledger refused purchase, dropping candidate");
                }
            }
        }

        inner.outbox.extend(
            inner
                .ledger
                .entries_since(before)
                .iter()
                .cloned()
                .map(JournalRecord::Entry),
        );
        Ok(out)
    }

    // -- custody -----------------------------------------------------------

    /// Authorized outflows not yet confirmed by custody.
    pub fn custody_instructions(&self) -> Result<Vec<CustodyInstruction>, CoreError> {
        let inner = self.read_lock()?;
        Ok(inner
            .ledger
            .entries()
            .iter()
            .filter(|e| requires_custody(e.kind) && !inner.confirmed.contains(&e.entry_id))
            .map(|e| CustodyInstruction {
                entry_id: e.entry_id,
                kind: e.kind,
                amount: e.amount,
                reference: e.reference.clone(),
            })
            .collect())
    }

    /// Check a custody confirmation against the authorized entry.
    ///
    /// A mismatch is never corrected: it halts the treasury and is returned
    /// as `ReconciliationMismatch`.
    pub fn reconcile(&self, confirmation: &CustodyConfirmation, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut guard = self.write_lock()?;
        let inner = &mut *guard;
        let entry = inner.ledger.entry(confirmation.entry_id)?;
        let expected = if requires_custody(entry.kind) {
            entry.amount
        } else {
            Decimal::ZERO
        };

        if confirmation.amount != expected {
            let err = CoreError::ReconciliationMismatch {
                entry_id: confirmation.entry_id,
                expected,
                reported: confirmation.amount,
            };
            warn!(tx_id = %confirmation.tx_id, error = %err, "Custody confirmation does not match ledger");
            inner.set_halt(err.to_string(), now);
            return Err(err);
        }

        if inner.confirmed.insert(confirmation.entry_id) {
            inner.outbox.push(JournalRecord::CustodyConfirmed {
                entry_id: confirmation.entry_id,
                amount: confirmation.amount,
                tx_id: confirmation.tx_id.clone(),
                at: now,
            });
            info!(entry_id = confirmation.entry_id, tx_id = %confirmation.tx_id, "Custody confirmed");
        }
        Ok(())
    }

    // -- integrity ---------------------------------------------------------

    /// Halt on an integrity violation.
    pub fn halt(&self, reason: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.write_lock()?.set_halt(reason.to_string(), now);
        Ok(())
    }

    /// Fold the ledger and compare with the cached state; halts on mismatch.
    pub fn audit(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut inner = self.write_lock()?;
        if let Err(e) = inner.ledger.verify() {
            inner.set_halt(e.to_string(), now);
            return Err(e);
        }
        Ok(())
    }

    /// Operator clears a halt after investigation. The ledger must verify.
    pub fn resolve_halt(&self, note: &str, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let mut inner = self.write_lock()?;
        if inner.halt.is_none() {
            return Ok(false);
        }
        inner.ledger.verify()?;
        let previous = inner.halt.take().unwrap_or_default();
        inner.outbox.push(JournalRecord::HaltCleared {
            note: note.to_string(),
            at: now,
        });
        info!(previous = %previous, note, "Treasury halt cleared");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ApprovalState, Opportunity};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use uuid::Uuid;

    fn funded(amount: Decimal) -> Treasury {
        let treasury = Treasury::default();
        treasury.write(|l| l.deposit(amount, "seed", Utc::now())).unwrap();
        treasury
    }

    fn make_candidate(capital: Decimal, state: ApprovalState) -> TradeCandidate {
        TradeCandidate {
            id: Uuid::new_v4(),
            opportunity: Opportunity {
                product_id: "ddr5-32gb".into(),
                buy_marketplace: "newegg".into(),
                sell_marketplace: "ebay".into(),
                buy_price: capital,
                sell_price: capital + dec!(45),
                estimated_costs: dec!(15),
                confidence: dec!(0.85),
                computed_at: Utc::now(),
            },
            proposed_quantity: 1,
            proposed_capital: capital,
            approval_state: state,
            created_at: Utc::now(),
            policy_version: 1,
        }
    }

    #[test]
    fn test_writes_are_journaled_in_order() {
        let treasury = funded(dec!(1000));
        treasury
            .write(|l| l.record_purchase("ddr5-32gb", 1, dec!(120), Utc::now()))
            .unwrap();
        let records = treasury.drain_journal().unwrap();
        let ids: Vec<u64> = records
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Entry(e) => Some(e.entry_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(treasury.drain_journal().unwrap().is_empty());
    }

    #[test]
    fn test_only_cleared_candidates_queue() {
        let treasury = funded(dec!(1000));
        assert!(treasury.enqueue(make_candidate(dec!(120), ApprovalState::AwaitingSignoff)).is_err());
        treasury.enqueue(make_candidate(dec!(120), ApprovalState::AutoApproved)).unwrap();
        assert_eq!(treasury.queued().unwrap(), 1);

        let executions = treasury.take_for_execution(Utc::now()).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(treasury.state().unwrap().cash_balance, dec!(880));
        assert_eq!(treasury.queued().unwrap(), 0);
    }

    #[test]
    fn test_unfundable_candidate_dropped() {
        let treasury = funded(dec!(200));
        treasury.enqueue(make_candidate(dec!(150), ApprovalState::AutoApproved)).unwrap();
        treasury.enqueue(make_candidate(dec!(150), ApprovalState::Approved)).unwrap();
        let executions = treasury.take_for_execution(Utc::now()).unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(treasury.state().unwrap().cash_balance, dec!(50));
    }

    #[test]
    fn test_refused_purchase_does_not_strand_the_rest() {
        let treasury = funded(dec!(1000));
        let mut bad = make_candidate(dec!(100), ApprovalState::Approved);
        bad.proposed_quantity = 0;
        treasury.enqueue(make_candidate(dec!(120), ApprovalState::AutoApproved)).unwrap();
        treasury.enqueue(bad).unwrap();
        treasury.enqueue(make_candidate(dec!(130), ApprovalState::AutoApproved)).unwrap();
        treasury.drain_journal().unwrap();

        let executions = treasury.take_for_execution(Utc::now()).unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(treasury.queued().unwrap(), 0);
        assert_eq!(treasury.state().unwrap().cash_balance, dec!(750));

        // Both purchases reach the journal: add + cash-out each.
        let journaled = treasury.drain_journal().unwrap();
        assert_eq!(journaled.len(), 4);
        let lots: Vec<LotId> = executions.iter().map(|e| e.lot_id).collect();
        assert!(lots.iter().all(|id| treasury.read(|l| l.lot(*id).is_ok()).unwrap()));
    }

    #[test]
    fn test_halt_keeps_queue_intact() {
        let treasury = funded(dec!(1000));
        treasury.enqueue(make_candidate(dec!(120), ApprovalState::AutoApproved)).unwrap();
        treasury.enqueue(make_candidate(dec!(130), ApprovalState::Approved)).unwrap();
        treasury.halt("ledger drift", Utc::now()).unwrap();

        assert!(matches!(
            treasury.take_for_execution(Utc::now()),
            Err(CoreError::TreasuryHalted(_))
        ));
        assert_eq!(treasury.queued().unwrap(), 2);
        assert_eq!(treasury.state().unwrap().cash_balance, dec!(1000));

        treasury.resolve_halt("drift explained", Utc::now()).unwrap();
        assert_eq!(treasury.take_for_execution(Utc::now()).unwrap().len(), 2);
    }

    #[test]
    fn test_restore_carries_halt_and_confirmations() {
        let mut ledger = Ledger::new();
        ledger.deposit(dec!(500), "seed", Utc::now()).unwrap();
        ledger.record_purchase("ddr5-32gb", 1, dec!(120), Utc::now()).unwrap();

        let treasury = Treasury::restore(ledger, Some("custody mismatch".into()), BTreeSet::from([2]));
        assert_eq!(treasury.halt_reason().unwrap().as_deref(), Some("custody mismatch"));
        assert!(treasury.custody_instructions().unwrap().is_empty());
        assert!(treasury.drain_journal().unwrap().is_empty());
    }

    #[test]
    fn test_custody_reconciliation() {
        let treasury = funded(dec!(1000));
        treasury
            .write(|l| l.record_purchase("ddr5-32gb", 1, dec!(120), Utc::now()))
            .unwrap();
        let instructions = treasury.custody_instructions().unwrap();
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].kind, EntryKind::CashOut);
        assert_eq!(instructions[0].amount, dec!(120));

        let ok = CustodyConfirmation {
            entry_id: instructions[0].entry_id,
            amount: dec!(120),
            tx_id: "wire-77".into(),
        };
        treasury.reconcile(&ok, Utc::now()).unwrap();
        treasury.reconcile(&ok, Utc::now()).unwrap();
        assert!(treasury.custody_instructions().unwrap().is_empty());
    }

    #[test]
    fn test_mismatch_halts_until_resolved() {
        let treasury = funded(dec!(1000));
        treasury
            .write(|l| l.record_purchase("ddr5-32gb", 1, dec!(120), Utc::now()))
            .unwrap();
        let bad = CustodyConfirmation {
            entry_id: 2,
            amount: dec!(119),
            tx_id: "wire-78".into(),
        };
        let err = treasury.reconcile(&bad, Utc::now()).unwrap_err();
        assert!(err.is_integrity_violation());
        assert!(treasury.halt_reason().unwrap().is_some());

        let refused = treasury.write(|l| l.deposit(dec!(1), "more", Utc::now()));
        assert!(matches!(refused, Err(CoreError::TreasuryHalted(_))));
        // The instruction is still outstanding: nothing was auto-corrected.
        assert_eq!(treasury.custody_instructions().unwrap().len(), 1);

        assert!(treasury.resolve_halt("checked with custodian", Utc::now()).unwrap());
        treasury.write(|l| l.deposit(dec!(1), "more", Utc::now())).unwrap();

        let journal = treasury.drain_journal().unwrap();
        assert!(journal.iter().any(|r| matches!(r, JournalRecord::Halt { .. })));
        assert!(journal.iter().any(|r| matches!(r, JournalRecord::HaltCleared { .. })));
    }

    #[test]
    fn test_confirmation_for_non_outflow_is_mismatch() {
        let treasury = funded(dec!(1000));
        let bad = CustodyConfirmation {
            entry_id: 0,
            amount: dec!(1000),
            tx_id: "wire".into(),
        };
        assert!(matches!(
            treasury.reconcile(&bad, Utc::now()),
            Err(CoreError::ReconciliationMismatch { .. })
        ));
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let treasury = Arc::new(funded(dec!(10000)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = Arc::clone(&treasury);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        t.write(|l| l.deposit(dec!(1), &format!("tx-{i}-{j}"), Utc::now()))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let entries = treasury.entries().unwrap();
        assert_eq!(entries.len(), 81);
        assert!(entries.iter().enumerate().all(|(i, e)| e.entry_id == i as u64));
        assert_eq!(treasury.state().unwrap().cash_balance, dec!(10080));
        treasury.audit(Utc::now()).unwrap();
    }
}
