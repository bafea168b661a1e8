//! Replay-from-empty: the journal is the only durable state, so a desk
//! restored from it must match the one that wrote it.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ramstrat::engine::ledger::{fold, Failure, Ledger};
use ramstrat::engine::treasury::CustodyConfirmation;
use ramstrat::engine::Desk;
use ramstrat::storage::{self, JournalRecord};
use ramstrat::types::{CoreError, TreasuryState, TripReason};

use super::{make_obs, make_parts, t0, SIGNERS};

fn temp_journal(stem: &str) -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("ramstrat_it_{stem}_{}.jsonl", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

/// A desk that has traded, sold, lost, tripped, and been reset.
fn make_busy_desk() -> Desk {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(10000), "seed", now).unwrap();
    desk.ingest(vec![
        make_obs("ddr5-32gb", "newegg", dec!(120), now),
        make_obs("ddr5-32gb", "ebay", dec!(165), now),
    ])
    .unwrap();

    tokio_test::block_on(desk.run_cycle(now)).unwrap();
    let exec = desk.take_for_execution(now).unwrap().remove(0);
    desk.confirm_delivery(exec.lot_id, now).unwrap();
    desk.list_for_sale(exec.lot_id, now).unwrap();
    desk.record_sale(exec.lot_id, dec!(163.37), dec!(16.34), now).unwrap();

    for _ in 0..3 {
        let lot = desk.record_purchase("ddr4-8gb", 2, dec!(80), now).unwrap();
        desk.report_failure(lot, &Failure::OrderRejected { refund: dec!(25) }, now)
            .unwrap();
    }
    for signer in SIGNERS {
        desk.approve_reset(signer, now + Duration::minutes(5)).unwrap();
    }

    let open = desk.record_purchase("ddr5-64gb", 1, dec!(240), now).unwrap();
    desk.confirm_delivery(open, now).unwrap();
    desk.record_cost(open, dec!(12.5), "ship-7", now).unwrap();
    desk
}

#[test]
fn test_fold_matches_incremental_state_at_every_step() {
    let now = t0();
    let mut ledger = Ledger::new();
    let mut checkpoints: Vec<(usize, TreasuryState)> = Vec::new();
    let mut snap = |l: &Ledger| checkpoints.push((l.len(), l.state().clone()));

    ledger.deposit(dec!(1000), "seed", now).unwrap();
    snap(&ledger);
    let a = ledger.record_purchase("ddr5-32gb", 1, dec!(120), now).unwrap();
    snap(&ledger);
    let b = ledger.record_purchase("ddr4-16gb", 3, dec!(150), now).unwrap();
    snap(&ledger);
    ledger.confirm_delivery(a, now).unwrap();
    snap(&ledger);
    ledger.record_cost(a, dec!(4.99), "ship", now).unwrap();
    snap(&ledger);
    let profit = ledger.record_sale(a, dec!(165), dec!(16.5), now).unwrap();
    snap(&ledger);
    ledger.append_allocation(profit.entry_id, dec!(11.76), dec!(11.75), now).unwrap();
    snap(&ledger);
    ledger.report_failure(b, &Failure::ShipmentLost, now).unwrap();
    snap(&ledger);

    for (len, expected) in &checkpoints {
        let folded = fold(&ledger.entries()[..*len]).unwrap();
        assert_eq!(&folded.state, expected, "fold differs after {len} entries");
        assert!(folded.state.conserves_funds());
    }
    let folded = fold(ledger.entries()).unwrap();
    assert_eq!(&folded.lots, ledger.lots());
    ledger.verify().unwrap();
}

#[test]
fn test_restored_desk_matches_original() {
    let path = temp_journal("restore");
    let desk = make_busy_desk();
    storage::append_records(&desk.drain_journal().unwrap(), Some(path.as_str())).unwrap();

    let records = storage::load_journal(Some(path.as_str())).unwrap();
    let restored = Desk::restore(make_parts(dec!(0.85)), &records, t0()).unwrap();

    assert_eq!(restored.treasury_state().unwrap(), desk.treasury_state().unwrap());
    assert_eq!(restored.entries().unwrap(), desk.entries().unwrap());
    assert_eq!(restored.breaker_state().unwrap(), desk.breaker_state().unwrap());
    assert_eq!(
        restored.snapshot().unwrap().open_lots,
        desk.snapshot().unwrap().open_lots
    );
    assert_eq!(
        restored.custody_instructions().unwrap(),
        desk.custody_instructions().unwrap()
    );
    restored.audit(t0()).unwrap();

    storage::delete_journal(Some(path.as_str())).unwrap();
}

#[test]
fn test_replay_rebuilds_tripped_breaker() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(1000), "seed", now).unwrap();
    for _ in 0..3 {
        let lot = desk.record_purchase("ddr4-8gb", 1, dec!(40), now).unwrap();
        desk.report_failure(lot, &Failure::ShipmentLost, now).unwrap();
    }
    let records = desk.drain_journal().unwrap();

    let restored = Desk::restore(make_parts(dec!(0.85)), &records, now).unwrap();
    let breaker = restored.breaker_state().unwrap();
    assert!(breaker.is_tripped());
    assert_eq!(
        breaker.trip_reason,
        Some(TripReason::ConsecutiveLosses { count: 3, threshold: 3 })
    );
    assert_eq!(breaker, desk.breaker_state().unwrap());
}

#[test]
fn test_replay_rebuilds_halt() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(1000), "seed", now).unwrap();
    desk.record_purchase("ddr5-32gb", 1, dec!(120), now).unwrap();
    let _ = desk.reconcile(
        &CustodyConfirmation {
            entry_id: 2,
            amount: dec!(12),
            tx_id: "wire-typo".into(),
        },
        now,
    );
    let records = desk.drain_journal().unwrap();
    assert!(records.iter().any(|r| matches!(r, JournalRecord::Halt { .. })));

    let restored = Desk::restore(make_parts(dec!(0.85)), &records, now).unwrap();
    assert!(restored.snapshot().unwrap().halted.is_some());
    assert!(matches!(
        restored.breaker_state().unwrap().trip_reason,
        Some(TripReason::IntegrityViolation { .. })
    ));
    assert!(matches!(
        restored.deposit(dec!(1), "more", now),
        Err(CoreError::TreasuryHalted(_))
    ));
}

#[test]
fn test_gap_in_journal_is_replay_inconsistency() {
    let desk = make_busy_desk();
    let mut records = desk.drain_journal().unwrap();
    let victim = records
        .iter()
        .position(|r| matches!(r, JournalRecord::Entry(e) if e.entry_id == 3))
        .unwrap();
    records.remove(victim);

    let result = Desk::restore(make_parts(dec!(0.85)), &records, t0());
    assert!(matches!(result, Err(CoreError::ReplayInconsistency(_))));
}

#[test]
fn test_tampered_amount_is_replay_inconsistency() {
    let mut ledger = Ledger::new();
    let now = t0();
    ledger.deposit(dec!(500), "seed", now).unwrap();
    let lot = ledger.record_purchase("ddr5-32gb", 1, dec!(120), now).unwrap();
    ledger.confirm_delivery(lot, now).unwrap();
    ledger.record_sale(lot, dec!(150), Decimal::ZERO, now).unwrap();

    let mut entries = ledger.entries().to_vec();
    let remove = entries
        .iter_mut()
        .find(|e| e.kind == ramstrat::types::EntryKind::InventoryRemove)
        .unwrap();
    remove.amount = dec!(100);

    assert!(matches!(fold(&entries), Err(CoreError::ReplayInconsistency(_))));
    assert!(Ledger::replay(entries).is_err());
}
