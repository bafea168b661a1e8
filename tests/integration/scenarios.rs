//! Reference scenarios driven through the desk as the collaborators would.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use ramstrat::engine::breaker::ResetOutcome;
use ramstrat::engine::ledger::Failure;
use ramstrat::engine::treasury::CustodyConfirmation;
use ramstrat::engine::Desk;
use ramstrat::strategy::risk::RejectionReason;
use ramstrat::strategy::DecisionRecord;
use ramstrat::types::{ApprovalState, CoreError, EntryKind, TripReason};

use super::{make_obs, make_parts, t0, SIGNERS};

#[tokio::test]
async fn test_newegg_ebay_auto_approved() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(1000), "seed", now).unwrap();
    desk.ingest(vec![
        make_obs("ddr5-32gb", "newegg", dec!(120), now),
        make_obs("ddr5-32gb", "ebay", dec!(165), now),
    ])
    .unwrap();

    let report = desk.run_cycle(now).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.auto_approved, 1);

    let candidate = match &report.decisions[0] {
        DecisionRecord::Created { candidate } => candidate.clone(),
        other => panic!("unexpected decision {other:?}"),
    };
    assert_eq!(candidate.opportunity.net_profit(), dec!(30));
    assert_eq!(candidate.opportunity.confidence, dec!(0.85));
    assert_eq!(candidate.proposed_capital, dec!(120));
    assert_eq!(desk.approval_progress(candidate.id).unwrap().state, ApprovalState::AutoApproved);

    let executions = desk.take_for_execution(now).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].candidate.id, candidate.id);
}

#[tokio::test]
async fn test_large_trade_needs_three_of_five() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(10000), "seed", now).unwrap();
    desk.ingest(vec![
        make_obs("ddr5-256gb-kit", "newegg", dec!(6000), now),
        make_obs("ddr5-256gb-kit", "ebay", dec!(7000), now),
    ])
    .unwrap();

    let report = desk.run_cycle(now).await.unwrap();
    assert_eq!(report.awaiting_signoff, 1);
    assert_eq!(report.queued, 0);
    let id = desk.awaiting().unwrap()[0].candidate_id;

    assert_eq!(desk.approve(id, "alice", now).unwrap(), ApprovalState::AwaitingSignoff);
    // Same signer twice does not count.
    assert_eq!(desk.approve(id, "alice", now).unwrap(), ApprovalState::AwaitingSignoff);
    assert_eq!(desk.approve(id, "bob", now).unwrap(), ApprovalState::AwaitingSignoff);
    assert_eq!(desk.approval_progress(id).unwrap().approvals.len(), 2);
    assert_eq!(desk.approve(id, "carol", now).unwrap(), ApprovalState::Approved);
    assert_eq!(desk.approve(id, "dave", now).unwrap(), ApprovalState::Approved);
    assert_eq!(desk.approval_progress(id).unwrap().approvals.len(), 3);

    let executions = desk.take_for_execution(now).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(desk.treasury_state().unwrap().cash_balance, dec!(4000));
}

#[tokio::test]
async fn test_repeat_cycles_keep_one_candidate_per_route() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(10000), "seed", now).unwrap();
    desk.ingest(vec![
        make_obs("ddr5-256gb-kit", "newegg", dec!(6000), now),
        make_obs("ddr5-256gb-kit", "ebay", dec!(7000), now),
    ])
    .unwrap();

    let first = desk.run_cycle(now).await.unwrap();
    assert_eq!(first.awaiting_signoff, 1);
    let later = now + Duration::minutes(5);
    let second = desk.run_cycle(later).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.outstanding, 1);
    assert_eq!(desk.awaiting().unwrap().len(), 1);

    let id = desk.awaiting().unwrap()[0].candidate_id;
    for signer in &SIGNERS[..3] {
        desk.approve(id, signer, later).unwrap();
    }
    // Approved but unpaid: still reserved.
    let third = desk.run_cycle(later).await.unwrap();
    assert_eq!(third.created, 0);
    assert_eq!(third.outstanding, 1);

    let executions = desk.take_for_execution(later).unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(desk.treasury_state().unwrap().cash_balance, dec!(4000));
    assert_eq!(desk.snapshot().unwrap().queued, 0);
}

#[tokio::test]
async fn test_quorum_timeout_moves_no_funds() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(10000), "seed", now).unwrap();
    desk.ingest(vec![
        make_obs("ddr5-256gb-kit", "newegg", dec!(6000), now),
        make_obs("ddr5-256gb-kit", "ebay", dec!(7000), now),
    ])
    .unwrap();
    desk.run_cycle(now).await.unwrap();
    let id = desk.awaiting().unwrap()[0].candidate_id;
    desk.approve(id, "alice", now).unwrap();

    let late = now + Duration::hours(2);
    assert!(matches!(desk.approve(id, "bob", late), Err(CoreError::QuorumTimeout(_))));
    assert_eq!(desk.approval_progress(id).unwrap().state, ApprovalState::Expired);
    assert!(desk.take_for_execution(late).unwrap().is_empty());
    assert_eq!(desk.treasury_state().unwrap().cash_balance, dec!(10000));
    assert_eq!(desk.entries().unwrap().len(), 1);
}

#[tokio::test]
async fn test_three_losses_trip_breaker_and_block_candidates() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.9)));
    desk.deposit(dec!(5000), "seed", now).unwrap();

    for i in 0..3 {
        let lot = desk.record_purchase("ddr4-8gb", 1, dec!(40), now).unwrap();
        let outcome = desk.report_failure(lot, &Failure::ShipmentLost, now).unwrap();
        assert_eq!(outcome.profit_entry.amount, dec!(-40));
        if i < 2 {
            assert!(outcome.trip.is_none());
        } else {
            assert_eq!(
                outcome.trip,
                Some(TripReason::ConsecutiveLosses { count: 3, threshold: 3 })
            );
        }
    }
    assert!(desk.breaker_state().unwrap().is_tripped());

    // net 165 - 100 - 15 = 50 at confidence 0.9
    desk.ingest(vec![
        make_obs("ddr5-32gb", "newegg", dec!(100), now),
        make_obs("ddr5-32gb", "ebay", dec!(165), now),
    ])
    .unwrap();
    let report = desk.run_cycle(now).await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.rejected, 1);
    assert!(matches!(
        &report.decisions[0],
        DecisionRecord::Rejected { rejection, .. } if rejection.reason == RejectionReason::BreakerTripped
    ));
}

#[tokio::test]
async fn test_reset_needs_every_signer() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.9)));
    desk.deposit(dec!(5000), "seed", now).unwrap();
    for _ in 0..3 {
        let lot = desk.record_purchase("ddr4-8gb", 1, dec!(40), now).unwrap();
        desk.report_failure(lot, &Failure::OrderRejected { refund: dec!(10) }, now)
            .unwrap();
    }
    assert!(desk.breaker_state().unwrap().is_tripped());

    for signer in &SIGNERS[..4] {
        assert!(matches!(
            desk.approve_reset(signer, now).unwrap(),
            ResetOutcome::Pending { .. }
        ));
    }
    assert!(matches!(
        desk.approve_reset("erin", now).unwrap(),
        ResetOutcome::Rearmed { .. }
    ));
    let breaker = desk.breaker_state().unwrap();
    assert!(!breaker.is_tripped());
    assert_eq!(breaker.consecutive_losses, 0);

    desk.ingest(vec![
        make_obs("ddr5-32gb", "newegg", dec!(100), now),
        make_obs("ddr5-32gb", "ebay", dec!(165), now),
    ])
    .unwrap();
    let report = desk.run_cycle(now).await.unwrap();
    assert_eq!(report.created, 1);
}

#[test]
fn test_profit_split_half_and_half() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(1000), "seed", now).unwrap();
    let lot = desk.record_purchase("ddr5-32gb", 1, dec!(120), now).unwrap();
    desk.confirm_delivery(lot, now).unwrap();
    desk.list_for_sale(lot, now).unwrap();
    desk.record_cost(lot, dec!(5), "ship-1", now).unwrap();

    let outcome = desk.record_sale(lot, dec!(165), dec!(10), now).unwrap();
    assert_eq!(outcome.profit_entry.amount, dec!(30));

    let entries = desk.entries().unwrap();
    let tail: Vec<(EntryKind, Decimal)> = entries[entries.len() - 2..]
        .iter()
        .map(|e| (e.kind, e.amount))
        .collect();
    assert_eq!(
        tail,
        vec![(EntryKind::Reinvestment, dec!(15)), (EntryKind::Buyback, dec!(15))]
    );

    let state = desk.treasury_state().unwrap();
    assert_eq!(state.reserve_balance, dec!(15));
    assert_eq!(state.reinvested, dec!(15));
    assert_eq!(state.realized_profit, dec!(30));
    assert!(state.conserves_funds());
}

#[test]
fn test_custody_mismatch_halts_until_resolved() {
    let now = t0();
    let desk = Desk::new(make_parts(dec!(0.85)));
    desk.deposit(dec!(1000), "seed", now).unwrap();
    desk.record_purchase("ddr5-32gb", 1, dec!(120), now).unwrap();

    let instruction = desk.custody_instructions().unwrap().remove(0);
    let err = desk
        .reconcile(
            &CustodyConfirmation {
                entry_id: instruction.entry_id,
                amount: dec!(121),
                tx_id: "wire-9".into(),
            },
            now,
        )
        .unwrap_err();
    assert!(err.is_integrity_violation());
    assert!(matches!(
        desk.deposit(dec!(1), "more", now),
        Err(CoreError::TreasuryHalted(_))
    ));

    assert!(desk.resolve_halt("custodian corrected wire", now).unwrap());
    desk.reconcile(
        &CustodyConfirmation {
            entry_id: instruction.entry_id,
            amount: dec!(120),
            tx_id: "wire-9b".into(),
        },
        now,
    )
    .unwrap();
    assert!(desk.custody_instructions().unwrap().is_empty());

    // Integrity trips still need the reset quorum.
    assert!(desk.breaker_state().unwrap().is_tripped());
    for signer in SIGNERS {
        desk.approve_reset(signer, now).unwrap();
    }
    assert!(!desk.breaker_state().unwrap().is_tripped());
}
