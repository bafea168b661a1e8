//! End-to-end tests through the `Desk`: the reference scenarios and
//! replay-from-empty equivalence.

mod replay;
mod scenarios;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use ramstrat::engine::approval::{ApprovalPolicy, ApprovalWorkflow, Quorum};
use ramstrat::engine::breaker::{BreakerConfig, Supervisor};
use ramstrat::engine::router::{ProfitRouter, RouterConfig};
use ramstrat::engine::DeskParts;
use ramstrat::market::SnapshotStore;
use ramstrat::strategy::accuracy::AccuracyTracker;
use ramstrat::strategy::confidence::FixedConfidence;
use ramstrat::strategy::costs::CostModel;
use ramstrat::strategy::risk::{RiskGate, RiskPolicy};
use ramstrat::strategy::scorer::OpportunityScorer;
use ramstrat::strategy::StrategyOrchestrator;
use ramstrat::types::{Availability, PriceObservation};

pub const SIGNERS: [&str; 5] = ["alice", "bob", "carol", "dave", "erin"];

/// Desk parts with flat $15 route costs, a fixed confidence, default risk
/// policy, 3-of-5 trade approval and a unanimous reset quorum.
pub fn make_parts(confidence: Decimal) -> DeskParts {
    let scorer = OpportunityScorer::new(
        CostModel::flat(dec!(15)),
        Arc::new(FixedConfidence(confidence)),
        "USD",
    );
    DeskParts {
        store: SnapshotStore::new(Duration::minutes(30)),
        orchestrator: StrategyOrchestrator::new(
            scorer,
            RiskGate::new(RiskPolicy::default(), 1),
            AccuracyTracker::default(),
        ),
        workflow: ApprovalWorkflow::new(ApprovalPolicy::with_signers(SIGNERS).unwrap()),
        supervisor: Supervisor::new(BreakerConfig::default(), Quorum::unanimous(SIGNERS).unwrap()),
        router: ProfitRouter::new(RouterConfig::default()).unwrap(),
        conditions_window: Duration::days(7),
        currency: "USD".into(),
    }
}

pub fn make_obs(product: &str, market: &str, price: Decimal, at: DateTime<Utc>) -> PriceObservation {
    PriceObservation {
        product_id: product.into(),
        marketplace_id: market.into(),
        unit_price: price,
        currency: "USD".into(),
        captured_at: at,
        availability: Availability::InStock,
    }
}

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}
