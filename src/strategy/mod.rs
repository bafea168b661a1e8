//! Strategy engine: opportunity scoring, confidence, and risk gating.

pub mod accuracy;
pub mod confidence;
pub mod costs;
pub mod risk;
pub mod scorer;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::llm::BoundedReasoner;
use crate::market::SnapshotStore;
use crate::types::{
    BreakerState, CandidateId, CoreError, Opportunity, ProductId, Route, TradeCandidate, TreasuryState,
};
use accuracy::AccuracyTracker;
use risk::{Rejection, RiskGate, RiskPolicy};
use scorer::OpportunityScorer;

// ---------------------------------------------------------------------------
// Decision log
// ---------------------------------------------------------------------------

/// Record of every decision made (or skipped) during an evaluation pass,
/// including opportunities that were passed on and the reason why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DecisionRecord {
    /// Candidate created in `pending`, ready for the approval workflow.
    Created { candidate: TradeCandidate },
    /// Opportunity blocked by the risk gate.
    Rejected {
        opportunity: Opportunity,
        rejection: Rejection,
    },
    /// No observation of the product is inside the freshness window.
    StaleData { product_id: ProductId },
    /// The route already has a candidate awaiting sign-off or payment.
    Outstanding { route: Route, candidate_id: CandidateId },
}

/// What the gate works against in one pass: the treasury, the lots already
/// open, and candidates from earlier passes that are cleared or awaiting
/// sign-off but not yet paid for.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub treasury: TreasuryState,
    /// Open lots per product.
    pub open_lots: HashMap<ProductId, usize>,
    pub outstanding: Vec<TradeCandidate>,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub candidates: Vec<TradeCandidate>,
    pub decisions: Vec<DecisionRecord>,
    pub policy_version: u64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Pipelines scoring → optional reasoning → ranking → risk gating.
///
/// The risk gate is an immutable snapshot: `reload` swaps in a new one for
/// subsequent passes, while a pass in progress keeps the one it started with.
pub struct StrategyOrchestrator {
    scorer: OpportunityScorer,
    gate: RwLock<Arc<RiskGate>>,
    accuracy: Mutex<AccuracyTracker>,
    reasoner: Option<BoundedReasoner>,
}

impl StrategyOrchestrator {
    pub fn new(scorer: OpportunityScorer, gate: RiskGate, accuracy: AccuracyTracker) -> Self {
        Self {
            scorer,
            gate: RwLock::new(Arc::new(gate)),
            accuracy: Mutex::new(accuracy),
            reasoner: None,
        }
    }

    /// Blend an external reasoning service into confidence.
    pub fn with_reasoner(mut self, reasoner: BoundedReasoner) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn scorer(&self) -> &OpportunityScorer {
        &self.scorer
    }

    /// The gate snapshot the next pass will use.
    pub fn gate(&self) -> Result<Arc<RiskGate>, CoreError> {
        self.gate
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| CoreError::LockPoisoned("risk gate"))
    }

    /// Install a new risk policy for subsequent passes.
    pub fn reload(&self, policy: RiskPolicy, version: u64) -> Result<(), CoreError> {
        let mut gate = self.gate.write().map_err(|_| CoreError::LockPoisoned("risk gate"))?;
        info!(
            from = gate.version(),
            to = version,
            min_profit = %policy.min_profit,
            min_confidence = %policy.min_confidence,
            "Risk policy reloaded"
        );
        *gate = Arc::new(RiskGate::new(policy, version));
        Ok(())
    }

    /// Feed a realized outcome back into route accuracy.
    pub fn record_outcome(&self, route: Route, predicted: Decimal, realized: Decimal) -> Result<(), CoreError> {
        self.accuracy
            .lock()
            .map_err(|_| CoreError::LockPoisoned("accuracy tracker"))?
            .record(route, predicted, realized);
        Ok(())
    }

    pub fn route_error(&self, route: &Route) -> Result<Option<Decimal>, CoreError> {
        Ok(self
            .accuracy
            .lock()
            .map_err(|_| CoreError::LockPoisoned("accuracy tracker"))?
            .route_error(route))
    }

    /// Score every known product against the latest fresh observations.
    pub fn score_all(
        &self,
        store: &SnapshotStore,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Opportunity>, Vec<DecisionRecord>), CoreError> {
        let accuracy = self
            .accuracy
            .lock()
            .map_err(|_| CoreError::LockPoisoned("accuracy tracker"))?;

        let mut opportunities = Vec::new();
        let mut decisions = Vec::new();
        for product_id in store.products()? {
            let view = store.latest(&product_id, now)?;
            if view.is_stale_data() {
                decisions.push(DecisionRecord::StaleData { product_id });
                continue;
            }
            if let Some(opp) = self.scorer.score(&view.fresh, &accuracy, now) {
                opportunities.push(opp);
            }
        }
        Ok((opportunities, decisions))
    }

    /// Run one evaluation pass.
    ///
    /// Steps:
    /// 1. Score every product; stale products are logged and skipped.
    /// 2. When a reasoner is configured, confidence becomes the lower of the
    ///    rule-based score and the assessed one.
    /// 3. Rank by `net_profit × confidence`, highest first.
    /// 4. Gate in rank order. Capital committed by outstanding candidates and
    ///    by earlier candidates in the pass is taken out of the working cash
    ///    balance, so approvals across passes cannot overdraw it. A route
    ///    with an outstanding candidate is not proposed again.
    pub async fn evaluate(
        &self,
        store: &SnapshotStore,
        book: &Book,
        breaker: &BreakerState,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, CoreError> {
        let gate = self.gate()?;
        let (mut opportunities, mut decisions) = self.score_all(store, now)?;

        if let Some(reasoner) = &self.reasoner {
            let assessed = reasoner.assess_all(&opportunities).await;
            for (opp, external) in opportunities.iter_mut().zip(assessed) {
                if external < opp.confidence {
                    debug!(
                        route = %opp.route(),
                        rule = %opp.confidence,
                        assessed = %external,
                        "Reasoning service lowered confidence"
                    );
                    opp.confidence = external;
                }
            }
        }

        opportunities.sort_by(|a, b| {
            let score_a = a.net_profit() * a.confidence;
            let score_b = b.net_profit() * b.confidence;
            score_b
                .cmp(&score_a)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        let quantity = gate.policy().default_quantity;
        let mut working = book.treasury.clone();
        let mut open_lots = book.open_lots.clone();
        let mut open_routes: HashMap<Route, CandidateId> = HashMap::new();
        for c in &book.outstanding {
            working.cash_balance -= c.proposed_capital;
            working.trading_capital += c.proposed_capital;
            *open_lots.entry(c.opportunity.product_id.clone()).or_default() += 1;
            open_routes.insert(c.opportunity.route(), c.id);
        }

        let mut candidates = Vec::new();
        for opp in opportunities {
            let route = opp.route();
            if let Some(&candidate_id) = open_routes.get(&route) {
                debug!(route = %route, candidate_id = %candidate_id, "Route already has an outstanding candidate");
                decisions.push(DecisionRecord::Outstanding { route, candidate_id });
                continue;
            }

            let held = open_lots.get(&opp.product_id).copied().unwrap_or(0);
            match gate.evaluate(&opp, quantity, &working, held, breaker, now) {
                Ok(candidate) => {
                    working.cash_balance -= candidate.proposed_capital;
                    working.trading_capital += candidate.proposed_capital;
                    *open_lots.entry(opp.product_id.clone()).or_default() += 1;
                    open_routes.insert(route, candidate.id);
                    info!(
                        candidate_id = %candidate.id,
                        route = %opp.route(),
                        net = %opp.net_profit(),
                        confidence = %opp.confidence.round_dp(3),
                        capital = %candidate.proposed_capital,
                        "Candidate created"
                    );
                    decisions.push(DecisionRecord::Created {
                        candidate: candidate.clone(),
                    });
                    candidates.push(candidate);
                }
                Err(rejection) => {
                    warn!(
                        route = %opp.route(),
                        code = rejection.reason.code(),
                        detail = %rejection.detail,
                        "Opportunity rejected"
                    );
                    decisions.push(DecisionRecord::Rejected {
                        opportunity: opp,
                        rejection,
                    });
                }
            }
        }

        Ok(Evaluation {
            candidates,
            decisions,
            policy_version: gate.version(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
