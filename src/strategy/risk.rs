//! Risk gate.
//!
//! Decides whether a scored opportunity may become a trade candidate.
//! Checks run in a fixed order (breaker, profit, confidence, buy-side
//! marketplace, margin, single-trade limit, product concentration,
//! inventory exposure, cash) and the first failure becomes the rejection
//! reason.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::types::{ApprovalState, BreakerState, MarketplaceId, Opportunity, TradeCandidate, TreasuryState};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Named risk thresholds (`[risk]` in config.toml).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// Minimum expected profit for the whole proposed quantity.
    pub min_profit: Decimal,
    pub min_confidence: Decimal,
    /// Minimum net margin over the buy price, in percent. Zero disables it.
    pub min_margin_pct: Decimal,
    /// Largest capital a single candidate may commit.
    pub max_single_trade: Decimal,
    /// Ceiling on deployed capital as a fraction of treasury equity, after the trade.
    pub max_inventory_exposure: Decimal,
    /// Units proposed per candidate.
    pub default_quantity: u32,
    /// Open lots of one product at which new candidates for it are refused.
    /// Zero disables the check.
    pub max_open_lots_per_product: usize,
    /// Confidence deducted when buying from a less reliable marketplace.
    pub marketplace_haircuts: BTreeMap<MarketplaceId, Decimal>,
}

impl RiskPolicy {
    /// Confidence after the buy-side marketplace haircut.
    pub fn adjusted_confidence(&self, opportunity: &Opportunity) -> Decimal {
        let haircut = self
            .marketplace_haircuts
            .get(&opportunity.buy_marketplace)
            .copied()
            .unwrap_or(Decimal::ZERO);
        (opportunity.confidence - haircut).max(Decimal::ZERO)
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            min_profit: dec!(20),
            min_confidence: dec!(0.7),
            min_margin_pct: dec!(15),
            max_single_trade: dec!(10000),
            max_inventory_exposure: dec!(0.8),
            default_quantity: 1,
            max_open_lots_per_product: 5,
            marketplace_haircuts: BTreeMap::from([("aliexpress".to_string(), dec!(0.2))]),
        }
    }
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why an opportunity did not become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    BreakerTripped,
    ThresholdNotMet,
    InsufficientConfidence,
    MarketplaceRisk,
    MarginTooThin,
    TradeLimitExceeded,
    ConcentrationLimit,
    ExposureLimitExceeded,
    InsufficientCash,
}

impl RejectionReason {
    /// Stable reason code for audit logs.
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::BreakerTripped => "BREAKER_TRIPPED",
            RejectionReason::ThresholdNotMet => "THRESHOLD_NOT_MET",
            RejectionReason::InsufficientConfidence => "INSUFFICIENT_CONFIDENCE",
            RejectionReason::MarketplaceRisk => "MARKETPLACE_RISK",
            RejectionReason::MarginTooThin => "MARGIN_TOO_THIN",
            RejectionReason::TradeLimitExceeded => "TRADE_LIMIT_EXCEEDED",
            RejectionReason::ConcentrationLimit => "CONCENTRATION_LIMIT",
            RejectionReason::ExposureLimitExceeded => "EXPOSURE_LIMIT_EXCEEDED",
            RejectionReason::InsufficientCash => "INSUFFICIENT_CASH",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A rejection with its reason code and a human-readable detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    fn new(reason: RejectionReason, detail: String) -> Self {
        Self { reason, detail }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.detail)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct RiskGate {
    policy: RiskPolicy,
    /// Version of the policy snapshot, stamped on every candidate.
    version: u64,
}

impl RiskGate {
    pub fn new(policy: RiskPolicy, version: u64) -> Self {
        Self { policy, version }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Gate an opportunity for `quantity` units. `open_lots` counts lots of
    /// the same product already held or committed.
    ///
    /// On success the candidate is in `pending`; nothing else is mutated.
    pub fn evaluate(
        &self,
        opportunity: &Opportunity,
        quantity: u32,
        treasury: &TreasuryState,
        open_lots: usize,
        breaker: &BreakerState,
        now: DateTime<Utc>,
    ) -> Result<TradeCandidate, Rejection> {
        use RejectionReason::*;
        let p = &self.policy;

        if breaker.is_tripped() {
            return Err(Rejection::new(BreakerTripped, breaker.to_string()));
        }

        let quantity = quantity.max(1);
        let qty = Decimal::from(quantity);
        let expected_profit = opportunity.net_profit() * qty;
        if expected_profit < p.min_profit {
            return Err(Rejection::new(
                ThresholdNotMet,
                format!("expected profit ${expected_profit} below minimum ${}", p.min_profit),
            ));
        }

        if opportunity.confidence < p.min_confidence {
            return Err(Rejection::new(
                InsufficientConfidence,
                format!(
                    "confidence {:.3} below minimum {}",
                    opportunity.confidence, p.min_confidence
                ),
            ));
        }

        let adjusted = p.adjusted_confidence(opportunity);
        if adjusted < p.min_confidence {
            return Err(Rejection::new(
                MarketplaceRisk,
                format!(
                    "confidence {:.3} after {} haircut below minimum {}",
                    adjusted, opportunity.buy_marketplace, p.min_confidence
                ),
            ));
        }

        let margin = opportunity.margin_pct();
        if p.min_margin_pct > Decimal::ZERO && margin < p.min_margin_pct {
            return Err(Rejection::new(
                MarginTooThin,
                format!("margin {:.1}% below minimum {}%", margin, p.min_margin_pct),
            ));
        }

        let capital = opportunity.buy_price * qty;
        if capital > p.max_single_trade {
            return Err(Rejection::new(
                TradeLimitExceeded,
                format!("capital ${capital} above single-trade limit ${}", p.max_single_trade),
            ));
        }

        if p.max_open_lots_per_product > 0 && open_lots >= p.max_open_lots_per_product {
            return Err(Rejection::new(
                ConcentrationLimit,
                format!(
                    "{open_lots} open lots of {} at limit {}",
                    opportunity.product_id, p.max_open_lots_per_product
                ),
            ));
        }

        let equity = treasury.total_equity();
        let projected = treasury.trading_capital + capital;
        if equity <= Decimal::ZERO || projected / equity > p.max_inventory_exposure {
            return Err(Rejection::new(
                ExposureLimitExceeded,
                format!(
                    "projected exposure ${projected} of equity ${equity} exceeds {}",
                    p.max_inventory_exposure
                ),
            ));
        }

        if treasury.cash_balance < capital {
            return Err(Rejection::new(
                InsufficientCash,
                format!("need ${capital}, have ${}", treasury.cash_balance),
            ));
        }

        let candidate = TradeCandidate {
            id: Uuid::new_v4(),
            opportunity: opportunity.clone(),
            proposed_quantity: quantity,
            proposed_capital: capital,
            approval_state: ApprovalState::Pending,
            created_at: now,
            policy_version: self.version,
        };
        debug!(
            candidate_id = %candidate.id,
            route = %opportunity.route(),
            capital = %capital,
            expected_profit = %expected_profit,
            policy_version = self.version,
            "Candidate created"
        );
        Ok(candidate)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
