//! Shared types for the RAMSTRAT core.
//!
//! These types form the data model used across all modules: price
//! observations, scored opportunities, trade candidates, ledger entries,
//! inventory lots, treasury and breaker state. They carry no behaviour
//! beyond small derived accessors so that market, strategy and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type ProductId = String;
pub type MarketplaceId = String;
pub type SignerId = String;
pub type LotId = Uuid;
pub type CandidateId = Uuid;

// ---------------------------------------------------------------------------
// Price observations
// ---------------------------------------------------------------------------

/// Listing availability at the time of capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    InStock,
    PreOrder,
    OutOfStock,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::InStock => write!(f, "in-stock"),
            Availability::PreOrder => write!(f, "pre-order"),
            Availability::OutOfStock => write!(f, "out-of-stock"),
        }
    }
}

/// A single normalized price point for one product on one marketplace.
///
/// Immutable once recorded. Newer observations for the same
/// (product, marketplace) key supersede older ones without replacing them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub product_id: ProductId,
    pub marketplace_id: MarketplaceId,
    pub unit_price: Decimal,
    pub currency: String,
    pub captured_at: DateTime<Utc>,
    pub availability: Availability,
}

impl fmt::Display for PriceObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {} {} ({}, {})",
            self.marketplace_id,
            self.product_id,
            self.unit_price,
            self.currency,
            self.availability,
            self.captured_at.format("%Y-%m-%d %H:%M:%S"),
        )
    }
}

impl PriceObservation {
    pub fn is_in_stock(&self) -> bool {
        self.availability == Availability::InStock
    }

    /// Age of the observation relative to `now` (never negative).
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.captured_at).max(chrono::Duration::zero())
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// Buy-side and sell-side marketplace pair for a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    pub product_id: ProductId,
    pub buy: MarketplaceId,
    pub sell: MarketplaceId,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.product_id, self.buy, self.sell)
    }
}

/// A detected price gap for one product across two marketplaces.
///
/// Derived each evaluation cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub product_id: ProductId,
    pub buy_marketplace: MarketplaceId,
    pub sell_marketplace: MarketplaceId,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    /// Shipping + fees + tax for one unit along this route.
    pub estimated_costs: Decimal,
    /// Bounded score in [0, 1].
    pub confidence: Decimal,
    pub computed_at: DateTime<Utc>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buy {}@{} sell {}@{} costs={} net={} conf={:.2}",
            self.product_id,
            self.buy_marketplace,
            self.buy_price,
            self.sell_marketplace,
            self.sell_price,
            self.estimated_costs,
            self.net_profit(),
            self.confidence,
        )
    }
}

impl Opportunity {
    /// Per-unit profit after estimated costs.
    pub fn net_profit(&self) -> Decimal {
        self.sell_price - self.buy_price - self.estimated_costs
    }

    /// Net profit as a percentage of the buy price.
    pub fn margin_pct(&self) -> Decimal {
        if self.buy_price.is_zero() {
            Decimal::ZERO
        } else {
            self.net_profit() / self.buy_price * dec!(100)
        }
    }

    pub fn route(&self) -> Route {
        Route {
            product_id: self.product_id.clone(),
            buy: self.buy_marketplace.clone(),
            sell: self.sell_marketplace.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade candidates
// ---------------------------------------------------------------------------

/// Approval lifecycle of a trade candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    AutoApproved,
    AwaitingSignoff,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalState {
    /// No transition ever leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalState::AutoApproved
                | ApprovalState::Approved
                | ApprovalState::Rejected
                | ApprovalState::Expired
        )
    }

    /// Whether the candidate has been cleared for execution.
    pub fn is_cleared(&self) -> bool {
        matches!(self, ApprovalState::AutoApproved | ApprovalState::Approved)
    }

    /// Allowed forward edges of the approval state machine.
    pub fn can_transition_to(&self, next: ApprovalState) -> bool {
        use ApprovalState::*;
        matches!(
            (self, next),
            (Pending, AutoApproved)
                | (Pending, AwaitingSignoff)
                | (Pending, Rejected)
                | (AwaitingSignoff, Approved)
                | (AwaitingSignoff, Rejected)
                | (AwaitingSignoff, Expired)
        )
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalState::Pending => "pending",
            ApprovalState::AutoApproved => "auto_approved",
            ApprovalState::AwaitingSignoff => "awaiting_signoff",
            ApprovalState::Approved => "approved",
            ApprovalState::Rejected => "rejected",
            ApprovalState::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// An opportunity promoted toward execution.
///
/// Created by the risk gate in `Pending`; only the approval workflow
/// mutates `approval_state` afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub id: CandidateId,
    pub opportunity: Opportunity,
    pub proposed_quantity: u32,
    pub proposed_capital: Decimal,
    pub approval_state: ApprovalState,
    pub created_at: DateTime<Utc>,
    /// Version of the policy snapshot the candidate was gated under.
    pub policy_version: u64,
}

impl fmt::Display for TradeCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate {} [{}] {} x{} capital=${}",
            self.id,
            self.approval_state,
            self.opportunity.route(),
            self.proposed_quantity,
            self.proposed_capital,
        )
    }
}

impl TradeCandidate {
    /// Expected profit across the whole proposed quantity.
    pub fn expected_profit(&self) -> Decimal {
        self.opportunity.net_profit() * Decimal::from(self.proposed_quantity)
    }
}

// ---------------------------------------------------------------------------
// Inventory lots
// ---------------------------------------------------------------------------

/// Lot lifecycle. Transitions strictly advance; `Sold` and `WrittenOff`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    PendingDelivery,
    InStock,
    Listed,
    Sold,
    WrittenOff,
}

impl LotStatus {
    fn rank(&self) -> u8 {
        match self {
            LotStatus::PendingDelivery => 0,
            LotStatus::InStock => 1,
            LotStatus::Listed => 2,
            LotStatus::Sold | LotStatus::WrittenOff => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Whether the lot is open (capital still deployed).
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the lot counts towards inventory value (held at cost).
    pub fn is_held(&self) -> bool {
        matches!(self, LotStatus::InStock | LotStatus::Listed)
    }

    pub fn can_advance_to(&self, next: LotStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LotStatus::PendingDelivery => "pending_delivery",
            LotStatus::InStock => "in_stock",
            LotStatus::Listed => "listed",
            LotStatus::Sold => "sold",
            LotStatus::WrittenOff => "written_off",
        };
        write!(f, "{s}")
    }
}

/// One discrete purchased batch of inventory, owned by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryLot {
    pub lot_id: LotId,
    pub product_id: ProductId,
    pub cost_basis: Decimal,
    pub quantity: u32,
    pub status: LotStatus,
    /// Costs booked against the lot after purchase (shipping, fees).
    pub recorded_costs: Decimal,
}

impl fmt::Display for InventoryLot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lot {} {} x{} cost=${} [{}]",
            self.lot_id, self.product_id, self.quantity, self.cost_basis, self.status
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger entries
// ---------------------------------------------------------------------------

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    CashIn,
    CashOut,
    InventoryAdd,
    InventoryRemove,
    RealizedProfit,
    Buyback,
    Reinvestment,
    /// Zero-amount marker of a lot status transition.
    LotStatus(LotStatus),
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::CashIn => write!(f, "cash_in"),
            EntryKind::CashOut => write!(f, "cash_out"),
            EntryKind::InventoryAdd => write!(f, "inventory_add"),
            EntryKind::InventoryRemove => write!(f, "inventory_remove"),
            EntryKind::RealizedProfit => write!(f, "realized_profit"),
            EntryKind::Buyback => write!(f, "buyback"),
            EntryKind::Reinvestment => write!(f, "reinvestment"),
            EntryKind::LotStatus(status) => write!(f, "lot_status:{status}"),
        }
    }
}

/// What a ledger entry refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryRef {
    Lot {
        lot_id: LotId,
        product_id: ProductId,
        quantity: u32,
    },
    Funding {
        tx_id: String,
    },
    Fee {
        tx_id: String,
    },
    /// Cost booked against a lot after purchase.
    LotCost {
        lot_id: LotId,
        tx_id: String,
    },
    /// Profit allocation derived from the given realized_profit entry.
    Allocation {
        profit_entry: u64,
    },
}

impl EntryRef {
    pub fn lot_id(&self) -> Option<LotId> {
        match self {
            EntryRef::Lot { lot_id, .. } | EntryRef::LotCost { lot_id, .. } => Some(*lot_id),
            _ => None,
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRef::Lot { lot_id, product_id, quantity } => {
                write!(f, "lot:{lot_id} ({product_id} x{quantity})")
            }
            EntryRef::Funding { tx_id } => write!(f, "funding:{tx_id}"),
            EntryRef::Fee { tx_id } => write!(f, "fee:{tx_id}"),
            EntryRef::LotCost { lot_id, tx_id } => write!(f, "lot-cost:{lot_id} ({tx_id})"),
            EntryRef::Allocation { profit_entry } => write!(f, "allocation:#{profit_entry}"),
        }
    }
}

/// One append-only accounting record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Dense sequence number starting at 0.
    pub entry_id: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub reference: EntryRef,
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} ${} ({})",
            self.entry_id,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.amount,
            self.reference,
        )
    }
}

// ---------------------------------------------------------------------------
// Treasury state
// ---------------------------------------------------------------------------

/// Balances derived from folding the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreasuryState {
    pub cash_balance: Decimal,
    pub reserve_balance: Decimal,
    /// Cost basis of every open lot (capital deployed in trades).
    pub trading_capital: Decimal,
    /// Cost basis of in-stock and listed lots.
    pub inventory_value: Decimal,
    pub total_inflows: Decimal,
    pub total_outflows: Decimal,
    pub realized_profit: Decimal,
    pub reinvested: Decimal,
}

impl fmt::Display for TreasuryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cash=${} | reserve=${} | deployed=${} | inventory=${} | realized=${}",
            self.cash_balance,
            self.reserve_balance,
            self.trading_capital,
            self.inventory_value,
            self.realized_profit,
        )
    }
}

impl TreasuryState {
    /// Cash + deployed capital + reserve.
    pub fn total_equity(&self) -> Decimal {
        self.cash_balance + self.trading_capital + self.reserve_balance
    }

    /// cash + deployed + reserve == inflows - outflows.
    pub fn conserves_funds(&self) -> bool {
        self.total_equity() == self.total_inflows - self.total_outflows
    }
}

// ---------------------------------------------------------------------------
// Breaker state
// ---------------------------------------------------------------------------

/// Why the circuit breaker tripped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TripReason {
    ConsecutiveLosses { count: u32, threshold: u32 },
    UnrealizedLoss { fraction: Decimal, ceiling: Decimal },
    CashFloor { cash: Decimal, floor: Decimal },
    IntegrityViolation { detail: String },
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::ConsecutiveLosses { count, threshold } => write!(
                f,
                "{count} consecutive realized losses (limit {threshold})"
            ),
            TripReason::UnrealizedLoss { fraction, ceiling } => write!(
                f,
                "unrealized loss is {:.1}% of inventory value (ceiling {:.1}%)",
                fraction * dec!(100),
                ceiling * dec!(100),
            ),
            TripReason::CashFloor { cash, floor } => {
                write!(f, "cash balance ${cash} fell below floor ${floor}")
            }
            TripReason::IntegrityViolation { detail } => {
                write!(f, "accounting integrity violation: {detail}")
            }
        }
    }
}

/// Process-wide trading switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub armed: bool,
    pub trip_reason: Option<TripReason>,
    pub consecutive_losses: u32,
    pub tripped_at: Option<DateTime<Utc>>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            armed: true,
            trip_reason: None,
            consecutive_losses: 0,
            tripped_at: None,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.armed, &self.trip_reason) {
            (true, _) => write!(f, "ARMED (losses in a row: {})", self.consecutive_losses),
            (false, Some(reason)) => write!(f, "TRIPPED: {reason}"),
            (false, None) => write!(f, "TRIPPED"),
        }
    }
}

impl BreakerState {
    pub fn is_tripped(&self) -> bool {
        !self.armed
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors raised by the core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Stale observation for {product_id}@{marketplace_id}: captured {captured_at}, latest {latest}")]
    StaleObservation {
        product_id: ProductId,
        marketplace_id: MarketplaceId,
        captured_at: DateTime<Utc>,
        latest: DateTime<Utc>,
    },

    #[error("Breaker tripped: {0}")]
    BreakerTripped(String),

    #[error("Quorum timeout: candidate {0} expired before reaching quorum")]
    QuorumTimeout(CandidateId),

    #[error("Reconciliation mismatch on entry #{entry_id}: ledger ${expected}, custody ${reported}")]
    ReconciliationMismatch {
        entry_id: u64,
        expected: Decimal,
        reported: Decimal,
    },

    #[error("Replay inconsistency: {0}")]
    ReplayInconsistency(String),

    #[error("Unknown lot: {0}")]
    UnknownLot(LotId),

    #[error("Invalid lot transition for {lot_id}: {from} -> {to}")]
    InvalidTransition {
        lot_id: LotId,
        from: LotStatus,
        to: LotStatus,
    },

    #[error("Unknown candidate: {0}")]
    UnknownCandidate(CandidateId),

    #[error("Unknown signer: {0}")]
    UnknownSigner(SignerId),

    #[error("Candidate {id} is closed ({state})")]
    CandidateClosed { id: CandidateId, state: ApprovalState },

    #[error("Insufficient cash: need ${needed}, have ${available}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Treasury halted: {0}")]
    TreasuryHalted(String),

    #[error("Invalid allocation split: {0}")]
    InvalidSplit(String),

    #[error("Invalid quorum: {required} of {participants}")]
    InvalidQuorum { required: usize, participants: usize },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Unknown ledger entry: #{0}")]
    UnknownEntry(u64),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl CoreError {
    /// Integrity violations halt the treasury until an operator intervenes.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            CoreError::ReconciliationMismatch { .. } | CoreError::ReplayInconsistency(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_opportunity(buy: Decimal, sell: Decimal, costs: Decimal) -> Opportunity {
        Opportunity {
            product_id: "ddr5-32gb-6000".to_string(),
            buy_marketplace: "newegg".to_string(),
            sell_marketplace: "ebay".to_string(),
            buy_price: buy,
            sell_price: sell,
            estimated_costs: costs,
            confidence: dec!(0.85),
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_opportunity_net_profit() {
        let opp = make_opportunity(dec!(120), dec!(165), dec!(15));
        assert_eq!(opp.net_profit(), dec!(30));
        assert_eq!(opp.margin_pct(), dec!(25));
    }

    #[test]
    fn test_opportunity_margin_zero_buy_price() {
        let opp = make_opportunity(Decimal::ZERO, dec!(10), Decimal::ZERO);
        assert_eq!(opp.margin_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_observation_age_never_negative() {
        let now = Utc::now();
        let obs = PriceObservation {
            product_id: "p".into(),
            marketplace_id: "m".into(),
            unit_price: dec!(1),
            currency: "USD".into(),
            captured_at: now + Duration::seconds(30),
            availability: Availability::InStock,
        };
        assert_eq!(obs.age(now), Duration::zero());
    }

    #[test]
    fn test_approval_state_forward_only() {
        use ApprovalState::*;
        assert!(Pending.can_transition_to(AutoApproved));
        assert!(Pending.can_transition_to(AwaitingSignoff));
        assert!(AwaitingSignoff.can_transition_to(Approved));
        assert!(AwaitingSignoff.can_transition_to(Expired));
        assert!(!Approved.can_transition_to(AwaitingSignoff));
        assert!(!Expired.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Pending));
        for terminal in [AutoApproved, Approved, Rejected, Expired] {
            assert!(terminal.is_terminal());
            for next in [Pending, AutoApproved, AwaitingSignoff, Approved, Rejected, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_lot_status_monotonic() {
        assert!(LotStatus::PendingDelivery.can_advance_to(LotStatus::InStock));
        assert!(LotStatus::InStock.can_advance_to(LotStatus::Sold));
        assert!(LotStatus::PendingDelivery.can_advance_to(LotStatus::WrittenOff));
        assert!(!LotStatus::Listed.can_advance_to(LotStatus::InStock));
        assert!(!LotStatus::Sold.can_advance_to(LotStatus::WrittenOff));
        assert!(!LotStatus::InStock.can_advance_to(LotStatus::InStock));
    }

    #[test]
    fn test_entry_kind_json_shape() {
        assert_eq!(serde_json::to_string(&EntryKind::CashIn).unwrap(), "\"cash_in\"");
        assert_eq!(
            serde_json::to_string(&EntryKind::LotStatus(LotStatus::InStock)).unwrap(),
            "{\"lot_status\":\"in_stock\"}"
        );
    }

    #[test]
    fn test_ledger_entry_amount_survives_json_exactly() {
        let entry = LedgerEntry {
            entry_id: 7,
            timestamp: Utc::now(),
            kind: EntryKind::CashOut,
            amount: dec!(119.99),
            reference: EntryRef::Fee { tx_id: "tx-1".into() },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"119.99\""));
        let parsed: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_treasury_conservation() {
        let state = TreasuryState {
            cash_balance: dec!(880),
            reserve_balance: dec!(0),
            trading_capital: dec!(120),
            inventory_value: dec!(0),
            total_inflows: dec!(1120),
            total_outflows: dec!(120),
            ..Default::default()
        };
        assert!(state.conserves_funds());
        assert_eq!(state.total_equity(), dec!(1000));
    }

    #[test]
    fn test_breaker_display() {
        let mut state = BreakerState::default();
        assert!(format!("{state}").starts_with("ARMED"));
        state.armed = false;
        state.trip_reason = Some(TripReason::ConsecutiveLosses { count: 3, threshold: 3 });
        assert_eq!(
            format!("{state}"),
            "TRIPPED: 3 consecutive realized losses (limit 3)"
        );
    }

    #[test]
    fn test_integrity_violation_classification() {
        assert!(CoreError::ReplayInconsistency("x".into()).is_integrity_violation());
        assert!(CoreError::ReconciliationMismatch {
            entry_id: 1,
            expected: dec!(1),
            reported: dec!(2)
        }
        .is_integrity_violation());
        assert!(!CoreError::UnknownLot(Uuid::nil()).is_integrity_violation());
    }
}
