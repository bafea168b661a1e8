//! Treasury ledger.
//!
//! Append-only double-entry record of cash, inventory and profit. Every
//! mutation appends one or more `LedgerEntry`s and updates the cached
//! balances and lots in place. `fold` recomputes the same state from the
//! entry sequence alone and is the reference for the cache:
//! `verify` compares the two and `replay` rebuilds a ledger from a journal.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::{
    CoreError, EntryKind, EntryRef, InventoryLot, LedgerEntry, LotId, LotStatus, ProductId,
    TreasuryState,
};

// ---------------------------------------------------------------------------
// Failure signals
// ---------------------------------------------------------------------------

/// Execution failures reported against a lot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Failure {
    /// The seller cancelled the order; `refund` may be partial or zero.
    OrderRejected { refund: Decimal },
    ShipmentLost,
}

impl Failure {
    pub fn refund(&self) -> Decimal {
        match self {
            Failure::OrderRejected { refund } => *refund,
            Failure::ShipmentLost => Decimal::ZERO,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::OrderRejected { refund } => write!(f, "order rejected (refund ${refund})"),
            Failure::ShipmentLost => write!(f, "shipment lost"),
        }
    }
}

/// Mark-to-market valuation of held inventory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MarkToMarket {
    /// Cost basis of in-stock and listed lots.
    pub inventory_value: Decimal,
    pub market_value: Decimal,
    /// Sum of per-lot shortfalls of market value below cost.
    pub unrealized_loss: Decimal,
    /// `unrealized_loss / inventory_value`, zero with no inventory.
    pub loss_fraction: Decimal,
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

/// State derived purely from an entry sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Folded {
    pub state: TreasuryState,
    pub lots: HashMap<LotId, InventoryLot>,
}

#[derive(Default)]
struct FoldCursor {
    folded: Folded,
    /// realized_profit amounts by entry id.
    profits: HashMap<u64, Decimal>,
    /// Amount already allocated from each realized_profit entry.
    allocated: HashMap<u64, Decimal>,
}

impl FoldCursor {
    fn lot_mut(&mut self, entry: &LedgerEntry) -> Result<&mut InventoryLot, String> {
        let lot_id = entry
            .reference
            .lot_id()
            .ok_or_else(|| format!("entry #{} ({}) has no lot reference", entry.entry_id, entry.kind))?;
        self.folded
            .lots
            .get_mut(&lot_id)
            .ok_or_else(|| format!("entry #{} references unknown lot {lot_id}", entry.entry_id))
    }

    fn allocate(&mut self, entry: &LedgerEntry) -> Result<(), String> {
        let EntryRef::Allocation { profit_entry } = entry.reference else {
            return Err(format!("entry #{} is not an allocation", entry.entry_id));
        };
        let profit = *self
            .profits
            .get(&profit_entry)
            .ok_or_else(|| format!("entry #{} allocates unknown profit #{profit_entry}", entry.entry_id))?;
        let used = self.allocated.entry(profit_entry).or_default();
        *used += entry.amount;
        if *used > profit {
            return Err(format!(
                "allocations from profit #{profit_entry} exceed ${profit}"
            ));
        }
        Ok(())
    }

    fn apply(&mut self, entry: &LedgerEntry) -> Result<(), String> {
        let a = entry.amount;
        if a.is_sign_negative() && entry.kind != EntryKind::RealizedProfit {
            return Err(format!("entry #{} has negative amount ${a}", entry.entry_id));
        }

        match entry.kind {
            EntryKind::CashIn => {
                self.folded.state.cash_balance += a;
                self.folded.state.total_inflows += a;
            }
            EntryKind::CashOut => {
                if let EntryRef::LotCost { .. } = entry.reference {
                    self.lot_mut(entry)?.recorded_costs += a;
                }
                self.folded.state.cash_balance -= a;
                self.folded.state.total_outflows += a;
            }
            EntryKind::InventoryAdd => {
                let EntryRef::Lot { lot_id, ref product_id, quantity } = entry.reference else {
                    return Err(format!("inventory_add #{} without lot reference", entry.entry_id));
                };
                if self.folded.lots.contains_key(&lot_id) {
                    return Err(format!("lot {lot_id} added twice (entry #{})", entry.entry_id));
                }
                self.folded.lots.insert(
                    lot_id,
                    InventoryLot {
                        lot_id,
                        product_id: product_id.clone(),
                        cost_basis: a,
                        quantity,
                        status: LotStatus::PendingDelivery,
                        recorded_costs: Decimal::ZERO,
                    },
                );
                self.folded.state.trading_capital += a;
                self.folded.state.total_inflows += a;
            }
            EntryKind::InventoryRemove => {
                let lot = self.lot_mut(entry)?;
                if lot.status.is_open() {
                    return Err(format!("inventory_remove #{} on open lot {}", entry.entry_id, lot.lot_id));
                }
                if lot.cost_basis != a {
                    return Err(format!(
                        "inventory_remove #{} of ${a} does not match cost basis ${}",
                        entry.entry_id, lot.cost_basis
                    ));
                }
                self.folded.state.trading_capital -= a;
                self.folded.state.total_outflows += a;
            }
            EntryKind::LotStatus(next) => {
                if !a.is_zero() {
                    return Err(format!("status entry #{} carries amount ${a}", entry.entry_id));
                }
                let lot = self.lot_mut(entry)?;
                if !lot.status.can_advance_to(next) {
                    return Err(format!(
                        "lot {} cannot move {} -> {} (entry #{})",
                        lot.lot_id, lot.status, next, entry.entry_id
                    ));
                }
                let (was_held, cost) = (lot.status.is_held(), lot.cost_basis);
                lot.status = next;
                match (was_held, next.is_held()) {
                    (false, true) => self.folded.state.inventory_value += cost,
                    (true, false) => self.folded.state.inventory_value -= cost,
                    _ => {}
                }
            }
            EntryKind::RealizedProfit => {
                self.profits.insert(entry.entry_id, a);
                self.folded.state.realized_profit += a;
            }
            EntryKind::Buyback => {
                self.allocate(entry)?;
                self.folded.state.cash_balance -= a;
                self.folded.state.reserve_balance += a;
            }
            EntryKind::Reinvestment => {
                self.allocate(entry)?;
                self.folded.state.reinvested += a;
            }
        }
        Ok(())
    }
}

/// Recompute balances and lots from an entry sequence starting at empty.
///
/// Fails with `ReplayInconsistency` on gaps in the sequence, impossible lot
/// transitions, over-allocation, or a fold that does not conserve funds.
pub fn fold(entries: &[LedgerEntry]) -> Result<Folded, CoreError> {
    let mut cursor = FoldCursor::default();
    for (index, entry) in entries.iter().enumerate() {
        if entry.entry_id != index as u64 {
            return Err(CoreError::ReplayInconsistency(format!(
                "expected entry #{index}, found #{}",
                entry.entry_id
            )));
        }
        cursor.apply(entry).map_err(CoreError::ReplayInconsistency)?;
        if !cursor.folded.state.conserves_funds() {
            return Err(CoreError::ReplayInconsistency(format!(
                "funds not conserved after entry #{}",
                entry.entry_id
            )));
        }
    }
    Ok(cursor.folded)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: Vec<LedgerEntry>,
    lots: HashMap<LotId, InventoryLot>,
    state: TreasuryState,
    /// realized_profit entries already routed.
    allocated: HashSet<u64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a persisted entry sequence.
    pub fn replay(entries: Vec<LedgerEntry>) -> Result<Self, CoreError> {
        let folded = fold(&entries)?;
        let allocated = entries
            .iter()
            .filter_map(|e| match (e.kind, &e.reference) {
                (EntryKind::Reinvestment | EntryKind::Buyback, EntryRef::Allocation { profit_entry }) => {
                    Some(*profit_entry)
                }
                _ => None,
            })
            .collect();
        info!(
            entries = entries.len(),
            lots = folded.lots.len(),
            treasury = %folded.state,
            "Ledger replayed"
        );
        Ok(Self {
            entries,
            lots: folded.lots,
            state: folded.state,
            allocated,
        })
    }

    /// Compare the cached state with a fresh fold of the entries.
    pub fn verify(&self) -> Result<(), CoreError> {
        let folded = fold(&self.entries)?;
        if folded.state != self.state {
            return Err(CoreError::ReplayInconsistency(format!(
                "cached treasury [{}] differs from fold [{}]",
                self.state, folded.state
            )));
        }
        if folded.lots != self.lots {
            return Err(CoreError::ReplayInconsistency(
                "cached lots differ from fold".to_string(),
            ));
        }
        Ok(())
    }

    pub fn state(&self) -> &TreasuryState {
        &self.state
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entry(&self, entry_id: u64) -> Result<&LedgerEntry, CoreError> {
        self.entries
            .get(entry_id as usize)
            .ok_or(CoreError::UnknownEntry(entry_id))
    }

    /// Entries with id >= `from`.
    pub fn entries_since(&self, from: u64) -> &[LedgerEntry] {
        let start = (from as usize).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lot(&self, lot_id: LotId) -> Result<&InventoryLot, CoreError> {
        self.lots.get(&lot_id).ok_or(CoreError::UnknownLot(lot_id))
    }

    pub fn lots(&self) -> &HashMap<LotId, InventoryLot> {
        &self.lots
    }

    /// Open lots ordered by product then id.
    pub fn open_lots(&self) -> Vec<&InventoryLot> {
        let mut out: Vec<&InventoryLot> = self.lots.values().filter(|l| l.status.is_open()).collect();
        out.sort_by(|a, b| a.product_id.cmp(&b.product_id).then(a.lot_id.cmp(&b.lot_id)));
        out
    }

    fn push(&mut self, now: DateTime<Utc>, kind: EntryKind, amount: Decimal, reference: EntryRef) -> LedgerEntry {
        let entry = LedgerEntry {
            entry_id: self.entries.len() as u64,
            timestamp: now,
            kind,
            amount,
            reference,
        };
        debug!(entry = %entry, "Ledger append");
        self.entries.push(entry.clone());
        entry
    }

    fn require_positive(amount: Decimal) -> Result<(), CoreError> {
        if amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount(amount));
        }
        Ok(())
    }

    fn lot_ref(lot: &InventoryLot) -> EntryRef {
        EntryRef::Lot {
            lot_id: lot.lot_id,
            product_id: lot.product_id.clone(),
            quantity: lot.quantity,
        }
    }

    fn advance(&mut self, lot_id: LotId, next: LotStatus, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        let lot = self.lots.get(&lot_id).ok_or(CoreError::UnknownLot(lot_id))?;
        if !lot.status.can_advance_to(next) {
            return Err(CoreError::InvalidTransition {
                lot_id,
                from: lot.status,
                to: next,
            });
        }
        let reference = Self::lot_ref(lot);
        let was_held = lot.status.is_held();
        self.push(now, EntryKind::LotStatus(next), Decimal::ZERO, reference);

        let Some(lot) = self.lots.get_mut(&lot_id) else {
            return Err(CoreError::UnknownLot(lot_id));
        };
        lot.status = next;
        if !was_held && next.is_held() {
            self.state.inventory_value += lot.cost_basis;
        } else if was_held && !next.is_held() {
            self.state.inventory_value -= lot.cost_basis;
        }
        Ok(lot.clone())
    }

    // -- funding -----------------------------------------------------------

    /// Book external funding into cash.
    pub fn deposit(&mut self, amount: Decimal, tx_id: &str, now: DateTime<Utc>) -> Result<LedgerEntry, CoreError> {
        Self::require_positive(amount)?;
        let entry = self.push(
            now,
            EntryKind::CashIn,
            amount,
            EntryRef::Funding { tx_id: tx_id.to_string() },
        );
        self.state.cash_balance += amount;
        self.state.total_inflows += amount;
        info!(amount = %amount, tx_id, cash = %self.state.cash_balance, "Funds deposited");
        Ok(entry)
    }

    // -- lot lifecycle -----------------------------------------------------

    /// Pay for a new lot. Appends `inventory_add` + `cash_out`.
    pub fn record_purchase(
        &mut self,
        product_id: &str,
        quantity: u32,
        cost_basis: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LotId, CoreError> {
        Self::require_positive(cost_basis)?;
        if quantity == 0 {
            return Err(CoreError::InvalidAmount(Decimal::ZERO));
        }
        if self.state.cash_balance < cost_basis {
            return Err(CoreError::InsufficientCash {
                needed: cost_basis,
                available: self.state.cash_balance,
            });
        }

        let lot = InventoryLot {
            lot_id: Uuid::new_v4(),
            product_id: product_id.to_string(),
            cost_basis,
            quantity,
            status: LotStatus::PendingDelivery,
            recorded_costs: Decimal::ZERO,
        };
        let reference = Self::lot_ref(&lot);
        self.push(now, EntryKind::InventoryAdd, cost_basis, reference.clone());
        self.push(now, EntryKind::CashOut, cost_basis, reference);

        self.state.trading_capital += cost_basis;
        self.state.total_inflows += cost_basis;
        self.state.cash_balance -= cost_basis;
        self.state.total_outflows += cost_basis;

        info!(
            lot_id = %lot.lot_id,
            product_id,
            quantity,
            cost = %cost_basis,
            cash = %self.state.cash_balance,
            "Purchase recorded"
        );
        let lot_id = lot.lot_id;
        self.lots.insert(lot_id, lot);
        Ok(lot_id)
    }

    pub fn confirm_delivery(&mut self, lot_id: LotId, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        let lot = self.advance(lot_id, LotStatus::InStock, now)?;
        info!(lot_id = %lot_id, product_id = %lot.product_id, "Delivery confirmed");
        Ok(lot)
    }

    pub fn list_for_sale(&mut self, lot_id: LotId, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        let lot = self.advance(lot_id, LotStatus::Listed, now)?;
        info!(lot_id = %lot_id, product_id = %lot.product_id, "Lot listed for sale");
        Ok(lot)
    }

    /// Book a post-purchase cost (shipping, marketplace fee) against an open lot.
    pub fn record_cost(
        &mut self,
        lot_id: LotId,
        amount: Decimal,
        tx_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, CoreError> {
        Self::require_positive(amount)?;
        let lot = self.lot(lot_id)?;
        if lot.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                lot_id,
                from: lot.status,
                to: lot.status,
            });
        }
        if self.state.cash_balance < amount {
            return Err(CoreError::InsufficientCash {
                needed: amount,
                available: self.state.cash_balance,
            });
        }

        let entry = self.push(
            now,
            EntryKind::CashOut,
            amount,
            EntryRef::LotCost {
                lot_id,
                tx_id: tx_id.to_string(),
            },
        );
        self.state.cash_balance -= amount;
        self.state.total_outflows += amount;
        if let Some(lot) = self.lots.get_mut(&lot_id) {
            lot.recorded_costs += amount;
        }
        debug!(lot_id = %lot_id, amount = %amount, tx_id, "Lot cost recorded");
        Ok(entry)
    }

    /// Close a lot as sold. Returns the `realized_profit` entry.
    ///
    /// `sale_costs` (marketplace fees withheld from the payout) are booked
    /// against the lot first; realized profit is proceeds minus cost basis
    /// minus every cost recorded on the lot.
    pub fn record_sale(
        &mut self,
        lot_id: LotId,
        proceeds: Decimal,
        sale_costs: Decimal,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, CoreError> {
        if proceeds.is_sign_negative() {
            return Err(CoreError::InvalidAmount(proceeds));
        }
        if sale_costs.is_sign_negative() {
            return Err(CoreError::InvalidAmount(sale_costs));
        }
        let lot = self.lot(lot_id)?;
        if !lot.status.can_advance_to(LotStatus::Sold) {
            return Err(CoreError::InvalidTransition {
                lot_id,
                from: lot.status,
                to: LotStatus::Sold,
            });
        }
        // Fees are netted from proceeds, so cash never dips below zero here.
        if self.state.cash_balance + proceeds < sale_costs {
            return Err(CoreError::InsufficientCash {
                needed: sale_costs,
                available: self.state.cash_balance + proceeds,
            });
        }

        let lot = self.close_lot(lot_id, LotStatus::Sold, now)?;
        let reference = Self::lot_ref(&lot);

        if proceeds > Decimal::ZERO {
            self.push(now, EntryKind::CashIn, proceeds, reference.clone());
            self.state.cash_balance += proceeds;
            self.state.total_inflows += proceeds;
        }
        if sale_costs > Decimal::ZERO {
            self.push(
                now,
                EntryKind::CashOut,
                sale_costs,
                EntryRef::LotCost {
                    lot_id,
                    tx_id: format!("sale:{lot_id}"),
                },
            );
            self.state.cash_balance -= sale_costs;
            self.state.total_outflows += sale_costs;
        }

        let recorded = lot.recorded_costs + sale_costs;
        if let Some(stored) = self.lots.get_mut(&lot_id) {
            stored.recorded_costs = recorded;
        }
        let profit = proceeds - lot.cost_basis - recorded;
        let entry = self.push(now, EntryKind::RealizedProfit, profit, reference);
        self.state.realized_profit += profit;

        info!(
            lot_id = %lot_id,
            product_id = %lot.product_id,
            proceeds = %proceeds,
            cost_basis = %lot.cost_basis,
            costs = %recorded,
            profit = %profit,
            "Sale recorded"
        );
        Ok(entry)
    }

    /// Write off a lot after an execution failure. Returns the (loss)
    /// `realized_profit` entry.
    pub fn report_failure(&mut self, lot_id: LotId, failure: &Failure, now: DateTime<Utc>) -> Result<LedgerEntry, CoreError> {
        let refund = failure.refund();
        if refund.is_sign_negative() {
            return Err(CoreError::InvalidAmount(refund));
        }
        let lot = self.lot(lot_id)?;
        if !lot.status.can_advance_to(LotStatus::WrittenOff) {
            return Err(CoreError::InvalidTransition {
                lot_id,
                from: lot.status,
                to: LotStatus::WrittenOff,
            });
        }

        let lot = self.close_lot(lot_id, LotStatus::WrittenOff, now)?;
        let reference = Self::lot_ref(&lot);
        if refund > Decimal::ZERO {
            self.push(now, EntryKind::CashIn, refund, reference.clone());
            self.state.cash_balance += refund;
            self.state.total_inflows += refund;
        }
        let profit = refund - lot.cost_basis - lot.recorded_costs;
        let entry = self.push(now, EntryKind::RealizedProfit, profit, reference);
        self.state.realized_profit += profit;

        warn!(
            lot_id = %lot_id,
            product_id = %lot.product_id,
            failure = %failure,
            loss = %profit,
            "Lot written off"
        );
        Ok(entry)
    }

    /// Terminal status entry followed by the `inventory_remove`.
    fn close_lot(&mut self, lot_id: LotId, status: LotStatus, now: DateTime<Utc>) -> Result<InventoryLot, CoreError> {
        let lot = self.advance(lot_id, status, now)?;
        self.push(now, EntryKind::InventoryRemove, lot.cost_basis, Self::lot_ref(&lot));
        self.state.trading_capital -= lot.cost_basis;
        self.state.total_outflows += lot.cost_basis;
        Ok(lot)
    }

    // -- profit allocation -------------------------------------------------

    /// Append the `reinvestment` and `buyback` entries for one realized profit.
    /// The two amounts must sum exactly to the profit.
    pub fn append_allocation(
        &mut self,
        profit_entry: u64,
        reinvestment: Decimal,
        buyback: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(LedgerEntry, LedgerEntry), CoreError> {
        let source = self.entry(profit_entry)?;
        if source.kind != EntryKind::RealizedProfit {
            return Err(CoreError::InvalidSplit(format!(
                "entry #{profit_entry} is {}, not realized_profit",
                source.kind
            )));
        }
        let profit = source.amount;
        if profit <= Decimal::ZERO {
            return Err(CoreError::InvalidSplit(format!(
                "entry #{profit_entry} is not a profit (${profit})"
            )));
        }
        if reinvestment.is_sign_negative() || buyback.is_sign_negative() || reinvestment + buyback != profit {
            return Err(CoreError::InvalidSplit(format!(
                "${reinvestment} + ${buyback} does not equal profit ${profit}"
            )));
        }
        if self.allocated.contains(&profit_entry) {
            return Err(CoreError::InvalidSplit(format!(
                "profit #{profit_entry} already allocated"
            )));
        }
        if self.state.cash_balance < buyback {
            return Err(CoreError::InsufficientCash {
                needed: buyback,
                available: self.state.cash_balance,
            });
        }

        let reference = EntryRef::Allocation { profit_entry };
        let reinvest_entry = self.push(now, EntryKind::Reinvestment, reinvestment, reference.clone());
        let buyback_entry = self.push(now, EntryKind::Buyback, buyback, reference);
        self.state.reinvested += reinvestment;
        self.state.cash_balance -= buyback;
        self.state.reserve_balance += buyback;
        self.allocated.insert(profit_entry);
        Ok((reinvest_entry, buyback_entry))
    }

    pub fn is_allocated(&self, profit_entry: u64) -> bool {
        self.allocated.contains(&profit_entry)
    }

    // -- valuation ---------------------------------------------------------

    /// Value held lots at per-unit `marks` (best current sell price by
    /// product). Lots without a mark are held at cost.
    pub fn unrealized_loss(&self, marks: &HashMap<ProductId, Decimal>) -> MarkToMarket {
        let mut out = MarkToMarket::default();
        for lot in self.lots.values().filter(|l| l.status.is_held()) {
            let value = marks
                .get(&lot.product_id)
                .map(|unit| *unit * Decimal::from(lot.quantity))
                .unwrap_or(lot.cost_basis);
            out.inventory_value += lot.cost_basis;
            out.market_value += value;
            if value < lot.cost_basis {
                out.unrealized_loss += lot.cost_basis - value;
            }
        }
        if out.inventory_value > Decimal::ZERO {
            out.loss_fraction = out.unrealized_loss / out.inventory_value;
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
