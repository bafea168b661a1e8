//! Profit router.
//!
//! Splits each realized profit into a reinvestment share (kept as trading
//! capital) and a buyback share (moved to reserve). The split is either a
//! configured constant or chosen per profit from a small set of named
//! strategies by recent market volatility and trend.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use super::ledger::Ledger;
use crate::market::MarketConditions;
use crate::types::{CoreError, EntryKind, LedgerEntry};

// ---------------------------------------------------------------------------
// Splits and strategies
// ---------------------------------------------------------------------------

/// Fractions of a profit sent to reinvestment and buyback. Sums to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub inventory_fraction: Decimal,
    pub buyback_fraction: Decimal,
}

impl Split {
    pub fn new(inventory_fraction: Decimal, buyback_fraction: Decimal) -> Result<Self, CoreError> {
        let split = Self {
            inventory_fraction,
            buyback_fraction,
        };
        split.validate()?;
        Ok(split)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let unit = Decimal::ZERO..=Decimal::ONE;
        if !unit.contains(&self.inventory_fraction) || !unit.contains(&self.buyback_fraction) {
            return Err(CoreError::InvalidSplit(format!("{self} has a fraction outside [0, 1]")));
        }
        if self.inventory_fraction + self.buyback_fraction != Decimal::ONE {
            return Err(CoreError::InvalidSplit(format!("{self} does not sum to 1")));
        }
        Ok(())
    }

    /// Reinvestment rounded to cents; buyback takes the remainder.
    pub fn apply(&self, profit: Decimal) -> (Decimal, Decimal) {
        let reinvestment = (profit * self.inventory_fraction).round_dp(2);
        (reinvestment, profit - reinvestment)
    }
}

impl Default for Split {
    fn default() -> Self {
        NamedStrategy::Balanced.split()
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.inventory_fraction, self.buyback_fraction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedStrategy {
    /// 50% reinvested, 50% bought back.
    Balanced,
    /// Calm or rising market: 70% reinvested.
    Growth,
    /// Volatile or falling market: 70% bought back.
    Defensive,
}

impl NamedStrategy {
    pub fn split(&self) -> Split {
        let (inventory_fraction, buyback_fraction) = match self {
            NamedStrategy::Balanced => (dec!(0.5), dec!(0.5)),
            NamedStrategy::Growth => (dec!(0.7), dec!(0.3)),
            NamedStrategy::Defensive => (dec!(0.3), dec!(0.7)),
        };
        Split {
            inventory_fraction,
            buyback_fraction,
        }
    }
}

impl fmt::Display for NamedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NamedStrategy::Balanced => "balanced",
            NamedStrategy::Growth => "growth",
            NamedStrategy::Defensive => "defensive",
        };
        write!(f, "{s}")
    }
}

/// Thresholds of the dynamic strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicRule {
    /// Volatility at or above this selects `Defensive`.
    pub high_volatility: Decimal,
    /// Trend at or above this selects `Growth` in a calm market.
    pub uptrend: Decimal,
    /// Trend at or below this selects `Defensive`.
    pub downtrend: Decimal,
}

impl Default for DynamicRule {
    fn default() -> Self {
        Self {
            high_volatility: dec!(0.15),
            uptrend: dec!(0.05),
            downtrend: dec!(-0.05),
        }
    }
}

impl DynamicRule {
    /// Total over all inputs: every condition maps to exactly one strategy.
    pub fn select(&self, conditions: &MarketConditions) -> NamedStrategy {
        if conditions.volatility >= self.high_volatility || conditions.trend <= self.downtrend {
            NamedStrategy::Defensive
        } else if conditions.trend >= self.uptrend {
            NamedStrategy::Growth
        } else {
            NamedStrategy::Balanced
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterMode {
    #[default]
    Static,
    Dynamic,
}

/// `[router]` in config.toml.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub mode: RouterMode,
    pub split: Split,
    pub dynamic: DynamicRule,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Outcome of routing one realized profit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub profit_entry: u64,
    pub profit: Decimal,
    /// Named strategy chosen, when routing dynamically.
    pub strategy: Option<NamedStrategy>,
    pub split: Split,
    pub reinvestment: Decimal,
    pub buyback: Decimal,
}

#[derive(Debug, Clone)]
pub struct ProfitRouter {
    config: RouterConfig,
}

impl ProfitRouter {
    pub fn new(config: RouterConfig) -> Result<Self, CoreError> {
        config.split.validate()?;
        Ok(Self { config })
    }

    pub fn fixed(split: Split) -> Result<Self, CoreError> {
        Self::new(RouterConfig {
            mode: RouterMode::Static,
            split,
            ..Default::default()
        })
    }

    pub fn dynamic(rule: DynamicRule) -> Self {
        Self {
            config: RouterConfig {
                mode: RouterMode::Dynamic,
                split: Split::default(),
                dynamic: rule,
            },
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The split to use under the given conditions.
    pub fn split_for(&self, conditions: &MarketConditions) -> (Option<NamedStrategy>, Split) {
        match self.config.mode {
            RouterMode::Static => (None, self.config.split),
            RouterMode::Dynamic => {
                let strategy = self.config.dynamic.select(conditions);
                (Some(strategy), strategy.split())
            }
        }
    }

    /// Append `reinvestment` and `buyback` entries for a realized profit.
    ///
    /// Losses and zero profits are not routed and yield `None`.
    pub fn route(
        &self,
        ledger: &mut Ledger,
        profit_entry: &LedgerEntry,
        conditions: &MarketConditions,
        now: DateTime<Utc>,
    ) -> Result<Option<Allocation>, CoreError> {
        if profit_entry.kind != EntryKind::RealizedProfit {
            return Err(CoreError::InvalidSplit(format!(
                "entry #{} is {}, not realized_profit",
                profit_entry.entry_id, profit_entry.kind
            )));
        }
        let profit = profit_entry.amount;
        if profit <= Decimal::ZERO {
            debug!(entry_id = profit_entry.entry_id, profit = %profit, "Nothing to route");
            return Ok(None);
        }

        let (strategy, split) = self.split_for(conditions);
        let (reinvestment, buyback) = split.apply(profit);
        ledger.append_allocation(profit_entry.entry_id, reinvestment, buyback, now)?;

        info!(
            entry_id = profit_entry.entry_id,
            profit = %profit,
            conditions = %conditions,
            strategy = strategy.map(|s| s.to_string()).unwrap_or_else(|| "static".into()),
            split = %split,
            reinvestment = %reinvestment,
            buyback = %buyback,
            "Profit routed"
        );

        Ok(Some(Allocation {
            profit_entry: profit_entry.entry_id,
            profit,
            strategy,
            split,
            reinvestment,
            buyback,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
