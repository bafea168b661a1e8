//! Recent market conditions for a product.
//!
//! Summarises a price history into volatility and trend figures, the
//! inputs of the dynamic profit-allocation strategy.

use rust_decimal::prelude::*;
use rust_decimal::MathematicalOps;
use serde::Serialize;
use std::fmt;

use crate::types::PriceObservation;

/// Volatility and trend over a window of in-stock observations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MarketConditions {
    /// Coefficient of variation of prices (stddev / mean).
    pub volatility: Decimal,
    /// Relative change from the first to the last price.
    pub trend: Decimal,
    pub samples: usize,
}

impl fmt::Display for MarketConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "volatility={:.3} trend={:+.3} (n={})",
            self.volatility, self.trend, self.samples
        )
    }
}

impl MarketConditions {
    /// Compute conditions from a capture-time ordered history.
    /// Fewer than two in-stock prices yields a flat, calm market.
    pub fn from_history(history: &[PriceObservation]) -> Self {
        let prices: Vec<Decimal> = history
            .iter()
            .filter(|o| o.is_in_stock())
            .map(|o| o.unit_price)
            .collect();

        let samples = prices.len();
        if samples < 2 {
            return Self {
                samples,
                ..Self::default()
            };
        }

        let n = Decimal::from(samples);
        let mean = prices.iter().copied().sum::<Decimal>() / n;
        if mean <= Decimal::ZERO {
            return Self {
                samples,
                ..Self::default()
            };
        }

        let variance = prices
            .iter()
            .map(|p| {
                let d = *p - mean;
                d * d
            })
            .sum::<Decimal>()
            / n;
        let stddev = variance.sqrt().unwrap_or(Decimal::ZERO);

        let first = prices[0];
        let last = prices[samples - 1];
        let trend = if first.is_zero() {
            Decimal::ZERO
        } else {
            last / first - Decimal::ONE
        };

        Self {
            volatility: stddev / mean,
            trend,
            samples,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
