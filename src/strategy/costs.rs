//! Route cost estimation.
//!
//! Estimates the per-unit cost of moving a product from the buy-side
//! marketplace to the sell-side one: inbound shipping, sales tax on the
//! purchase, and the sell-side marketplace fee.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;

/// Cost model configuration (`[costs]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Shipping charged when buying from a marketplace without an override.
    pub default_shipping: Decimal,
    /// Per-marketplace buy-side shipping.
    pub shipping: HashMap<String, Decimal>,
    /// Fraction of the sell price taken by the selling marketplace.
    pub sell_fee_rate: Decimal,
    /// Sales tax applied to the buy price.
    pub tax_rate: Decimal,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            default_shipping: dec!(10),
            shipping: HashMap::new(),
            sell_fee_rate: dec!(0.10),
            tax_rate: Decimal::ZERO,
        }
    }
}

impl CostModel {
    /// A flat per-unit cost with no fees or tax.
    pub fn flat(amount: Decimal) -> Self {
        Self {
            default_shipping: amount,
            shipping: HashMap::new(),
            sell_fee_rate: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
        }
    }

    pub fn shipping_from(&self, marketplace: &str) -> Decimal {
        self.shipping
            .get(marketplace)
            .copied()
            .unwrap_or(self.default_shipping)
    }

    /// Estimated shipping + fees + tax for one unit along a route.
    pub fn estimate(&self, buy_marketplace: &str, buy_price: Decimal, sell_price: Decimal) -> Decimal {
        self.shipping_from(buy_marketplace)
            + buy_price * self.tax_rate
            + sell_price * self.sell_fee_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_cost() {
        let model = CostModel::flat(dec!(15));
        assert_eq!(model.estimate("newegg", dec!(120), dec!(165)), dec!(15));
    }

    #[test]
    fn test_fee_tax_and_override() {
        let mut model = CostModel {
            default_shipping: dec!(10),
            sell_fee_rate: dec!(0.10),
            tax_rate: dec!(0.05),
            ..Default::default()
        };
        model.shipping.insert("aliexpress".into(), dec!(15));

        // 10 + 6 + 16.5
        assert_eq!(model.estimate("newegg", dec!(120), dec!(165)), dec!(32.5));
        // 15 + 6 + 16.5
        assert_eq!(model.estimate("aliexpress", dec!(120), dec!(165)), dec!(37.5));
    }
}
