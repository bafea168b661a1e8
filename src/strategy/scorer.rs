//! Opportunity detection.
//!
//! Compares the latest in-stock prices of a product across marketplaces and
//! emits an `Opportunity` when selling on the dearest one beats buying on
//! the cheapest one after estimated costs. The scorer is a pure function
//! of its inputs; profitability thresholds belong to the risk gate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::accuracy::AccuracyTracker;
use super::confidence::{ConfidenceInputs, ConfidenceModel};
use super::costs::CostModel;
use crate::types::{Opportunity, PriceObservation, Route};

pub struct OpportunityScorer {
    costs: CostModel,
    confidence: Arc<dyn ConfidenceModel>,
    /// Only observations quoted in this currency are compared.
    currency: String,
}

impl OpportunityScorer {
    pub fn new(costs: CostModel, confidence: Arc<dyn ConfidenceModel>, currency: &str) -> Self {
        Self {
            costs,
            confidence,
            currency: currency.to_string(),
        }
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.costs
    }

    pub fn confidence_model(&self) -> &dyn ConfidenceModel {
        self.confidence.as_ref()
    }

    /// Score one product from its per-marketplace latest observations.
    ///
    /// Returns `None` when fewer than two marketplaces have the product in
    /// stock, or when the best route is not profitable after costs.
    pub fn score(
        &self,
        latest: &[PriceObservation],
        accuracy: &AccuracyTracker,
        now: DateTime<Utc>,
    ) -> Option<Opportunity> {
        let mut in_stock: Vec<&PriceObservation> = latest
            .iter()
            .filter(|o| o.is_in_stock() && o.currency == self.currency)
            .collect();

        if in_stock.len() < 2 {
            return None;
        }

        // Cheapest first; ties broken by marketplace id so scoring is deterministic.
        in_stock.sort_by(|a, b| {
            a.unit_price
                .cmp(&b.unit_price)
                .then_with(|| a.marketplace_id.cmp(&b.marketplace_id))
        });
        let buy = in_stock[0];
        let sell = in_stock[1..].iter().copied().max_by(|a, b| {
            a.unit_price
                .cmp(&b.unit_price)
                .then_with(|| b.marketplace_id.cmp(&a.marketplace_id))
        })?;

        let estimated_costs = self
            .costs
            .estimate(&buy.marketplace_id, buy.unit_price, sell.unit_price);
        let net = sell.unit_price - buy.unit_price - estimated_costs;

        if net <= Decimal::ZERO {
            debug!(
                product_id = %buy.product_id,
                buy = %buy.unit_price,
                sell = %sell.unit_price,
                costs = %estimated_costs,
                "No profitable route"
            );
            return None;
        }

        let route = Route {
            product_id: buy.product_id.clone(),
            buy: buy.marketplace_id.clone(),
            sell: sell.marketplace_id.clone(),
        };
        let inputs = ConfidenceInputs {
            observation_age: buy.age(now).max(sell.age(now)),
            route_error: accuracy.route_error(&route),
        };
        let confidence = self.confidence.confidence(&inputs);

        debug!(
            route = %route,
            net = %net,
            confidence = %confidence.round_dp(3),
            model = self.confidence.name(),
            "Opportunity scored"
        );

        Some(Opportunity {
            product_id: route.product_id,
            buy_marketplace: route.buy,
            sell_marketplace: route.sell,
            buy_price: buy.unit_price,
            sell_price: sell.unit_price,
            estimated_costs,
            confidence,
            computed_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::confidence::{BlendedConfidence, FixedConfidence};
    use crate::types::Availability;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn make_obs(market: &str, price: Decimal, availability: Availability, at: DateTime<Utc>) -> PriceObservation {
        PriceObservation {
            product_id: "ddr5-32gb-6000".to_string(),
            marketplace_id: market.to_string(),
            unit_price: price,
            currency: "USD".to_string(),
            captured_at: at,
            availability,
        }
    }

    fn fixed_scorer(costs: Decimal) -> OpportunityScorer {
        OpportunityScorer::new(CostModel::flat(costs), Arc::new(FixedConfidence(dec!(0.85))), "USD")
    }

    #[test]
    fn test_newegg_ebay_scenario() {
        let now = Utc::now();
        let latest = vec![
            make_obs("newegg", dec!(120), Availability::InStock, now),
            make_obs("ebay", dec!(165), Availability::InStock, now),
        ];
        let opp = fixed_scorer(dec!(15))
            .score(&latest, &AccuracyTracker::default(), now)
            .unwrap();
        assert_eq!(opp.buy_marketplace, "newegg");
        assert_eq!(opp.sell_marketplace, "ebay");
        assert_eq!(opp.net_profit(), dec!(30));
        assert_eq!(opp.confidence, dec!(0.85));
    }

    #[test]
    fn test_fewer_than_two_in_stock_emits_nothing() {
        let now = Utc::now();
        let scorer = fixed_scorer(Decimal::ZERO);
        let tracker = AccuracyTracker::default();

        assert!(scorer.score(&[], &tracker, now).is_none());
        assert!(scorer
            .score(&[make_obs("newegg", dec!(100), Availability::InStock, now)], &tracker, now)
            .is_none());

        let latest = vec![
            make_obs("newegg", dec!(100), Availability::InStock, now),
            make_obs("ebay", dec!(300), Availability::PreOrder, now),
            make_obs("amazon", dec!(250), Availability::OutOfStock, now),
        ];
        assert!(scorer.score(&latest, &tracker, now).is_none());
    }

    #[test]
    fn test_unprofitable_after_costs() {
        let now = Utc::now();
        let latest = vec![
            make_obs("newegg", dec!(120), Availability::InStock, now),
            make_obs("ebay", dec!(130), Availability::InStock, now),
        ];
        assert!(fixed_scorer(dec!(10)).score(&latest, &AccuracyTracker::default(), now).is_none());
    }

    #[test]
    fn test_picks_widest_spread() {
        let now = Utc::now();
        let latest = vec![
            make_obs("amazon", dec!(149.99), Availability::InStock, now),
            make_obs("aliexpress", dec!(89.99), Availability::InStock, now),
            make_obs("ebay", dec!(164.99), Availability::InStock, now),
            make_obs("newegg", dec!(119.99), Availability::InStock, now),
        ];
        let opp = fixed_scorer(Decimal::ZERO)
            .score(&latest, &AccuracyTracker::default(), now)
            .unwrap();
        assert_eq!(opp.buy_marketplace, "aliexpress");
        assert_eq!(opp.sell_marketplace, "ebay");
        assert_eq!(opp.net_profit(), dec!(75));
    }

    #[test]
    fn test_foreign_currency_ignored() {
        let now = Utc::now();
        let mut eur = make_obs("ebay-de", dec!(500), Availability::InStock, now);
        eur.currency = "EUR".into();
        let latest = vec![make_obs("newegg", dec!(120), Availability::InStock, now), eur];
        assert!(fixed_scorer(Decimal::ZERO).score(&latest, &AccuracyTracker::default(), now).is_none());
    }

    #[test]
    fn test_confidence_falls_with_age_and_route_error() {
        let now = Utc::now();
        let scorer = OpportunityScorer::new(
            CostModel::flat(dec!(15)),
            Arc::new(BlendedConfidence::default()),
            "USD",
        );
        let tracker = AccuracyTracker::default();

        let fresh = vec![
            make_obs("newegg", dec!(120), Availability::InStock, now),
            make_obs("ebay", dec!(165), Availability::InStock, now),
        ];
        let old = vec![
            make_obs("newegg", dec!(120), Availability::InStock, now - Duration::minutes(20)),
            make_obs("ebay", dec!(165), Availability::InStock, now),
        ];
        let c_fresh = scorer.score(&fresh, &tracker, now).unwrap().confidence;
        let c_old = scorer.score(&old, &tracker, now).unwrap().confidence;
        assert!(c_old < c_fresh);

        let mut noisy = AccuracyTracker::default();
        let route = Route {
            product_id: "ddr5-32gb-6000".into(),
            buy: "newegg".into(),
            sell: "ebay".into(),
        };
        noisy.record(route, dec!(30), dec!(-10));
        let c_noisy = scorer.score(&fresh, &noisy, now).unwrap().confidence;
        assert!(c_noisy < c_fresh);
    }
}
