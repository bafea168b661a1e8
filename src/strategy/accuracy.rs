//! Route accuracy tracking.
//!
//! Measures how far realized profit lands from the scorer's prediction on
//! each (product, buy, sell) route. The resulting error feeds back into
//! opportunity confidence.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::Route;

/// Predictions with a smaller magnitude than this are scaled as if they were
/// this large, so near-zero predictions don't explode the relative error.
const MIN_PREDICTION_SCALE: Decimal = dec!(0.01);

/// One predicted-vs-realized pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracySample {
    pub predicted: Decimal,
    pub realized: Decimal,
}

impl AccuracySample {
    /// |realized - predicted| / max(|predicted|, floor)
    pub fn relative_error(&self) -> Decimal {
        let scale = self.predicted.abs().max(MIN_PREDICTION_SCALE);
        (self.realized - self.predicted).abs() / scale
    }
}

/// Rolling window of outcomes per route.
#[derive(Debug, Clone)]
pub struct AccuracyTracker {
    window: usize,
    samples: HashMap<Route, VecDeque<AccuracySample>>,
}

impl Default for AccuracyTracker {
    fn default() -> Self {
        Self::new(20)
    }
}

impl AccuracyTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            samples: HashMap::new(),
        }
    }

    pub fn record(&mut self, route: Route, predicted: Decimal, realized: Decimal) {
        let sample = AccuracySample { predicted, realized };
        debug!(
            route = %route,
            predicted = %predicted,
            realized = %realized,
            error = %sample.relative_error().round_dp(4),
            "Route outcome recorded"
        );
        let entries = self.samples.entry(route).or_default();
        entries.push_back(sample);
        while entries.len() > self.window {
            entries.pop_front();
        }
    }

    /// Mean relative error for a route, if it has any history.
    pub fn route_error(&self, route: &Route) -> Option<Decimal> {
        let entries = self.samples.get(route)?;
        if entries.is_empty() {
            return None;
        }
        let sum: Decimal = entries.iter().map(AccuracySample::relative_error).sum();
        Some(sum / Decimal::from(entries.len()))
    }
}
