//! Opportunity confidence scoring.
//!
//! Confidence is produced by a pluggable `ConfidenceModel` so the scoring
//! rule can change without touching the scorer or the risk gate. The
//! default `BlendedConfidence` mixes observation freshness with the
//! historical accuracy of the route.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Everything a confidence model may look at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    /// Age of the older of the two observations behind the opportunity.
    pub observation_age: chrono::Duration,
    /// Mean relative error of past predictions on this route, if any.
    pub route_error: Option<Decimal>,
}

/// Pure, synchronous confidence scoring.
///
/// Implementations must return a value in [0, 1] and must not perform I/O.
pub trait ConfidenceModel: Send + Sync {
    fn confidence(&self, inputs: &ConfidenceInputs) -> Decimal;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Blended model
// ---------------------------------------------------------------------------

/// Blending parameters (`[scorer]` in config.toml).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Age at which freshness has halved.
    pub freshness_half_life_secs: u64,
    pub freshness_weight: Decimal,
    pub accuracy_weight: Decimal,
    /// Error assumed for routes with no history.
    pub prior_route_error: Decimal,
    /// Error at which accuracy has halved.
    pub error_scale: Decimal,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            freshness_half_life_secs: 1800,
            freshness_weight: dec!(0.5),
            accuracy_weight: dec!(0.5),
            prior_route_error: dec!(0.10),
            error_scale: dec!(0.50),
        }
    }
}

/// Weighted blend of hyperbolic freshness and accuracy decays.
///
/// `freshness = 1 / (1 + age / half_life)` and
/// `accuracy = 1 / (1 + error / error_scale)`. With positive weights the
/// result strictly decreases in both age and error.
pub struct BlendedConfidence {
    config: ConfidenceConfig,
}

impl BlendedConfidence {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConfidenceConfig {
        &self.config
    }

    fn freshness(&self, age: chrono::Duration) -> Decimal {
        let half_life = Decimal::from(self.config.freshness_half_life_secs.max(1));
        let age_secs = Decimal::from(age.num_milliseconds().max(0)) / dec!(1000);
        Decimal::ONE / (Decimal::ONE + age_secs / half_life)
    }

    fn accuracy(&self, error: Decimal) -> Decimal {
        let scale = if self.config.error_scale > Decimal::ZERO {
            self.config.error_scale
        } else {
            Decimal::ONE
        };
        Decimal::ONE / (Decimal::ONE + error.max(Decimal::ZERO) / scale)
    }
}

impl Default for BlendedConfidence {
    fn default() -> Self {
        Self::new(ConfidenceConfig::default())
    }
}

impl ConfidenceModel for BlendedConfidence {
    fn confidence(&self, inputs: &ConfidenceInputs) -> Decimal {
        let wf = self.config.freshness_weight.max(Decimal::ZERO);
        let wa = self.config.accuracy_weight.max(Decimal::ZERO);
        let total = wf + wa;
        if total.is_zero() {
            return Decimal::ZERO;
        }

        let error = inputs.route_error.unwrap_or(self.config.prior_route_error);
        let blended = (wf * self.freshness(inputs.observation_age) + wa * self.accuracy(error)) / total;
        blended.clamp(Decimal::ZERO, Decimal::ONE)
    }

    fn name(&self) -> &str {
        "blended"
    }
}

/// Fixed confidence regardless of inputs. Useful in replay and tests.
pub struct FixedConfidence(pub Decimal);

impl ConfidenceModel for FixedConfidence {
    fn confidence(&self, _inputs: &ConfidenceInputs) -> Decimal {
        self.0.clamp(Decimal::ZERO, Decimal::ONE)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
