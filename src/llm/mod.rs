//! External reasoning service for opportunity confidence.
//!
//! Defines the `ReasoningService` trait and a `BoundedReasoner` wrapper that
//! enforces a latency bound and falls back to a fixed confidence whenever
//! the service is slow or fails. The rule-based confidence stays in charge:
//! an assessment can only lower it.

pub mod anthropic;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::Opportunity;

/// Abstraction over services that assess an opportunity.
///
/// Implementors return a confidence in [0, 1] that the trade will realize
/// its predicted profit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn assess(&self, opportunity: &Opportunity) -> Result<Decimal>;

    /// Model identifier string.
    fn model_name(&self) -> String;
}

/// Latency-bounded access to a reasoning service.
#[derive(Clone)]
pub struct BoundedReasoner {
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
    /// Confidence used when the service times out or errors.
    fallback: Decimal,
}

impl BoundedReasoner {
    pub fn new(service: Arc<dyn ReasoningService>, timeout: Duration, fallback: Decimal) -> Self {
        Self {
            service,
            timeout,
            fallback: fallback.clamp(Decimal::ZERO, Decimal::ONE),
        }
    }

    pub fn model_name(&self) -> String {
        self.service.model_name()
    }

    /// Assess one opportunity. Never fails; never exceeds the timeout.
    pub async fn assess(&self, opportunity: &Opportunity) -> Decimal {
        match tokio::time::timeout(self.timeout, self.service.assess(opportunity)).await {
            Ok(Ok(confidence)) => {
                let confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
                debug!(
                    route = %opportunity.route(),
                    model = %self.service.model_name(),
                    confidence = %confidence,
                    "Reasoning assessment received"
                );
                confidence
            }
            Ok(Err(e)) => {
                warn!(
                    route = %opportunity.route(),
                    error = %e,
                    fallback = %self.fallback,
                    "Reasoning service failed, using fallback confidence"
                );
                self.fallback
            }
            Err(_) => {
                warn!(
                    route = %opportunity.route(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    fallback = %self.fallback,
                    "Reasoning service timed out, using fallback confidence"
                );
                self.fallback
            }
        }
    }

    /// Assess many opportunities concurrently, preserving input order.
    pub async fn assess_all(&self, opportunities: &[Opportunity]) -> Vec<Decimal> {
        join_all(opportunities.iter().map(|o| self.assess(o))).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
