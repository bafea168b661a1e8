//! Circuit breaker / supervisor.
//!
//! Watches realized outcomes and aggregate treasury state and trips the
//! process-wide breaker on a losing streak, a deep unrealized loss, or
//! cash falling below its floor. Tripping is automatic. Re-arming needs
//! approvals from a reset quorum that is stricter than trade approval.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use super::approval::Quorum;
use super::ledger::MarkToMarket;
use crate::types::{BreakerState, CoreError, SignerId, TreasuryState, TripReason};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Trip thresholds (`[breaker]` in config.toml).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub max_consecutive_losses: u32,
    /// Unrealized loss as a fraction of inventory value.
    pub max_unrealized_loss_fraction: Decimal,
    pub cash_floor: Decimal,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 3,
            max_unrealized_loss_fraction: dec!(0.30),
            cash_floor: Decimal::ZERO,
        }
    }
}

/// Result of one reset approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResetOutcome {
    /// The breaker was not tripped; nothing to do.
    AlreadyArmed,
    Pending { approvals: usize, required: usize },
    /// Quorum reached; trading resumes. Carries the approving signers.
    Rearmed { signers: Vec<SignerId> },
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct Inner {
    state: BreakerState,
    reset_approvals: BTreeSet<SignerId>,
}

pub struct Supervisor {
    config: BreakerConfig,
    reset_quorum: Quorum,
    inner: RwLock<Inner>,
}

impl Supervisor {
    pub fn new(config: BreakerConfig, reset_quorum: Quorum) -> Self {
        Self {
            config,
            reset_quorum,
            inner: RwLock::new(Inner {
                state: BreakerState::default(),
                reset_approvals: BTreeSet::new(),
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, CoreError> {
        self.inner.read().map_err(|_| CoreError::LockPoisoned("breaker"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, CoreError> {
        self.inner.write().map_err(|_| CoreError::LockPoisoned("breaker"))
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn reset_quorum(&self) -> &Quorum {
        &self.reset_quorum
    }

    /// Snapshot of the breaker for the risk gate and observers.
    pub fn state(&self) -> Result<BreakerState, CoreError> {
        Ok(self.read()?.state.clone())
    }

    pub fn is_tripped(&self) -> Result<bool, CoreError> {
        Ok(self.read()?.state.is_tripped())
    }

    fn trip_locked(inner: &mut Inner, reason: TripReason, now: DateTime<Utc>) -> bool {
        if inner.state.is_tripped() {
            return false;
        }
        error!(reason = %reason, "Circuit breaker tripped, trading halted");
        inner.state.armed = false;
        inner.state.trip_reason = Some(reason);
        inner.state.tripped_at = Some(now);
        inner.reset_approvals.clear();
        true
    }

    /// Trip with an explicit reason. Returns false if already tripped.
    pub fn trip(&self, reason: TripReason, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let mut inner = self.write()?;
        Ok(Self::trip_locked(&mut inner, reason, now))
    }

    /// Feed one realized profit or loss. A loss extends the streak; anything
    /// else clears it.
    pub fn record_outcome(&self, realized: Decimal, now: DateTime<Utc>) -> Result<Option<TripReason>, CoreError> {
        let mut inner = self.write()?;
        if realized.is_sign_negative() && !realized.is_zero() {
            inner.state.consecutive_losses += 1;
            warn!(
                loss = %realized,
                streak = inner.state.consecutive_losses,
                limit = self.config.max_consecutive_losses,
                "Realized loss"
            );
        } else {
            inner.state.consecutive_losses = 0;
        }

        let count = inner.state.consecutive_losses;
        let threshold = self.config.max_consecutive_losses;
        if threshold > 0 && count >= threshold {
            let reason = TripReason::ConsecutiveLosses { count, threshold };
            if Self::trip_locked(&mut inner, reason.clone(), now) {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Check aggregate treasury health.
    pub fn assess(
        &self,
        treasury: &TreasuryState,
        valuation: &MarkToMarket,
        now: DateTime<Utc>,
    ) -> Result<Option<TripReason>, CoreError> {
        let ceiling = self.config.max_unrealized_loss_fraction;
        let reason = if valuation.loss_fraction > ceiling {
            Some(TripReason::UnrealizedLoss {
                fraction: valuation.loss_fraction,
                ceiling,
            })
        } else if treasury.cash_balance < self.config.cash_floor {
            Some(TripReason::CashFloor {
                cash: treasury.cash_balance,
                floor: self.config.cash_floor,
            })
        } else {
            None
        };

        match reason {
            Some(reason) => {
                let mut inner = self.write()?;
                Ok(Self::trip_locked(&mut inner, reason.clone(), now).then_some(reason))
            }
            None => Ok(None),
        }
    }

    /// Record one signer's approval to re-arm a tripped breaker.
    pub fn approve_reset(&self, signer: &str, now: DateTime<Utc>) -> Result<ResetOutcome, CoreError> {
        if !self.reset_quorum.is_participant(signer) {
            warn!(signer, "Reset approval from unknown signer");
            return Err(CoreError::UnknownSigner(signer.to_string()));
        }
        let mut inner = self.write()?;
        if !inner.state.is_tripped() {
            return Ok(ResetOutcome::AlreadyArmed);
        }

        inner.reset_approvals.insert(signer.to_string());
        let required = self.reset_quorum.required();
        if !self.reset_quorum.is_met(&inner.reset_approvals) {
            info!(
                signer,
                approvals = inner.reset_approvals.len(),
                required,
                "Breaker reset approval recorded"
            );
            return Ok(ResetOutcome::Pending {
                approvals: inner.reset_approvals.len(),
                required,
            });
        }

        let signers: Vec<SignerId> = std::mem::take(&mut inner.reset_approvals).into_iter().collect();
        Self::rearm_locked(&mut inner, now);
        info!(signers = ?signers, "Breaker reset quorum reached");
        Ok(ResetOutcome::Rearmed { signers })
    }

    fn rearm_locked(inner: &mut Inner, now: DateTime<Utc>) {
        let was = inner.state.trip_reason.take();
        inner.state = BreakerState::default();
        inner.reset_approvals.clear();
        info!(
            previous = was.map(|r| r.to_string()).unwrap_or_default(),
            at = %now,
            "Circuit breaker re-armed"
        );
    }

    /// Re-arm from a journaled reset during replay.
    pub fn apply_reset(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut inner = self.write()?;
        Self::rearm_locked(&mut inner, now);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
