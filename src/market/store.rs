//! Market snapshot store.
//!
//! Holds recorded price observations as an append-only, time-ordered series per
//! (product, marketplace) key and answers "latest per marketplace" queries
//! within a freshness window. Read-mostly: the price feed writes, any
//! number of evaluation workers read concurrently.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{CoreError, MarketplaceId, PriceObservation, ProductId};

type SeriesKey = (ProductId, MarketplaceId);

// ---------------------------------------------------------------------------
// Latest view
// ---------------------------------------------------------------------------

/// Newest observation per marketplace for one product.
///
/// Observations older than the freshness window are split out into
/// `stale` so callers can flag `StaleData` instead of trading on them.
#[derive(Debug, Clone, Default)]
pub struct LatestView {
    pub fresh: Vec<PriceObservation>,
    pub stale: Vec<PriceObservation>,
}

impl LatestView {
    /// Every known marketplace for the product is outside the window.
    pub fn is_stale_data(&self) -> bool {
        self.fresh.is_empty() && !self.stale.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty() && self.stale.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SnapshotStore {
    freshness_window: Duration,
    series: RwLock<HashMap<SeriesKey, VecDeque<PriceObservation>>>,
}

impl SnapshotStore {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            freshness_window,
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Append an observation if it is newer than the latest one for its key.
    ///
    /// Returns `InvalidAmount` for a price that is not positive and
    /// `StaleObservation` for one not newer than the latest; neither changes
    /// anything.
    pub fn record(&self, observation: PriceObservation) -> Result<(), CoreError> {
        if observation.unit_price <= Decimal::ZERO {
            warn!(observation = %observation, "Non-positive price ignored");
            return Err(CoreError::InvalidAmount(observation.unit_price));
        }

        let mut series = self
            .series
            .write()
            .map_err(|_| CoreError::LockPoisoned("snapshot store"))?;

        let key = (
            observation.product_id.clone(),
            observation.marketplace_id.clone(),
        );
        let entries = series.entry(key).or_default();

        if let Some(latest) = entries.back() {
            if observation.captured_at <= latest.captured_at {
                debug!(
                    product_id = %observation.product_id,
                    marketplace = %observation.marketplace_id,
                    captured_at = %observation.captured_at,
                    latest = %latest.captured_at,
                    "Stale observation ignored"
                );
                return Err(CoreError::StaleObservation {
                    product_id: observation.product_id,
                    marketplace_id: observation.marketplace_id,
                    captured_at: observation.captured_at,
                    latest: latest.captured_at,
                });
            }
        }

        debug!(observation = %observation, "Observation recorded");
        entries.push_back(observation);
        Ok(())
    }

    /// Record a batch, counting accepted observations. Stale and
    /// non-positive ones are skipped.
    pub fn record_all(
        &self,
        observations: impl IntoIterator<Item = PriceObservation>,
    ) -> Result<usize, CoreError> {
        let mut accepted = 0;
        for obs in observations {
            match self.record(obs) {
                Ok(()) => accepted += 1,
                Err(CoreError::StaleObservation { .. } | CoreError::InvalidAmount(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    /// Newest observation per marketplace for a product, split by freshness.
    pub fn latest(&self, product_id: &str, now: DateTime<Utc>) -> Result<LatestView, CoreError> {
        let series = self
            .series
            .read()
            .map_err(|_| CoreError::LockPoisoned("snapshot store"))?;

        let mut view = LatestView::default();
        for ((product, _), entries) in series.iter() {
            if product != product_id {
                continue;
            }
            let Some(latest) = entries.back() else { continue };
            if latest.age(now) > self.freshness_window {
                view.stale.push(latest.clone());
            } else {
                view.fresh.push(latest.clone());
            }
        }

        view.fresh.sort_by(|a, b| a.marketplace_id.cmp(&b.marketplace_id));
        view.stale.sort_by(|a, b| a.marketplace_id.cmp(&b.marketplace_id));

        if view.is_stale_data() {
            warn!(
                product_id,
                marketplaces = view.stale.len(),
                "Stale data: no observation inside the freshness window"
            );
        }

        Ok(view)
    }

    /// All products seen so far, sorted.
    pub fn products(&self) -> Result<Vec<ProductId>, CoreError> {
        let series = self
            .series
            .read()
            .map_err(|_| CoreError::LockPoisoned("snapshot store"))?;
        let products: BTreeSet<ProductId> = series.keys().map(|(p, _)| p.clone()).collect();
        Ok(products.into_iter().collect())
    }

    /// Every observation for a product captured at or after `since`,
    /// across marketplaces, ordered by capture time.
    pub fn history(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PriceObservation>, CoreError> {
        let series = self
            .series
            .read()
            .map_err(|_| CoreError::LockPoisoned("snapshot store"))?;

        let mut out: Vec<PriceObservation> = series
            .iter()
            .filter(|((product, _), _)| product == product_id)
            .flat_map(|(_, entries)| entries.iter().filter(|o| o.captured_at >= since).cloned())
            .collect();
        out.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.marketplace_id.cmp(&b.marketplace_id))
        });
        Ok(out)
    }

    /// Total observations held.
    pub fn len(&self) -> usize {
        self.series
            .read()
            .map(|s| s.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
