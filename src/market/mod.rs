//! Market data: the snapshot store and derived market conditions.

pub mod conditions;
pub mod store;

pub use conditions::MarketConditions;
pub use store::{LatestView, SnapshotStore};
