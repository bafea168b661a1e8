//! Core engine: approvals, the ledger and its treasury handle, profit
//! routing, the circuit breaker, and the desk that ties them together.

pub mod approval;
pub mod breaker;
pub mod desk;
pub mod ledger;
pub mod router;
pub mod treasury;

pub use desk::{CloseOutcome, CycleReport, Desk, DeskParts, DeskSnapshot};
