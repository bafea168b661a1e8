//! RAMSTRAT: arbitrage decision and treasury ledger core.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod engine;
pub mod llm;
pub mod market;
pub mod storage;
pub mod strategy;
pub mod types;
