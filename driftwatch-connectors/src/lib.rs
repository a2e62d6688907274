//! Driftwatch Connectors
//!
//! Adapters for external value sources.
//! Normalizes source-specific payloads to domain types.

#![warn(clippy::all)]

pub mod binance_rest;

pub use binance_rest::{BinanceRestClient, BinanceRestError, TickerPrice};
