//! Driftwatch Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes a baseline and a current sample → returns whether polling should stop.

#![warn(clippy::all)]

pub mod policy;

pub use policy::{drift, evaluate, PolicyError, StopDecision, StopPolicy, ThresholdStopPolicy};
