//! Driftwatch Domain Layer
//!
//! Pure domain types with zero I/O dependencies.
//! Contains samples, run sessions, unit records and their invariants.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{
    Observation, RunSession, Sample, SessionStatus, SessionTally, UnitLogRecord, UnitOutcome,
    UnitStatus,
};
pub use value_objects::{DomainError, SessionId, Subject};
