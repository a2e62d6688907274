//! Domain Entities for Driftwatch
//!
//! Samples produced by polling, and the run sessions / unit records
//! produced by recording a batch of independent operations.

use crate::value_objects::{DomainError, SessionId, Subject};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Observation / Sample
// =============================================================================

/// Raw result of a fetch operation, before it is stamped with capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// What was measured
    pub subject: Subject,
    /// Measured value
    pub value: Decimal,
    /// When the upstream source observed the value
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    /// Create an observation timestamped now.
    pub fn now(subject: Subject, value: Decimal) -> Self {
        Self {
            subject,
            value,
            observed_at: Utc::now(),
        }
    }
}

/// A persisted measurement.
///
/// # Invariants
/// - Immutable once created (fields are only readable)
/// - `captured_at` is the time the poller accepted the observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    subject: Subject,
    value: Decimal,
    observed_at: DateTime<Utc>,
    captured_at: DateTime<Utc>,
}

impl Sample {
    /// Create a sample with explicit timestamps (used when reading back from storage).
    pub fn new(
        subject: Subject,
        value: Decimal,
        observed_at: DateTime<Utc>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            value,
            observed_at,
            captured_at,
        }
    }

    /// Stamp an observation with the current capture time.
    pub fn capture(observation: Observation) -> Self {
        Self {
            subject: observation.subject,
            value: observation.value,
            observed_at: observation.observed_at,
            captured_at: Utc::now(),
        }
    }

    /// What was measured
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Measured value
    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Upstream observation time
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }

    /// Local capture time
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

// =============================================================================
// Unit Status
// =============================================================================

/// Outcome classification of one unit in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Unit completed without error
    Success,
    /// Unit returned an error or panicked
    Failed,
    /// Unit was not executed
    Skipped,
}

impl UnitStatus {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Success => "success",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for UnitStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(UnitStatus::Success),
            "failed" => Ok(UnitStatus::Failed),
            "skipped" => Ok(UnitStatus::Skipped),
            other => Err(DomainError::InvalidStatus(format!("Unknown unit status: {}", other))),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session Status
// =============================================================================

/// Lifecycle status of a run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session started, not yet ended
    Running,
    /// Session ended with no failed units
    Completed,
    /// Session ended with at least one failed unit
    Failed,
}

impl SessionStatus {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(DomainError::InvalidStatus(format!("Unknown session status: {}", other))),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Session Tally
// =============================================================================

/// Per-status unit counts of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTally {
    /// Units that succeeded
    pub succeeded: u32,
    /// Units that failed
    pub failed: u32,
    /// Units that were skipped
    pub skipped: u32,
}

impl SessionTally {
    /// Create a tally from explicit counts.
    pub fn new(succeeded: u32, failed: u32, skipped: u32) -> Self {
        Self {
            succeeded,
            failed,
            skipped,
        }
    }

    /// Count one unit.
    pub fn record(&mut self, status: UnitStatus) {
        match status {
            UnitStatus::Success => self.succeeded += 1,
            UnitStatus::Failed => self.failed += 1,
            UnitStatus::Skipped => self.skipped += 1,
        }
    }

    /// Total number of counted units
    pub fn total(&self) -> u32 {
        self.succeeded + self.failed + self.skipped
    }

    /// Final session status implied by these counts
    pub fn final_status(&self) -> SessionStatus {
        if self.failed > 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        }
    }
}

// =============================================================================
// Run Session
// =============================================================================

/// One execution of a batch of independent named units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSession {
    /// Session identifier
    pub id: SessionId,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// When the session ended (None while running)
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of units the run intends to execute
    pub total_units: u32,
    /// Units that succeeded
    pub succeeded: u32,
    /// Units that failed
    pub failed: u32,
    /// Units that were skipped
    pub skipped: u32,
    /// Lifecycle status
    pub status: SessionStatus,
}

impl RunSession {
    /// Create a session in the Running state.
    pub fn start(id: SessionId, total_units: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            ended_at: None,
            total_units,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            status: SessionStatus::Running,
        }
    }

    /// Check if the session has ended
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Current counts as a tally
    pub fn tally(&self) -> SessionTally {
        SessionTally::new(self.succeeded, self.failed, self.skipped)
    }

    /// End the session with final counts.
    ///
    /// Status becomes `Failed` if any unit failed, `Completed` otherwise.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStateTransition` if already ended
    pub fn finish(&mut self, tally: SessionTally, ended_at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.is_ended() {
            return Err(DomainError::InvalidStateTransition(format!(
                "Session {} already ended",
                self.id
            )));
        }

        self.succeeded = tally.succeeded;
        self.failed = tally.failed;
        self.skipped = tally.skipped;
        self.status = tally.final_status();
        self.ended_at = Some(ended_at);
        Ok(())
    }
}

// =============================================================================
// Unit Outcome / Unit Log Record
// =============================================================================

/// Result of executing (or skipping) one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    /// Outcome classification
    pub status: UnitStatus,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Error message for failed units
    pub error_message: Option<String>,
    /// Free-form details
    pub details: Option<String>,
}

impl UnitOutcome {
    /// A successful unit.
    pub fn success(started_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            status: UnitStatus::Success,
            started_at,
            duration_ms,
            error_message: None,
            details: None,
        }
    }

    /// A failed unit.
    pub fn failed(started_at: DateTime<Utc>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            started_at,
            duration_ms,
            error_message: Some(error.into()),
            details: None,
        }
    }

    /// A skipped unit; the reason is kept as details.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Skipped,
            started_at: Utc::now(),
            duration_ms: 0,
            error_message: None,
            details: Some(reason.into()),
        }
    }

    /// Attach details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Append-only record of one unit in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitLogRecord {
    /// Session this unit belongs to
    pub session_id: SessionId,
    /// Unit name (e.g., "store.connect")
    pub unit_name: String,
    /// Outcome classification
    pub status: UnitStatus,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Error message for failed units
    pub error_message: Option<String>,
    /// Free-form details
    pub details: Option<String>,
}

impl UnitLogRecord {
    /// Build a record from an outcome.
    pub fn from_outcome(session_id: SessionId, unit_name: impl Into<String>, outcome: UnitOutcome) -> Self {
        Self {
            session_id,
            unit_name: unit_name.into(),
            status: outcome.status,
            started_at: outcome.started_at,
            duration_ms: outcome.duration_ms,
            error_message: outcome.error_message,
            details: outcome.details,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
