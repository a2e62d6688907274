//! Value Objects for the Driftwatch Domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Domain errors for value object validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Subject must be a non-empty identifier without whitespace
    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    /// Session id must be non-empty
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// Unknown status label
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Invalid state transition
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

// =============================================================================
// Subject
// =============================================================================

/// Subject identifies what a sample measures (e.g., the `BTCUSDT` price pair).
///
/// # Invariants
/// - Non-empty
/// - No whitespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Subject(String);

impl Subject {
    /// Create a new Subject with validation
    ///
    /// # Examples
    /// ```
    /// # use driftwatch_domain::Subject;
    /// let subject = Subject::new("BTCUSDT").unwrap();
    /// assert_eq!(subject.as_str(), "BTCUSDT");
    /// assert!(Subject::new("").is_err());
    /// ```
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSubject` if empty or containing whitespace
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidSubject("Subject must be non-empty".to_string()));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidSubject(format!(
                "Subject must not contain whitespace: {:?}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the subject as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Subject {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Subject> for String {
    fn from(subject: Subject) -> Self {
        subject.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SessionId
// =============================================================================

/// Identifier of a run session.
///
/// Generated ids have the shape `[prefix-]session-<uuid v7>`, so they sort
/// by creation time within a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id, optionally prefixed.
    ///
    /// ```
    /// # use driftwatch_domain::SessionId;
    /// let id = SessionId::generate(Some("nightly"));
    /// assert!(id.as_str().starts_with("nightly-session-"));
    /// ```
    pub fn generate(prefix: Option<&str>) -> Self {
        let id = Uuid::now_v7();
        match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(prefix) => Self(format!("{}-session-{}", prefix, id)),
            None => Self(format!("session-{}", id)),
        }
    }

    /// Wrap an existing id (e.g., one read back from storage)
    ///
    /// # Errors
    /// Returns `DomainError::InvalidSessionId` if empty
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::InvalidSessionId("Session id must be non-empty".to_string()));
        }
        Ok(Self(value))
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
