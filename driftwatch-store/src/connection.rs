//! Shared connection to the backing store
//!
//! `SharedConnectionManager` owns at most one live handle to the backing store
//! and hands clones of it to every consumer. It is constructed once by the
//! composition root and passed around behind an `Arc`.
//!
//! # Connect semantics
//!
//! - Connected: `connect()` is a no-op
//! - Connecting: callers await the attempt already in flight
//! - Disconnected / Failed: the caller leads a new attempt (connect + ping,
//!   each bounded by the connect timeout)
//!
//! No automatic retry: a failed attempt leaves the manager in `Failed` and
//! the next `connect()` starts over.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// =============================================================================
// Errors
// =============================================================================

/// Failure to establish the shared connection.
///
/// `Clone` so one in-flight result can be delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Underlying connect failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Liveness check after connect failed
    #[error("Ping failed: {0}")]
    Ping(String),

    /// Connect or ping exceeded the connect timeout
    #[error("Connect timed out after {0}ms")]
    Timeout(u64),

    /// Attempt was abandoned (disconnect or cancellation while connecting)
    #[error("Connect attempt aborted")]
    Aborted,
}

/// Handle requested before the shared connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Not connected: call connect() first")]
pub struct NotConnected;

// =============================================================================
// Connector Port
// =============================================================================

/// Knows how to open, check and close one kind of backing store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Live handle shared with consumers (e.g., a connection pool)
    type Handle: Clone + Send + Sync + 'static;

    /// Open the underlying connection.
    async fn connect(&self) -> Result<Self::Handle, ConnectionError>;

    /// Liveness check against an open handle.
    async fn ping(&self, handle: &Self::Handle) -> Result<(), ConnectionError>;

    /// Release an open handle.
    async fn close(&self, handle: Self::Handle);

    /// Address of the backing store (may contain credentials).
    fn target(&self) -> String;
}

// =============================================================================
// State
// =============================================================================

/// Observable state of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, no attempt in flight
    Disconnected,
    /// An attempt is in flight
    Connecting,
    /// Handle is live
    Connected,
    /// Last attempt failed; the next connect() retries
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

type AttemptResult = Option<Result<(), ConnectionError>>;

enum Slot<H> {
    Disconnected,
    Failed(ConnectionError),
    Connecting {
        epoch: u64,
        done: watch::Receiver<AttemptResult>,
    },
    Connected(H),
}

struct Inner<H> {
    slot: Slot<H>,
    /// Bumped for every new attempt; a settling attempt only wins if its
    /// epoch is still the one in the slot.
    epoch: u64,
    /// Handles left behind by cancelled attempts, closed on the next
    /// `connect` or `disconnect`.
    orphans: Vec<H>,
}

fn lock<H>(inner: &Mutex<Inner<H>>) -> MutexGuard<'_, Inner<H>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Role {
    Lead {
        epoch: u64,
        done: watch::Sender<AttemptResult>,
    },
    Wait(watch::Receiver<AttemptResult>),
}

/// Resets a `Connecting` slot if the leading attempt is dropped mid-flight.
///
/// A handle opened but not yet pinged is parked as an orphan.
struct ConnectingGuard<'a, H> {
    inner: &'a Mutex<Inner<H>>,
    epoch: u64,
    armed: bool,
    pending: Option<H>,
}

impl<H> Drop for ConnectingGuard<'_, H> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock(self.inner);
        if let Some(handle) = self.pending.take() {
            inner.orphans.push(handle);
        }
        if matches!(inner.slot, Slot::Connecting { epoch, .. } if epoch == self.epoch) {
            inner.slot = Slot::Disconnected;
        }
    }
}

// =============================================================================
// Shared Connection Manager
// =============================================================================

/// Owns the single live connection to a backing store.
pub struct SharedConnectionManager<C: Connector> {
    connector: C,
    connect_timeout: Duration,
    target: String,
    inner: Mutex<Inner<C::Handle>>,
}

impl<C: Connector> SharedConnectionManager<C> {
    /// Create a manager in the `Disconnected` state.
    pub fn new(connector: C, connect_timeout: Duration) -> Self {
        let target = mask_uri(&connector.target());
        Self {
            connector,
            connect_timeout,
            target,
            inner: Mutex::new(Inner {
                slot: Slot::Disconnected,
                epoch: 0,
                orphans: Vec::new(),
            }),
        }
    }

    /// Establish the shared connection if it is not live yet.
    ///
    /// Concurrent callers share a single underlying attempt.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.close_orphans().await;

        let role = {
            let mut inner = lock(&self.inner);
            match &inner.slot {
                Slot::Connected(_) => return Ok(()),
                Slot::Connecting { done, .. } => Role::Wait(done.clone()),
                Slot::Disconnected | Slot::Failed(_) => {
                    inner.epoch += 1;
                    let epoch = inner.epoch;
                    let (tx, rx) = watch::channel(None);
                    inner.slot = Slot::Connecting { epoch, done: rx };
                    Role::Lead { epoch, done: tx }
                },
            }
        };

        match role {
            Role::Wait(mut done) => {
                debug!(target = %self.target, "Connect already in flight, awaiting it");
                match done.wait_for(Option::is_some).await {
                    Ok(outcome) => {
                        let outcome: AttemptResult = (*outcome).clone();
                        outcome.unwrap_or(Err(ConnectionError::Aborted))
                    },
                    Err(_) => Err(ConnectionError::Aborted),
                }
            },
            Role::Lead { epoch, done } => {
                let mut guard = ConnectingGuard {
                    inner: &self.inner,
                    epoch,
                    armed: true,
                    pending: None,
                };

                info!(target = %self.target, "Connecting to backing store");
                let attempt = self.establish(&mut guard).await;
                guard.armed = false;

                let outcome = self.settle(epoch, attempt).await;
                match &outcome {
                    Ok(()) => info!(target = %self.target, "Connected to backing store"),
                    Err(e) => warn!(target = %self.target, error = %e, "Failed to connect to backing store"),
                }

                let _ = done.send(Some(outcome.clone()));
                outcome
            },
        }
    }

    /// Connect and ping, each bounded by the connect timeout.
    async fn establish(
        &self,
        guard: &mut ConnectingGuard<'_, C::Handle>,
    ) -> Result<C::Handle, ConnectionError> {
        let timeout_ms = self.connect_timeout.as_millis() as u64;

        let handle = timeout(self.connect_timeout, self.connector.connect())
            .await
            .map_err(|_| ConnectionError::Timeout(timeout_ms))??;

        guard.pending = Some(handle.clone());
        let pinged = timeout(self.connect_timeout, self.connector.ping(&handle)).await;
        guard.pending = None;

        match pinged {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                self.connector.close(handle).await;
                Err(e)
            },
            Err(_) => {
                self.connector.close(handle).await;
                Err(ConnectionError::Timeout(timeout_ms))
            },
        }
    }

    /// Publish an attempt's result unless a disconnect superseded it.
    async fn settle(
        &self,
        epoch: u64,
        attempt: Result<C::Handle, ConnectionError>,
    ) -> Result<(), ConnectionError> {
        let orphan = {
            let mut inner = lock(&self.inner);
            let current = matches!(inner.slot, Slot::Connecting { epoch: e, .. } if e == epoch);

            match attempt {
                Ok(handle) if current => {
                    inner.slot = Slot::Connected(handle);
                    return Ok(());
                },
                Err(err) if current => {
                    inner.slot = Slot::Failed(err.clone());
                    return Err(err);
                },
                Ok(handle) => Some(handle),
                Err(_) => None,
            }
        };

        if let Some(handle) = orphan {
            debug!(target = %self.target, "Closing connection opened after disconnect");
            self.connector.close(handle).await;
        }
        Err(ConnectionError::Aborted)
    }

    /// Clone of the live handle.
    ///
    /// # Errors
    /// `NotConnected` unless the state is `Connected`
    pub fn handle(&self) -> Result<C::Handle, NotConnected> {
        match &lock(&self.inner).slot {
            Slot::Connected(handle) => Ok(handle.clone()),
            _ => Err(NotConnected),
        }
    }

    /// Close the live handle (if any) and reset to `Disconnected`.
    ///
    /// Safe to call when never connected. An attempt in flight is abandoned:
    /// its waiters receive `ConnectionError::Aborted`.
    pub async fn disconnect(&self) {
        self.close_orphans().await;

        let previous = {
            let mut inner = lock(&self.inner);
            std::mem::replace(&mut inner.slot, Slot::Disconnected)
        };

        match previous {
            Slot::Connected(handle) => {
                self.connector.close(handle).await;
                info!(target = %self.target, "Disconnected from backing store");
            },
            Slot::Connecting { .. } => {
                info!(target = %self.target, "Disconnected while a connect was in flight");
            },
            Slot::Disconnected | Slot::Failed(_) => {
                debug!(target = %self.target, "Disconnect called while not connected");
            },
        }
    }

    async fn close_orphans(&self) {
        let orphans = std::mem::take(&mut lock(&self.inner).orphans);
        for handle in orphans {
            debug!(target = %self.target, "Closing connection left by a cancelled connect");
            self.connector.close(handle).await;
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        match &lock(&self.inner).slot {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Failed(_) => ConnectionState::Failed,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Error of the last failed attempt, if the manager is in `Failed`.
    pub fn last_error(&self) -> Option<ConnectionError> {
        match &lock(&self.inner).slot {
            Slot::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Whether a live handle is available.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Backing store address with credentials masked.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Underlying connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> fmt::Debug for SharedConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnectionManager")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Mask the user-info part of a connection URI.
///
/// ```
/// # use driftwatch_store::mask_uri;
/// assert_eq!(
///     mask_uri("postgres://robot:hunter2@db:5432/driftwatch"),
///     "postgres://*****:*****@db:5432/driftwatch"
/// );
/// assert_eq!(mask_uri("postgres://db/driftwatch"), "postgres://db/driftwatch");
/// ```
pub fn mask_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest_start = scheme_end + 3;
    let rest = &uri[rest_start..];
    let authority_end = rest.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());

    match rest[..authority_end].rfind('@') {
        Some(at) => {
            let masked = if rest[..at].contains(':') { "*****:*****" } else { "*****" };
            format!("{}{}@{}", &uri[..rest_start], masked, &rest[at + 1..])
        },
        None => uri.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
