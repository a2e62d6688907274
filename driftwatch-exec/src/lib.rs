//! Driftwatch Execution Layer
//!
//! Drives the polling loop and records run sessions.
//!
//! # Architecture
//!
//! ```text
//! FetchOperation → PollingFetcher → SampleRepository
//!                        ↓
//!                   StopPolicy → PollOutcome
//! ```
//!
//! # Components
//!
//! - **Ports**: `FetchOperation`, the value source the poller calls
//! - **Poller**: Fixed-period fetch → persist → evaluate loop
//! - **Recorder**: Best-effort session and unit recording
//! - **Stub**: Scripted fetch operation for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use driftwatch_exec::{PollingFetcher, StubFetch};
//! use driftwatch_engine::ThresholdStopPolicy;
//! use driftwatch_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let fetcher = PollingFetcher::new(
//!     Duration::from_secs(10),
//!     Arc::new(StubFetch::sequence(subject, [dec!(100), dec!(100.2)])),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ThresholdStopPolicy::new(dec!(0.001))?),
//! );
//! fetcher.start().await?;
//! let outcome = fetcher.wait().await;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod poller;
pub mod ports;
pub mod recorder;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use poller::{PollOutcome, PollerState, PollerStatus, PollingFetcher};
pub use ports::{FetchError, FetchOperation};
pub use recorder::{SessionRecorder, UnitReport};
pub use stub::StubFetch;
