//! Driftwatch Storage Layer
//!
//! Provides the shared connection to the backing store and persistence for
//! samples, run sessions and unit records.
//!
//! # Architecture
//!
//! - **Shared connection**: `SharedConnectionManager` owns the one live handle
//! - **Repository traits**: Define the storage interface (ports)
//! - **Managed store**: Repositories routed through the shared connection
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use driftwatch_store::{ManagedStore, MemoryConnector, SampleRepository, SharedConnectionManager};
//! use driftwatch_domain::{Observation, Sample, Subject};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = Arc::new(SharedConnectionManager::new(
//!         MemoryConnector::new(),
//!         Duration::from_secs(5),
//!     ));
//!     manager.connect().await.unwrap();
//!
//!     let store = ManagedStore::new(Arc::clone(&manager));
//!     let subject = Subject::new("BTCUSDT").unwrap();
//!     let sample = Sample::capture(Observation::now(subject.clone(), Decimal::ONE_HUNDRED));
//!     store.append(&sample).await.unwrap();
//!
//!     println!("Samples: {}", store.count(&subject).await.unwrap());
//!     manager.disconnect().await;
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod connection;
mod error;
mod managed;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use connection::{
    mask_uri, ConnectionError, ConnectionState, Connector, NotConnected, SharedConnectionManager,
};
pub use error::StoreError;
pub use managed::ManagedStore;
pub use memory::{MemoryConnector, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PgConnector, PgStore};
pub use repository::{SampleRepository, SessionRepository, Store};
