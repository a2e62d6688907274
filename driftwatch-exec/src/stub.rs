//! Stub implementations for testing.
//!
//! These implementations simulate a value source without making real API
//! calls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;

use driftwatch_domain::{Observation, Subject};

use crate::ports::{FetchError, FetchOperation};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted fetch operation.
///
/// Answers from a script of values and failures, one entry per call. Once
/// the script is exhausted it repeats the fallback value (if any) or fails.
pub struct StubFetch {
    subject: Subject,
    script: Mutex<VecDeque<Result<Decimal, FetchError>>>,
    fallback: Option<Decimal>,
    latency: Duration,
    calls: Mutex<Vec<Instant>>,
}

impl StubFetch {
    /// Stub with an empty script and no fallback.
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stub that always answers `value`.
    pub fn constant(subject: Subject, value: Decimal) -> Self {
        let mut stub = Self::new(subject);
        stub.fallback = Some(value);
        stub
    }

    /// Stub answering `values` in order.
    pub fn sequence(subject: Subject, values: impl IntoIterator<Item = Decimal>) -> Self {
        let stub = Self::new(subject);
        lock(&stub.script).extend(values.into_iter().map(Ok));
        stub
    }

    /// Append a value to the script.
    pub fn then_value(self, value: Decimal) -> Self {
        lock(&self.script).push_back(Ok(value));
        self
    }

    /// Append a failure to the script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        lock(&self.script).push_back(Err(FetchError::Unavailable(message.into())));
        self
    }

    /// Sleep for `latency` on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Instants at which each call started.
    pub fn call_instants(&self) -> Vec<Instant> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl FetchOperation for StubFetch {
    async fn fetch(&self) -> Result<Observation, FetchError> {
        lock(&self.calls).push(Instant::now());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = lock(&self.script).pop_front();
        let value = match next {
            Some(entry) => entry?,
            None => self
                .fallback
                .ok_or_else(|| FetchError::Unavailable("stub script exhausted".to_string()))?,
        };

        Ok(Observation::now(self.subject.clone(), value))
    }
}
