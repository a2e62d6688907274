//! Stop policies.
//!
//! A stop policy compares the current sample of a run against its baseline
//! and decides whether the run should stop. Policies are pure: no clock,
//! no I/O, no interior state.

use driftwatch_domain::Sample;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while evaluating a stop policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Drift is undefined when the baseline value is exactly zero
    #[error("Baseline value is zero, drift is undefined")]
    ZeroBaseline,

    /// Threshold fraction must be >= 0
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    /// Decimal arithmetic overflowed
    #[error("Arithmetic overflow computing drift")]
    Overflow,
}

/// Outcome of evaluating a policy against one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopDecision {
    /// Keep polling
    Continue {
        /// Fractional drift from the baseline
        drift: Decimal,
    },
    /// Stop polling
    Stop {
        /// Fractional drift from the baseline
        drift: Decimal,
    },
}

impl StopDecision {
    /// Whether this decision stops the run
    pub fn is_stop(&self) -> bool {
        matches!(self, StopDecision::Stop { .. })
    }

    /// Drift that produced this decision
    pub fn drift(&self) -> Decimal {
        match self {
            StopDecision::Continue { drift } | StopDecision::Stop { drift } => *drift,
        }
    }
}

/// Decides whether a polling run should stop.
pub trait StopPolicy: Send + Sync {
    /// Evaluate the current sample against the run's baseline.
    fn evaluate(&self, baseline: &Sample, current: &Sample) -> Result<StopDecision, PolicyError>;
}

/// Fractional drift of `current` relative to `baseline`:
/// `|current - baseline| / |baseline|`.
///
/// # Errors
/// `PolicyError::ZeroBaseline` when the baseline value is exactly zero.
pub fn drift(baseline: &Sample, current: &Sample) -> Result<Decimal, PolicyError> {
    let base = baseline.value();
    if base.is_zero() {
        return Err(PolicyError::ZeroBaseline);
    }

    let delta = current
        .value()
        .checked_sub(base)
        .ok_or(PolicyError::Overflow)?
        .abs();

    delta.checked_div(base.abs()).ok_or(PolicyError::Overflow)
}

/// Returns true when the drift from `baseline` to `current` strictly exceeds
/// `threshold_fraction`. A drift exactly at the threshold does not stop.
///
/// ```
/// # use driftwatch_domain::{Observation, Sample, Subject};
/// # use driftwatch_engine::evaluate;
/// # use rust_decimal::Decimal;
/// # use std::str::FromStr;
/// let subject = Subject::new("BTCUSDT").unwrap();
/// let sample = |v: &str| Sample::capture(Observation::now(subject.clone(), Decimal::from_str(v).unwrap()));
/// let threshold = Decimal::from_str("0.01").unwrap();
///
/// assert!(!evaluate(&sample("100"), &sample("101"), threshold).unwrap());
/// assert!(evaluate(&sample("100"), &sample("101.001"), threshold).unwrap());
/// ```
pub fn evaluate(
    baseline: &Sample,
    current: &Sample,
    threshold_fraction: Decimal,
) -> Result<bool, PolicyError> {
    Ok(drift(baseline, current)? > threshold_fraction)
}

// =============================================================================
// Threshold Stop Policy
// =============================================================================

/// Stops a run once the drift from the baseline exceeds a fixed fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdStopPolicy {
    threshold: Decimal,
}

impl ThresholdStopPolicy {
    /// Create a policy with the given threshold fraction (0.001 = 0.1%).
    ///
    /// # Errors
    /// `PolicyError::InvalidThreshold` if the threshold is negative
    pub fn new(threshold: Decimal) -> Result<Self, PolicyError> {
        if threshold.is_sign_negative() && !threshold.is_zero() {
            return Err(PolicyError::InvalidThreshold(format!(
                "Threshold must be >= 0, got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    /// Configured threshold fraction
    pub fn threshold(&self) -> Decimal {
        self.threshold
    }
}

impl StopPolicy for ThresholdStopPolicy {
    fn evaluate(&self, baseline: &Sample, current: &Sample) -> Result<StopDecision, PolicyError> {
        let drift = drift(baseline, current)?;
        if drift > self.threshold {
            Ok(StopDecision::Stop { drift })
        } else {
            Ok(StopDecision::Continue { drift })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use driftwatch_domain::Subject;
    use rust_decimal_macros::dec;

    fn sample(value: Decimal) -> Sample {
        let now = Utc::now();
        Sample::new(Subject::new("BTCUSDT").unwrap(), value, now, now)
    }

    #[test]
    fn test_exact_boundary_does_not_stop() {
        let stop = evaluate(&sample(dec!(100)), &sample(dec!(101)), dec!(0.01)).unwrap();
        assert!(!stop);
    }

    #[test]
    fn test_just_past_boundary_stops() {
        let stop = evaluate(&sample(dec!(100)), &sample(dec!(101.001)), dec!(0.01)).unwrap();
        assert!(stop);
    }

    #[test]
    fn test_downward_moves_count() {
        let stop = evaluate(&sample(dec!(100)), &sample(dec!(98)), dec!(0.01)).unwrap();
        assert!(stop);
    }

    #[test]
    fn test_drift_value() {
        let d = drift(&sample(dec!(100)), &sample(dec!(100.2))).unwrap();
        assert_eq!(d, dec!(0.002));
    }

    #[test]
    fn test_negative_baseline_uses_magnitude() {
        let d = drift(&sample(dec!(-50)), &sample(dec!(-49))).unwrap();
        assert_eq!(d, dec!(0.02));
    }

    #[test]
    fn test_zero_baseline_is_an_error() {
        let result = evaluate(&sample(Decimal::ZERO), &sample(dec!(1)), dec!(0.01));
        assert_eq!(result, Err(PolicyError::ZeroBaseline));

        let policy = ThresholdStopPolicy::new(dec!(0.01)).unwrap();
        assert_eq!(
            policy.evaluate(&sample(Decimal::ZERO), &sample(dec!(1))),
            Err(PolicyError::ZeroBaseline)
        );
    }

    #[test]
    fn test_policy_rejects_negative_threshold() {
        assert!(matches!(
            ThresholdStopPolicy::new(dec!(-0.01)),
            Err(PolicyError::InvalidThreshold(_))
        ));
        assert!(ThresholdStopPolicy::new(Decimal::ZERO).is_ok());
    }

    #[test]
    fn test_policy_decisions_carry_drift() {
        let policy = ThresholdStopPolicy::new(dec!(0.001)).unwrap();
        let baseline = sample(dec!(100));

        let hold = policy.evaluate(&baseline, &sample(dec!(100.05))).unwrap();
        assert_eq!(hold, StopDecision::Continue { drift: dec!(0.0005) });
        assert!(!hold.is_stop());

        let stop = policy.evaluate(&baseline, &sample(dec!(100.2))).unwrap();
        assert!(stop.is_stop());
        assert_eq!(stop.drift(), dec!(0.002));
    }

    #[test]
    fn test_zero_threshold_stops_on_any_move() {
        let policy = ThresholdStopPolicy::new(Decimal::ZERO).unwrap();
        let baseline = sample(dec!(100));

        assert!(!policy.evaluate(&baseline, &sample(dec!(100))).unwrap().is_stop());
        assert!(policy.evaluate(&baseline, &sample(dec!(100.0001))).unwrap().is_stop());
    }
}
