//! Error types for the measurement engine.
//!
//! Device-level failures are reported as [`DeviceFault`], a tagged value that
//! carries which device raised it, how it failed, and a human-readable detail
//! string. The tag pair is what callers branch on: the [`FaultKind`] decides
//! whether a fault is local to a single sweep point or fatal to the whole
//! session (see [`DeviceFault::is_session_fatal`]).
//!
//! Plan construction problems are a separate, purely caller-side error type,
//! [`PlanError`] — they never reach a device.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which physical device raised a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSource {
    /// The rotary stage / motion controller.
    Motion,
    /// The analog acquisition device.
    Acquisition,
}

impl fmt::Display for FaultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSource::Motion => write!(f, "motion"),
            FaultSource::Acquisition => write!(f, "acquisition"),
        }
    }
}

// The `source` field of `DeviceFault` is named `source`, so thiserror treats it
// as the error source and requires it to implement `std::error::Error`.
impl std::error::Error for FaultSource {}

/// How a device failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The device did not respond within the configured bound. Recoverable by
    /// retry or operator intervention; local to the sweep point that hit it.
    Timeout,
    /// A requested angle is outside the configured travel range. Raised before
    /// any command is sent; never retried automatically.
    Limit,
    /// The device disconnected or the protocol broke down. Device state is no
    /// longer trustworthy.
    CommError,
    /// Driver-reported failure without further classification. Treated
    /// conservatively, like a communication error.
    Unknown,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Timeout => write!(f, "timeout"),
            FaultKind::Limit => write!(f, "limit"),
            FaultKind::CommError => write!(f, "comm error"),
            FaultKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure reported by one of the two devices.
///
/// Carries enough information for the caller to decide retry vs. abort
/// without parsing the detail string.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("{source} fault ({kind}): {detail}")]
pub struct DeviceFault {
    /// Device that raised the fault.
    pub source: FaultSource,
    /// Failure classification.
    pub kind: FaultKind,
    /// Human-readable description of what happened.
    pub detail: String,
}

impl DeviceFault {
    /// Fault raised by the motion controller.
    pub fn motion(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            source: FaultSource::Motion,
            kind,
            detail: detail.into(),
        }
    }

    /// Fault raised by the acquisition device.
    pub fn acquisition(kind: FaultKind, detail: impl Into<String>) -> Self {
        Self {
            source: FaultSource::Acquisition,
            kind,
            detail: detail.into(),
        }
    }

    /// Whether this fault invalidates the rest of the sweep.
    ///
    /// Timeouts are point-local: the stage or digitizer may well respond at
    /// the next point. Limit violations are a configuration error, and
    /// communication or unclassified errors mean the device can no longer be
    /// trusted — all three terminate the session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind,
            FaultKind::Limit | FaultKind::CommError | FaultKind::Unknown
        )
    }
}

/// Rejections raised while constructing a [`SweepPlan`](crate::sweep::SweepPlan).
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    /// The plan contains no measurement points.
    #[error("sweep plan has no measurement points")]
    EmptyPoints,

    /// `samples_per_point` must be at least 1.
    #[error("samples per point must be at least 1")]
    ZeroSamples,

    /// Sample rate must be a positive, finite frequency.
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),

    /// An angle range was given a zero or non-finite step.
    #[error("invalid angle step: {0}")]
    InvalidStep(f64),

    /// A point is not a finite number of degrees.
    #[error("non-finite angle in point list: {0}")]
    NonFiniteAngle(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_display() {
        let fault = DeviceFault::motion(FaultKind::Timeout, "stage not settled within 10s");
        assert_eq!(
            fault.to_string(),
            "motion fault (timeout): stage not settled within 10s"
        );
    }

    #[test]
    fn fatality_classification() {
        let local = DeviceFault::acquisition(FaultKind::Timeout, "");
        assert!(!local.is_session_fatal());

        for kind in [FaultKind::Limit, FaultKind::CommError, FaultKind::Unknown] {
            assert!(DeviceFault::motion(kind, "").is_session_fatal());
        }
    }
}
