//! Core traits and data types for the measurement engine.
//!
//! This module defines the two device abstractions the sequencer drives —
//! [`MotionController`] for the rotary stage and [`Acquisition`] for the
//! analog DAQ — together with the configuration values supplied at port
//! construction and the record type the sequencer emits.
//!
//! # Architecture
//!
//! ```text
//! SweepPlan ──▶ MeasurementSequencer ──▶ mpsc::Receiver<MeasurementRecord>
//!                  │           │
//!                  ▼           ▼
//!         MotionController  Acquisition     (exclusively owned per session)
//! ```
//!
//! Adapters for concrete hardware implement these traits (see
//! `crate::instrument`); the sequencing logic never sees a vendor protocol.
//! Both traits require `Send` so a boxed port can be moved onto the
//! sequencer's worker task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::angle::{DeviceAngle, UserAngle};
use crate::error::{DeviceFault, FaultKind};

/// Permitted travel of the stage, in device-frame degrees.
///
/// Supplied when a motion port is constructed. Every absolute move is checked
/// against it before a command reaches the hardware.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TravelRange {
    /// Smallest reachable device angle.
    pub min: f64,
    /// Largest reachable device angle.
    pub max: f64,
}

impl TravelRange {
    /// Build a travel range; the bounds are normalized so `min <= max`.
    pub fn new(a: f64, b: f64) -> Self {
        if a <= b {
            Self { min: a, max: b }
        } else {
            Self { min: b, max: a }
        }
    }

    /// Whether the angle lies within the permitted travel.
    pub fn contains(&self, angle: DeviceAngle) -> bool {
        (self.min..=self.max).contains(&angle.degrees())
    }

    /// Reject an out-of-range target with a `Limit` fault.
    pub fn check(&self, angle: DeviceAngle) -> Result<(), DeviceFault> {
        if self.contains(angle) {
            Ok(())
        } else {
            Err(DeviceFault::motion(
                FaultKind::Limit,
                format!(
                    "target {} outside travel range [{}, {}]",
                    angle, self.min, self.max
                ),
            ))
        }
    }
}

/// Sampling session parameters applied to the acquisition port.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Sampling clock frequency in Hz.
    pub sample_rate: f64,
    /// Number of samples returned per acquisition.
    pub samples: u32,
}

impl AcquisitionConfig {
    /// Validate the parameters without involving a device.
    pub fn validate(&self) -> Result<(), DeviceFault> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(DeviceFault::acquisition(
                FaultKind::Unknown,
                format!("invalid sample rate: {} Hz", self.sample_rate),
            ));
        }
        if self.samples == 0 {
            return Err(DeviceFault::acquisition(
                FaultKind::Unknown,
                "sample count must be at least 1",
            ));
        }
        Ok(())
    }

    /// Nominal wall-clock duration of one acquisition.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.samples) / self.sample_rate)
    }
}

/// Abstraction over the rotary stage.
///
/// Implementations own their transport and their [`TravelRange`]; the
/// sequencer only issues device-frame targets and polls for completion.
/// A new `move_absolute` while a previous move is still in flight carries
/// implicit stop semantics (controller-dependent).
#[async_trait]
pub trait MotionController: Send {
    /// Command an absolute move to a device-frame angle.
    ///
    /// Fails with a `Limit` fault — before any command is sent — if the
    /// target is outside the travel range, and with `CommError` if the
    /// command cannot be sent or acknowledged.
    async fn move_absolute(&mut self, target: DeviceAngle) -> Result<(), DeviceFault>;

    /// Non-blocking poll of motion-complete status.
    async fn is_settled(&mut self) -> Result<bool, DeviceFault>;

    /// Best-effort readback of the current position.
    async fn position(&mut self) -> Result<DeviceAngle, DeviceFault>;

    /// Halt motion immediately. Callable at any time; idempotent.
    async fn stop(&mut self) -> Result<(), DeviceFault>;

    /// Drive the stage to its reference position.
    async fn home(&mut self) -> Result<(), DeviceFault>;

    /// Release the device at end of session (disable drive, close transport).
    /// Idempotent; the default does nothing.
    async fn shutdown(&mut self) -> Result<(), DeviceFault> {
        Ok(())
    }

    /// Block until the stage reports settled, polling [`Self::is_settled`]
    /// every `poll` until `timeout` elapses.
    async fn wait_settled(&mut self, timeout: Duration, poll: Duration) -> Result<(), DeviceFault> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_settled().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DeviceFault::motion(
                    FaultKind::Timeout,
                    format!("stage not settled within {:?}", timeout),
                ));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Abstraction over the analog acquisition device.
///
/// The physical input channel is bound when the adapter is constructed; the
/// session parameters (rate, sample count) are applied via [`Self::configure`].
#[async_trait]
pub trait Acquisition: Send {
    /// Apply sampling parameters for subsequent acquisitions.
    ///
    /// Fails with an `Unknown` fault when the device rejects the
    /// configuration (for example a rate above the device maximum).
    async fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceFault>;

    /// Trigger one synchronous acquisition.
    ///
    /// Returns exactly the configured number of samples in temporal order.
    /// Fails with `Timeout` if the buffer does not arrive within
    /// `samples / sample_rate` plus the device's grace period, and with
    /// `CommError` on disconnect.
    async fn acquire(&mut self) -> Result<Vec<f64>, DeviceFault>;

    /// Cancel an in-flight acquisition. Idempotent; any partial buffer is
    /// discarded.
    async fn abort(&mut self) -> Result<(), DeviceFault>;

    /// Release the device at end of session. Idempotent; the default does
    /// nothing.
    async fn shutdown(&mut self) -> Result<(), DeviceFault> {
        Ok(())
    }
}

/// Outcome classification of a single sweep point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointStatus {
    /// Move, settle and acquisition all succeeded.
    Ok,
    /// A usable but incomplete sample buffer was returned.
    Degraded,
    /// A device fault prevented a measurement at this point.
    Failed,
}

impl fmt::Display for PointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointStatus::Ok => write!(f, "ok"),
            PointStatus::Degraded => write!(f, "degraded"),
            PointStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row of sweep output: what was requested, what the stage confirmed,
/// and what the digitizer saw.
///
/// Created once per sweep point by the sequencer and never mutated
/// afterwards; ownership passes to the caller through the record channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Index of the point within the plan.
    pub index: usize,
    /// The angle that was requested, in the user convention.
    pub user_angle: UserAngle,
    /// Device-frame position read back after settling, when available.
    pub device_angle_confirmed: Option<DeviceAngle>,
    /// Raw samples in temporal order; empty on failed points.
    pub raw_samples: Vec<f64>,
    /// Result of the plan's averaging policy; NaN on failed points.
    pub reduced_value: f64,
    /// UTC time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Outcome classification for this point.
    pub status: PointStatus,
    /// The point-local fault, present iff `status == Failed`.
    pub fault: Option<DeviceFault>,
}
