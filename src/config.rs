//! Application configuration.
//!
//! Settings are layered: compiled-in defaults, then an optional TOML file,
//! then environment variables prefixed `REFLECT_` (with `__` as the section
//! separator, e.g. `REFLECT_MOTION__PORT=/dev/ttyUSB1`). Durations accept
//! humantime strings such as `"250ms"` or `"10s"`.
//!
//! ```toml
//! [motion]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//! axis = 1
//! min_angle = -95.0
//! max_angle = 5.0
//!
//! [acquisition]
//! channel = "Dev1/ai0"
//! max_sample_rate = 100000.0
//!
//! [sequencer]
//! settle_timeout = "10s"
//! acquisition_grace = "500ms"
//! poll_interval = "50ms"
//! continue_on_fault = true
//!
//! [sweep]
//! samples_per_point = 10
//! sample_rate = 1000.0
//! settle_time = "250ms"
//! averaging = "mean"
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::TravelRange;
use crate::sweep::{Averaging, SequencerConfig};

/// Rotary stage connection and travel limits.
#[derive(Clone, Debug, Deserialize)]
pub struct MotionSettings {
    /// Serial port the controller is attached to.
    pub port: String,
    /// Serial speed; the ESP301 ships at 19200.
    pub baud_rate: u32,
    /// Controller axis carrying the rotation stage (1–3).
    pub axis: u8,
    /// Lower travel limit, device-frame degrees.
    pub min_angle: f64,
    /// Upper travel limit, device-frame degrees.
    pub max_angle: f64,
}

impl MotionSettings {
    /// Travel limits as a checked range.
    pub fn travel_range(&self) -> TravelRange {
        TravelRange::new(self.min_angle, self.max_angle)
    }
}

/// Analog input configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct AcquisitionSettings {
    /// Physical channel name, e.g. `Dev1/ai0`.
    pub channel: String,
    /// Highest sampling rate the device accepts, in Hz.
    pub max_sample_rate: f64,
}

/// Sequencer timing bounds and fault policy.
#[derive(Clone, Debug, Deserialize)]
pub struct SequencerSettings {
    /// Upper bound on waiting for the stage to settle.
    #[serde(with = "humantime_serde")]
    pub settle_timeout: Duration,
    /// Slack on top of the nominal acquisition duration.
    #[serde(with = "humantime_serde")]
    pub acquisition_grace: Duration,
    /// Motion-complete polling interval.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Keep sweeping past point-local faults.
    pub continue_on_fault: bool,
}

impl From<&SequencerSettings> for SequencerConfig {
    fn from(settings: &SequencerSettings) -> Self {
        Self {
            settle_timeout: settings.settle_timeout,
            acquisition_grace: settings.acquisition_grace,
            poll_interval: settings.poll_interval,
            continue_on_fault: settings.continue_on_fault,
        }
    }
}

/// Default sweep parameters, overridable per run from the CLI.
#[derive(Clone, Debug, Deserialize)]
pub struct SweepDefaults {
    /// Samples acquired at each point.
    pub samples_per_point: u32,
    /// Acquisition clock in Hz.
    pub sample_rate: f64,
    /// Dwell after the stage settles.
    #[serde(with = "humantime_serde")]
    pub settle_time: Duration,
    /// Reduction policy.
    pub averaging: Averaging,
}

/// Root of the application configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Rotary stage connection.
    pub motion: MotionSettings,
    /// Analog input device.
    pub acquisition: AcquisitionSettings,
    /// Sequencer timing and fault policy.
    pub sequencer: SequencerSettings,
    /// Per-run sweep defaults.
    pub sweep: SweepDefaults,
}

impl Settings {
    /// Load settings from defaults, an optional file, and the environment.
    pub fn new(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("motion.port", "/dev/ttyUSB0")?
            .set_default("motion.baud_rate", 19200)?
            .set_default("motion.axis", 1)?
            .set_default("motion.min_angle", -95.0)?
            .set_default("motion.max_angle", 5.0)?
            .set_default("acquisition.channel", "Dev1/ai0")?
            .set_default("acquisition.max_sample_rate", 100_000.0)?
            .set_default("sequencer.settle_timeout", "10s")?
            .set_default("sequencer.acquisition_grace", "500ms")?
            .set_default("sequencer.poll_interval", "50ms")?
            .set_default("sequencer.continue_on_fault", true)?
            .set_default("sweep.samples_per_point", 10)?
            .set_default("sweep.sample_rate", 1_000.0)?
            .set_default("sweep.settle_time", "250ms")?
            .set_default("sweep.averaging", "mean")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder
            .add_source(Environment::with_prefix("REFLECT").separator("__"))
            .build()?
            .try_deserialize()
    }
}
