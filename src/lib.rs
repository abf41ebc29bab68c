//! Core library for automated optical reflectance measurement.
//!
//! A motorized rotary stage carries the sample through a sequence of angular
//! positions; at each position a DAQ device acquires analog samples. The
//! library's centerpiece is the measurement sequencer (`sweep` module), which
//! reconciles the two devices — slow, settle-bound motion and clock-driven
//! acquisition — into a single deterministic, abortable sweep. Device
//! specifics live behind the port traits in `core`; concrete drivers and
//! simulators are in `instrument`.

pub mod adapters;
pub mod angle;
pub mod config;
pub mod core;
pub mod error;
#[cfg(feature = "storage_csv")]
pub mod export;
pub mod instrument;
pub mod sweep;
