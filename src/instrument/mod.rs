//! Concrete implementations of the device ports.
//!
//! [`Esp301`] drives a Newport ESP301 motion controller through any
//! [`CommandPort`](crate::adapters::CommandPort) transport. The `sim` module
//! provides in-process stand-ins for both ports with realistic timing and
//! scriptable faults; they back the `--sim` CLI mode and the integration
//! tests. Vendor DAQ SDKs (NI-DAQmx and friends) stay outside this crate —
//! an adapter over such an SDK implements [`Acquisition`](crate::core::Acquisition)
//! and plugs in unchanged.

pub mod esp301;
pub mod sim;

pub use esp301::Esp301;
pub use sim::{SimAcquisition, SimMotion};
