//! Sweep planning and execution.
//!
//! A [`SweepPlan`] says which angles to visit and how each point is sampled;
//! the [`MeasurementSequencer`] executes it against live device ports and
//! streams [`MeasurementRecord`](crate::core::MeasurementRecord)s back to the
//! caller.

pub mod plan;
pub mod sequencer;

pub use plan::{Averaging, SweepPlan, SweepPlanBuilder};
pub use sequencer::{
    MeasurementSequencer, ProgressCallback, SequencerConfig, SweepHandle, SweepOutcome, SweepState,
};
