//! Sweep descriptions: which angles to visit and how to sample each one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::angle::UserAngle;
use crate::core::AcquisitionConfig;
use crate::error::PlanError;

/// Policy for reducing a point's raw samples to one representative value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Averaging {
    /// Arithmetic mean of all samples.
    #[default]
    Mean,
    /// Middle value of the sorted samples; mean of the two middles for an
    /// even count.
    Median,
    /// First sample, untouched.
    None,
}

impl Averaging {
    /// Reduce a non-empty sample buffer.
    pub fn reduce(self, samples: &[f64]) -> f64 {
        debug_assert!(!samples.is_empty(), "reduce called on empty buffer");
        match self {
            Averaging::Mean => samples.iter().sum::<f64>() / samples.len() as f64,
            Averaging::Median => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[mid]
                } else {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                }
            }
            Averaging::None => samples[0],
        }
    }
}

/// Immutable description of one sweep.
///
/// Constructed through [`SweepPlan::builder`], which validates everything up
/// front so the sequencer never has to reject a plan at runtime. A built plan
/// can back any number of runs; each run gets its own session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    points: Vec<UserAngle>,
    settle_time: Duration,
    samples_per_point: u32,
    sample_rate: f64,
    averaging: Averaging,
    home_first: bool,
}

impl SweepPlan {
    /// Start building a plan.
    pub fn builder() -> SweepPlanBuilder {
        SweepPlanBuilder::default()
    }

    /// The angles to visit, in execution order.
    pub fn points(&self) -> &[UserAngle] {
        &self.points
    }

    /// Number of measurement points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// A valid plan is never empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Extra dwell after the stage reports settled.
    pub fn settle_time(&self) -> Duration {
        self.settle_time
    }

    /// Samples acquired at each point.
    pub fn samples_per_point(&self) -> u32 {
        self.samples_per_point
    }

    /// Acquisition clock frequency in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Reduction policy for each point's buffer.
    pub fn averaging(&self) -> Averaging {
        self.averaging
    }

    /// Whether the stage is homed before the first point.
    pub fn home_first(&self) -> bool {
        self.home_first
    }

    /// The sampling parameters this plan asks of the acquisition port.
    pub fn acquisition_config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            sample_rate: self.sample_rate,
            samples: self.samples_per_point,
        }
    }
}

/// Validating builder for [`SweepPlan`].
#[derive(Clone, Debug)]
pub struct SweepPlanBuilder {
    points: Vec<f64>,
    settle_time: Duration,
    samples_per_point: u32,
    sample_rate: f64,
    averaging: Averaging,
    home_first: bool,
}

impl Default for SweepPlanBuilder {
    fn default() -> Self {
        Self {
            points: Vec::new(),
            settle_time: Duration::from_millis(250),
            samples_per_point: 10,
            sample_rate: 1_000.0,
            averaging: Averaging::Mean,
            home_first: false,
        }
    }
}

impl SweepPlanBuilder {
    /// Append explicit user-convention angles, in degrees.
    pub fn points(mut self, degrees: impl IntoIterator<Item = f64>) -> Self {
        self.points.extend(degrees);
        self
    }

    /// Append an angle range with an inclusive endpoint: values are generated
    /// from `start` in increments of `step` while they lie within `step / 10`
    /// past `end`, so `0..=90` at step 1 yields 91 points. A negative step
    /// sweeps downward.
    pub fn range(mut self, start: f64, end: f64, step: f64) -> Result<Self, PlanError> {
        if !step.is_finite() || step == 0.0 {
            return Err(PlanError::InvalidStep(step));
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(PlanError::NonFiniteAngle(if start.is_finite() {
                end
            } else {
                start
            }));
        }

        let limit = end + step / 10.0;
        let mut index = 0u32;
        loop {
            let value = start + step * f64::from(index);
            let past_end = if step > 0.0 { value > limit } else { value < limit };
            if past_end {
                break;
            }
            self.points.push(value);
            index += 1;
        }
        Ok(self)
    }

    /// Dwell after the stage settles, before acquisition.
    pub fn settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Samples acquired per point (must be >= 1).
    pub fn samples_per_point(mut self, samples: u32) -> Self {
        self.samples_per_point = samples;
        self
    }

    /// Acquisition clock frequency in Hz (must be positive and finite).
    pub fn sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate = hz;
        self
    }

    /// Reduction policy.
    pub fn averaging(mut self, averaging: Averaging) -> Self {
        self.averaging = averaging;
        self
    }

    /// Home the stage before the first point.
    pub fn home_first(mut self, home_first: bool) -> Self {
        self.home_first = home_first;
        self
    }

    /// Validate and freeze the plan.
    pub fn build(self) -> Result<SweepPlan, PlanError> {
        if self.points.is_empty() {
            return Err(PlanError::EmptyPoints);
        }
        if let Some(&bad) = self.points.iter().find(|p| !p.is_finite()) {
            return Err(PlanError::NonFiniteAngle(bad));
        }
        if self.samples_per_point == 0 {
            return Err(PlanError::ZeroSamples);
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(PlanError::InvalidSampleRate(self.sample_rate));
        }

        Ok(SweepPlan {
            points: self.points.into_iter().map(UserAngle::new).collect(),
            settle_time: self.settle_time,
            samples_per_point: self.samples_per_point,
            sample_rate: self.sample_rate,
            averaging: self.averaging,
            home_first: self.home_first,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_reduction() {
        assert_eq!(Averaging::Mean.reduce(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn median_reduction_odd_and_even() {
        assert_eq!(Averaging::Median.reduce(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(Averaging::Median.reduce(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn no_reduction_takes_first_sample() {
        assert_eq!(Averaging::None.reduce(&[7.0, 1.0, 9.0]), 7.0);
    }

    #[test]
    fn range_includes_endpoint() {
        let plan = SweepPlan::builder()
            .range(0.0, 90.0, 1.0)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(plan.len(), 91);
        assert_eq!(plan.points()[0], UserAngle::new(0.0));
        assert_eq!(plan.points()[90], UserAngle::new(90.0));
    }

    #[test]
    fn range_with_non_dividing_step_stops_before_endpoint() {
        let plan = SweepPlan::builder()
            .range(0.0, 1.0, 0.3)
            .unwrap()
            .build()
            .unwrap();
        let degrees: Vec<f64> = plan.points().iter().map(|p| p.degrees()).collect();
        assert_eq!(degrees.len(), 4);
        assert!((degrees[3] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn descending_range() {
        let plan = SweepPlan::builder()
            .range(90.0, 0.0, -30.0)
            .unwrap()
            .build()
            .unwrap();
        let degrees: Vec<f64> = plan.points().iter().map(|p| p.degrees()).collect();
        assert_eq!(degrees, vec![90.0, 60.0, 30.0, 0.0]);
    }

    #[test]
    fn zero_step_is_rejected() {
        assert_eq!(
            SweepPlan::builder().range(0.0, 10.0, 0.0).unwrap_err(),
            PlanError::InvalidStep(0.0)
        );
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert_eq!(SweepPlan::builder().build().unwrap_err(), PlanError::EmptyPoints);
    }

    #[test]
    fn zero_samples_rejected_at_construction() {
        let err = SweepPlan::builder()
            .points([0.0, 45.0])
            .samples_per_point(0)
            .build()
            .unwrap_err();
        assert_eq!(err, PlanError::ZeroSamples);
    }

    #[test]
    fn bad_sample_rates_rejected() {
        for rate in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            assert!(SweepPlan::builder()
                .points([0.0])
                .sample_rate(rate)
                .build()
                .is_err());
        }
    }

    #[test]
    fn duplicate_adjacent_points_are_preserved() {
        let plan = SweepPlan::builder()
            .points([10.0, 10.0, 20.0])
            .build()
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.points()[0], plan.points()[1]);
    }
}
