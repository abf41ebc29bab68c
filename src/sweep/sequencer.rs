//! The measurement sequencing engine.
//!
//! [`MeasurementSequencer::run`] moves a [`SweepPlan`] and both device ports
//! onto a dedicated worker task, which owns them exclusively for the life of
//! the session. For each point the worker cycles move → settle → dwell →
//! acquire → reduce, emits one [`MeasurementRecord`] over a bounded channel,
//! and reports progress. The caller keeps a [`SweepHandle`] for consuming
//! records and for pause / resume / abort.
//!
//! # Ordering and exclusivity
//!
//! Points run strictly in plan order; at most one device operation is in
//! flight per session. The stage and the digitizer are stateful single-session
//! resources — overlapping commands are undefined behavior at the hardware
//! level, so nothing here dispatches in parallel.
//!
//! # Cancellation
//!
//! Abort is cooperative: a watch channel is checked between steps and raced
//! (`select!`) against the settle wait, the dwell sleep and the acquisition,
//! so in-flight waits are cut short. On abort the worker issues a hardware
//! `stop()` and acquisition `abort()` before returning; records already
//! emitted stay valid. Dropping the handle (or closing its record receiver)
//! counts as an abort — measurements must not continue with nobody listening.
//!
//! # Failure semantics
//!
//! Session-fatal faults (`Limit`, `CommError`, `Unknown`) terminate the sweep
//! with a `Failed` outcome carrying the fault. A point-local `Timeout`
//! produces a `Failed` record for that point — acquisition skipped — and the
//! sweep moves on, unless `continue_on_fault` is off, in which case the fault
//! terminates the session instead. No fault is dropped: each one ends up on a
//! record or on the outcome.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::{Acquisition, MeasurementRecord, MotionController, PointStatus};
use crate::error::{DeviceFault, FaultKind};
use crate::sweep::SweepPlan;

/// Records buffered between worker and consumer before the worker blocks.
const RECORD_CHANNEL_CAPACITY: usize = 32;

/// Timing and fault-policy knobs for the sequencer.
///
/// The settle timeout and acquisition grace period are deliberately explicit
/// configuration: a hung device must never hang the sequencer, and the right
/// bounds depend on the installed hardware, not on this crate.
#[derive(Clone, Copy, Debug)]
pub struct SequencerConfig {
    /// Upper bound on waiting for the stage to report settled.
    pub settle_timeout: Duration,
    /// Slack added to the nominal acquisition duration before the sequencer
    /// declares an acquisition timed out.
    pub acquisition_grace: Duration,
    /// Interval at which motion-complete status is polled.
    pub poll_interval: Duration,
    /// Keep sweeping past point-local faults (timeouts). Session-fatal
    /// faults terminate regardless.
    pub continue_on_fault: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(10),
            acquisition_grace: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            continue_on_fault: true,
        }
    }
}

/// Lifecycle of a sweep session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepState {
    /// Session created, worker not yet driving points.
    Pending,
    /// Worker is cycling through points.
    Running,
    /// Every point was visited; all faults (if any) were point-local.
    Completed,
    /// The caller aborted, or the handle went away mid-sweep.
    Aborted,
    /// A session-fatal fault terminated the sweep.
    Failed,
}

/// Terminal summary of one sweep session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SweepOutcome {
    /// Identity of the run this outcome belongs to.
    pub run_id: Uuid,
    /// How the session ended: `Completed`, `Aborted` or `Failed`.
    pub state: SweepState,
    /// Number of records emitted before the session ended.
    pub records_emitted: usize,
    /// The terminating fault, present iff `state == Failed`.
    pub fault: Option<DeviceFault>,
}

/// Progress callback: `(index, total)` after each emitted record.
pub type ProgressCallback = Box<dyn FnMut(usize, usize) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SweepControl {
    Run,
    Pause,
    Abort,
}

/// Why a point did not produce a normal record.
enum Interrupt {
    Fault(DeviceFault),
    Aborted,
}

/// Orchestrates sweep sessions.
///
/// The sequencer itself only carries configuration; every [`Self::run`] call
/// creates a fresh, single-use session. A finished or aborted session cannot
/// be restarted — build a new handle from the same (immutable, reusable)
/// plan instead.
#[derive(Clone, Debug, Default)]
pub struct MeasurementSequencer {
    config: SequencerConfig,
}

impl MeasurementSequencer {
    /// Sequencer with explicit timing configuration.
    pub fn new(config: SequencerConfig) -> Self {
        Self { config }
    }

    /// Start a sweep on a dedicated worker task.
    ///
    /// Both ports are moved into the session and owned exclusively by it
    /// until the session ends. Must be called within a Tokio runtime.
    pub fn run(
        &self,
        plan: SweepPlan,
        motion: Box<dyn MotionController>,
        acquisition: Box<dyn Acquisition>,
        on_progress: Option<ProgressCallback>,
    ) -> SweepHandle {
        let run_id = Uuid::new_v4();
        let (record_tx, record_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = watch::channel(SweepControl::Run);

        let session = SweepSession {
            run_id,
            plan,
            motion,
            acquisition,
            config: self.config,
            records: record_tx,
            control: control_rx,
            on_progress,
            state: SweepState::Pending,
            emitted: 0,
        };
        let task = tokio::spawn(session.execute());

        SweepHandle {
            run_id,
            records: record_rx,
            control: control_tx,
            task,
        }
    }
}

/// Caller's end of a running sweep session.
pub struct SweepHandle {
    run_id: Uuid,
    /// The finite record stream. Receives one record per measured point;
    /// closes when the session ends.
    pub records: mpsc::Receiver<MeasurementRecord>,
    control: watch::Sender<SweepControl>,
    task: JoinHandle<SweepOutcome>,
}

impl SweepHandle {
    /// Identity of this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Receive the next record; `None` once the session has ended.
    pub async fn next_record(&mut self) -> Option<MeasurementRecord> {
        self.records.recv().await
    }

    /// Request a cooperative abort. The worker stops the stage and cancels
    /// any in-flight acquisition; records already emitted are preserved.
    pub fn abort(&self) {
        let _ = self.control.send(SweepControl::Abort);
    }

    /// Hold the sweep at the next point boundary. No effect after an abort.
    pub fn pause(&self) {
        self.set_control(SweepControl::Pause);
    }

    /// Resume a paused sweep. No effect after an abort.
    pub fn resume(&self) {
        self.set_control(SweepControl::Run);
    }

    fn set_control(&self, desired: SweepControl) {
        // Abort is sticky: pause/resume must not mask a pending abort.
        self.control.send_if_modified(|current| {
            if *current == SweepControl::Abort || *current == desired {
                false
            } else {
                *current = desired;
                true
            }
        });
    }

    /// Wait for the session to end, discarding any unconsumed records.
    pub async fn join(mut self) -> SweepOutcome {
        while self.records.recv().await.is_some() {}
        finish(self.run_id, self.task).await
    }

    /// Drain every remaining record, then wait for the session to end.
    pub async fn collect(mut self) -> (Vec<MeasurementRecord>, SweepOutcome) {
        let mut records = Vec::new();
        while let Some(record) = self.records.recv().await {
            records.push(record);
        }
        let outcome = finish(self.run_id, self.task).await;
        (records, outcome)
    }
}

async fn finish(run_id: Uuid, task: JoinHandle<SweepOutcome>) -> SweepOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(join_error) => SweepOutcome {
            run_id,
            state: SweepState::Failed,
            records_emitted: 0,
            fault: Some(DeviceFault::motion(
                FaultKind::Unknown,
                format!("sweep worker task failed: {}", join_error),
            )),
        },
    }
}

/// Resolves when an abort is requested, or when the handle has gone away.
async fn abort_signal(control: &mut watch::Receiver<SweepControl>) {
    let _ = control
        .wait_for(|c| matches!(c, SweepControl::Abort))
        .await;
}

/// Run-scoped state, owned by the worker task. One per `run()` call.
struct SweepSession {
    run_id: Uuid,
    plan: SweepPlan,
    motion: Box<dyn MotionController>,
    acquisition: Box<dyn Acquisition>,
    config: SequencerConfig,
    records: mpsc::Sender<MeasurementRecord>,
    control: watch::Receiver<SweepControl>,
    on_progress: Option<ProgressCallback>,
    state: SweepState,
    emitted: usize,
}

impl SweepSession {
    async fn execute(mut self) -> SweepOutcome {
        let total = self.plan.len();
        self.state = SweepState::Running;
        info!(
            "sweep {}: starting, {} points, {} samples/point @ {} Hz",
            self.run_id,
            total,
            self.plan.samples_per_point(),
            self.plan.sample_rate()
        );

        if let Err(fault) = self
            .acquisition
            .configure(&self.plan.acquisition_config())
            .await
        {
            return self.finish_failed(fault).await;
        }

        if self.plan.home_first() {
            match self.home_stage().await {
                Ok(()) => {}
                Err(Interrupt::Aborted) => return self.finish_aborted().await,
                Err(Interrupt::Fault(fault)) => return self.finish_failed(fault).await,
            }
        }

        for index in 0..total {
            if self.checkpoint().await.is_err() {
                return self.finish_aborted().await;
            }

            match self.measure_point(index).await {
                Ok(record) => {
                    if self.emit(record, index, total).await.is_err() {
                        return self.finish_aborted().await;
                    }
                }
                Err(Interrupt::Aborted) => return self.finish_aborted().await,
                Err(Interrupt::Fault(fault)) => {
                    if fault.is_session_fatal() || !self.config.continue_on_fault {
                        return self.finish_failed(fault).await;
                    }
                    warn!(
                        "sweep {}: point {} failed ({}), continuing",
                        self.run_id, index, fault
                    );
                    let record = failed_record(index, &self.plan, fault);
                    if self.emit(record, index, total).await.is_err() {
                        return self.finish_aborted().await;
                    }
                }
            }
        }

        self.finish_completed().await
    }

    /// One full measurement cycle for the point at `index`.
    async fn measure_point(&mut self, index: usize) -> Result<MeasurementRecord, Interrupt> {
        let user_angle = self.plan.points()[index];
        let device_angle = user_angle.to_device();
        debug!(
            "sweep {}: point {}/{} moving to {} ({} user)",
            self.run_id,
            index + 1,
            self.plan.len(),
            device_angle,
            user_angle
        );

        // MOVING
        self.motion
            .move_absolute(device_angle)
            .await
            .map_err(Interrupt::Fault)?;

        // SETTLING: hardware settle, then the plan's dwell margin.
        tokio::select! {
            res = self
                .motion
                .wait_settled(self.config.settle_timeout, self.config.poll_interval) =>
            {
                res.map_err(Interrupt::Fault)?;
            }
            _ = abort_signal(&mut self.control) => return Err(Interrupt::Aborted),
        }
        tokio::select! {
            _ = tokio::time::sleep(self.plan.settle_time()) => {}
            _ = abort_signal(&mut self.control) => return Err(Interrupt::Aborted),
        }

        let confirmed = match self.motion.position().await {
            Ok(position) => Some(position),
            Err(fault) => {
                debug!(
                    "sweep {}: position readback unavailable at point {}: {}",
                    self.run_id, index, fault
                );
                None
            }
        };

        // ACQUIRING, bounded by nominal duration plus grace.
        let bound = self.plan.acquisition_config().duration() + self.config.acquisition_grace;
        let samples = tokio::select! {
            res = tokio::time::timeout(bound, self.acquisition.acquire()) => match res {
                Ok(inner) => inner.map_err(Interrupt::Fault)?,
                Err(_) => {
                    return Err(Interrupt::Fault(DeviceFault::acquisition(
                        FaultKind::Timeout,
                        format!("no samples within {:?}", bound),
                    )))
                }
            },
            _ = abort_signal(&mut self.control) => return Err(Interrupt::Aborted),
        };

        if samples.is_empty() {
            return Err(Interrupt::Fault(DeviceFault::acquisition(
                FaultKind::Unknown,
                "device returned an empty sample buffer",
            )));
        }

        // REDUCING
        let requested = self.plan.samples_per_point() as usize;
        let status = if samples.len() < requested {
            warn!(
                "sweep {}: point {} returned {}/{} samples",
                self.run_id,
                index,
                samples.len(),
                requested
            );
            PointStatus::Degraded
        } else {
            PointStatus::Ok
        };
        let reduced_value = self.plan.averaging().reduce(&samples);

        Ok(MeasurementRecord {
            index,
            user_angle,
            device_angle_confirmed: confirmed,
            raw_samples: samples,
            reduced_value,
            timestamp: Utc::now(),
            status,
            fault: None,
        })
    }

    /// Home the stage and wait for it to settle, before the first point.
    async fn home_stage(&mut self) -> Result<(), Interrupt> {
        info!("sweep {}: homing stage", self.run_id);
        self.motion.home().await.map_err(Interrupt::Fault)?;
        tokio::select! {
            res = self
                .motion
                .wait_settled(self.config.settle_timeout, self.config.poll_interval) =>
            {
                res.map_err(Interrupt::Fault)
            }
            _ = abort_signal(&mut self.control) => Err(Interrupt::Aborted),
        }
    }

    /// Gate between points: holds while paused, errors on abort or when the
    /// handle has gone away.
    async fn checkpoint(&mut self) -> Result<(), ()> {
        if *self.control.borrow() == SweepControl::Pause {
            info!("sweep {}: paused", self.run_id);
        }
        let state = match self
            .control
            .wait_for(|c| !matches!(c, SweepControl::Pause))
            .await
        {
            Ok(guard) => *guard,
            Err(_) => SweepControl::Abort,
        };
        if state == SweepControl::Abort {
            Err(())
        } else {
            Ok(())
        }
    }

    /// Hand a record to the caller and report progress. Errors when the
    /// receiver is gone.
    async fn emit(
        &mut self,
        record: MeasurementRecord,
        index: usize,
        total: usize,
    ) -> Result<(), ()> {
        if self.records.send(record).await.is_err() {
            warn!(
                "sweep {}: record receiver dropped, aborting sweep",
                self.run_id
            );
            return Err(());
        }
        self.emitted += 1;
        if let Some(callback) = self.on_progress.as_mut() {
            callback(index, total);
        }
        Ok(())
    }

    async fn finish_completed(mut self) -> SweepOutcome {
        self.state = SweepState::Completed;
        self.release_ports().await;
        info!(
            "sweep {}: completed, {} records",
            self.run_id, self.emitted
        );
        SweepOutcome {
            run_id: self.run_id,
            state: SweepState::Completed,
            records_emitted: self.emitted,
            fault: None,
        }
    }

    async fn finish_aborted(mut self) -> SweepOutcome {
        self.state = SweepState::Aborted;
        if let Err(e) = self.motion.stop().await {
            warn!("sweep {}: stop after abort failed: {}", self.run_id, e);
        }
        if let Err(e) = self.acquisition.abort().await {
            warn!(
                "sweep {}: acquisition abort failed: {}",
                self.run_id, e
            );
        }
        self.release_ports().await;
        info!(
            "sweep {}: aborted after {} records",
            self.run_id, self.emitted
        );
        SweepOutcome {
            run_id: self.run_id,
            state: SweepState::Aborted,
            records_emitted: self.emitted,
            fault: None,
        }
    }

    async fn finish_failed(mut self, fault: DeviceFault) -> SweepOutcome {
        self.state = SweepState::Failed;
        error!("sweep {}: terminated by fault: {}", self.run_id, fault);
        if let Err(e) = self.motion.stop().await {
            warn!(
                "sweep {}: stop after failure also failed: {}",
                self.run_id, e
            );
        }
        if let Err(e) = self.acquisition.abort().await {
            warn!(
                "sweep {}: acquisition abort after failure failed: {}",
                self.run_id, e
            );
        }
        self.release_ports().await;
        SweepOutcome {
            run_id: self.run_id,
            state: SweepState::Failed,
            records_emitted: self.emitted,
            fault: Some(fault),
        }
    }

    async fn release_ports(&mut self) {
        if let Err(e) = self.motion.shutdown().await {
            warn!("sweep {}: motion shutdown failed: {}", self.run_id, e);
        }
        if let Err(e) = self.acquisition.shutdown().await {
            warn!(
                "sweep {}: acquisition shutdown failed: {}",
                self.run_id, e
            );
        }
        debug!(
            "sweep {}: session closed in state {:?}",
            self.run_id, self.state
        );
    }
}

/// Record for a point that a point-local fault prevented from measuring.
fn failed_record(index: usize, plan: &SweepPlan, fault: DeviceFault) -> MeasurementRecord {
    MeasurementRecord {
        index,
        user_angle: plan.points()[index],
        device_angle_confirmed: None,
        raw_samples: Vec::new(),
        reduced_value: f64::NAN,
        timestamp: Utc::now(),
        status: PointStatus::Failed,
        fault: Some(fault),
    }
}
