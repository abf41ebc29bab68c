//! End-to-end sequencer behavior against simulated devices.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reflectance_measure::angle::DeviceAngle;
use reflectance_measure::core::{PointStatus, TravelRange};
use reflectance_measure::error::{DeviceFault, FaultKind};
use reflectance_measure::instrument::{SimAcquisition, SimMotion};
use reflectance_measure::sweep::{
    Averaging, MeasurementSequencer, SequencerConfig, SweepPlan, SweepState,
};

fn travel() -> TravelRange {
    TravelRange::new(-95.0, 95.0)
}

fn fast_config() -> SequencerConfig {
    SequencerConfig {
        settle_timeout: Duration::from_millis(200),
        acquisition_grace: Duration::from_millis(200),
        poll_interval: Duration::from_millis(5),
        continue_on_fault: true,
    }
}

fn quick_plan(points: &[f64]) -> SweepPlan {
    SweepPlan::builder()
        .points(points.iter().copied())
        .settle_time(Duration::from_millis(1))
        .samples_per_point(4)
        .sample_rate(10_000.0)
        .build()
        .unwrap()
}

fn sim_motion() -> SimMotion {
    SimMotion::new(travel()).with_move_time(Duration::from_millis(1))
}

fn sim_daq() -> SimAcquisition {
    SimAcquisition::new("Dev1/ai0", 100_000.0)
}

#[tokio::test]
async fn moves_follow_plan_order_in_the_device_frame() {
    let motion = sim_motion();
    let probe = motion.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[10.0, 20.0, 30.0]),
        Box::new(motion),
        Box::new(sim_daq()),
        None,
    );
    let (_records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(
        probe.moves(),
        vec![
            DeviceAngle::new(-10.0),
            DeviceAngle::new(-20.0),
            DeviceAngle::new(-30.0)
        ]
    );
}

#[tokio::test]
async fn clean_sweep_emits_one_ok_record_per_point() {
    let progress: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let progress_sink = Arc::clone(&progress);

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[0.0, 45.0, 90.0]),
        Box::new(sim_motion()),
        Box::new(sim_daq()),
        Some(Box::new(move |index, total| {
            progress_sink.lock().unwrap().push((index, total));
        })),
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(outcome.records_emitted, 3);
    assert_eq!(records.len(), 3);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.index, i);
        assert_eq!(record.status, PointStatus::Ok);
        assert_eq!(record.raw_samples.len(), 4);
        assert!(record.reduced_value.is_finite());
        assert!(record.fault.is_none());
    }
    assert_eq!(*progress.lock().unwrap(), vec![(0, 3), (1, 3), (2, 3)]);
}

#[tokio::test]
async fn mean_and_median_reduction_of_acquired_samples() {
    let daq = sim_daq().queue_samples(vec![1.0, 2.0, 3.0]);
    let plan = SweepPlan::builder()
        .points([15.0])
        .settle_time(Duration::from_millis(1))
        .samples_per_point(3)
        .sample_rate(10_000.0)
        .averaging(Averaging::Mean)
        .build()
        .unwrap();

    let sequencer = MeasurementSequencer::new(fast_config());
    let (records, _) = sequencer
        .run(plan, Box::new(sim_motion()), Box::new(daq), None)
        .collect()
        .await;
    assert_eq!(records[0].reduced_value, 2.0);

    let daq = sim_daq().queue_samples(vec![4.0, 1.0, 3.0, 2.0]);
    let plan = SweepPlan::builder()
        .points([15.0])
        .settle_time(Duration::from_millis(1))
        .samples_per_point(4)
        .sample_rate(10_000.0)
        .averaging(Averaging::Median)
        .build()
        .unwrap();
    let (records, _) = sequencer
        .run(plan, Box::new(sim_motion()), Box::new(daq), None)
        .collect()
        .await;
    assert_eq!(records[0].reduced_value, 2.5);
}

#[tokio::test]
async fn settle_timeout_is_contained_to_its_point() {
    // Point 1 never settles within the configured bound; 0 and 2 are fine.
    let motion = SimMotion::new(travel())
        .queue_move_time(Duration::from_millis(1))
        .queue_move_time(Duration::from_secs(600))
        .queue_move_time(Duration::from_millis(1));
    let daq = sim_daq();
    let daq_probe = daq.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[0.0, 30.0, 60.0]),
        Box::new(motion),
        Box::new(daq),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].status, PointStatus::Ok);
    assert_eq!(records[1].status, PointStatus::Failed);
    assert_eq!(records[2].status, PointStatus::Ok);

    let fault = records[1].fault.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::Timeout);
    assert!(records[1].raw_samples.is_empty());
    assert!(records[1].reduced_value.is_nan());

    // Acquisition was skipped for the failed point.
    assert_eq!(daq_probe.acquires(), 2);
}

#[tokio::test]
async fn comm_error_terminates_the_session() {
    let motion = sim_motion().fail_move(
        1,
        DeviceFault::motion(FaultKind::CommError, "controller went away"),
    );
    let motion_probe = motion.probe();
    let daq = sim_daq();
    let daq_probe = daq.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[0.0, 30.0, 60.0]),
        Box::new(motion),
        Box::new(daq),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Failed);
    assert_eq!(outcome.fault.as_ref().unwrap().kind, FaultKind::CommError);

    // One good record, then nothing more reached either device.
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, PointStatus::Ok);
    assert_eq!(motion_probe.moves(), vec![DeviceAngle::new(-0.0)]);
    assert_eq!(daq_probe.acquires(), 1);
}

#[tokio::test]
async fn stop_on_fault_policy_turns_timeouts_fatal() {
    let motion = SimMotion::new(travel())
        .queue_move_time(Duration::from_millis(1))
        .queue_move_time(Duration::from_secs(600));
    let config = SequencerConfig {
        continue_on_fault: false,
        ..fast_config()
    };

    let sequencer = MeasurementSequencer::new(config);
    let handle = sequencer.run(
        quick_plan(&[0.0, 30.0, 60.0]),
        Box::new(motion),
        Box::new(sim_daq()),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(records.len(), 1);
    assert_eq!(outcome.state, SweepState::Failed);
    assert_eq!(outcome.fault.as_ref().unwrap().kind, FaultKind::Timeout);
}

#[tokio::test]
async fn abort_during_settling_stops_both_devices() {
    // Point 0 settles instantly; point 1 would take a minute.
    let motion = SimMotion::new(travel())
        .queue_move_time(Duration::from_millis(1))
        .queue_move_time(Duration::from_secs(60));
    let motion_probe = motion.probe();
    let daq = sim_daq();
    let daq_probe = daq.probe();

    let config = SequencerConfig {
        settle_timeout: Duration::from_secs(60),
        ..fast_config()
    };
    let sequencer = MeasurementSequencer::new(config);
    let mut handle = sequencer.run(
        quick_plan(&[0.0, 15.0, 30.0, 45.0, 60.0]),
        Box::new(motion),
        Box::new(daq),
        None,
    );

    let first = handle.next_record().await.unwrap();
    assert_eq!(first.index, 0);

    handle.abort();
    let (rest, outcome) = handle.collect().await;

    assert!(rest.is_empty());
    assert_eq!(outcome.state, SweepState::Aborted);
    assert_eq!(outcome.records_emitted, 1);
    assert!(motion_probe.stops() >= 1);
    assert!(daq_probe.aborts() >= 1);
}

#[tokio::test]
async fn limit_violation_fails_before_any_motion_command() {
    // User 200° maps to device -200°, outside [-95°, 95°].
    let motion = sim_motion();
    let motion_probe = motion.probe();
    let daq = sim_daq();
    let daq_probe = daq.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[200.0]),
        Box::new(motion),
        Box::new(daq),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert!(records.is_empty());
    assert_eq!(outcome.state, SweepState::Failed);
    assert_eq!(outcome.fault.as_ref().unwrap().kind, FaultKind::Limit);
    assert!(motion_probe.moves().is_empty());
    assert_eq!(daq_probe.acquires(), 0);
}

#[tokio::test]
async fn duplicate_adjacent_angles_each_get_a_fresh_move() {
    let motion = sim_motion();
    let probe = motion.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[30.0, 30.0]),
        Box::new(motion),
        Box::new(sim_daq()),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(records.len(), 2);
    assert_eq!(
        probe.moves(),
        vec![DeviceAngle::new(-30.0), DeviceAngle::new(-30.0)]
    );
}

#[tokio::test]
async fn short_sample_buffer_degrades_the_point() {
    let daq = sim_daq().queue_samples(vec![1.0, 2.0]);

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(
        quick_plan(&[10.0]),
        Box::new(sim_motion()),
        Box::new(daq),
        None,
    );
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(records[0].status, PointStatus::Degraded);
    assert_eq!(records[0].reduced_value, 1.5);
}

#[tokio::test]
async fn closing_the_record_stream_aborts_the_sweep() {
    let motion = SimMotion::new(travel()).with_move_time(Duration::from_millis(20));
    let probe = motion.probe();

    let sequencer = MeasurementSequencer::new(fast_config());
    let mut handle = sequencer.run(
        quick_plan(&[0.0, 10.0, 20.0, 30.0]),
        Box::new(motion),
        Box::new(sim_daq()),
        None,
    );

    handle.records.close();
    let outcome = handle.join().await;

    assert_eq!(outcome.state, SweepState::Aborted);
    assert!(outcome.records_emitted <= 1);
    assert!(probe.stops() >= 1);
}

#[tokio::test]
async fn pause_holds_at_the_next_point_boundary() {
    // Point 1 settles slowly so the pause request lands either at the point-1
    // boundary or during its settle; in both cases no record can arrive while
    // paused within the probe window below.
    let motion = SimMotion::new(travel())
        .queue_move_time(Duration::from_millis(1))
        .queue_move_time(Duration::from_millis(300))
        .queue_move_time(Duration::from_millis(1));

    let config = SequencerConfig {
        settle_timeout: Duration::from_secs(5),
        ..fast_config()
    };
    let sequencer = MeasurementSequencer::new(config);
    let mut handle = sequencer.run(
        quick_plan(&[0.0, 10.0, 20.0]),
        Box::new(motion),
        Box::new(sim_daq()),
        None,
    );

    let first = handle.next_record().await.unwrap();
    assert_eq!(first.index, 0);
    handle.pause();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(handle.records.try_recv().is_err());

    handle.resume();
    let (rest, outcome) = handle.collect().await;
    assert_eq!(rest.len(), 2);
    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(outcome.records_emitted, 3);
}

#[tokio::test]
async fn home_first_homes_the_stage_before_the_sweep() {
    let motion = sim_motion();
    let probe = motion.probe();

    let plan = SweepPlan::builder()
        .points([0.0, 45.0])
        .settle_time(Duration::from_millis(1))
        .samples_per_point(2)
        .sample_rate(10_000.0)
        .home_first(true)
        .build()
        .unwrap();

    let sequencer = MeasurementSequencer::new(fast_config());
    let handle = sequencer.run(plan, Box::new(motion), Box::new(sim_daq()), None);
    let (records, outcome) = handle.collect().await;

    assert_eq!(outcome.state, SweepState::Completed);
    assert_eq!(records.len(), 2);
    assert_eq!(probe.homes(), 1);
    assert_eq!(probe.moves().len(), 2);
}

#[tokio::test]
async fn a_plan_outlives_its_sessions() {
    let plan = quick_plan(&[0.0, 20.0]);
    let sequencer = MeasurementSequencer::new(fast_config());

    for _ in 0..2 {
        let handle = sequencer.run(
            plan.clone(),
            Box::new(sim_motion()),
            Box::new(sim_daq()),
            None,
        );
        let (records, outcome) = handle.collect().await;
        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(records.len(), 2);
    }
}
