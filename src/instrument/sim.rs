//! Simulated devices with realistic timing and scriptable faults.
//!
//! [`SimMotion`] models a rotary stage whose moves take wall-clock time;
//! [`SimAcquisition`] models a clocked digitizer that sleeps for the nominal
//! acquisition duration and synthesizes noisy voltage samples. Both record
//! the calls made against them through cheap shared probes, so tests can
//! observe ordering and cleanup after the port has been boxed and moved into
//! a sweep session.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::angle::DeviceAngle;
use crate::core::{Acquisition, AcquisitionConfig, MotionController, TravelRange};
use crate::error::{DeviceFault, FaultKind};

/// Simulated rotary stage.
pub struct SimMotion {
    travel: TravelRange,
    rest_position: DeviceAngle,
    target: DeviceAngle,
    settled_at: Instant,
    move_time: Duration,
    move_times: VecDeque<Duration>,
    fail_moves: HashMap<usize, DeviceFault>,
    moves_seen: usize,
    probe: SimMotionProbe,
}

/// Shared observation handle for a [`SimMotion`].
#[derive(Clone, Default)]
pub struct SimMotionProbe {
    moves: Arc<Mutex<Vec<DeviceAngle>>>,
    stops: Arc<AtomicUsize>,
    homes: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl SimMotionProbe {
    /// Every target accepted by `move_absolute`, in order.
    pub fn moves(&self) -> Vec<DeviceAngle> {
        self.moves.lock().expect("sim motion probe poisoned").clone()
    }

    /// Number of `stop` calls observed.
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Number of `home` calls observed.
    pub fn homes(&self) -> usize {
        self.homes.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls observed.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SimMotion {
    /// Stage with the given travel limits; moves settle after 10 ms.
    pub fn new(travel: TravelRange) -> Self {
        Self {
            travel,
            rest_position: DeviceAngle::new(0.0),
            target: DeviceAngle::new(0.0),
            settled_at: Instant::now(),
            move_time: Duration::from_millis(10),
            move_times: VecDeque::new(),
            fail_moves: HashMap::new(),
            moves_seen: 0,
            probe: SimMotionProbe::default(),
        }
    }

    /// Use `move_time` for every move without a queued override.
    pub fn with_move_time(mut self, move_time: Duration) -> Self {
        self.move_time = move_time;
        self
    }

    /// Queue a duration for the next unqueued move (FIFO). Lets a test make
    /// one specific point settle slowly.
    pub fn queue_move_time(mut self, move_time: Duration) -> Self {
        self.move_times.push_back(move_time);
        self
    }

    /// Make the `index`-th `move_absolute` call (0-based) fail with `fault`.
    pub fn fail_move(mut self, index: usize, fault: DeviceFault) -> Self {
        self.fail_moves.insert(index, fault);
        self
    }

    /// Observation handle; clone freely.
    pub fn probe(&self) -> SimMotionProbe {
        self.probe.clone()
    }

    fn settled(&self) -> bool {
        Instant::now() >= self.settled_at
    }
}

#[async_trait]
impl MotionController for SimMotion {
    async fn move_absolute(&mut self, target: DeviceAngle) -> Result<(), DeviceFault> {
        let index = self.moves_seen;
        self.moves_seen += 1;

        self.travel.check(target)?;
        if let Some(fault) = self.fail_moves.remove(&index) {
            return Err(fault);
        }

        self.probe
            .moves
            .lock()
            .expect("sim motion probe poisoned")
            .push(target);

        self.rest_position = if self.settled() { self.target } else { self.rest_position };
        self.target = target;
        let duration = self.move_times.pop_front().unwrap_or(self.move_time);
        self.settled_at = Instant::now() + duration;
        Ok(())
    }

    async fn is_settled(&mut self) -> Result<bool, DeviceFault> {
        Ok(self.settled())
    }

    async fn position(&mut self) -> Result<DeviceAngle, DeviceFault> {
        Ok(if self.settled() {
            self.target
        } else {
            self.rest_position
        })
    }

    async fn stop(&mut self) -> Result<(), DeviceFault> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        // A real stop freezes the stage wherever it is; settled immediately.
        self.settled_at = Instant::now();
        Ok(())
    }

    async fn home(&mut self) -> Result<(), DeviceFault> {
        self.probe.homes.fetch_add(1, Ordering::SeqCst);
        self.target = DeviceAngle::new(0.0);
        self.settled_at = Instant::now() + self.move_time;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DeviceFault> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Simulated analog input channel.
pub struct SimAcquisition {
    channel: String,
    max_sample_rate: f64,
    level: f64,
    noise: f64,
    config: Option<AcquisitionConfig>,
    queued: VecDeque<Vec<f64>>,
    fail_acquires: HashMap<usize, DeviceFault>,
    acquires_seen: usize,
    probe: SimAcquisitionProbe,
}

/// Shared observation handle for a [`SimAcquisition`].
#[derive(Clone, Default)]
pub struct SimAcquisitionProbe {
    acquires: Arc<AtomicUsize>,
    aborts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
}

impl SimAcquisitionProbe {
    /// Number of completed `acquire` calls.
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Number of `abort` calls observed.
    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls observed.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SimAcquisition {
    /// Channel bound at construction, as for real hardware.
    pub fn new(channel: impl Into<String>, max_sample_rate: f64) -> Self {
        Self {
            channel: channel.into(),
            max_sample_rate,
            level: 1.0,
            noise: 0.01,
            config: None,
            queued: VecDeque::new(),
            fail_acquires: HashMap::new(),
            acquires_seen: 0,
            probe: SimAcquisitionProbe::default(),
        }
    }

    /// Base signal level in volts (default 1.0 V).
    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    /// Peak noise amplitude in volts (default 10 mV).
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Queue an exact buffer to return from a future `acquire` (FIFO),
    /// bypassing synthesis; lets tests use deterministic samples.
    pub fn queue_samples(mut self, samples: Vec<f64>) -> Self {
        self.queued.push_back(samples);
        self
    }

    /// Make the `index`-th `acquire` call (0-based) fail with `fault`.
    pub fn fail_acquire(mut self, index: usize, fault: DeviceFault) -> Self {
        self.fail_acquires.insert(index, fault);
        self
    }

    /// Observation handle; clone freely.
    pub fn probe(&self) -> SimAcquisitionProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Acquisition for SimAcquisition {
    async fn configure(&mut self, config: &AcquisitionConfig) -> Result<(), DeviceFault> {
        config.validate()?;
        if config.sample_rate > self.max_sample_rate {
            return Err(DeviceFault::acquisition(
                FaultKind::Unknown,
                format!(
                    "sample rate {} Hz exceeds maximum {} Hz on {}",
                    config.sample_rate, self.max_sample_rate, self.channel
                ),
            ));
        }
        self.config = Some(*config);
        Ok(())
    }

    async fn acquire(&mut self) -> Result<Vec<f64>, DeviceFault> {
        let config = self.config.ok_or_else(|| {
            DeviceFault::acquisition(FaultKind::Unknown, "acquire before configure")
        })?;

        let index = self.acquires_seen;
        self.acquires_seen += 1;
        if let Some(fault) = self.fail_acquires.remove(&index) {
            return Err(fault);
        }

        // Clocked acquisition takes real time.
        tokio::time::sleep(config.duration()).await;

        let samples = match self.queued.pop_front() {
            Some(samples) => samples,
            None => {
                let mut rng = rand::thread_rng();
                (0..config.samples)
                    .map(|_| self.level + rand::Rng::gen_range(&mut rng, -self.noise..=self.noise))
                    .collect()
            }
        };

        self.probe.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(samples)
    }

    async fn abort(&mut self) -> Result<(), DeviceFault> {
        self.probe.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DeviceFault> {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
