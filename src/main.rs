//! Headless sweep runner.
//!
//! Builds a plan from CLI arguments and configuration, drives the sequencer
//! against either simulated devices or the serial-attached stage, prints
//! records as they stream in, and optionally exports them to CSV.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

use reflectance_measure::config::Settings;
use reflectance_measure::core::{Acquisition, MotionController};
use reflectance_measure::instrument::{SimAcquisition, SimMotion};
use reflectance_measure::sweep::{
    Averaging, MeasurementSequencer, SequencerConfig, SweepPlan, SweepState,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Which stage implementation to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum StageBackend {
    /// In-process simulated stage.
    Sim,
    /// Newport ESP301 on the configured serial port.
    Esp301,
}

/// Automated reflectance sweep: rotate, settle, acquire, repeat.
#[derive(Debug, Parser)]
#[command(name = "reflectance_measure", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// First angle of the sweep, user convention, degrees.
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Last angle of the sweep (inclusive), degrees.
    #[arg(long, default_value_t = 90.0)]
    end: f64,

    /// Angle increment, degrees.
    #[arg(long, default_value_t = 1.0)]
    step: f64,

    /// Explicit angle list; overrides --start/--end/--step.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    angles: Option<Vec<f64>>,

    /// Samples acquired at each point.
    #[arg(long)]
    samples: Option<u32>,

    /// Acquisition clock in Hz.
    #[arg(long)]
    rate: Option<f64>,

    /// Dwell after the stage settles, in seconds.
    #[arg(long)]
    settle: Option<f64>,

    /// Reduction applied to each point's samples.
    #[arg(long, value_enum)]
    averaging: Option<Averaging>,

    /// Home the stage before the first point.
    #[arg(long)]
    home: bool,

    /// Terminate the sweep on the first fault instead of recording and
    /// continuing.
    #[arg(long)]
    stop_on_fault: bool,

    /// Stage to drive.
    #[arg(long, value_enum, default_value_t = StageBackend::Sim)]
    stage: StageBackend,

    /// Write records to this CSV file on completion.
    #[cfg(feature = "storage_csv")]
    #[arg(long)]
    output: Option<PathBuf>,
}

fn build_plan(cli: &Cli, settings: &Settings) -> Result<SweepPlan> {
    let mut builder = SweepPlan::builder()
        .samples_per_point(cli.samples.unwrap_or(settings.sweep.samples_per_point))
        .sample_rate(cli.rate.unwrap_or(settings.sweep.sample_rate))
        .settle_time(
            cli.settle
                .map(Duration::from_secs_f64)
                .unwrap_or(settings.sweep.settle_time),
        )
        .averaging(cli.averaging.unwrap_or(settings.sweep.averaging))
        .home_first(cli.home);

    builder = match &cli.angles {
        Some(angles) => builder.points(angles.iter().copied()),
        None => builder
            .range(cli.start, cli.end, cli.step)
            .context("invalid sweep range")?,
    };

    builder.build().context("invalid sweep plan")
}

async fn build_motion(cli: &Cli, settings: &Settings) -> Result<Box<dyn MotionController>> {
    let travel = settings.motion.travel_range();
    match cli.stage {
        StageBackend::Sim => Ok(Box::new(
            SimMotion::new(travel).with_move_time(Duration::from_millis(200)),
        )),
        StageBackend::Esp301 => connect_esp301(settings, travel).await,
    }
}

#[cfg(feature = "instrument_serial")]
async fn connect_esp301(
    settings: &Settings,
    travel: reflectance_measure::core::TravelRange,
) -> Result<Box<dyn MotionController>> {
    use reflectance_measure::instrument::Esp301;

    let adapter = Esp301::serial_adapter(&settings.motion.port, settings.motion.baud_rate);
    let mut stage = Esp301::new(Box::new(adapter), settings.motion.axis, travel);
    stage
        .connect()
        .await
        .context("failed to connect to ESP301")?;
    Ok(Box::new(stage))
}

#[cfg(not(feature = "instrument_serial"))]
async fn connect_esp301(
    _settings: &Settings,
    _travel: reflectance_measure::core::TravelRange,
) -> Result<Box<dyn MotionController>> {
    bail!("serial support not enabled; rebuild with --features instrument_serial")
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings =
        Settings::new(cli.config.as_deref()).context("failed to load configuration")?;
    let plan = build_plan(&cli, &settings)?;

    let motion = build_motion(&cli, &settings).await?;
    let acquisition: Box<dyn Acquisition> = Box::new(SimAcquisition::new(
        settings.acquisition.channel.clone(),
        settings.acquisition.max_sample_rate,
    ));

    let mut sequencer_config = SequencerConfig::from(&settings.sequencer);
    if cli.stop_on_fault {
        sequencer_config.continue_on_fault = false;
    }

    info!(
        "sweeping {} points ({} -> {})",
        plan.len(),
        plan.points()[0],
        plan.points()[plan.len() - 1]
    );

    let sequencer = MeasurementSequencer::new(sequencer_config);
    let total = plan.len();
    let mut handle = sequencer.run(
        plan,
        motion,
        acquisition,
        Some(Box::new(move |index, _| {
            log::debug!("progress: {}/{}", index + 1, total);
        })),
    );

    let mut records = Vec::with_capacity(total);
    while let Some(record) = handle.next_record().await {
        println!(
            "{:>10.4}  {:>12.6}  {}",
            record.user_angle.degrees(),
            record.reduced_value,
            record.status
        );
        records.push(record);
    }
    let outcome = handle.join().await;

    #[cfg(feature = "storage_csv")]
    if let Some(path) = &cli.output {
        reflectance_measure::export::write_csv(path, &records)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {} records to {}", records.len(), path.display());
    }

    match outcome.state {
        SweepState::Completed => {
            info!("sweep {} completed: {} records", outcome.run_id, outcome.records_emitted);
            Ok(())
        }
        SweepState::Aborted => bail!("sweep {} aborted after {} records", outcome.run_id, outcome.records_emitted),
        SweepState::Failed => match outcome.fault {
            Some(fault) => bail!("sweep {} failed: {}", outcome.run_id, fault),
            None => bail!("sweep {} failed", outcome.run_id),
        },
        state => bail!("sweep {} ended in unexpected state {:?}", outcome.run_id, state),
    }
}
