//! thermal-inspect CLI: run a calibrated scan against simulated hardware.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use thermal_inspect::config::InspectConfig;
use thermal_inspect::hardware::mock::{
    MemoryFrameSink, MockBlackBody, MockStage, MockThermalSensor, SceneAnomaly,
};
use thermal_inspect::logging;
use thermal_inspect::safety::SafetyInterlock;
use thermal_inspect::scan::{ScanBounds, ScanJob, ScanPattern, ScanPoint};
use thermal_inspect::supervisor::{Collaborators, Supervisor};
use thermal_inspect::telemetry::ChannelTelemetry;

#[derive(Parser)]
#[command(name = "thermal-inspect")]
#[command(about = "Infrared inspection scan-and-detect engine")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log records.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate and scan simulated hardware, printing the report as JSON.
    Simulate(SimulateArgs),

    /// Print the effective configuration as TOML.
    ShowConfig,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Scan pattern: grid, spiral or single_point.
    #[arg(long, default_value = "grid")]
    pattern: ScanPattern,

    /// Half-width of the square scan area (mm).
    #[arg(long, default_value = "25.0")]
    half_width: f64,

    /// Spacing between scan points (mm).
    #[arg(long, default_value = "5.0")]
    step: f64,

    /// Calibration reference temperature (°C).
    #[arg(long, default_value = "35.0")]
    reference: f64,

    /// Scene ambient temperature (°C).
    #[arg(long, default_value = "22.0")]
    ambient: f64,

    /// Temperature offset of the simulated hot spot (°C); 0 disables it.
    #[arg(long, default_value = "15.0")]
    hot_spot: f64,

    /// Stage X (mm) at which the hot spot is in view.
    #[arg(long, default_value = "0.0")]
    hot_spot_x: f64,

    /// Stage Y (mm) at which the hot spot is in view.
    #[arg(long, default_value = "0.0")]
    hot_spot_y: f64,

    /// Sensor noise amplitude (°C).
    #[arg(long, default_value = "0.0")]
    noise: f64,

    /// Analyse frames after the scan instead of at each point.
    #[arg(long)]
    deferred: bool,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<InspectConfig> {
    let config = match path {
        Some(path) => InspectConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => InspectConfig::load()?,
    };
    Ok(config)
}

async fn simulate(config: InspectConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let stage = Arc::new(MockStage::new());
    let black_body = Arc::new(MockBlackBody::new(args.ambient));
    let mut sensor = MockThermalSensor::new(config.sensor.width, config.sensor.height, args.ambient)
        .with_noise(args.noise, 7)
        .attached_to_stage(&stage)
        .viewing_reference(&black_body);
    if args.hot_spot != 0.0 {
        let (x, y) = (config.sensor.width / 2 - 1, config.sensor.height / 2 - 1);
        sensor = sensor.with_anomaly(
            SceneAnomaly::block(x, y, 3, 3, args.hot_spot)
                .seen_at(ScanPoint::new(args.hot_spot_x, args.hot_spot_y)),
        );
    }

    let (telemetry, mut events) = ChannelTelemetry::new(config.telemetry.channel_capacity);
    let drain = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "telemetry");
            count += 1;
        }
        count
    });

    let mut supervisor = Supervisor::new(
        &config,
        Collaborators {
            sensor: Arc::new(sensor),
            stage,
            reference: black_body,
            frame_sink: Some(Arc::new(MemoryFrameSink::new())),
            telemetry: Arc::new(telemetry),
            interlock: SafetyInterlock::new(),
        },
    )?;

    let profile = supervisor.request_calibration(args.reference).await?;
    info!(gain = profile.gain, offset = profile.offset, "Calibrated");

    let job = ScanJob::new(args.pattern, ScanBounds::centered(args.half_width), args.step)
        .with_realtime_analysis(!args.deferred);
    let report = supervisor.request_scan(job).await?;

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");

    drop(supervisor);
    let events = drain.await?;
    info!(events, "Telemetry drained");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    if cli.json_logs {
        logging::init_json(&config.application.log_level)?;
    } else {
        logging::init(&config.application.log_level)?;
    }

    match cli.command {
        Commands::Simulate(args) => simulate(config, args).await,
        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
