use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use motion_telemetry_rs::channels::serial::{stdin_lines, SerialTransmitter};
use motion_telemetry_rs::channels::wireless::{UdpNotifyLink, WirelessTransmitter};
use motion_telemetry_rs::config::SourceKind;
use motion_telemetry_rs::driver::RunOptions;
use motion_telemetry_rs::sensors::{ReplaySource, SimulatedImu};
use motion_telemetry_rs::{
    Channel, CommandRouter, Driver, OrientationProcessor, SampleSource, TelemetryConfig,
};

#[derive(Parser, Debug)]
#[command(name = "motion_telemetry")]
#[command(about = "IMU orientation processor with multi-channel telemetry", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS")]
    duration: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Producer sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Sample source (simulated, replay)
    #[arg(long)]
    source: Option<String>,

    /// JSON-lines sample file for the replay source
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Simulated yaw rate in deg/s
    #[arg(long)]
    yaw_rate: Option<f32>,

    /// UDP address for the wireless notify link
    #[arg(long)]
    udp_bind: Option<String>,

    /// Disable the serial (stdout) channel
    #[arg(long)]
    no_serial: bool,

    /// Disable the wireless channel
    #[arg(long)]
    no_wireless: bool,

    /// Write a live status JSON document here
    #[arg(long)]
    status_file: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<TelemetryConfig> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TelemetryConfig::default(),
    };

    if let Some(duration) = args.duration {
        config.duration_secs = duration;
    }
    if let Some(rate) = args.sample_rate {
        config.sample_rate_hz = rate;
    }
    if let Some(source) = &args.source {
        config.source = match source.as_str() {
            "simulated" => SourceKind::Simulated,
            "replay" => SourceKind::Replay,
            other => anyhow::bail!("unknown source '{}' (expected simulated or replay)", other),
        };
    }
    if let Some(path) = &args.replay {
        config.replay_path = Some(path.clone());
        if args.source.is_none() {
            config.source = SourceKind::Replay;
        }
    }
    if let Some(rate) = args.yaw_rate {
        config.simulated_yaw_rate_dps = rate;
    }
    if let Some(bind) = &args.udp_bind {
        config.udp_bind = bind.clone();
    }
    if args.no_serial {
        config.serial_enabled = false;
    }
    if args.no_wireless {
        config.wireless_enabled = false;
    }
    if let Some(path) = &args.status_file {
        config.status_file = Some(path.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Sensor bring-up failed: stay visibly halted rather than run on bad data.
fn halt(reason: &str) -> ! {
    loop {
        error!("Sensor initialisation failed, halted: {}", reason);
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn open_source(config: &TelemetryConfig) -> Box<dyn SampleSource> {
    let mut source: Box<dyn SampleSource> = match (config.source, &config.replay_path) {
        (SourceKind::Replay, Some(path)) => Box::new(ReplaySource::new(path)),
        _ => Box::new(SimulatedImu::new(config.simulated_yaw_rate_dps)),
    };
    if let Err(e) = source.init() {
        halt(&e.to_string());
    }
    source
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(&args)?;

    info!("Motion Telemetry RS starting");
    info!(
        "  Duration: {} seconds (0=continuous)",
        config.duration_secs
    );
    info!("  Sample rate: {} Hz", config.sample_rate_hz);
    info!("  Source: {:?}", config.source);

    let source = open_source(&config);
    let processor = OrientationProcessor::new(config.fusion, config.sample_rate_hz);
    let handle = processor.handle();
    let mut driver = Driver::new(source, processor);

    let mut workers = Vec::new();
    let mut connection = None;

    if config.wireless_enabled {
        let link = UdpNotifyLink::bind(config.udp_bind.as_str(), config.wireless_timeout())
            .with_context(|| format!("binding wireless link on {}", config.udp_bind))?;
        let transmitter =
            WirelessTransmitter::new(link, CommandRouter::new(handle.clone(), "wireless"));
        connection = Some(transmitter.connection());

        let mut channel = Channel::new("wireless", transmitter, config.channel_period());
        driver.add_channel(channel.handle());
        workers.push(channel.begin()?);
    }

    if config.serial_enabled {
        let transmitter =
            SerialTransmitter::new(io::stdout(), CommandRouter::new(handle.clone(), "serial"))
                .with_inbound(stdin_lines());

        let mut channel = Channel::new("serial", transmitter, config.channel_period());
        driver.add_channel(channel.handle());
        workers.push(channel.begin()?);
        if let Some(connection) = connection {
            driver.link_exclusive(connection, channel.handle());
        }
    }

    let stats = driver.run(&RunOptions::from(&config)).await?;

    for worker in workers {
        worker.stop();
    }

    info!(
        "Done: {} cycles, {} clamped deltas, {} gyro resets",
        stats.cycles, stats.clamped_deltas, stats.resets
    );
    Ok(())
}
