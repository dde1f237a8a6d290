//! aec-sync - Real-time echo cancellation between independently clocked devices

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use aec_sync::audio::{
    list_input_devices, list_output_devices, AudioBlock, AudioDevice, AudioEvent, CaptureEndpoint,
    DeviceHost, DeviceId, MonotonicClock, RawFileSink, RawFileSource, RenderEndpoint,
    SampleFormat, SharedLatency, ToneGenerator,
};
use aec_sync::config::EchoCancelConfig;
use aec_sync::sync::{DeviceState, EchoCancelEngine, StatsSnapshot, StreamEndpoints};

#[derive(Parser)]
#[command(name = "aec-sync")]
#[command(about = "Real-time echo cancellation between independently clocked audio devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio devices
    Devices {
        #[command(subcommand)]
        action: DevicesAction,
    },

    /// Run echo cancellation between a microphone and a speaker
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Input device name (use 'devices list' to see available devices)
        #[arg(long)]
        input_device: Option<String>,

        /// Output device name (use 'devices list' to see available devices)
        #[arg(long)]
        output_device: Option<String>,

        /// Raw s16le file to play instead of a test tone
        #[arg(long)]
        play: Option<PathBuf>,

        /// Repeat the played file
        #[arg(long = "loop")]
        loop_play: bool,

        /// Test tone frequency in Hz
        #[arg(long, default_value = "440")]
        tone: f32,

        /// Write the echo-cancelled stream to this raw s16le file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Validate a configuration and print it as TOML
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List all devices
    List,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(short, long, env = "AEC_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Flat key=value arguments, e.g. "rate=16000 aec_args='frame_size_ms=10'"
    #[arg(short, long)]
    args: Option<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<EchoCancelConfig> {
        match (&self.config, &self.args) {
            (Some(_), Some(_)) => anyhow::bail!("use either --config or --args, not both"),
            (Some(path), None) => EchoCancelConfig::load(path)
                .with_context(|| format!("loading {}", path.display())),
            (None, Some(args)) => Ok(EchoCancelConfig::from_modargs(args)?),
            (None, None) => Ok(EchoCancelConfig::default()),
        }
    }
}

/// Downstream endpoint that drops the cancelled stream
struct Discard;

impl CaptureEndpoint for Discard {
    fn post(&mut self, _block: AudioBlock) {}
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn print_devices(title: &str, devices: &[AudioDevice]) {
    println!("{}:", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let default_marker = if device.is_default { " (default)" } else { "" };
        let rates: Vec<String> = device.supported_rates.iter().map(u32::to_string).collect();
        println!(
            "  - {}{}  [{} Hz, up to {} ch]",
            device.name,
            default_marker,
            rates.join("/"),
            device.max_channels
        );
    }
}

fn list_devices() {
    print_devices("Input devices", &list_input_devices());
    println!();
    print_devices("Output devices", &list_output_devices());
}

fn print_session_stats(stats: &StatsSnapshot, elapsed: Duration) {
    println!("\n═══════════════════════════════════════════════════════════════");
    println!(" Session Statistics");
    println!("═══════════════════════════════════════════════════════════════");
    println!("   Duration:          {:>9.1} s", elapsed.as_secs_f64());
    println!("   Cancelled blocks:  {:>9}", stats.blocks_cancelled);
    println!("   Passthrough:       {:>9}", stats.blocks_passthrough);
    println!("   Capture skipped:   {:>9} B", stats.source_bytes_skipped);
    println!("   Playback skipped:  {:>9} B", stats.sink_bytes_skipped);
    println!("   Resyncs:           {:>9}", stats.resyncs);
    println!("   Corrections:       {:>9}", stats.corrections);
    println!("   Underruns:         {:>9}", stats.underruns);
    println!("   Dropped messages:  {:>9}", stats.posts_dropped);
    println!("═══════════════════════════════════════════════════════════════\n");
}

/// Apply pending device events; returns false when the session cannot continue
fn handle_events(engine: &EchoCancelEngine, events: &Receiver<AudioEvent>) -> bool {
    let mut keep_running = true;
    while let Ok(event) = events.try_recv() {
        match event {
            AudioEvent::InputDeviceDisconnected => {
                warn!("Input device disconnected, stopping");
                engine.set_source_state(DeviceState::Suspended);
                keep_running = false;
            }
            AudioEvent::OutputDeviceDisconnected => {
                warn!("Output device disconnected, stopping");
                engine.set_sink_state(DeviceState::Suspended);
                keep_running = false;
            }
            AudioEvent::StreamError(e) => warn!("Stream error: {}", e),
        }
    }
    keep_running
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    config: EchoCancelConfig,
    input_device: Option<String>,
    output_device: Option<String>,
    play: Option<PathBuf>,
    loop_play: bool,
    tone: f32,
    output: Option<PathBuf>,
    duration: Option<u64>,
) -> Result<()> {
    let mut spec = config.sample_spec();
    spec.format = SampleFormat::S16le;

    let upstream: Box<dyn RenderEndpoint> = match play {
        Some(path) => Box::new(RawFileSource::open(&path, &spec, loop_play)?),
        None => Box::new(ToneGenerator::new(spec, tone, 0.3)),
    };
    let downstream: Box<dyn CaptureEndpoint> = match output {
        Some(path) => Box::new(RawFileSink::create(&path)?),
        None => Box::new(Discard),
    };

    let capture_latency = SharedLatency::new();
    let playback_latency = SharedLatency::new();

    let (mut engine, capture, playback) = EchoCancelEngine::build(
        &config,
        StreamEndpoints {
            clock: Arc::new(MonotonicClock::new()),
            capture_latency: Box::new(capture_latency.clone()),
            playback_latency: Box::new(playback_latency.clone()),
            downstream,
            upstream,
        },
    )?;

    let mut host = DeviceHost::new(engine.sample_spec())?;
    let (event_tx, event_rx) = std::sync::mpsc::channel();
    host.set_event_sender(event_tx);

    let input_id = input_device.map(DeviceId);
    let output_id = output_device.map(DeviceId);

    host.start_playback(output_id.as_ref(), playback, playback_latency)?;
    engine.set_sink_state(DeviceState::Running);
    host.start_capture(input_id.as_ref(), capture, capture_latency)?;
    engine.set_source_state(DeviceState::Running);

    println!(
        "\nEcho cancellation running ({}, {} method).",
        engine.sample_spec(),
        config.aec_method
    );
    println!("Press Ctrl+C to stop.\n");

    let started = std::time::Instant::now();
    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            _ = ticker.tick() => {
                if !handle_events(&engine, &event_rx) {
                    break;
                }
                debug!("{}", engine.stats());
            }
        }
    }

    engine.set_source_state(DeviceState::Suspended);
    engine.set_sink_state(DeviceState::Suspended);
    engine.shutdown();
    host.stop();

    print_session_stats(&engine.stats(), started.elapsed());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Devices { action } => match action {
            DevicesAction::List => list_devices(),
        },
        Commands::Run {
            config,
            input_device,
            output_device,
            play,
            loop_play,
            tone,
            output,
            duration,
        } => {
            let config = config.load()?;
            run_session(
                config,
                input_device,
                output_device,
                play,
                loop_play,
                tone,
                output,
                duration,
            )
            .await?;
        }
        Commands::Config { config } => {
            let config = config.load()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
