// src/main.rs
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use neurotrend::drivers::{BufferClient, FieldTripClient, MemoryBuffer};
use neurotrend::engine::{spawn_controller, Engine, SinkFactory};
use neurotrend::events::{self, CancelToken, EventReceiver};
use neurotrend::playback::{Playback, PlaybackOutcome};
use neurotrend::recorder::Recording;
use neurotrend::types::{CalibrationBounds, CalibrationTarget, ConnectionState, EngineCommand, EngineEvent};
use neurotrend::EngineConfig;
#[derive(Parser, Debug)]
#[command(author, version, about = "EEG band-power trends from a FieldTrip buffer")]
struct Cli {
    /// Path to config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to a buffer and print band powers
    Monitor {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Active channels (default: all)
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<usize>>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
        /// Record a baseline before streaming
        #[arg(long, value_enum)]
        calibrate: Option<Band>,
        /// Save the raw signal on exit
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Stream a recording into a FieldTrip buffer
    Playback {
        file: PathBuf,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Play a recording through an in-process buffer and print band powers
    Demo {
        file: PathBuf,
        #[arg(long, value_delimiter = ',')]
        channels: Option<Vec<usize>>,
        #[arg(long, value_enum)]
        calibrate: Option<Band>,
    },
}
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Band {
    Low,
    High,
    Both,
}
impl From<Band> for CalibrationTarget {
    fn from(band: Band) -> Self {
        match band {
            Band::Low => CalibrationTarget::LOW,
            Band::High => CalibrationTarget::HIGH,
            Band::Both => CalibrationTarget::BOTH,
        }
    }
}
/// What the event loop should do once the stream is up.
struct Plan {
    channels: Option<Vec<usize>>,
    calibrate: Option<CalibrationTarget>,
    deadline: Option<Instant>,
    stop_after_playback: bool,
    save: Option<PathBuf>,
}
fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    match cli.command {
        Command::Monitor {
            host,
            port,
            channels,
            seconds,
            calibrate,
            save,
        } => {
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            let sinks: SinkFactory = Box::new(|| Box::new(FieldTripClient::new()) as Box<dyn BufferClient>);
            let (tx, rx) = events::channel();
            let engine = Engine::new(Box::new(FieldTripClient::new()), sinks, tx, config)
                .context("creating engine")?;
            let plan = Plan {
                channels,
                calibrate: calibrate.map(Into::into),
                deadline: seconds.map(|s| Instant::now() + Duration::from_secs(s)),
                stop_after_playback: false,
                save,
            };
            drive(engine, rx, vec![EngineCommand::Connect { host, port }], plan)
        }
        Command::Playback { file, host, port } => {
            let recording = Recording::load(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            let (tx, _rx) = events::channel();
            let mut playback = Playback::new(recording, Box::new(FieldTripClient::new()), tx, host, port)
                .block_interval(config.playback_block_interval());
            println!("▶ Streaming {} blocks from {}", playback.block_count(), file.display());
            match playback.run(&CancelToken::new()).context("playback failed")? {
                PlaybackOutcome::Finished { blocks } => println!("✅ Playback finished ({blocks} blocks)"),
                PlaybackOutcome::Aborted { blocks } => println!("🛑 Playback stopped ({blocks} blocks)"),
            }
            Ok(())
        }
        Command::Demo {
            file,
            channels,
            calibrate,
        } => {
            // 进程内缓冲区：回放写入，采集读取
            let buffer = MemoryBuffer::new();
            let sinks_buffer = buffer.clone();
            let sinks: SinkFactory = Box::new(move || Box::new(sinks_buffer.client()) as Box<dyn BufferClient>);
            let host = config.host.clone();
            let port = config.port;
            let (tx, rx) = events::channel();
            let engine = Engine::new(Box::new(buffer.client()), sinks, tx, config)
                .context("creating engine")?;
            let plan = Plan {
                channels,
                calibrate: calibrate.map(Into::into),
                deadline: None,
                stop_after_playback: true,
                save: None,
            };
            let startup = vec![
                EngineCommand::Connect {
                    host: host.clone(),
                    port,
                },
                EngineCommand::StartPlayback {
                    path: file,
                    host,
                    port,
                },
            ];
            drive(engine, rx, startup, plan)
        }
    }
}
/// Runs the engine on its controller thread and reacts to its events until done.
fn drive(engine: Engine, events: EventReceiver, startup: Vec<EngineCommand>, plan: Plan) -> Result<()> {
    let (commands, inbox) = mpsc::channel();
    let controller = spawn_controller(engine, inbox);
    for command in startup {
        send(&commands, command)?;
    }
    let mut channel_count = 0;
    let mut bounds = CalibrationBounds::default();
    loop {
        if plan.deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let Some(event) = events.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match event {
            EngineEvent::ConnectionChanged(state) => {
                println!("🔌 {state:?}");
                if state == ConnectionState::Connected {
                    let channels = plan
                        .channels
                        .clone()
                        .unwrap_or_else(|| (0..channel_count).collect());
                    send(&commands, EngineCommand::SetChannels(channels))?;
                    match plan.calibrate {
                        Some(target) => send(&commands, EngineCommand::StartCalibration(target))?,
                        None => send(&commands, EngineCommand::StartAcquisition)?,
                    }
                }
            }
            EngineEvent::HeaderChanged(header) => {
                channel_count = header.map(|h| h.channel_count).unwrap_or(0);
                if let Some(h) = header {
                    println!("📡 {} channels at {} Hz", h.channel_count, h.sample_rate);
                }
            }
            EngineEvent::ChannelsChanged(channels) => println!("🎚 channels {channels:?}"),
            EngineEvent::NewValues(sample) => println!(
                "low {:>12.4} (avg {:>12.4}, {:>5.1}%)  high {:>12.4} (avg {:>12.4}, {:>5.1}%)",
                sample.raw_low,
                sample.avg_low,
                bounds.normalize_low(sample.avg_low) * 100.0,
                sample.raw_high,
                sample.avg_high,
                bounds.normalize_high(sample.avg_high) * 100.0,
            ),
            EngineEvent::CalibrationProgress(percent) => println!("⏳ calibration {percent}%"),
            EngineEvent::CalibrationFinished(finished) => {
                bounds = finished;
                println!("✅ calibration done: {finished:?}");
                send(&commands, EngineCommand::StartAcquisition)?;
            }
            EngineEvent::BoundsChanged(changed) => bounds = changed,
            EngineEvent::ParametersChanged {
                block_size,
                glide,
                average_window,
            } => println!("⚙ block {block_size}, glide {glide}, average {average_window}"),
            EngineEvent::PlaybackFinished => {
                println!("⏹ playback finished");
                if plan.stop_after_playback {
                    break;
                }
            }
            EngineEvent::WorkerFailed { worker, reason } => {
                log::error!("{worker:?} failed: {reason}");
            }
            EngineEvent::CommandRejected { reason } => log::warn!("command rejected: {reason}"),
        }
    }
    if let Some(path) = plan.save {
        send(&commands, EngineCommand::SaveRecording(path))?;
    }
    send(&commands, EngineCommand::Shutdown)?;
    controller
        .join()
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    Ok(())
}
fn send(commands: &Sender<EngineCommand>, command: EngineCommand) -> Result<()> {
    commands
        .send(command)
        .context("engine thread is gone")
}
