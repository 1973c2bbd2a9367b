//! framecast: stream camera frames between processes and show them with
//! live telemetry.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framecast::capture::{FrameSource, TestPattern};
use framecast::display::{DisplaySink, HeadlessDisplay};
use framecast::pipeline::{ReceiverLoop, SenderLoop, SenderReport};
use framecast::transport::{LocalBus, Publisher, UdpPublisher, UdpSubscriber};
use framecast::{Config, DisplayConfig, StreamError, TransportKind};

/// How long loopback keeps displaying after the sender is done.
const LOOPBACK_DRAIN: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
#[command(name = "framecast", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log frames instead of opening preview and display windows
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture, compress and publish frames
    Publish {
        /// Use the synthetic test pattern instead of the camera
        #[arg(long)]
        pattern: bool,
        /// Stop after this many test-pattern frames
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Receive, decode and display frames
    Subscribe,
    /// Publisher and subscriber in one process over the in-process bus
    Loopback {
        #[arg(long)]
        frames: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framecast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.display.headless |= cli.headless;

    info!("framecast {} launching", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Publish { pattern, frames } => publish(&config, pattern, frames, cancel).await,
        Command::Subscribe => subscribe(&config, &cancel),
        Command::Loopback { frames } => loopback(&config, frames, cancel).await,
    }
}

async fn publish(
    config: &Config,
    pattern: bool,
    frames: Option<u64>,
    cancel: CancellationToken,
) -> Result<()> {
    let publisher: Box<dyn Publisher> = match config.transport.kind {
        TransportKind::Udp => Box::new(UdpPublisher::new("0.0.0.0:0", &config.transport.peer)?),
        TransportKind::Local => {
            return Err(eyre!("the local transport only works with `loopback`"));
        }
    };
    let source = open_source(config, pattern, frames)?;

    // Local preview of what is being sent; closing it stops the publisher.
    let mut preview_config = config.display.clone();
    preview_config.title = format!("{} publisher", preview_config.title);
    let preview = open_display(&preview_config)?;

    let result = SenderLoop::from_config(source, publisher, &config.stream)?
        .with_preview(preview)
        .run(cancel)
        .await;
    sender_outcome(result, frames.is_some())
}

fn subscribe(config: &Config, cancel: &CancellationToken) -> Result<()> {
    if config.transport.kind != TransportKind::Udp {
        return Err(eyre!("the local transport only works with `loopback`"));
    }
    let subscriber = UdpSubscriber::bind(&config.transport.bind)?;
    let display = open_display(&config.display)?;
    let receiver =
        ReceiverLoop::subscribe(&subscriber, &config.stream.topic, display, &config.receiver)?;

    // SDL wants the thread that created the window.
    let report = tokio::task::block_in_place(|| receiver.run(cancel));
    info!(?report, "Subscriber finished");
    Ok(())
}

async fn loopback(config: &Config, frames: Option<u64>, cancel: CancellationToken) -> Result<()> {
    let bus = LocalBus::new();
    let display = open_display(&config.display)?;
    let receiver = ReceiverLoop::subscribe(&bus, &config.stream.topic, display, &config.receiver)?;
    let source = test_pattern(config, frames);
    let sender = SenderLoop::from_config(source, bus.clone(), &config.stream)?;

    let sender_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = sender.run(cancel.clone()).await;
            tokio::time::sleep(LOOPBACK_DRAIN).await;
            cancel.cancel();
            result
        })
    };

    let report = tokio::task::block_in_place(|| receiver.run(&cancel));
    info!(?report, "Subscriber finished");

    // The window may have been closed first.
    cancel.cancel();
    sender_outcome(sender_task.await?, frames.is_some())
}

/// A bounded source ending is the normal way out, anything else is an error.
fn sender_outcome(result: framecast::Result<SenderReport>, bounded: bool) -> Result<()> {
    match result {
        Ok(report) => {
            info!(?report, "Publisher finished");
            Ok(())
        }
        Err(StreamError::Acquisition(reason)) if bounded => {
            info!("Source finished: {reason}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn test_pattern(config: &Config, frames: Option<u64>) -> TestPattern {
    let pattern = TestPattern::new(config.capture.width, config.capture.height, 3);
    match frames {
        Some(limit) => pattern.with_limit(limit),
        None => pattern,
    }
}

fn open_source(
    config: &Config,
    pattern: bool,
    frames: Option<u64>,
) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "camera")]
    {
        if !pattern {
            if frames.is_some() {
                warn!("--frames only applies to the test pattern");
            }
            let mut capture = config.capture.clone();
            if capture.device.is_empty() {
                let found = framecast::utils::auto_detect_device()?;
                capture.device = found.path;
                capture.format = found.format;
            }
            info!("Using capture device: {}", capture.device);
            return Ok(Box::new(framecast::capture::V4l2Camera::open(capture)?));
        }
    }
    #[cfg(not(feature = "camera"))]
    {
        if !pattern {
            warn!("Built without camera support, using the test pattern");
        }
    }

    Ok(Box::new(test_pattern(config, frames)))
}

fn open_display(config: &DisplayConfig) -> Result<Box<dyn DisplaySink>> {
    #[cfg(feature = "sdl-display")]
    {
        if !config.headless {
            return Ok(Box::new(framecast::display::Sdl2Display::new(config)?));
        }
    }
    #[cfg(not(feature = "sdl-display"))]
    {
        if !config.headless {
            warn!("Built without SDL2 support, running headless");
        }
    }

    Ok(Box::new(HeadlessDisplay::new()))
}
