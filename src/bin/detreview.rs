//! detreview - review object detections on a video file or a live camera.
//!
//! Subcommands:
//! - `process`: run the detector over a video, scrub cached frames, replay, export
//! - `camera`: run the detector against a camera until a frame limit or Ctrl-C
//! - `inspect`: print what FFmpeg reads back from an exported video

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use detection_review::{AppConfig, Intent, Session, SessionState, Surface, Ticker};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "detreview",
    version,
    about = "Run an object detector over a video or camera and review the results"
)]
struct Args {
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE", global = true)]
    ui: String,

    /// Tick period in milliseconds (overrides config)
    #[arg(long, value_name = "MS", global = true)]
    tick_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a video file frame by frame
    Process {
        /// Video file path (or stub://name?frames=N)
        #[arg(long, value_name = "PATH")]
        video: String,

        /// Model file path (or stub://name)
        #[arg(long, value_name = "PATH")]
        model: String,

        /// Processed frame index to preview after the run (repeatable)
        #[arg(long = "preview", value_name = "INDEX")]
        previews: Vec<usize>,

        /// Write previewed frames as PNG files into this directory
        #[arg(long, value_name = "DIR")]
        snapshot_dir: Option<PathBuf>,

        /// Replay the processed frames after the run
        #[arg(long)]
        replay: bool,

        /// Export the processed frames (default path from config when no value)
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        export: Option<Option<PathBuf>>,
    },
    /// Run detection on a live camera
    Camera {
        /// Model file path (or stub://name)
        #[arg(long, value_name = "PATH")]
        model: String,

        /// Camera index or device path (overrides config)
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Stop after this many frames (default: run until Ctrl-C)
        #[arg(long, value_name = "N")]
        frames: Option<u64>,
    },
    /// Print the video track of an exported file as FFmpeg reads it
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = {
        let _stage = ui.stage("Load configuration");
        AppConfig::load()?
    };
    if let Some(ms) = args.tick_ms {
        config.tick = Duration::from_millis(ms);
        config.validate()?;
    }

    match args.command {
        Command::Process {
            video,
            model,
            previews,
            snapshot_dir,
            replay,
            export,
        } => run_process(
            &ui,
            config,
            ProcessOptions {
                video,
                model,
                previews,
                snapshot_dir,
                replay,
                export,
            },
        ),
        Command::Camera {
            model,
            device,
            frames,
        } => {
            if let Some(device) = device {
                match device.parse::<u32>() {
                    Ok(index) => {
                        config.camera.device_index = index;
                        config.camera.device = None;
                    }
                    Err(_) => config.camera.device = Some(device),
                }
            }
            run_camera(&ui, config, &model, frames)
        }
        Command::Inspect { file } => {
            let info = detection_review::export::inspect(&file)?;
            println!("file:       {}", file.display());
            println!("codec:      {}", info.codec);
            println!("size:       {}x{}", info.width, info.height);
            println!("frames:     {} ({} packets)", info.frames, info.packets);
            println!("frame rate: {:.3} fps", info.frame_rate.fps());
            println!("duration:   {:.3} s", info.duration_secs());
            Ok(())
        }
    }
}

struct ProcessOptions {
    video: String,
    model: String,
    previews: Vec<usize>,
    snapshot_dir: Option<PathBuf>,
    replay: bool,
    export: Option<Option<PathBuf>>,
}

fn run_process(ui: &ui::Ui, config: AppConfig, opts: ProcessOptions) -> Result<()> {
    let ticker = Ticker::new(config.tick)?;
    let mut session = Session::new(config);
    let mut surface = ui.surface(opts.snapshot_dir.as_deref())?;
    let (tx, rx) = mpsc::channel();
    let interrupted = install_interrupt(tx, Intent::NavigateBack)?;

    {
        let _stage = ui.stage("Load video and model");
        session.dispatch(Intent::SelectVideo(opts.video.clone()), &mut surface)?;
        session.dispatch(Intent::SelectModel(opts.model.clone()), &mut surface)?;
    }

    session.dispatch(Intent::BeginProcessing, &mut surface)?;
    run_until_idle(&ticker, &interrupted, &mut session, &rx, &mut surface)?;
    if interrupted.load(Ordering::SeqCst) {
        session.pump(&rx, &mut surface);
        log::info!("interrupted, processed frames discarded");
        return Ok(());
    }
    let stats = session.stats();
    println!(
        "processed {} of {} frames ({} skipped)",
        session.buffer().len(),
        stats.frames_read,
        stats.frames_skipped
    );

    if !opts.previews.is_empty() && session.buffer().is_empty() {
        log::warn!("no processed frames to preview");
    } else if !opts.previews.is_empty() {
        let _stage = ui.stage("Preview processed frames");
        session.dispatch(Intent::GrabSeek, &mut surface)?;
        for index in &opts.previews {
            if *index >= session.buffer().len() {
                log::warn!(
                    "frame {} has not been processed ({} available)",
                    index,
                    session.buffer().len()
                );
            }
            session.dispatch(Intent::DragSeek(*index), &mut surface)?;
        }
        session.dispatch(Intent::ReleaseSeek, &mut surface)?;
    }

    if opts.replay {
        let _stage = ui.stage("Replay");
        session.dispatch(Intent::PlayAgain, &mut surface)?;
        run_until_idle(&ticker, &interrupted, &mut session, &rx, &mut surface)?;
    }

    if let Some(destination) = opts.export {
        let _stage = ui.stage("Export");
        let summary = session.export_to(destination.as_deref(), &mut surface)?;
        println!(
            "exported {} frames ({}x{} @ {:.2} fps, {:.2} s) to {}",
            summary.frames,
            summary.width,
            summary.height,
            summary.frame_rate,
            summary.duration_secs(),
            summary.path.display()
        );
    }
    Ok(())
}

fn run_camera(ui: &ui::Ui, config: AppConfig, model: &str, frames: Option<u64>) -> Result<()> {
    let ticker = Ticker::new(config.tick)?;
    let mut session = Session::new(config);
    let mut surface = ui.surface(None)?;
    let (tx, rx) = mpsc::channel();
    let interrupted = install_interrupt(tx, Intent::Stop)?;

    {
        let _stage = ui.stage("Load model");
        session.dispatch(Intent::SelectModel(model.to_string()), &mut surface)?;
    }
    session.dispatch(Intent::BeginCamera, &mut surface)?;
    log::info!("camera running, press Ctrl-C to stop");

    ticker.run(&interrupted, || {
        session.pump(&rx, &mut surface);
        session.on_tick(&mut surface);
        let reached_limit = frames.is_some_and(|limit| session.live().frames() >= limit);
        if reached_limit || session.state() != SessionState::CameraRunning {
            Ok(ControlFlow::Break(()))
        } else {
            Ok(ControlFlow::Continue(()))
        }
    })?;

    session.pump(&rx, &mut surface);
    let captured = session.live().frames();
    let fps = session.live().last_fps();
    session.dispatch(Intent::Stop, &mut surface)?;
    println!("captured {} frames ({:.2} fps)", captured, fps);
    Ok(())
}

/// Tick the session until it settles back in `Idle` or Ctrl-C is pressed.
fn run_until_idle(
    ticker: &Ticker,
    interrupted: &AtomicBool,
    session: &mut Session,
    intents: &Receiver<Intent>,
    surface: &mut dyn Surface,
) -> Result<u64> {
    ticker.run(interrupted, || {
        session.pump(intents, surface);
        session.on_tick(surface);
        Ok(if session.state() == SessionState::Idle {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        })
    })
}

/// On Ctrl-C: flag the interruption and queue `intent` for the session.
fn install_interrupt(tx: mpsc::Sender<Intent>, intent: Intent) -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = tx.send(intent.clone());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;
    Ok(interrupted)
}
