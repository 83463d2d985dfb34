use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use tokio::sync::watch;

use face_narrator::camera::DirectoryCamera;
use face_narrator::detector::{DetectorOptions, NamedDetectorLoader};
use face_narrator::render::{DisplaySize, OverlayRenderer, OverlayStyle, OverlayWriter};
use face_narrator::speech::{CommandSpeaker, LogSpeaker, SpeechPolicy, SpeechProvider};
use face_narrator::{Collaborators, ControllerConfig, DetectionController, Labels, UiState};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Keep only the newest unspoken narration
    LatestWins,
    /// Speak every narration in order
    Queue,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Detect, annotate and narrate faces from a live frame source")]
struct Args {
    /// Directory of frames acting as the camera
    #[clap(short, long, value_parser)]
    camera_dir: PathBuf,

    /// Stop when the camera directory is exhausted instead of cycling
    #[clap(long)]
    no_repeat: bool,

    /// Directory holding the detection models
    #[clap(short, long, default_value = "models")]
    models_dir: PathBuf,

    /// Download missing models
    #[clap(long)]
    download_models: bool,

    /// Face detector to use (rustface, replay)
    #[clap(long, default_value = "rustface")]
    detector: String,

    /// Optional detector-specific parameters (JSON string)
    #[clap(long, default_value = "")]
    detector_params: String,

    /// Recorded detections for the replay detector (JSON)
    #[clap(long, value_parser)]
    detections: Option<PathBuf>,

    /// Minimum raw detector score to keep a face (rustface scores are
    /// unbounded; tune its own cutoff with `score_thresh` in --detector-params)
    #[clap(short, long, default_value = "0.5")]
    threshold: f32,

    /// Milliseconds between detection passes
    #[clap(long, default_value = "1000")]
    interval_ms: u64,

    /// Milliseconds between speech checks
    #[clap(long, default_value = "500")]
    speech_interval_ms: u64,

    /// Overlay width (defaults to frame width)
    #[clap(long, requires = "display_height")]
    display_width: Option<u32>,

    /// Overlay height (defaults to frame height)
    #[clap(long, requires = "display_width")]
    display_height: Option<u32>,

    /// Write frame + overlay composites here
    #[clap(short, long, value_parser)]
    output_dir: Option<PathBuf>,

    /// Wording preset (en, vi)
    #[clap(long, default_value = "en")]
    locale: String,

    /// JSON file overriding labels
    #[clap(long, value_parser)]
    labels: Option<PathBuf>,

    /// TrueType font for annotations
    #[clap(long, value_parser)]
    font: Option<PathBuf>,

    /// Box outline width in pixels
    #[clap(long, default_value = "2")]
    line_width: u32,

    /// Annotation text size in pixels
    #[clap(long, default_value = "16")]
    font_size: f32,

    /// Narrate detected faces
    #[clap(long)]
    speak: bool,

    /// Speech program; utterances are only logged when unset
    #[clap(long)]
    speech_command: Option<String>,

    /// Argument for the speech program ({locale} and {lang} are substituted)
    #[clap(long = "speech-arg", allow_hyphen_values = true)]
    speech_args: Vec<String>,

    /// What to do with narration produced while speaking
    #[clap(long, value_enum, default_value = "latest-wins")]
    speech_policy: PolicyArg,

    /// Queue length for the queue policy
    #[clap(long, default_value = "4")]
    speech_queue: usize,

    /// Stop after this many detection passes
    #[clap(long)]
    max_detections: Option<u64>,
}

fn build_labels(args: &Args) -> Result<Labels> {
    let base = Labels::preset(&args.locale)
        .with_context(|| format!("Unknown locale preset: {}", args.locale))?;
    match &args.labels {
        Some(path) => Labels::with_overrides_from(base, path),
        None => Ok(base),
    }
}

fn build_speaker(args: &Args) -> Option<Box<dyn SpeechProvider>> {
    if !args.speak {
        return None;
    }
    let speaker: Box<dyn SpeechProvider> = match &args.speech_command {
        Some(program) => Box::new(CommandSpeaker::new(program.clone(), args.speech_args.clone())),
        None => Box::new(LogSpeaker::new()),
    };
    Some(speaker)
}

/// Logs user-visible state changes: setup errors and per-tick notices.
async fn report_state(mut rx: watch::Receiver<UiState>) {
    let mut last = rx.borrow().clone();
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.loading != last.loading && !state.loading {
            info!("Ready");
        }
        if state.error_message != last.error_message {
            if let Some(message) = &state.error_message {
                error!("{}", message);
            }
        }
        if state.notice != last.notice {
            if let Some(notice) = &state.notice {
                warn!("{}", notice);
            }
        }
        last = state;
    }
}

/// Main program logic
async fn run(args: Args) -> Result<()> {
    let labels = Arc::new(build_labels(&args)?);

    let style = OverlayStyle {
        line_width: args.line_width.max(1),
        font_size: args.font_size,
        ..OverlayStyle::default()
    };
    let mut renderer = OverlayRenderer::new(labels.clone()).with_style(style);
    if let Some(font) = &args.font {
        renderer = renderer.with_font_file(font)?;
    }

    let writer = match &args.output_dir {
        Some(dir) => Some(OverlayWriter::create(dir).context("Failed to prepare output directory")?),
        None => None,
    };

    let config = ControllerConfig {
        detection_interval: Duration::from_millis(args.interval_ms.max(1)),
        speech_interval: Duration::from_millis(args.speech_interval_ms.max(1)),
        display_size: args
            .display_width
            .zip(args.display_height)
            .map(|(w, h)| DisplaySize::new(w, h)),
        speech_policy: match args.speech_policy {
            PolicyArg::LatestWins => SpeechPolicy::LatestWins,
            PolicyArg::Queue => SpeechPolicy::Queue {
                capacity: args.speech_queue,
            },
        },
        max_detections: args.max_detections,
        labels,
    };

    info!("Initializing face detector: {}", args.detector);
    let loader = NamedDetectorLoader::new(DetectorOptions {
        name: args.detector.clone(),
        models_dir: args.models_dir.clone(),
        download: args.download_models,
        threshold: args.threshold,
        params: args.detector_params.clone(),
        replay_file: args.detections.clone(),
    });

    let collaborators = Collaborators {
        loader: Box::new(loader),
        camera: Box::new(DirectoryCamera::new(&args.camera_dir, !args.no_repeat)),
        renderer: Box::new(renderer),
        speaker: build_speaker(&args),
        writer,
    };

    let controller = DetectionController::new(config, collaborators);
    let reporter = tokio::spawn(report_state(controller.subscribe()));

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let result = controller.run(shutdown).await;
    reporter.abort();

    let summary = result.context("Setup failed")?;
    info!(
        "Finished. {} detections ({} failed), {} faces, {} skipped ticks, {} utterances ({} dropped), {} overlays written",
        summary.detections,
        summary.failures,
        summary.faces,
        summary.skipped_ticks,
        summary.utterances,
        summary.narrations_dropped,
        summary.overlays_written
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    run(args).await
}
