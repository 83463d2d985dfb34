//! The detection loop controller.
//!
//! [`DetectionController::start`] runs the one-time setup (model load, camera
//! request, binding the stream to the video surface) and yields a [`Session`].
//! [`Session::run`] then polls on a fixed interval: capture a frame, detect on
//! the blocking pool, render the batch and hand narration to the speaker.
//! At most one detection is in flight; ticks that fire meanwhile are skipped.

use std::future::Future;
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

use crate::camera::{CameraProvider, Frame, VideoSurface};
use crate::config::ControllerConfig;
use crate::detector::{FaceDetector, ModelLoader};
use crate::error::{DetectorError, SetupError};
use crate::face::DetectionBatch;
use crate::render::{DisplaySize, OverlayWriter, Renderer};
use crate::speech::{narrate_batch, Narrator, SpeechProvider};
use crate::state::{Phase, UiState, UiStateHandle};

type DetectionJob = JoinHandle<(Frame, Result<DetectionBatch, DetectorError>)>;

/// The collaborators a controller drives.
pub struct Collaborators {
    pub loader: Box<dyn ModelLoader>,
    pub camera: Box<dyn CameraProvider>,
    pub renderer: Box<dyn Renderer>,
    pub speaker: Option<Box<dyn SpeechProvider>>,
    pub writer: Option<OverlayWriter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub detections: u64,
    pub failures: u64,
    pub faces: u64,
    pub utterances: u64,
    /// Narration replaced or pushed out before it was spoken.
    pub narrations_dropped: u64,
    pub overlays_written: u64,
}

pub struct DetectionController {
    config: ControllerConfig,
    collaborators: Collaborators,
    state: UiStateHandle,
}

impl DetectionController {
    pub fn new(config: ControllerConfig, collaborators: Collaborators) -> Self {
        let (state, _) = UiStateHandle::new();
        Self {
            config,
            collaborators,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    /// Runs setup and, when it succeeds, the loop until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<RunSummary, SetupError>
    where
        F: Future<Output = ()>,
    {
        let session = self.start().await?;
        Ok(session.run(shutdown).await)
    }

    /// Loads models, acquires the camera and binds it. Consumes the
    /// controller, so setup happens once and is never retried.
    pub async fn start(self) -> Result<Session, SetupError> {
        let Self {
            config,
            collaborators,
            state,
        } = self;
        let Collaborators {
            mut loader,
            mut camera,
            renderer,
            speaker,
            writer,
        } = collaborators;

        state.set_phase(Phase::Loading);
        info!("Loading models");

        let acquired = async move {
            let detector = tokio::task::spawn_blocking(move || loader.load())
                .await
                .map_err(|e| SetupError::Task(e.to_string()))??;
            info!("Requesting camera stream");
            let stream = tokio::task::spawn_blocking(move || camera.request_stream())
                .await
                .map_err(|e| SetupError::Task(e.to_string()))??;
            Ok::<_, SetupError>((detector, stream))
        }
        .await;

        let (detector, stream) = match acquired {
            Ok(acquired) => acquired,
            Err(err) => {
                error!("Setup failed: {}", err);
                state.update(|s| {
                    s.error_message = Some(err.to_string());
                    s.phase = Phase::Error;
                });
                return Err(err);
            }
        };

        let mut surface = VideoSurface::new();
        surface.bind(stream);

        let narrator = speaker.map(|speaker| {
            Narrator::new(speaker, config.speech_policy, config.labels.locale.clone())
        });

        state.update(|s| {
            s.loading = false;
            s.error_message = None;
            s.phase = Phase::Ready;
        });
        info!("Setup complete");

        Ok(Session {
            config,
            detector: Arc::new(Mutex::new(detector)),
            surface,
            renderer,
            writer,
            narrator,
            canvas: RgbaImage::new(0, 0),
            state,
            summary: RunSummary::default(),
        })
    }
}

enum TickStart {
    Started(DetectionJob),
    Failed,
    Ended,
}

/// A set-up controller: owns the bound camera, the detector and the overlay.
pub struct Session {
    config: ControllerConfig,
    detector: Arc<Mutex<Box<dyn FaceDetector>>>,
    surface: VideoSurface,
    renderer: Box<dyn Renderer>,
    writer: Option<OverlayWriter>,
    narrator: Option<Narrator>,
    canvas: RgbaImage,
    state: UiStateHandle,
    summary: RunSummary,
}

impl Session {
    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.state.subscribe()
    }

    /// The overlay as last rendered.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Polls until `shutdown` resolves, the detection limit is reached or the
    /// camera stream ends, then releases the camera.
    pub async fn run<F>(mut self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let mut detect_timer = time::interval(self.config.detection_interval);
        detect_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut speech_timer = time::interval(self.config.speech_interval);
        speech_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut in_flight: Option<DetectionJob> = None;
        info!(
            "Detection loop started (every {:?})",
            self.config.detection_interval
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = detect_timer.tick() => {
                    if in_flight.is_some() {
                        self.skip_tick();
                        continue;
                    }
                    match self.start_detection() {
                        TickStart::Started(job) => in_flight = Some(job),
                        TickStart::Failed => {
                            if self.limit_reached() {
                                break;
                            }
                        }
                        TickStart::Ended => {
                            info!("Camera stream ended");
                            break;
                        }
                    }
                }
                joined = join_in_flight(&mut in_flight) => {
                    in_flight = None;
                    self.finish_detection(joined);
                    if self.limit_reached() {
                        break;
                    }
                }
                _ = speech_timer.tick(), if self.narrator.is_some() => {
                    self.speech_tick();
                }
            }
        }

        if in_flight.take().is_some() {
            debug!("Abandoning in-flight detection");
        }
        self.teardown()
    }

    fn limit_reached(&self) -> bool {
        self.config
            .max_detections
            .is_some_and(|max| self.summary.detections >= max)
    }

    fn skip_tick(&mut self) {
        self.summary.skipped_ticks += 1;
        debug!("Detection still in flight, skipping tick");
        self.state.update(|s| s.skipped_ticks += 1);
    }

    fn start_detection(&mut self) -> TickStart {
        self.summary.ticks += 1;
        self.state.update(|s| s.ticks += 1);

        let frame = match self.surface.capture() {
            Ok(Some(frame)) => frame,
            Ok(None) => return TickStart::Ended,
            Err(err) => {
                self.record_failure(&DetectorError::Frame(err));
                return TickStart::Failed;
            }
        };

        self.state.set_phase(Phase::Detecting);
        let detector = Arc::clone(&self.detector);
        TickStart::Started(tokio::task::spawn_blocking(move || {
            let outcome = match detector.lock() {
                Ok(mut detector) => detector.detect(&frame),
                Err(_) => Err(DetectorError::Task("Detector lock poisoned".to_string())),
            };
            (frame, outcome)
        }))
    }

    fn finish_detection(&mut self, joined: Result<(Frame, Result<DetectionBatch, DetectorError>), JoinError>) {
        match joined {
            Ok((frame, outcome)) => self.complete_detection(&frame, outcome),
            Err(err) => self.record_failure(&DetectorError::Task(err.to_string())),
        }
    }

    /// Applies one detection result. A failure leaves the overlay untouched.
    pub fn complete_detection(&mut self, frame: &Frame, outcome: Result<DetectionBatch, DetectorError>) {
        let batch = match outcome {
            Ok(batch) => batch,
            Err(err) => {
                self.record_failure(&err);
                return;
            }
        };

        self.summary.detections += 1;
        self.summary.faces += batch.len() as u64;
        self.state.set_phase(Phase::Rendering);

        let display = self
            .config
            .display_size
            .unwrap_or_else(|| DisplaySize::from(frame.size()));
        self.renderer.render(&mut self.canvas, &batch, display);

        if let Some(writer) = self.writer.as_mut() {
            match writer.write(frame, &self.canvas) {
                Ok(path) => {
                    self.summary.overlays_written += 1;
                    debug!("Wrote overlay {:?}", path);
                }
                Err(err) => warn!("{}", err),
            }
        }

        let narration = narrate_batch(&batch, &self.config.labels);
        let speech_text = match self.narrator.as_mut() {
            Some(narrator) => {
                narrator.offer(narration);
                self.summary.narrations_dropped = narrator.dropped();
                narrator.next_pending().map(str::to_string)
            }
            None => Some(narration).filter(|text| !text.is_empty()),
        };

        let faces = batch.len();
        self.state.update(|s| {
            s.notice = None;
            s.faces = faces;
            s.speech_text = speech_text;
            s.phase = Phase::Ready;
        });
    }

    fn record_failure(&mut self, err: &DetectorError) {
        warn!("Detection failed: {}", err);
        self.summary.detections += 1;
        self.summary.failures += 1;
        let notice = err.to_string();
        self.state.update(|s| {
            s.notice = Some(notice);
            s.failures += 1;
            s.phase = Phase::Ready;
        });
    }

    /// Speaks pending narration when the speaker is idle.
    pub fn speech_tick(&mut self) {
        let Some(narrator) = self.narrator.as_mut() else {
            return;
        };
        match narrator.tick() {
            Ok(Some(text)) => debug!("Speaking: {}", text),
            Ok(None) => {}
            Err(err) => warn!("{}", err),
        }
        self.summary.utterances = narrator.spoken();
        self.state
            .set_speech_text(narrator.next_pending().map(str::to_string));
    }

    fn teardown(mut self) -> RunSummary {
        self.surface.release();
        self.state.update(|s| {
            s.phase = Phase::Stopped;
            s.speech_text = None;
        });
        info!(
            "Detection loop stopped: {} detections ({} failed), {} skipped ticks, {} faces",
            self.summary.detections,
            self.summary.failures,
            self.summary.skipped_ticks,
            self.summary.faces
        );
        self.summary
    }
}

async fn join_in_flight(
    job: &mut Option<DetectionJob>,
) -> Result<(Frame, Result<DetectionBatch, DetectorError>), JoinError> {
    match job {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
