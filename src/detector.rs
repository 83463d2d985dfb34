use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use image::GrayImage;
use log::{debug, info, warn};
use rustface::ImageData;
use serde::Deserialize;

use crate::camera::Frame;
use crate::error::{DetectorError, SetupError};
use crate::face::{BoundingBox, DetectionBatch, FaceResult};

pub const RUSTFACE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

const RUSTFACE_MODEL_URLS: [&str; 2] = [
    "https://github.com/atomashpolskiy/rustface/raw/master/model/seeta_fd_frontal_v1.0.bin",
    "https://raw.githubusercontent.com/atomashpolskiy/rustface/master/model/seeta_fd_frontal_v1.0.bin",
];

/// Trait for face detector implementations.
///
/// Called from the blocking pool, one detection at a time.
pub trait FaceDetector: Send {
    /// Detect faces in a frame
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch, DetectorError>;

    /// Optional method to set detector-specific parameters (JSON string)
    fn set_params(&mut self, _params: &str) -> Result<()> {
        Ok(())
    }
}

/// Loads models and builds the detector during setup.
pub trait ModelLoader: Send {
    fn load(&mut self) -> Result<Box<dyn FaceDetector>, SetupError>;
}

/// Everything `create_detector` needs to build a detector by name.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub name: String,
    pub models_dir: PathBuf,
    pub download: bool,
    /// Minimum raw detector score. Rustface scores are unbounded and its own
    /// cutoff (`score_thresh`, default 2.0) applies first.
    pub threshold: f32,
    /// Detector-specific parameters (JSON string, may be empty)
    pub params: String,
    /// Recorded detections for the `replay` detector
    pub replay_file: Option<PathBuf>,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            name: "rustface".to_string(),
            models_dir: PathBuf::from("models"),
            download: false,
            threshold: 0.5,
            params: String::new(),
            replay_file: None,
        }
    }
}

/// [`ModelLoader`] that calls [`create_detector`].
pub struct NamedDetectorLoader {
    options: DetectorOptions,
}

impl NamedDetectorLoader {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }
}

impl ModelLoader for NamedDetectorLoader {
    fn load(&mut self) -> Result<Box<dyn FaceDetector>, SetupError> {
        create_detector(&self.options).map_err(|err| SetupError::ModelLoad {
            path: self.options.models_dir.clone(),
            reason: format!("{:#}", err),
        })
    }
}

// Factory function to create detectors by name
pub fn create_detector(options: &DetectorOptions) -> Result<Box<dyn FaceDetector>> {
    let mut detector: Box<dyn FaceDetector> = match options.name.to_lowercase().as_str() {
        "rustface" => Box::new(RustFaceDetector::load(
            &options.models_dir,
            options.download,
            options.threshold,
        )?),
        "replay" => {
            let path = options
                .replay_file
                .as_ref()
                .context("The replay detector needs a detections file")?;
            Box::new(ReplayDetector::from_file(path)?)
        }
        _ => return Err(anyhow::anyhow!("Unknown detector: {}", options.name)),
    };

    if !options.params.is_empty() {
        detector.set_params(&options.params)?;
    }
    Ok(detector)
}

/// Makes sure the rustface model exists under `models_dir`, downloading it
/// when allowed.
pub fn ensure_rustface_model(models_dir: &Path, download: bool) -> Result<PathBuf> {
    let model_path = models_dir.join(RUSTFACE_MODEL_FILE);
    if model_path.exists() {
        debug!("Model already exists at: {:?}", model_path);
        return Ok(model_path);
    }
    if !download {
        return Err(anyhow::anyhow!(
            "Model not found at {:?}. Download it from \
             https://github.com/atomashpolskiy/rustface/tree/master/model \
             or enable model download",
            model_path
        ));
    }

    info!("Downloading face detection model...");
    std::fs::create_dir_all(models_dir)
        .with_context(|| format!("Failed to create model directory: {:?}", models_dir))?;

    let mut last_error = None;
    for url in &RUSTFACE_MODEL_URLS {
        info!("Trying to download from: {}", url);

        match ureq::get(url).call() {
            Ok(response) => {
                let mut reader = response.into_reader();
                save_model(&mut reader, &model_path)?;
                info!("Model downloaded successfully from {}", url);
                return Ok(model_path);
            }
            Err(err) => {
                warn!("Failed to download from {}: {}", url, err);
                last_error = Some(err);
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to download model from all sources. Last error: {:?}",
        last_error
    ))
}

/// Streams `reader` into a `.part` file next to `model_path` and renames it
/// into place, so an interrupted download never leaves a truncated model.
fn save_model(reader: &mut impl Read, model_path: &Path) -> Result<()> {
    let partial = model_path.with_extension("part");
    let written = std::fs::File::create(&partial)
        .and_then(|mut file| {
            std::io::copy(reader, &mut file)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&partial, model_path));

    if let Err(err) = written {
        let _ = std::fs::remove_file(&partial);
        return Err(err).with_context(|| format!("Failed to save model to {:?}", model_path));
    }
    Ok(())
}

/// Tuning knobs accepted by [`RustFaceDetector::set_params`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RustFaceParams {
    pub min_face_size: Option<u32>,
    pub score_thresh: Option<f64>,
    pub pyramid_scale_factor: Option<f32>,
    pub slide_window_step: Option<(u32, u32)>,
}

enum WorkerMessage {
    Detect {
        image: GrayImage,
        reply: Sender<Vec<(BoundingBox, f32)>>,
    },
    Configure(RustFaceParams),
}

/// RustFace (SeetaFace) detector implementation.
///
/// The rustface handle is not `Send`, so it lives on its own worker thread
/// and frames are passed over a channel. Boxes and scores only.
pub struct RustFaceDetector {
    requests: Option<Sender<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
    threshold: f32,
}

impl RustFaceDetector {
    pub fn load(models_dir: &Path, download: bool, threshold: f32) -> Result<Self> {
        let model_path = ensure_rustface_model(models_dir, download)?;
        let path = model_path
            .to_str()
            .with_context(|| format!("Model path is not valid UTF-8: {:?}", model_path))?
            .to_string();

        let (requests, inbox) = crossbeam_channel::unbounded::<WorkerMessage>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let worker = thread::Builder::new()
            .name("rustface".to_string())
            .spawn(move || {
                let detector = match rustface::create_detector(&path) {
                    Ok(detector) => {
                        let _ = ready_tx.send(Ok(()));
                        detector
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                run_worker(detector, inbox);
            })
            .context("Failed to start detector thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = worker.join();
                return Err(anyhow::anyhow!("Failed to create face detector: {}", reason));
            }
            Err(_) => return Err(anyhow::anyhow!("Detector thread exited during startup")),
        }

        info!("RustFace detector ready ({:?})", model_path);
        Ok(Self {
            requests: Some(requests),
            worker: Some(worker),
            threshold,
        })
    }

    fn sender(&self) -> Result<&Sender<WorkerMessage>, DetectorError> {
        self.requests.as_ref().ok_or(DetectorError::WorkerStopped)
    }
}

fn run_worker(mut detector: Box<dyn rustface::Detector>, inbox: Receiver<WorkerMessage>) {
    for message in inbox {
        match message {
            WorkerMessage::Detect { image, reply } => {
                let (width, height) = image.dimensions();
                let mut image_data = ImageData::new(image.as_raw(), width, height);
                let faces = detector
                    .detect(&mut image_data)
                    .into_iter()
                    .map(|face| {
                        let bbox = face.bbox();
                        let b = BoundingBox::new(
                            bbox.x() as f32,
                            bbox.y() as f32,
                            bbox.width() as f32,
                            bbox.height() as f32,
                        );
                        (b, face.score() as f32)
                    })
                    .collect();
                let _ = reply.send(faces);
            }
            WorkerMessage::Configure(params) => {
                if let Some(size) = params.min_face_size {
                    detector.set_min_face_size(size);
                }
                if let Some(thresh) = params.score_thresh {
                    detector.set_score_thresh(thresh);
                }
                if let Some(factor) = params.pyramid_scale_factor {
                    detector.set_pyramid_scale_factor(factor);
                }
                if let Some((x, y)) = params.slide_window_step {
                    detector.set_slide_window_step(x, y);
                }
            }
        }
    }
}

impl FaceDetector for RustFaceDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch, DetectorError> {
        let (reply, response) = crossbeam_channel::bounded(1);
        self.sender()?
            .send(WorkerMessage::Detect {
                image: image::imageops::grayscale(&frame.image),
                reply,
            })
            .map_err(|_| DetectorError::WorkerStopped)?;
        let faces = response.recv().map_err(|_| DetectorError::WorkerStopped)?;

        // Convert to FaceResult, filtering by threshold
        let faces = faces
            .into_iter()
            .filter(|(_, score)| *score >= self.threshold)
            .map(|(bounding_box, score)| FaceResult::new(bounding_box, score))
            .collect();

        Ok(DetectionBatch::new(frame.index, frame.size(), faces))
    }

    fn set_params(&mut self, params: &str) -> Result<()> {
        let params: RustFaceParams =
            serde_json::from_str(params).context("Invalid rustface parameters")?;
        debug!("Configuring rustface detector: {:?}", params);
        self.sender()?
            .send(WorkerMessage::Configure(params))
            .map_err(|_| anyhow::anyhow!("Detector worker stopped"))
    }
}

impl Drop for RustFaceDetector {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Recorded detections, one entry per frame.
#[derive(Debug, Deserialize)]
struct Recording {
    #[serde(default)]
    frame_size: Option<(u32, u32)>,
    frames: Vec<Vec<FaceResult>>,
}

/// Replays recorded face results, cycling through the recording by frame
/// index. Carries the full set of landmarks, expressions, age and gender.
pub struct ReplayDetector {
    frames: Vec<Vec<FaceResult>>,
    frame_size: Option<(u32, u32)>,
}

impl ReplayDetector {
    pub fn new(frames: Vec<Vec<FaceResult>>, frame_size: Option<(u32, u32)>) -> Self {
        Self { frames, frame_size }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections file: {:?}", path))?;
        let recording: Recording = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse detections file: {:?}", path))?;
        info!(
            "Loaded {} recorded frames from {:?}",
            recording.frames.len(),
            path
        );
        Ok(Self::new(recording.frames, recording.frame_size))
    }
}

impl FaceDetector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionBatch, DetectorError> {
        if self.frames.is_empty() {
            return Err(DetectorError::Inference("Recording has no frames".to_string()));
        }
        let slot = (frame.index % self.frames.len() as u64) as usize;
        let faces = self.frames[slot].clone();
        let batch = DetectionBatch::new(
            frame.index,
            self.frame_size.unwrap_or_else(|| frame.size()),
            faces,
        );
        // Recorded geometry is in the recording's frame size.
        Ok(batch.resized_to(frame.size()))
    }
}
