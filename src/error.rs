use std::path::PathBuf;

use thiserror::Error;

/// Failure of the one-time setup sequence. Fatal to the session.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Failed to load models from {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("Camera unavailable: {0}")]
    Camera(#[from] CameraError),
    #[error("Setup task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Permission denied for camera source {0:?}")]
    PermissionDenied(PathBuf),
    #[error("Camera source {0:?} does not exist")]
    NotFound(PathBuf),
    #[error("No frames found in {0:?}")]
    NoFrames(PathBuf),
    #[error("Failed to read frame {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Failure of a single detection pass. The loop keeps running.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Frame unavailable: {0}")]
    Frame(#[from] CameraError),
    #[error("Detection failed: {0}")]
    Inference(String),
    #[error("Detector worker stopped")]
    WorkerStopped,
    #[error("Detection task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Failed to start speech command `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write overlay to {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}
