pub mod camera;
pub mod config;
pub mod controller;
pub mod detector;
pub mod error;
pub mod face;
pub mod labels;
pub mod render;
pub mod speech;
pub mod state;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use controller::{Collaborators, DetectionController, RunSummary, Session};
pub use detector::{create_detector, DetectorOptions, FaceDetector, ModelLoader};
pub use face::{BoundingBox, DetectionBatch, Expressions, FaceResult, Gender, GenderEstimate, Point};
pub use labels::Labels;
pub use state::{Phase, UiState};
