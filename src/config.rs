use std::sync::Arc;
use std::time::Duration;

use crate::labels::Labels;
use crate::render::DisplaySize;
use crate::speech::SpeechPolicy;

pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_SPEECH_INTERVAL: Duration = Duration::from_millis(500);

/// Immutable settings handed to the controller at construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub detection_interval: Duration,
    pub speech_interval: Duration,
    /// Overlay size; the frame size when unset.
    pub display_size: Option<DisplaySize>,
    pub speech_policy: SpeechPolicy,
    /// Stop after this many completed detections.
    pub max_detections: Option<u64>,
    pub labels: Arc<Labels>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            speech_interval: DEFAULT_SPEECH_INTERVAL,
            display_size: None,
            speech_policy: SpeechPolicy::default(),
            max_detections: None,
            labels: Arc::new(Labels::default()),
        }
    }
}
