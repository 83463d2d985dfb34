use tokio::sync::watch;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
    Detecting,
    Rendering,
    /// Setup failed. Terminal for the session.
    Error,
    Stopped,
}

/// State shown to the user. Written only by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub loading: bool,
    /// Setup failure, shown until the session ends.
    pub error_message: Option<String>,
    /// Latest per-tick detector failure, cleared by the next good detection.
    pub notice: Option<String>,
    /// Narration for the latest batch. With a speaker, the text still waiting
    /// to be spoken.
    pub speech_text: Option<String>,
    pub phase: Phase,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub failures: u64,
    /// Faces in the most recent batch.
    pub faces: usize,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            loading: true,
            error_message: None,
            notice: None,
            speech_text: None,
            phase: Phase::Idle,
            ticks: 0,
            skipped_ticks: 0,
            failures: 0,
            faces: 0,
        }
    }
}

/// Write side of the UI state; observers hold the paired receiver.
pub struct UiStateHandle {
    tx: watch::Sender<UiState>,
}

impl UiStateHandle {
    pub fn new() -> (Self, watch::Receiver<UiState>) {
        let (tx, rx) = watch::channel(UiState::default());
        (Self { tx }, rx)
    }

    pub fn update(&self, f: impl FnOnce(&mut UiState)) {
        self.tx.send_modify(f);
    }

    pub fn set_phase(&self, phase: Phase) {
        self.tx.send_if_modified(|state| {
            if state.phase == phase {
                return false;
            }
            state.phase = phase;
            true
        });
    }

    pub fn set_speech_text(&self, text: Option<String>) {
        self.tx.send_if_modified(|state| {
            if state.speech_text == text {
                return false;
            }
            state.speech_text = text;
            true
        });
    }

    pub fn snapshot(&self) -> UiState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_loading() {
        let (_handle, rx) = UiStateHandle::new();
        let state = rx.borrow();
        assert!(state.loading);
        assert_eq!(state.phase, Phase::Idle);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn test_unchanged_phase_does_not_notify() {
        let (handle, rx) = UiStateHandle::new();

        handle.set_phase(Phase::Idle);
        assert!(!rx.has_changed().unwrap());

        handle.set_phase(Phase::Loading);
        assert!(rx.has_changed().unwrap());
        assert_eq!(handle.snapshot().phase, Phase::Loading);
    }
}
