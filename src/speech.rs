use std::collections::VecDeque;
use std::process::{Child, Command, Stdio};

use log::{debug, info, warn};

use crate::error::SpeechError;
use crate::face::DetectionBatch;
use crate::labels::Labels;

pub trait SpeechProvider: Send {
    fn speak(&mut self, text: &str, locale: &str) -> Result<(), SpeechError>;

    fn is_speaking(&mut self) -> bool;
}

/// Speaks by running an external TTS program (e.g. `espeak`) with the text as
/// its last argument. `{locale}` and `{lang}` in the arguments are replaced
/// with the full locale tag and its language subtag.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    child: Option<Child>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: None,
        }
    }

    fn expand_args(&self, locale: &str) -> Vec<String> {
        let lang = locale.split(['-', '_']).next().unwrap_or(locale);
        self.args
            .iter()
            .map(|arg| arg.replace("{locale}", locale).replace("{lang}", lang))
            .collect()
    }
}

impl SpeechProvider for CommandSpeaker {
    fn speak(&mut self, text: &str, locale: &str) -> Result<(), SpeechError> {
        let child = Command::new(&self.program)
            .args(self.expand_args(locale))
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SpeechError::Spawn {
                command: self.program.clone(),
                source,
            })?;
        self.child = Some(child);
        Ok(())
    }

    fn is_speaking(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("Speech command `{}` exited with {}", self.program, status);
                }
                self.child = None;
                false
            }
            Err(err) => {
                warn!("Failed to poll speech command `{}`: {}", self.program, err);
                self.child = None;
                false
            }
        }
    }
}

impl Drop for CommandSpeaker {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Logs utterances instead of speaking them. Never busy.
#[derive(Debug, Default)]
pub struct LogSpeaker {
    spoken: Vec<String>,
}

impl LogSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spoken(&self) -> &[String] {
        &self.spoken
    }
}

impl SpeechProvider for LogSpeaker {
    fn speak(&mut self, text: &str, locale: &str) -> Result<(), SpeechError> {
        info!("[{}] {}", locale, text);
        self.spoken.push(text.to_string());
        Ok(())
    }

    fn is_speaking(&mut self) -> bool {
        false
    }
}

/// What happens to narration produced while the speaker is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpeechPolicy {
    /// Keep only the newest unspoken text.
    #[default]
    LatestWins,
    /// Speak every text in order; past `capacity` the oldest is dropped.
    Queue { capacity: usize },
}

/// Narration text for a batch: one sentence per face joined by the labels'
/// separator. Empty for an empty batch.
pub fn narrate_batch(batch: &DetectionBatch, labels: &Labels) -> String {
    batch
        .faces
        .iter()
        .map(|face| labels.sentence_for(face))
        .collect::<Vec<_>>()
        .join(&labels.separator)
}

/// Holds pending narration and feeds it to the speech provider when idle.
pub struct Narrator {
    provider: Box<dyn SpeechProvider>,
    policy: SpeechPolicy,
    locale: String,
    pending: VecDeque<String>,
    dropped: u64,
    spoken: u64,
}

impl Narrator {
    pub fn new(provider: Box<dyn SpeechProvider>, policy: SpeechPolicy, locale: impl Into<String>) -> Self {
        Self {
            provider,
            policy,
            locale: locale.into(),
            pending: VecDeque::new(),
            dropped: 0,
            spoken: 0,
        }
    }

    /// Adds text to speak. Under [`SpeechPolicy::LatestWins`] empty text
    /// clears whatever is still unspoken; a queue ignores it.
    pub fn offer(&mut self, text: String) {
        match self.policy {
            SpeechPolicy::LatestWins => {
                if !self.pending.is_empty() {
                    self.dropped += self.pending.len() as u64;
                    debug!("Replacing unspoken narration");
                    self.pending.clear();
                }
                if !text.is_empty() {
                    self.pending.push_back(text);
                }
            }
            SpeechPolicy::Queue { .. } if text.is_empty() => {}
            SpeechPolicy::Queue { capacity } => {
                self.pending.push_back(text);
                while self.pending.len() > capacity.max(1) {
                    self.pending.pop_front();
                    self.dropped += 1;
                    debug!("Narration queue full, dropped oldest entry");
                }
            }
        }
    }

    /// Speaks the next pending text if the provider is idle. Returns what was
    /// spoken.
    pub fn tick(&mut self) -> Result<Option<String>, SpeechError> {
        if self.pending.is_empty() || self.provider.is_speaking() {
            return Ok(None);
        }
        let Some(text) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.provider.speak(&text, &self.locale)?;
        self.spoken += 1;
        Ok(Some(text))
    }

    /// Text that will be spoken next.
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn spoken(&self) -> u64 {
        self.spoken
    }
}
