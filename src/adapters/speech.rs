//! Speech capabilities consumed by the voice pipeline.
//!
//! Platform speech engines (browser speech APIs, Vosk, Whisper, Piper...)
//! sit behind these traits so the pipeline never touches a global engine
//! and tests can substitute scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors raised by speech and audio capabilities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No speech detected")]
    NoSpeech,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Speech service error: {0}")]
    Service(String),

    /// User-initiated stop
    #[error("Speech recognition aborted")]
    Aborted,

    #[error("Audio capture failed: {0}")]
    AudioCapture(String),

    #[error("Microphone is already held by {0}")]
    Busy(String),
}

/// Settings for one recognition session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionSettings {
    /// BCP-47 language tag
    pub language: String,

    /// Keep recognising after the first final result
    pub continuous: bool,

    /// Report interim hypotheses
    pub interim_results: bool,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: false,
            interim_results: true,
        }
    }
}

/// Event produced by a recognizer session
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// Hypothesis that may still change
    Interim(String),

    /// Settled transcript
    Final {
        transcript: String,
        /// Engine confidence if it reports one
        confidence: Option<f32>,
    },

    /// Session-level failure
    Error(SpeechError),

    /// The engine closed the session
    End,
}

/// Consumer side of a recognizer session.
///
/// Dropping the stream aborts the session, which releases the engine's
/// microphone.
pub struct RecognitionStream {
    events: mpsc::Receiver<SpeechEvent>,
    abort: Option<oneshot::Sender<()>>,
}

/// Producer side handed to recognizer implementations
pub struct RecognitionFeed {
    events: mpsc::Sender<SpeechEvent>,
    aborted: oneshot::Receiver<()>,
}

impl RecognitionStream {
    /// Create a connected feed/stream pair
    pub fn channel(buffer: usize) -> (RecognitionFeed, RecognitionStream) {
        let (event_tx, event_rx) = mpsc::channel(buffer.max(1));
        let (abort_tx, abort_rx) = oneshot::channel();

        (
            RecognitionFeed {
                events: event_tx,
                aborted: abort_rx,
            },
            RecognitionStream {
                events: event_rx,
                abort: Some(abort_tx),
            },
        )
    }

    /// Next event, `None` once the producer is gone
    pub async fn next(&mut self) -> Option<SpeechEvent> {
        self.events.recv().await
    }

    /// Ask the engine to stop and release the microphone
    pub fn abort(&mut self) {
        if let Some(tx) = self.abort.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RecognitionStream {
    fn drop(&mut self) {
        self.abort();
    }
}

impl RecognitionFeed {
    /// Deliver an event. Returns false when the consumer is gone.
    pub async fn send(&self, event: SpeechEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Resolves when the consumer aborted or dropped the stream
    pub async fn aborted(&mut self) {
        let _ = (&mut self.aborted).await;
    }

    /// Non-blocking abort check
    pub fn is_aborted(&mut self) -> bool {
        !matches!(
            self.aborted.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Open a recognition session
    async fn start(&self, settings: &RecognitionSettings) -> Result<RecognitionStream, SpeechError>;
}

/// Voice used for synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub name: Option<String>,
    pub language: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            name: None,
            language: "en-US".to_string(),
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

/// How a spoken utterance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    Completed,
    Interrupted,
}

/// An utterance in progress
pub struct Utterance {
    /// Output audio chunks for waveform sampling
    pub levels: Option<mpsc::Receiver<Vec<f32>>>,

    /// Resolves when playback ends
    pub finished: oneshot::Receiver<SpeechOutcome>,
}

impl Utterance {
    /// An utterance that has already finished
    pub fn completed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(SpeechOutcome::Completed);
        Self {
            levels: None,
            finished: rx,
        }
    }
}

/// Text-to-speech engine
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`
    async fn speak(&self, text: &str, voice: &VoiceSettings) -> Result<Utterance, SpeechError>;

    /// Interrupt whatever is being spoken
    fn cancel(&self);
}

/// Short feedback cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSound {
    WakeDetected,
    ListeningStart,
    Success,
    Error,
    Alert,
}

/// Plays feedback cues
pub trait SoundPlayer: Send + Sync {
    fn play(&self, sound: FeedbackSound) -> Result<(), SpeechError>;
}

/// Sound player that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSoundPlayer;

impl SoundPlayer for SilentSoundPlayer {
    fn play(&self, sound: FeedbackSound) -> Result<(), SpeechError> {
        tracing::debug!(?sound, "feedback sound (silent)");
        Ok(())
    }
}

/// Raw PCM microphone capture.
///
/// Dropping the returned receiver must stop the capture.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    async fn open(&self) -> Result<mpsc::Receiver<Vec<f32>>, SpeechError>;
}
