//! Utterance capture after the wake word.
//!
//! At most one recognition session runs at a time. Starting a new session
//! aborts and joins the previous one before the recognizer is reopened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::{RecognitionStream, SpeechError, SpeechEvent, SpeechRecognizer};
use crate::config::RecognitionEngineSettings;

use super::observers::{Listeners, Subscription};

/// Errors that end a recognition session
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecognitionError {
    #[error("No speech detected before the timeout")]
    NoSpeechTimeout,

    #[error("Speech was not recognised")]
    NoMatch,

    #[error("Microphone permission denied")]
    PermissionDenied,

    /// User-initiated stop
    #[error("Recognition aborted")]
    Aborted,

    #[error("Recognition service error: {0}")]
    Service(String),
}

impl RecognitionError {
    /// Aborts are user-initiated and never shown
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Aborted)
    }

    /// Short message suitable for speaking back
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoSpeechTimeout => "I didn't hear anything. Say the wake word when you're ready.",
            Self::NoMatch => "Sorry, I didn't catch that.",
            Self::PermissionDenied => "I need microphone access to hear you.",
            Self::Aborted => "",
            Self::Service(_) => "Speech recognition isn't available right now.",
        }
    }
}

impl From<SpeechError> for RecognitionError {
    fn from(e: SpeechError) -> Self {
        match e {
            SpeechError::PermissionDenied => Self::PermissionDenied,
            SpeechError::Aborted => Self::Aborted,
            SpeechError::NoSpeech => Self::NoSpeechTimeout,
            other => Self::Service(other.to_string()),
        }
    }
}

/// A settled transcript
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: Option<f32>,
}

/// Handle on one recognition session
#[derive(Debug)]
pub struct RecognitionTicket {
    session_id: u64,
    outcome: oneshot::Receiver<Result<Transcript, RecognitionError>>,
}

impl RecognitionTicket {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Wait for the session to produce a transcript or fail
    pub async fn outcome(self) -> Result<Transcript, RecognitionError> {
        self.outcome.await.unwrap_or(Err(RecognitionError::Aborted))
    }
}

struct ActiveSession {
    id: u64,
    stop_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Clone, Default)]
struct SessionListeners {
    interim: Listeners<String>,
    finals: Listeners<Transcript>,
    errors: Listeners<RecognitionError>,
}

/// Single-flight speech capture
pub struct VoiceRecognitionEngine {
    recognizer: Arc<dyn SpeechRecognizer>,
    settings: Mutex<RecognitionEngineSettings>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    listeners: SessionListeners,
}

impl VoiceRecognitionEngine {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, settings: RecognitionEngineSettings) -> Self {
        Self {
            recognizer,
            settings: Mutex::new(settings),
            active: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
            listeners: SessionListeners::default(),
        }
    }

    /// Open a session, replacing any session already running
    pub async fn start_recognition(&self) -> Result<RecognitionTicket, RecognitionError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!(session = previous.id, "replacing active recognition session");
            stop_session(previous).await;
        }

        let settings = self.settings_snapshot();
        let stream = match self.recognizer.start(&settings.recognition()).await {
            Ok(stream) => stream,
            Err(e) => {
                let error = RecognitionError::from(e);
                if error.is_user_visible() {
                    self.listeners.errors.emit(&error);
                }
                return Err(error);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let task = tokio::spawn(run_session(
            id,
            stream,
            settings.timeout,
            settings.continuous,
            self.listeners.clone(),
            stop_rx,
            outcome_tx,
        ));

        *active = Some(ActiveSession { id, stop_tx, task });
        info!(session = id, language = %settings.language, "recognition started");

        Ok(RecognitionTicket {
            session_id: id,
            outcome: outcome_rx,
        })
    }

    /// Abort the running session. Returns false when nothing was running.
    pub async fn stop_recognition(&self) -> bool {
        let previous = self.active.lock().await.take();
        match previous {
            Some(session) => {
                let running = !session.task.is_finished();
                stop_session(session).await;
                running
            }
            None => false,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }

    pub fn on_interim_result<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.listeners.interim.subscribe(callback)
    }

    pub fn on_final_result<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Transcript) + Send + Sync + 'static,
    {
        self.listeners.finals.subscribe(callback)
    }

    /// User-visible errors only; aborts are not reported
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RecognitionError) + Send + Sync + 'static,
    {
        self.listeners.errors.subscribe(callback)
    }

    /// Applies to the next session
    pub fn set_language(&self, code: &str) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.language = code.to_string();
        }
    }

    /// Applies to the next session
    pub fn set_continuous(&self, continuous: bool) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.continuous = continuous;
        }
    }

    pub fn set_timeout(&self, timeout: Duration) {
        if let Ok(mut settings) = self.settings.lock() {
            settings.timeout = timeout;
        }
    }

    pub fn settings_snapshot(&self) -> RecognitionEngineSettings {
        self.settings
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

async fn stop_session(session: ActiveSession) {
    let _ = session.stop_tx.send(());
    if let Err(e) = session.task.await {
        warn!(session = session.id, "recognition task ended abnormally: {}", e);
    }
}

async fn run_session(
    id: u64,
    mut stream: RecognitionStream,
    timeout: Duration,
    continuous: bool,
    listeners: SessionListeners,
    mut stop_rx: oneshot::Receiver<()>,
    outcome_tx: oneshot::Sender<Result<Transcript, RecognitionError>>,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // Continuous sessions accumulate finals until the engine ends
    let mut collected: Option<Transcript> = None;

    let result = loop {
        tokio::select! {
            _ = &mut stop_rx => break Err(RecognitionError::Aborted),
            _ = &mut deadline => {
                break collected.take().ok_or(RecognitionError::NoSpeechTimeout);
            }
            event = stream.next() => match event {
                Some(SpeechEvent::Interim(text)) => listeners.interim.emit(&text),
                Some(SpeechEvent::Final { transcript, confidence }) => {
                    let transcript = Transcript { text: transcript, confidence };
                    listeners.finals.emit(&transcript);

                    if !continuous {
                        break Ok(transcript);
                    }
                    collected = Some(match collected.take() {
                        Some(mut so_far) => {
                            so_far.text.push(' ');
                            so_far.text.push_str(&transcript.text);
                            so_far.confidence = transcript.confidence.or(so_far.confidence);
                            so_far
                        }
                        None => transcript,
                    });
                    deadline.as_mut().reset(Instant::now() + timeout);
                }
                Some(SpeechEvent::Error(e)) => break Err(RecognitionError::from(e)),
                Some(SpeechEvent::End) | None => {
                    break collected.take().ok_or(RecognitionError::NoMatch);
                }
            }
        }
    };

    stream.abort();

    match &result {
        Ok(t) => debug!(session = id, transcript = %t.text, "recognition finished"),
        Err(e) => {
            debug!(session = id, "recognition ended: {}", e);
            if e.is_user_visible() {
                listeners.errors.emit(e);
            }
        }
    }

    let _ = outcome_tx.send(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_is_not_user_visible() {
        assert!(!RecognitionError::Aborted.is_user_visible());
        assert!(RecognitionError::NoSpeechTimeout.is_user_visible());
        assert!(RecognitionError::Service("down".into()).is_user_visible());
    }

    #[test]
    fn test_speech_error_mapping() {
        assert_eq!(
            RecognitionError::from(SpeechError::PermissionDenied),
            RecognitionError::PermissionDenied
        );
        assert_eq!(
            RecognitionError::from(SpeechError::Aborted),
            RecognitionError::Aborted
        );
        assert!(matches!(
            RecognitionError::from(SpeechError::Network("offline".into())),
            RecognitionError::Service(_)
        ));
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_aborted() {
        let (tx, rx) = oneshot::channel();
        drop(tx);
        let ticket = RecognitionTicket {
            session_id: 7,
            outcome: rx,
        };
        assert_eq!(ticket.outcome().await, Err(RecognitionError::Aborted));
    }
}
