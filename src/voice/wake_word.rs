//! Continuous wake-word monitoring.
//!
//! The detector keeps a continuous recognizer session open and scans final
//! transcripts for the wake phrase. When the engine ends the session (silence
//! timeouts, network hiccups) the monitor reopens it after a short backoff,
//! so listening only ends through `stop_listening()` or a permission denial.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::{
    RecognitionSettings, RecognitionStream, SpeechError, SpeechEvent, SpeechRecognizer,
};
use crate::config::WakeWordSettings;

use super::observers::{Listeners, Subscription};

/// Longest pause between recognizer restarts
const MAX_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Errors raised by the wake-word detector
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WakeWordError {
    #[error("Wake phrase must contain at least one word")]
    EmptyPhrase,

    #[error("Wake-word detector not initialized")]
    NotInitialized,

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Recognizer failed: {0}")]
    Recognizer(SpeechError),

    #[error("Wake-word detector has been disposed")]
    Disposed,
}

/// A genuine wake-word detection
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordEvent {
    pub phrase: String,
    pub transcript: String,
    pub confidence: Option<f32>,
    pub detected_at: DateTime<Utc>,
}

/// Whole-token phrase matcher.
///
/// The transcript matches when a contiguous run of its tokens concatenates
/// to exactly the phrase with whitespace removed. "hey jo jo" matches
/// "hey jojo"; "they jojo" and "hey jojos" do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseMatcher {
    phrase: String,
    compact: String,
}

impl PhraseMatcher {
    /// `None` when the phrase has no word characters
    pub fn new(phrase: &str) -> Option<Self> {
        let compact: String = tokenize(phrase).concat();
        if compact.is_empty() {
            return None;
        }
        Some(Self {
            phrase: phrase.trim().to_string(),
            compact,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn matches(&self, transcript: &str) -> bool {
        let tokens = tokenize(transcript);

        for start in 0..tokens.len() {
            let mut joined = String::new();
            for token in &tokens[start..] {
                joined.push_str(token);
                if joined == self.compact {
                    return true;
                }
                if !self.compact.starts_with(&joined) {
                    break;
                }
            }
        }

        false
    }
}

/// Lowercase word tokens; apostrophes are dropped so "jojo's" stays one word
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace(['\'', '’'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Minimum recognizer confidence accepted at `sensitivity`
pub fn confidence_threshold(sensitivity: f32) -> f32 {
    (1.0 - sensitivity.clamp(0.0, 1.0)).clamp(0.05, 0.95)
}

struct Shared {
    listening: AtomicBool,
    disposed: AtomicBool,
    sensitivity: AtomicU32,
    matcher: Mutex<Option<PhraseMatcher>>,
    detected: Listeners<WakeWordEvent>,
    errors: Listeners<WakeWordError>,
}

impl Shared {
    fn sensitivity(&self) -> f32 {
        f32::from_bits(self.sensitivity.load(Ordering::SeqCst))
    }

    fn matcher(&self) -> Option<PhraseMatcher> {
        self.matcher.lock().ok().and_then(|m| m.clone())
    }
}

struct MonitorHandle {
    stop_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Clamp to [0, 1]; NaN falls back to the middle setting
fn normalize_sensitivity(sensitivity: f32) -> f32 {
    if sensitivity.is_nan() {
        0.5
    } else {
        sensitivity.clamp(0.0, 1.0)
    }
}

/// Long-lived wake-word monitor
pub struct WakeWordDetector {
    recognizer: Arc<dyn SpeechRecognizer>,
    settings: WakeWordSettings,
    shared: Arc<Shared>,
    monitor: tokio::sync::Mutex<Option<MonitorHandle>>,
}

impl WakeWordDetector {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, settings: WakeWordSettings) -> Self {
        let sensitivity = normalize_sensitivity(settings.sensitivity);
        Self {
            recognizer,
            settings,
            shared: Arc::new(Shared {
                listening: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                sensitivity: AtomicU32::new(sensitivity.to_bits()),
                matcher: Mutex::new(None),
                detected: Listeners::new(),
                errors: Listeners::new(),
            }),
            monitor: tokio::sync::Mutex::new(None),
        }
    }

    /// Set the wake phrase. Takes effect immediately, even while listening.
    pub fn initialize(&self, wake_word: &str) -> Result<(), WakeWordError> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(WakeWordError::Disposed);
        }
        let matcher = PhraseMatcher::new(wake_word).ok_or(WakeWordError::EmptyPhrase)?;
        info!(phrase = matcher.phrase(), "wake word initialized");

        if let Ok(mut slot) = self.shared.matcher.lock() {
            *slot = Some(matcher);
        }
        Ok(())
    }

    /// Begin continuous monitoring. A no-op when already listening.
    pub async fn start_listening(&self) -> Result<(), WakeWordError> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(WakeWordError::Disposed);
        }
        if self.shared.matcher().is_none() {
            return Err(WakeWordError::NotInitialized);
        }

        let mut monitor = self.monitor.lock().await;
        if let Some(handle) = monitor.as_ref() {
            if !handle.task.is_finished() {
                return Ok(());
            }
        }
        // A previous monitor may have ended on permission revocation
        if let Some(stale) = monitor.take() {
            let _ = stale.task.await;
        }

        let recognition = self.recognition_settings();
        let stream = match self.recognizer.start(&recognition).await {
            Ok(stream) => stream,
            Err(SpeechError::PermissionDenied) => {
                warn!("wake word: microphone permission denied");
                self.shared.listening.store(false, Ordering::SeqCst);
                return Err(WakeWordError::PermissionDenied);
            }
            Err(e) => return Err(WakeWordError::Recognizer(e)),
        };

        self.shared.listening.store(true, Ordering::SeqCst);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(run_monitor(
            self.shared.clone(),
            self.recognizer.clone(),
            recognition,
            self.settings.debounce,
            self.settings.restart_delay,
            stream,
            stop_rx,
        ));

        *monitor = Some(MonitorHandle { stop_tx, task });
        info!(engine = self.recognizer.name(), "wake word monitoring started");
        Ok(())
    }

    /// Halt monitoring and wait for the monitor to release the recognizer
    pub async fn stop_listening(&self) {
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(());
            if let Err(e) = handle.task.await {
                warn!("wake word monitor ended abnormally: {}", e);
            }
            info!("wake word monitoring stopped");
        }
        self.shared.listening.store(false, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    /// Invoked once per genuine detection
    pub fn on_wake_word_detected<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WakeWordEvent) + Send + Sync + 'static,
    {
        self.shared.detected.subscribe(callback)
    }

    /// Invoked on recognizer failures, including permission revocation
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WakeWordError) + Send + Sync + 'static,
    {
        self.shared.errors.subscribe(callback)
    }

    /// 0.0 accepts only confident recognitions, 1.0 accepts nearly anything
    pub fn set_sensitivity(&self, sensitivity: f32) {
        let sensitivity = normalize_sensitivity(sensitivity);
        self.shared
            .sensitivity
            .store(sensitivity.to_bits(), Ordering::SeqCst);
    }

    pub fn sensitivity(&self) -> f32 {
        self.shared.sensitivity()
    }

    /// Stop monitoring and drop every listener. Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.stop_listening().await;
        if !self.shared.disposed.swap(true, Ordering::SeqCst) {
            self.shared.detected.clear();
            self.shared.errors.clear();
            debug!("wake word detector disposed");
        }
    }

    fn recognition_settings(&self) -> RecognitionSettings {
        RecognitionSettings {
            language: self.settings.language.clone(),
            continuous: true,
            interim_results: false,
        }
    }
}

/// Restart delay after `failures` consecutive session ends
fn backoff(base: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.saturating_sub(1).min(6);
    (base * factor).min(MAX_RESTART_DELAY)
}

async fn run_monitor(
    shared: Arc<Shared>,
    recognizer: Arc<dyn SpeechRecognizer>,
    recognition: RecognitionSettings,
    debounce: Duration,
    restart_delay: Duration,
    mut stream: RecognitionStream,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut last_detection: Option<Instant> = None;
    let mut failures: u32 = 0;

    loop {
        let event = tokio::select! {
            _ = &mut stop_rx => break,
            event = stream.next() => event,
        };

        match event {
            Some(SpeechEvent::Final {
                transcript,
                confidence,
            }) => {
                failures = 0;
                let Some(matcher) = shared.matcher() else {
                    continue;
                };
                if !matcher.matches(&transcript) {
                    continue;
                }

                let threshold = confidence_threshold(shared.sensitivity());
                if let Some(c) = confidence {
                    if c < threshold {
                        debug!(confidence = c, threshold, "wake phrase below threshold");
                        continue;
                    }
                }

                let now = Instant::now();
                if let Some(last) = last_detection {
                    if now.duration_since(last) < debounce {
                        debug!("wake phrase debounced");
                        continue;
                    }
                }
                last_detection = Some(now);

                info!("wake word detected");
                shared.detected.emit(&WakeWordEvent {
                    phrase: matcher.phrase().to_string(),
                    transcript,
                    confidence,
                    detected_at: Utc::now(),
                });
            }
            Some(SpeechEvent::Interim(_)) => {}
            Some(SpeechEvent::Error(SpeechError::PermissionDenied)) => {
                warn!("wake word: microphone permission revoked");
                shared.errors.emit(&WakeWordError::PermissionDenied);
                break;
            }
            other => {
                if let Some(SpeechEvent::Error(e)) = &other {
                    if !matches!(e, SpeechError::NoSpeech | SpeechError::Aborted) {
                        warn!("wake word recognizer error: {}", e);
                        shared.errors.emit(&WakeWordError::Recognizer(e.clone()));
                    }
                }

                failures += 1;
                let reopened = reopen(
                    &*recognizer,
                    &recognition,
                    restart_delay,
                    &mut failures,
                    &mut stop_rx,
                    &shared,
                )
                .await;
                match reopened {
                    Some(next) => stream = next,
                    None => break,
                }
            }
        }
    }

    shared.listening.store(false, Ordering::SeqCst);
}

/// Reopen the recognizer. `None` when stopped or permission was denied.
async fn reopen(
    recognizer: &dyn SpeechRecognizer,
    recognition: &RecognitionSettings,
    restart_delay: Duration,
    failures: &mut u32,
    stop_rx: &mut oneshot::Receiver<()>,
    shared: &Shared,
) -> Option<RecognitionStream> {
    loop {
        let delay = backoff(restart_delay, *failures);
        debug!(?delay, "restarting wake word recognizer");

        tokio::select! {
            _ = &mut *stop_rx => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match recognizer.start(recognition).await {
            Ok(stream) => return Some(stream),
            Err(SpeechError::PermissionDenied) => {
                warn!("wake word: microphone permission revoked");
                shared.errors.emit(&WakeWordError::PermissionDenied);
                return None;
            }
            Err(e) => {
                warn!("wake word recognizer restart failed: {}", e);
                *failures += 1;
            }
        }
    }
}
