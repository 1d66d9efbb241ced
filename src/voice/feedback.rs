//! Avatar state machine and waveform telemetry.
//!
//! The controller is the only writer of `AvatarState`. Every transition is
//! validated against the feedback cycle and published to state listeners
//! before the call returns. While LISTENING or SPEAKING a sampler task turns
//! audio chunks into waveform frames; it is torn down on every transition so
//! no frame is ever published in IDLE.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapters::{AudioCapture, FeedbackSound, SoundPlayer};
use crate::domain::AvatarState;

use super::microphone::{MicrophoneArbiter, MicrophoneLease};
use super::observers::{Listeners, Subscription};

/// Bars per waveform frame
pub const DEFAULT_BAR_COUNT: usize = 16;

/// Errors raised by the feedback controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("Illegal avatar transition {from} -> {to}")]
    IllegalTransition { from: AvatarState, to: AvatarState },

    #[error("Feedback controller has been cleaned up")]
    Disposed,
}

/// Published on every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: AvatarState,
    pub to: AvatarState,
}

/// One waveform sample
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformFrame {
    pub state: AvatarState,
    /// RMS level, 0.0 - 1.0
    pub level: f32,
    /// Peak per bar, 0.0 - 1.0
    pub bars: Vec<f32>,
}

impl WaveformFrame {
    /// Summarise a PCM chunk
    pub fn from_samples(state: AvatarState, samples: &[f32], bar_count: usize) -> Self {
        let level = if samples.is_empty() {
            0.0
        } else {
            let sum: f32 = samples.iter().map(|s| s * s).sum();
            (sum / samples.len() as f32).sqrt().min(1.0)
        };

        let bar_count = bar_count.max(1);
        let chunk = samples.len().div_ceil(bar_count).max(1);
        let mut bars: Vec<f32> = samples
            .chunks(chunk)
            .map(|c| c.iter().fold(0.0f32, |peak, s| peak.max(s.abs())).min(1.0))
            .collect();
        bars.resize(bar_count, 0.0);

        Self { state, level, bars }
    }
}

struct Sampler {
    task: tokio::task::JoinHandle<()>,
}

struct Inner {
    state: Mutex<AvatarState>,
    /// Sampler generation; frames are only published while it matches
    frame_gate: Mutex<u64>,
    sampler: Mutex<Option<Sampler>>,
    disposed: AtomicBool,
    state_listeners: Listeners<StateChange>,
    waveform_listeners: Listeners<WaveformFrame>,
}

impl Inner {
    fn stop_sampler(&self) {
        if let Ok(mut gate) = self.frame_gate.lock() {
            *gate += 1;
        }
        self.abort_sampler();
    }

    fn abort_sampler(&self) {
        if let Ok(mut sampler) = self.sampler.lock() {
            if let Some(sampler) = sampler.take() {
                sampler.task.abort();
            }
        }
    }
}

enum WaveSource {
    Microphone,
    Stream(mpsc::Receiver<Vec<f32>>),
}

/// Drives the assistant's visual/audio indicators
pub struct AudioFeedbackController {
    inner: Arc<Inner>,
    sounds: Arc<dyn SoundPlayer>,
    capture: Option<Arc<dyn AudioCapture>>,
    microphone: MicrophoneArbiter,
    bar_count: usize,
}

impl AudioFeedbackController {
    pub fn new(sounds: Arc<dyn SoundPlayer>, microphone: MicrophoneArbiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AvatarState::Idle),
                frame_gate: Mutex::new(0),
                sampler: Mutex::new(None),
                disposed: AtomicBool::new(false),
                state_listeners: Listeners::new(),
                waveform_listeners: Listeners::new(),
            }),
            sounds,
            capture: None,
            microphone,
            bar_count: DEFAULT_BAR_COUNT,
        }
    }

    /// Sample the microphone for the LISTENING waveform
    pub fn with_capture(mut self, capture: Arc<dyn AudioCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_bar_count(mut self, bar_count: usize) -> Self {
        self.bar_count = bar_count.max(1);
        self
    }

    pub fn state(&self) -> AvatarState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(AvatarState::Idle)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn show_idle(&self) -> Result<(), FeedbackError> {
        self.transition(AvatarState::Idle, None)
    }

    pub fn show_listening(&self) -> Result<(), FeedbackError> {
        let source = self.capture.as_ref().map(|_| WaveSource::Microphone);
        self.transition(AvatarState::Listening, source)
    }

    pub fn show_processing(&self) -> Result<(), FeedbackError> {
        self.transition(AvatarState::Processing, None)
    }

    /// Enter SPEAKING, optionally sampling the output audio
    pub fn show_speaking(
        &self,
        levels: Option<mpsc::Receiver<Vec<f32>>>,
    ) -> Result<(), FeedbackError> {
        self.transition(AvatarState::Speaking, levels.map(WaveSource::Stream))
    }

    pub fn show_error(&self) -> Result<(), FeedbackError> {
        self.transition(AvatarState::Error, None)
    }

    /// Walk forward along the cycle until `target`, publishing each step
    pub fn advance_to(&self, target: AvatarState) -> Result<(), FeedbackError> {
        if matches!(target, AvatarState::Idle | AvatarState::Error) {
            return self.transition(target, None);
        }

        // The cycle has four states; five steps always suffice
        for _ in 0..5 {
            let current = self.state();
            if current == target {
                return Ok(());
            }
            let next = current.next_in_cycle();
            match next {
                AvatarState::Listening => self.show_listening()?,
                other => self.transition(other, None)?,
            }
        }

        Ok(())
    }

    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(callback)
    }

    /// Waveform callbacks must not drive state transitions
    pub fn on_waveform_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&WaveformFrame) + Send + Sync + 'static,
    {
        self.inner.waveform_listeners.subscribe(callback)
    }

    pub fn play_feedback_sound(&self, sound: FeedbackSound) {
        if self.is_disposed() {
            return;
        }
        if let Err(e) = self.sounds.play(sound) {
            warn!(?sound, "feedback sound failed: {}", e);
        }
    }

    /// Release the sampler and every listener. Only the first call acts.
    pub fn cleanup(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.stop_sampler();

        let from = match self.inner.state.lock() {
            Ok(mut state) => std::mem::replace(&mut *state, AvatarState::Idle),
            Err(_) => AvatarState::Idle,
        };
        if from != AvatarState::Idle {
            self.inner.state_listeners.emit(&StateChange {
                from,
                to: AvatarState::Idle,
            });
        }

        self.inner.state_listeners.clear();
        self.inner.waveform_listeners.clear();
        debug!("feedback controller cleaned up");
    }

    fn transition(&self, to: AvatarState, source: Option<WaveSource>) -> Result<(), FeedbackError> {
        if self.is_disposed() {
            return Err(FeedbackError::Disposed);
        }

        // Gate before state, the same order a sampler publishing a frame
        // takes them in. The new state is never visible while an old frame
        // can still pass the gate.
        let from = {
            let mut gate = self
                .inner
                .frame_gate
                .lock()
                .map_err(|_| FeedbackError::Disposed)?;
            let mut state = self
                .inner
                .state
                .lock()
                .map_err(|_| FeedbackError::Disposed)?;
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(FeedbackError::IllegalTransition { from, to });
            }
            if from != to || source.is_some() {
                *gate += 1;
            }
            *state = to;
            from
        };

        if from == to && source.is_none() {
            return Ok(());
        }

        self.inner.abort_sampler();
        if let Some(source) = source {
            self.start_sampler(to, source);
        }

        if from != to {
            debug!(%from, %to, "avatar state");
            self.inner.state_listeners.emit(&StateChange { from, to });
        }
        Ok(())
    }

    fn start_sampler(&self, state: AvatarState, source: WaveSource) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime, waveform disabled");
            return;
        };

        let generation = match self.inner.frame_gate.lock() {
            Ok(gate) => *gate,
            Err(_) => return,
        };

        // The lease is moved into the task and released with it
        let (lease, capture) = match source {
            WaveSource::Microphone => {
                let Some(capture) = self.capture.clone() else {
                    return;
                };
                match self.microphone.acquire("feedback") {
                    Ok(lease) => (Some(lease), Some(capture)),
                    Err(e) => {
                        debug!("waveform skipped: {}", e);
                        return;
                    }
                }
            }
            WaveSource::Stream(rx) => {
                let task = runtime.spawn(sample(
                    self.inner.clone(),
                    generation,
                    state,
                    self.bar_count,
                    rx,
                    None,
                ));
                self.store_sampler(task);
                return;
            }
        };

        let inner = self.inner.clone();
        let bar_count = self.bar_count;
        let task = runtime.spawn(async move {
            let Some(capture) = capture else { return };
            match capture.open().await {
                Ok(rx) => sample(inner, generation, state, bar_count, rx, lease).await,
                Err(e) => warn!("microphone capture failed: {}", e),
            }
        });
        self.store_sampler(task);
    }

    fn store_sampler(&self, task: tokio::task::JoinHandle<()>) {
        if let Ok(mut sampler) = self.inner.sampler.lock() {
            if let Some(previous) = sampler.replace(Sampler { task }) {
                previous.task.abort();
            }
        }
    }
}

impl Drop for AudioFeedbackController {
    fn drop(&mut self) {
        self.inner.stop_sampler();
    }
}

async fn sample(
    inner: Arc<Inner>,
    generation: u64,
    state: AvatarState,
    bar_count: usize,
    mut rx: mpsc::Receiver<Vec<f32>>,
    _lease: Option<MicrophoneLease>,
) {
    while let Some(chunk) = rx.recv().await {
        let frame = WaveformFrame::from_samples(state, &chunk, bar_count);

        let Ok(gate) = inner.frame_gate.lock() else {
            return;
        };
        if *gate != generation {
            return;
        }
        inner.waveform_listeners.emit(&frame);
    }
}
