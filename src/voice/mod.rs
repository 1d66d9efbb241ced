//! Audio-facing components of the pipeline.
//!
//! - Wake word: long-lived monitor for the trigger phrase
//! - Recognition: single-flight utterance capture
//! - Feedback: avatar state machine and waveform telemetry
//! - Microphone: exclusive capture lease
//! - Observers: callback registry with explicit unsubscribe

pub mod feedback;
pub mod microphone;
pub mod observers;
pub mod recognition;
pub mod wake_word;

pub use feedback::{AudioFeedbackController, FeedbackError, StateChange, WaveformFrame};
pub use microphone::{MicrophoneArbiter, MicrophoneLease};
pub use observers::{Listeners, Subscription};
pub use recognition::{RecognitionError, RecognitionTicket, Transcript, VoiceRecognitionEngine};
pub use wake_word::{PhraseMatcher, WakeWordDetector, WakeWordError, WakeWordEvent};
