//! jojo - Voice assistant pipeline for pet care
//!
//! Turns spoken requests into pet-care actions: a wake word opens the
//! microphone, the utterance is transcribed, an intent is extracted (with a
//! local fallback when the completion service is slow or down), the matching
//! handler runs and the answer is spoken back. Proactive alerts (medication,
//! feeding, appointments) are scheduled beside the conversation and must be
//! acknowledged.
//!
//! # Architecture
//!
//! Every stage is single-flight per session; the wake-word monitor and the
//! alert timer run concurrently on their own tasks:
//!
//! ```text
//! wake word -> recognition -> intent parse -> confirm/clarify
//!           -> command router -> response composer -> speech -> idle
//! ```
//!
//! # Modules
//!
//! - `adapters`: Collaborator traits (speech, completion, storage) and implementations
//! - `voice`: Wake word, recognition, avatar feedback, microphone lease
//! - `core`: Context, intent parsing, routing, responses, alerts, session
//! - `domain`: Data structures (ParsedIntent, CommandResult, ProactiveAlert)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Talk to the assistant from a terminal
//! jojo chat
//!
//! # See how an utterance is understood
//! jojo parse "log 2 cups of kibble for Max"
//!
//! # Pending reminders
//! jojo alerts list
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod voice;

// Re-export main types at crate root for convenience
pub use core::{
    CommandRouter, ContextManager, IntentParser, ProactiveAlertManager, ResponseComposer,
    VoiceSession,
};
pub use domain::{
    AvatarState, CommandResult, ConversationContext, IntentAction, ParsedIntent, ProactiveAlert,
    Response,
};
pub use voice::{AudioFeedbackController, VoiceRecognitionEngine, WakeWordDetector};
