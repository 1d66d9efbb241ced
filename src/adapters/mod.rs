//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the collaborators the voice
//! pipeline consumes but does not implement: the completion service,
//! speech engines, and key-value persistence.

pub mod completion;
pub mod console;
pub mod speech;
pub mod store;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Entity;

// Re-export adapters
pub use completion::HttpCompletionService;
pub use console::{ConsoleRecognizer, ConsoleSynthesizer};
pub use speech::{
    AudioCapture, FeedbackSound, RecognitionFeed, RecognitionSettings, RecognitionStream,
    SilentSoundPlayer, SoundPlayer, SpeechError, SpeechEvent, SpeechOutcome, SpeechRecognizer,
    SpeechSynthesizer, Utterance, VoiceSettings,
};
pub use store::{load_json, save_json, FileStore, KeyValueStore, MemoryStore, StoreError};

/// Request sent to the completion service
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Prompt: the transcript plus condensed context
    pub message: String,

    /// Keys multi-turn continuity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Active pet, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_context: Option<Value>,
}

/// Structured intent as the completion service reports it
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceIntent {
    pub action: String,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    #[serde(default)]
    pub confidence: Option<f32>,

    #[serde(default, alias = "requiresConfirmation")]
    pub requires_confirmation: bool,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub entities: Vec<Entity>,

    #[serde(default)]
    pub ambiguities: Vec<String>,
}

/// Reply from the completion service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReply {
    /// Natural-language answer
    #[serde(default)]
    pub response: String,

    /// Action the service decided on, if any
    #[serde(default)]
    pub action_taken: Option<String>,

    #[serde(default)]
    pub needs_clarification: bool,

    #[serde(default = "default_true")]
    pub speak_response: bool,

    #[serde(default)]
    pub intent: Option<ServiceIntent>,
}

fn default_true() -> bool {
    true
}

/// Trait for the completion/LLM service
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Human-readable service name
    fn name(&self) -> &str;

    /// One request/response exchange
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply>;

    /// Health check
    async fn health_check(&self) -> Result<()>;
}
