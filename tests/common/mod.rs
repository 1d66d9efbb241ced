//! Shared fakes for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use jojo::adapters::{
    ChatReply, ChatRequest, CompletionService, RecognitionSettings, RecognitionStream,
    ServiceIntent, SpeechError, SpeechEvent, SpeechRecognizer, SpeechSynthesizer, Utterance,
    VoiceSettings,
};

/// Recognizer that plays one script per `start()`.
///
/// After its script a session stays open until the consumer aborts it, the
/// way a real engine keeps listening. With no script left a session simply
/// stays silent.
#[derive(Default)]
pub struct ScriptedRecognizer {
    scripts: Mutex<VecDeque<Vec<SpeechEvent>>>,
    deny: AtomicBool,
    starts: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, events: Vec<SpeechEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    /// One session that hears `text`
    pub fn push_final(&self, text: &str) {
        self.push(vec![final_event(text, 0.9)]);
    }

    pub fn deny_permission(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, _settings: &RecognitionSettings) -> Result<RecognitionStream, SpeechError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SpeechError::PermissionDenied);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (mut feed, stream) = RecognitionStream::channel(script.len() + 1);

        tokio::spawn(async move {
            for event in script {
                if !feed.send(event).await {
                    return;
                }
            }
            feed.aborted().await;
        });

        Ok(stream)
    }
}

pub fn final_event(text: &str, confidence: f32) -> SpeechEvent {
    SpeechEvent::Final {
        transcript: text.to_string(),
        confidence: Some(confidence),
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn speak(&self, text: &str, _voice: &VoiceSettings) -> Result<Utterance, SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(Utterance::completed())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completion service that answers after a delay
pub struct DelayedService {
    pub delay: Duration,
    pub reply: ChatReply,
    pub calls: AtomicUsize,
}

impl DelayedService {
    pub fn new(delay: Duration, reply: ChatReply) -> Arc<Self> {
        Arc::new(Self {
            delay,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    /// A service that (slowly) understands navigation
    pub fn navigating(delay: Duration, page: &str) -> Arc<Self> {
        Self::new(
            delay,
            ChatReply {
                response: format!("Opening {}", page),
                action_taken: Some("navigate".into()),
                needs_clarification: false,
                speak_response: false,
                intent: Some(ServiceIntent {
                    action: "NAVIGATE".into(),
                    target: Some(page.to_string()),
                    confidence: Some(0.95),
                    ..Default::default()
                }),
            },
        )
    }
}

#[async_trait]
impl CompletionService for DelayedService {
    fn name(&self) -> &str {
        "delayed"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Completion service that never answers
pub struct HangingService;

#[async_trait]
impl CompletionService for HangingService {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatReply> {
        std::future::pending().await
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Completion service that always fails
pub struct FailingService;

#[async_trait]
impl CompletionService for FailingService {
    fn name(&self) -> &str {
        "failing"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatReply> {
        anyhow::bail!("503 Service Unavailable")
    }

    async fn health_check(&self) -> Result<()> {
        anyhow::bail!("503 Service Unavailable")
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
