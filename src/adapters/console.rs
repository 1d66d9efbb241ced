//! Console speech I/O for the CLI.
//!
//! Typed lines stand in for final transcripts and responses are printed
//! instead of spoken, so the full pipeline can be driven from a terminal.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use super::speech::{
    RecognitionSettings, RecognitionStream, SpeechError, SpeechEvent, SpeechRecognizer,
    SpeechSynthesizer, Utterance, VoiceSettings,
};

/// Recognizer that reads lines from stdin
pub struct ConsoleRecognizer {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
    prompt: String,
    closed: Arc<AtomicBool>,
}

impl ConsoleRecognizer {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
            prompt: prompt.into(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once stdin reached EOF
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    fn name(&self) -> &str {
        "console"
    }

    async fn start(&self, settings: &RecognitionSettings) -> Result<RecognitionStream, SpeechError> {
        let (mut feed, stream) = RecognitionStream::channel(8);

        if self.is_closed() {
            feed.send(SpeechEvent::End).await;
            return Ok(stream);
        }

        let lines = self.lines.clone();
        let prompt = self.prompt.clone();
        let closed = self.closed.clone();
        let continuous = settings.continuous;

        tokio::spawn(async move {
            loop {
                print!("{}", prompt);
                let _ = std::io::stdout().flush();

                let line = {
                    let mut guard = lines.lock().await;
                    tokio::select! {
                        _ = feed.aborted() => return,
                        line = guard.next_line() => line,
                    }
                };

                match line {
                    Ok(Some(text)) => {
                        let text = text.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        let event = SpeechEvent::Final {
                            transcript: text,
                            confidence: Some(1.0),
                        };
                        if !feed.send(event).await {
                            return;
                        }
                        if !continuous {
                            feed.send(SpeechEvent::End).await;
                            return;
                        }
                    }
                    Ok(None) => {
                        closed.store(true, Ordering::SeqCst);
                        feed.send(SpeechEvent::End).await;
                        return;
                    }
                    Err(e) => {
                        feed.send(SpeechEvent::Error(SpeechError::Service(e.to_string())))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(stream)
    }
}

/// Synthesizer that prints responses
pub struct ConsoleSynthesizer {
    speaker: String,
}

impl ConsoleSynthesizer {
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ConsoleSynthesizer {
    async fn speak(&self, text: &str, _voice: &VoiceSettings) -> Result<Utterance, SpeechError> {
        println!("{}: {}", self.speaker, text);
        Ok(Utterance::completed())
    }

    fn cancel(&self) {}
}
