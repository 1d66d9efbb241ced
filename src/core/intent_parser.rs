//! Transcript + context -> `ParsedIntent`, under a hard latency budget.
//!
//! The completion service gets the budget minus a small reserve. Whatever
//! happens to that call (slow, failing, absent), the local fallback parser
//! answers inside the budget.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::adapters::{ChatReply, ChatRequest, CompletionService};
use crate::config::MAX_PARSE_BUDGET_MS;
use crate::domain::{ConversationContext, IntentAction, ParsedIntent, Priority};

use super::fallback;

/// Time kept back for the fallback parse
const FALLBACK_RESERVE: Duration = Duration::from_millis(50);

/// How many recent intents the prompt carries
const PROMPT_HISTORY: usize = 5;

/// Asked when the service wants clarification but gave no wording
const DEFAULT_CLARIFICATION: &str = "Could you say that another way?";

/// Intent extraction with a guaranteed local fallback
pub struct IntentParser {
    service: Option<Arc<dyn CompletionService>>,
    budget: Duration,
}

impl IntentParser {
    /// `budget` is clamped to one second
    pub fn new(service: Option<Arc<dyn CompletionService>>, budget: Duration) -> Self {
        Self {
            service,
            budget: budget.min(Duration::from_millis(MAX_PARSE_BUDGET_MS)),
        }
    }

    /// Parser that never calls out
    pub fn offline() -> Self {
        Self::new(None, Duration::from_millis(MAX_PARSE_BUDGET_MS))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn has_service(&self) -> bool {
        self.service.is_some()
    }

    /// Never fails and never exceeds the budget
    #[instrument(skip(self, transcript, context), fields(turn = context.turn_count))]
    pub async fn parse_intent(&self, transcript: &str, context: &ConversationContext) -> ParsedIntent {
        let transcript = transcript.trim();
        debug!(%transcript, "parsing intent");

        let Some(service) = &self.service else {
            return fallback::parse(transcript, context);
        };
        if transcript.is_empty() {
            return fallback::parse(transcript, context);
        }

        let request = build_request(transcript, context);
        let service_budget = self.budget.saturating_sub(FALLBACK_RESERVE);

        match tokio::time::timeout(service_budget, service.chat(request)).await {
            Ok(Ok(reply)) => map_reply(reply, transcript),
            Ok(Err(e)) => {
                warn!(service = service.name(), "completion failed, using fallback: {:#}", e);
                fallback::parse(transcript, context)
            }
            Err(_) => {
                warn!(
                    service = service.name(),
                    budget_ms = service_budget.as_millis() as u64,
                    "completion timed out, using fallback"
                );
                fallback::parse(transcript, context)
            }
        }
    }
}

fn build_request(transcript: &str, context: &ConversationContext) -> ChatRequest {
    let message = format!(
        "You are JoJo, a pet-care voice assistant. Identify what the user wants.\n\
         Context: {}\n\
         User said: \"{}\"",
        context.condensed(PROMPT_HISTORY),
        transcript
    );

    let pet_context = context.active_pet.as_ref().map(|pet| {
        json!({
            "id": pet.id,
            "name": pet.name,
            "species": pet.species,
        })
    });

    ChatRequest {
        message,
        conversation_id: Some(context.conversation_id.to_string()),
        pet_context,
    }
}

/// Structured intent first, then `action_taken`, else a plain answer
fn map_reply(reply: ChatReply, transcript: &str) -> ParsedIntent {
    let mut intent = match &reply.intent {
        Some(structured) => {
            let action = structured
                .action
                .parse()
                .unwrap_or(IntentAction::Unknown);
            let mut intent = ParsedIntent::new(action, structured.confidence.unwrap_or(0.8))
                .with_confirmation(structured.requires_confirmation);

            if let Some(target) = &structured.target {
                intent = intent.with_target(target.clone());
            }
            for (key, value) in &structured.parameters {
                intent = intent.with_parameter(key.clone(), value.clone());
            }
            if let Some(priority) = structured.priority.as_deref().and_then(|p| p.parse::<Priority>().ok()) {
                intent = intent.with_priority(priority);
            }
            for entity in &structured.entities {
                intent = intent.with_entity(entity.clone());
            }
            for ambiguity in &structured.ambiguities {
                intent = intent.with_ambiguity(ambiguity.clone());
            }
            intent
        }
        None => {
            let action = reply
                .action_taken
                .as_deref()
                .and_then(|a| a.parse::<IntentAction>().ok())
                .unwrap_or(IntentAction::Query);
            ParsedIntent::new(action, 0.8)
        }
    };

    intent = intent.with_transcript(transcript);

    let answer = reply.response.trim();
    if !answer.is_empty() && reply.speak_response {
        intent = intent.with_parameter("answer", answer);
    }

    if reply.needs_clarification {
        let question = if answer.is_empty() {
            DEFAULT_CLARIFICATION
        } else {
            answer
        };
        intent = intent.with_ambiguity(question);
    }

    intent
}
