//! Turns command results into spoken/displayed responses.

use std::fmt::Display;

use serde_json::{json, Value};

use crate::domain::{
    CommandResult, IntentAction, ParsedIntent, Priority, ProactiveAlert, Response, ResponseKind,
    FALLBACK_AMBIGUITY,
};

/// Spoken text longer than this is cut at a sentence boundary
pub const DEFAULT_MAX_SPOKEN_CHARS: usize = 320;

const GENERIC_CLARIFICATION: &str = "Could you tell me a bit more?";

#[derive(Debug, Clone)]
pub struct ResponseComposer {
    max_spoken_chars: usize,
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self {
            max_spoken_chars: DEFAULT_MAX_SPOKEN_CHARS,
        }
    }
}

impl ResponseComposer {
    pub fn new(max_spoken_chars: usize) -> Self {
        Self {
            max_spoken_chars: max_spoken_chars.max(40),
        }
    }

    pub fn compose_response(&self, result: &CommandResult) -> Response {
        if !result.success {
            return self.compose_error_response(&result.message);
        }

        let mut display = if result.message.trim().is_empty() {
            "Done.".to_string()
        } else {
            result.message.trim().to_string()
        };

        let follow_up = result
            .follow_up_prompt
            .as_deref()
            .filter(|_| result.requires_follow_up);
        if let Some(prompt) = follow_up {
            display.push(' ');
            display.push_str(prompt);
        }

        let visual_data = match &result.visual_component {
            Some(component) => Some(json!({ "component": component, "data": result.data })),
            None if !result.data.is_null() => Some(result.data.clone()),
            None => None,
        };

        Response {
            text: self.spoken(&display),
            display_text: display,
            visual_data,
            audio_url: None,
            priority: Priority::Normal,
            kind: ResponseKind::Answer,
            expects_reply: follow_up.is_some(),
        }
    }

    pub fn compose_error_response(&self, error: impl Display) -> Response {
        let detail = error.to_string();
        let display = if detail.trim().is_empty() {
            "Sorry, something went wrong.".to_string()
        } else {
            format!("Sorry, I couldn't do that. {}", sentence(detail.trim()))
        };

        Response {
            text: self.spoken(&display),
            display_text: display,
            visual_data: None,
            audio_url: None,
            priority: Priority::Normal,
            kind: ResponseKind::Error,
            expects_reply: false,
        }
    }

    /// Ask before executing a consequential intent
    pub fn compose_confirmation(&self, intent: &ParsedIntent) -> Response {
        let display = format!(
            "Just to confirm, you want me to {}. Should I go ahead?",
            describe(intent)
        );

        Response {
            text: self.spoken(&display),
            display_text: display,
            visual_data: Some(json!({
                "intentId": intent.intent_id,
                "action": intent.action,
                "target": intent.target,
            })),
            audio_url: None,
            priority: intent.priority,
            kind: ResponseKind::Confirmation,
            expects_reply: true,
        }
    }

    /// Ask the user to resolve ambiguities. The fallback note is not asked.
    pub fn compose_clarification(&self, ambiguities: &[String]) -> Response {
        let questions: Vec<&str> = ambiguities
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty() && *a != FALLBACK_AMBIGUITY)
            .collect();

        let display = if questions.is_empty() {
            GENERIC_CLARIFICATION.to_string()
        } else {
            questions.join(" Also, ")
        };

        Response {
            text: self.spoken(&display),
            display_text: display,
            visual_data: None,
            audio_url: None,
            priority: Priority::Normal,
            kind: ResponseKind::Clarification,
            expects_reply: true,
        }
    }

    /// Announce a due alert
    pub fn compose_alert(&self, alert: &ProactiveAlert) -> Response {
        let mut display = sentence(alert.message.trim());
        if alert.requires_acknowledgment {
            display.push_str(" Say \"got it\" when it's done.");
        }

        let mut visual = alert.visual_data.clone().unwrap_or(Value::Null);
        if let Value::Object(map) = &mut visual {
            map.insert("alertId".into(), Value::String(alert.id.clone()));
        } else {
            visual = json!({ "alertId": alert.id });
        }

        Response {
            text: self.spoken(&display),
            display_text: display,
            visual_data: Some(visual),
            audio_url: None,
            priority: alert.priority,
            kind: ResponseKind::Alert,
            expects_reply: alert.requires_acknowledgment,
        }
    }

    fn spoken(&self, display: &str) -> String {
        truncate_spoken(&strip_markdown(display), self.max_spoken_chars)
    }
}

/// "schedule an appointment for Max tomorrow at 3pm"
fn describe(intent: &ParsedIntent) -> String {
    let verb = match intent.action {
        IntentAction::Navigate => "open",
        IntentAction::LogData => "log",
        IntentAction::Query => "look up",
        IntentAction::Schedule => "schedule",
        IntentAction::Update => "update",
        IntentAction::Help => "explain",
        IntentAction::Acknowledge => "dismiss",
        IntentAction::Emergency => "get help with",
        IntentAction::Confirm | IntentAction::Cancel | IntentAction::Unknown => "handle",
    };

    let mut parts = vec![verb.to_string()];
    match (&intent.target, intent.action) {
        (Some(target), IntentAction::Schedule) => {
            let article = if target.starts_with(['a', 'e', 'i', 'o', 'u']) {
                "an"
            } else {
                "a"
            };
            parts.push(format!("{} {}", article, target));
        }
        (Some(target), _) => parts.push(target.clone()),
        (None, _) => parts.push("that".to_string()),
    }

    for key in ["amount", "food", "medication"] {
        if let Some(value) = intent.param_str(key) {
            parts.push(format!("({})", value));
            break;
        }
    }
    if let Some(pet) = intent.param_str("pet_name") {
        parts.push(format!("for {}", pet));
    }
    if let Some(date) = intent.param_str("date") {
        parts.push(date.to_string());
    }
    if let Some(time) = intent.param_str("time") {
        parts.push(format!("at {}", time));
    }

    parts.join(" ")
}

/// Ensure terminal punctuation
fn sentence(text: &str) -> String {
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{}.", text)
    }
}

/// Drop markdown emphasis, headings and code marks; keep link text
pub fn strip_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' | '_' | '`' | '#' => {}
            '[' => {
                let label: String = chars.by_ref().take_while(|&c| c != ']').collect();
                out.push_str(&label);
                if chars.peek() == Some(&'(') {
                    chars.by_ref().take_while(|&c| c != ')').for_each(drop);
                }
            }
            _ => out.push(c),
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut at the last sentence end before `max` chars, else at a word
pub fn truncate_spoken(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..cut];

    if let Some(end) = head.rfind(['.', '!', '?']) {
        if end > cut / 2 {
            return head[..=end].to_string();
        }
    }

    match head.rfind(' ') {
        Some(space) => format!("{}…", head[..space].trim_end()),
        None => format!("{}…", head),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertType;
    use chrono::Utc;

    #[test]
    fn test_success_response() {
        let composer = ResponseComposer::default();
        let result = CommandResult::ok("Logged **2 cups** of kibble for Max")
            .with_visual("FeedingLog")
            .with_data(json!({ "amount": "2 cups" }));

        let response = composer.compose_response(&result);
        assert_eq!(response.kind, ResponseKind::Answer);
        assert_eq!(response.text, "Logged 2 cups of kibble for Max");
        assert_eq!(response.visual_data.unwrap()["component"], "FeedingLog");
        assert!(!response.expects_reply);
    }

    #[test]
    fn test_failure_becomes_error() {
        let composer = ResponseComposer::default();
        let response = composer.compose_response(&CommandResult::failure("database offline"));

        assert_eq!(response.kind, ResponseKind::Error);
        assert!(response.text.contains("database offline"));
    }

    #[test]
    fn test_follow_up_expects_reply() {
        let composer = ResponseComposer::default();
        let result = CommandResult::ok("Logged breakfast.").with_follow_up("Did Max finish it?");

        let response = composer.compose_response(&result);
        assert!(response.expects_reply);
        assert!(response.display_text.ends_with("Did Max finish it?"));
    }

    #[test]
    fn test_confirmation_wording() {
        let composer = ResponseComposer::default();
        let intent = ParsedIntent::new(IntentAction::Schedule, 0.8)
            .with_target("appointment")
            .with_parameter("pet_name", "Max")
            .with_parameter("date", "tomorrow")
            .with_parameter("time", "3pm")
            .with_confirmation(true);

        let response = composer.compose_confirmation(&intent);
        assert_eq!(response.kind, ResponseKind::Confirmation);
        assert_eq!(
            response.display_text,
            "Just to confirm, you want me to schedule an appointment for Max tomorrow at 3pm. Should I go ahead?"
        );
        assert!(response.expects_reply);
    }

    #[test]
    fn test_clarification_skips_fallback_note() {
        let composer = ResponseComposer::default();
        let response = composer.compose_clarification(&[
            FALLBACK_AMBIGUITY.to_string(),
            "Which pet is this for?".to_string(),
        ]);

        assert_eq!(response.kind, ResponseKind::Clarification);
        assert_eq!(response.text, "Which pet is this for?");

        let generic = composer.compose_clarification(&[FALLBACK_AMBIGUITY.to_string()]);
        assert_eq!(generic.text, GENERIC_CLARIFICATION);
    }

    #[test]
    fn test_alert_response() {
        let composer = ResponseComposer::default();
        let alert = ProactiveAlert::new(AlertType::MedicationReminder, "p1", "Time for Max's pill", Utc::now());

        let response = composer.compose_alert(&alert);
        assert_eq!(response.kind, ResponseKind::Alert);
        assert_eq!(response.priority, Priority::High);
        assert_eq!(response.visual_data.unwrap()["alertId"], alert.id);
        assert!(response.expects_reply);
    }

    #[test]
    fn test_markdown_and_truncation() {
        assert_eq!(strip_markdown("See [the vet](http://x.y) *today*"), "See the vet today");

        let long = "First sentence here. Second sentence goes on and on and on.";
        assert_eq!(truncate_spoken(long, 30), "First sentence here.");
        assert_eq!(truncate_spoken("one two three four", 9), "one two…");
    }
}
