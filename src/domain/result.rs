//! Command results and composed responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::intent::{IntentAction, Priority};

/// Outcome of executing one intent. Produced once, never mutated after return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,

    /// Domain data returned by the handler
    #[serde(default)]
    pub data: Value,
    pub message: String,

    /// UI component the result should be rendered with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_component: Option<String>,
    #[serde(default)]
    pub requires_follow_up: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_prompt: Option<String>,
}

impl CommandResult {
    /// Successful result with a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Value::Null,
            message: message.into(),
            visual_component: None,
            requires_follow_up: false,
            follow_up_prompt: None,
        }
    }

    /// Failed result with a description of what went wrong
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    /// Result for an action nobody handles
    pub fn unsupported(action: IntentAction) -> Self {
        Self::failure(format!("The command {} is not supported yet", action))
            .with_data(serde_json::json!({ "unsupported": action.as_str() }))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_visual(mut self, component: impl Into<String>) -> Self {
        self.visual_component = Some(component.into());
        self
    }

    /// Ask the user something after this result is spoken
    pub fn with_follow_up(mut self, prompt: impl Into<String>) -> Self {
        self.requires_follow_up = true;
        self.follow_up_prompt = Some(prompt.into());
        self
    }
}

/// What kind of utterance a response is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Answer,
    Confirmation,
    Clarification,
    Error,
    Alert,
}

/// A response ready to be spoken and displayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Text for the speech synthesizer
    pub text: String,

    /// Text for the transcript panel
    pub display_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub priority: Priority,
    pub kind: ResponseKind,

    /// The pipeline must listen again after speaking this
    pub expects_reply: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_message() {
        let result = CommandResult::failure("database offline");
        assert!(!result.success);
        assert_eq!(result.message, "database offline");
        assert!(!result.requires_follow_up);
    }

    #[test]
    fn test_unsupported_names_action() {
        let result = CommandResult::unsupported(IntentAction::Update);
        assert!(!result.success);
        assert!(result.message.contains("not supported"));
        assert_eq!(result.data["unsupported"], "UPDATE");
    }

    #[test]
    fn test_follow_up() {
        let result = CommandResult::ok("Logged breakfast").with_follow_up("How much did Max eat?");
        assert!(result.requires_follow_up);
        assert_eq!(result.follow_up_prompt.as_deref(), Some("How much did Max eat?"));
    }
}
