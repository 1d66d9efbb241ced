//! Conversation context snapshot.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intent::{Entity, ParsedIntent};

/// Reference to a pet the conversation is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetRef {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
}

impl PetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            species: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            species: None,
        }
    }

    /// Name if known, otherwise the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Short-term conversational state.
///
/// Values handed out by `ContextManager::get_context` are snapshots;
/// mutating them has no effect on the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    /// Most recent first
    pub previous_intents: Vec<ParsedIntent>,
    pub active_pet: Option<PetRef>,
    pub current_page: String,
    pub recent_entities: Vec<Entity>,
    pub turn_count: u64,

    /// Keys multi-turn continuity with the completion service
    pub conversation_id: Uuid,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self {
            previous_intents: Vec::new(),
            active_pet: None,
            current_page: "dashboard".to_string(),
            recent_entities: Vec::new(),
            turn_count: 0,
            conversation_id: Uuid::new_v4(),
        }
    }
}

impl ConversationContext {
    /// The intent recorded most recently
    pub fn last_intent(&self) -> Option<&ParsedIntent> {
        self.previous_intents.first()
    }

    /// One-paragraph summary for the completion prompt
    pub fn condensed(&self, max_intents: usize) -> String {
        let mut parts = vec![format!("Current page: {}", self.current_page)];

        if let Some(pet) = &self.active_pet {
            parts.push(format!("Active pet: {} (id {})", pet.display_name(), pet.id));
        }

        let recent: Vec<String> = self
            .previous_intents
            .iter()
            .take(max_intents)
            .map(|i| match &i.target {
                Some(target) => format!("{} {}", i.action, target),
                None => i.action.to_string(),
            })
            .collect();
        if !recent.is_empty() {
            parts.push(format!("Recent requests: {}", recent.join("; ")));
        }

        parts.join(". ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntentAction;

    #[test]
    fn test_condensed_summary() {
        let mut ctx = ConversationContext {
            active_pet: Some(PetRef::named("p1", "Max")),
            ..Default::default()
        };
        ctx.previous_intents
            .push(ParsedIntent::new(IntentAction::Navigate, 0.9).with_target("feeding"));
        ctx.previous_intents.push(ParsedIntent::new(IntentAction::Help, 0.9));

        let summary = ctx.condensed(1);
        assert!(summary.contains("Current page: dashboard"));
        assert!(summary.contains("Active pet: Max (id p1)"));
        assert!(summary.contains("NAVIGATE feeding"));
        assert!(!summary.contains("HELP"));
    }
}
