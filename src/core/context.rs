//! Short-term conversational state.
//!
//! One `ContextManager` backs one session. Voice turns and manual UI actions
//! both go through `update_context`, so neither path can overwrite state the
//! other just wrote.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::ContextSettings;
use crate::domain::{
    ConversationContext, Entity, EntityKind, IntentAction, IntentSource, ParsedIntent, PetRef,
};

/// A UI action the user took without speaking
#[derive(Debug, Clone, PartialEq)]
pub struct ManualAction {
    pub action: IntentAction,
    pub target: Option<String>,
    pub parameters: BTreeMap<String, Value>,
}

impl ManualAction {
    pub fn new(action: IntentAction) -> Self {
        Self {
            action,
            target: None,
            parameters: BTreeMap::new(),
        }
    }

    /// Shorthand for opening a page
    pub fn navigate(page: impl Into<String>) -> Self {
        Self::new(IntentAction::Navigate).with_target(page)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Owner of the session's `ConversationContext`
pub struct ContextManager {
    state: Mutex<ConversationContext>,
    limits: ContextSettings,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(ContextSettings::default())
    }
}

impl ContextManager {
    pub fn new(limits: ContextSettings) -> Self {
        Self {
            state: Mutex::new(ConversationContext::default()),
            limits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationContext> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read-only snapshot
    pub fn get_context(&self) -> ConversationContext {
        self.lock().clone()
    }

    /// Record a turn
    pub fn update_context(&self, intent: &ParsedIntent) {
        let mut ctx = self.lock();

        ctx.previous_intents.insert(0, intent.clone());
        ctx.previous_intents.truncate(self.limits.max_intents);
        ctx.turn_count += 1;

        for entity in &intent.entities {
            push_entity(&mut ctx, entity.clone(), self.limits.max_entities);
        }

        if intent.action == IntentAction::Navigate {
            if let Some(page) = &intent.target {
                ctx.current_page = page.clone();
            }
        }

        if let Some(pet_id) = intent.param_str("pet_id") {
            let name = intent
                .param_str("pet_name")
                .map(str::to_string)
                .or_else(|| intent.entity(EntityKind::Pet).map(|e| e.value.clone()));
            let keep_existing = ctx.active_pet.as_ref().is_some_and(|p| p.id == pet_id);
            if !keep_existing || name.is_some() {
                ctx.active_pet = Some(PetRef {
                    id: pet_id.to_string(),
                    name,
                    species: None,
                });
            }
        }

        debug!(
            action = %intent.action,
            turn = ctx.turn_count,
            page = %ctx.current_page,
            "context updated"
        );
    }

    /// Funnel a UI action through the same path as voice turns
    pub fn notify_manual_action(&self, action: ManualAction) -> ParsedIntent {
        let mut intent = ParsedIntent::new(action.action, 1.0).with_source(IntentSource::Manual);
        if let Some(target) = action.target {
            intent = intent.with_target(target);
        }
        for (key, value) in action.parameters {
            intent = intent.with_parameter(key, value);
        }

        self.update_context(&intent);
        intent
    }

    pub fn set_active_pet(&self, pet: PetRef) {
        self.lock().active_pet = Some(pet);
    }

    pub fn clear_active_pet(&self) {
        self.lock().active_pet = None;
    }

    pub fn set_current_page(&self, page: impl Into<String>) {
        self.lock().current_page = page.into();
    }

    pub fn add_entity(&self, entity: Entity) {
        let mut ctx = self.lock();
        push_entity(&mut ctx, entity, self.limits.max_entities);
    }

    pub fn get_turn_count(&self) -> u64 {
        self.lock().turn_count
    }

    /// Forget the conversation. The turn count keeps increasing.
    pub fn clear_context(&self) {
        let mut ctx = self.lock();
        let turn_count = ctx.turn_count;
        *ctx = ConversationContext {
            turn_count,
            conversation_id: Uuid::new_v4(),
            ..ConversationContext::default()
        };
    }
}

/// Most recent first; re-mentioning an entity moves it to the front
fn push_entity(ctx: &mut ConversationContext, entity: Entity, max: usize) {
    ctx.recent_entities
        .retain(|e| !(e.kind == entity.kind && e.value.eq_ignore_ascii_case(&entity.value)));
    ctx.recent_entities.insert(0, entity);
    ctx.recent_entities.truncate(max);
}
