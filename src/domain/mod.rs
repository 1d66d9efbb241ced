//! Domain types for the JoJo voice pipeline.
//!
//! This module contains the core data structures:
//! - Intent: Structured commands extracted from speech
//! - Context: Short-term conversational state
//! - Result: Command results and composed responses
//! - Alert: Proactive, acknowledgment-tracked reminders
//! - Avatar: Feedback UI state

pub mod alert;
pub mod avatar;
pub mod context;
pub mod intent;
pub mod result;

// Re-export commonly used types
pub use alert::{generate_alert_id, AlertNotice, AlertStatus, AlertType, ProactiveAlert};
pub use avatar::AvatarState;
pub use context::{ConversationContext, PetRef};
pub use intent::{
    Entity, EntityKind, IntentAction, IntentSource, ParsedIntent, Priority, FALLBACK_AMBIGUITY,
};
pub use result::{CommandResult, Response, ResponseKind};
