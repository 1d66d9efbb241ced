//! Conversational logic.
//!
//! This module contains:
//! - Context: Short-term conversation memory
//! - IntentParser: Completion service with a local fallback parser
//! - Router: Intent dispatch and built-in handlers
//! - Composer: Spoken/displayed responses
//! - Alerts: Proactive reminders, rules and persistence
//! - Session: The controller that chains every stage

pub mod alert_rules;
pub mod alerts;
pub mod composer;
pub mod context;
pub mod fallback;
pub mod handlers;
pub mod intent_parser;
pub mod router;
pub mod session;
pub mod triage;

// Re-export commonly used types
pub use alert_rules::{
    AlertRule, Appointment, AppointmentReminderRule, FeedingOverdueRule, MedicationReminderRule,
    MedicationSchedule,
};
pub use alerts::{AlertError, CheckReport, ProactiveAlertManager, ScheduleOutcome, ALERTS_KEY};
pub use composer::ResponseComposer;
pub use context::{ContextManager, ManualAction};
pub use handlers::register_builtin_handlers;
pub use intent_parser::IntentParser;
pub use router::{handler_fn, CommandHandler, CommandInfo, CommandRouter};
pub use session::{SessionError, SessionServices, TurnOutcome, VoiceSession, HANDS_FREE_KEY};
pub use triage::TriageLevel;
