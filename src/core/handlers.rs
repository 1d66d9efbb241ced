//! Built-in command handlers.
//!
//! Domain handlers (appointments, medications, feeding, health logs) belong
//! to the host application and may replace any of these.

use std::sync::{Arc, Weak};

use chrono::Utc;
use serde_json::json;

use crate::domain::{CommandResult, IntentAction, ParsedIntent};

use super::alerts::ProactiveAlertManager;
use super::context::ContextManager;
use super::router::{handler_fn, CommandRouter};
use super::triage::{self, TriageLevel};

/// Register NAVIGATE, HELP, QUERY, EMERGENCY and, with an alert manager,
/// ACKNOWLEDGE.
pub fn register_builtin_handlers(
    router: &Arc<CommandRouter>,
    context: Arc<ContextManager>,
    alerts: Option<Arc<ProactiveAlertManager>>,
) {
    router.register_handler(
        IntentAction::Navigate,
        handler_fn("Open a page", move |intent: ParsedIntent| {
            let context = context.clone();
            async move { Ok::<_, anyhow::Error>(navigate(&context, &intent)) }
        }),
    );

    let weak: Weak<CommandRouter> = Arc::downgrade(router);
    router.register_handler(
        IntentAction::Help,
        handler_fn("List what I can do", move |_| {
            let router = weak.clone();
            async move { Ok::<_, anyhow::Error>(help(router.upgrade().as_deref())) }
        }),
    );

    router.register_handler(
        IntentAction::Query,
        handler_fn("Answer a question", |intent: ParsedIntent| async move {
            Ok::<_, anyhow::Error>(query(&intent))
        }),
    );

    router.register_handler(
        IntentAction::Emergency,
        handler_fn("Triage an emergency", |intent: ParsedIntent| async move {
            Ok::<_, anyhow::Error>(emergency(&intent))
        }),
    );

    if let Some(alerts) = alerts {
        router.register_handler(
            IntentAction::Acknowledge,
            handler_fn("Dismiss a reminder", move |intent: ParsedIntent| {
                let alerts = alerts.clone();
                async move { acknowledge(&alerts, &intent).await }
            }),
        );
    }
}

fn navigate(context: &ContextManager, intent: &ParsedIntent) -> CommandResult {
    let page = intent.target.clone().unwrap_or_default();
    context.set_current_page(page.clone());

    CommandResult::ok(format!("Opening {}.", page))
        .with_visual("Page")
        .with_data(json!({ "page": page }))
}

fn help(router: Option<&CommandRouter>) -> CommandResult {
    let commands = router
        .map(CommandRouter::get_available_commands)
        .unwrap_or_default();
    let described: Vec<String> = commands
        .iter()
        .filter(|c| c.action != IntentAction::Help)
        .map(|c| c.description.to_lowercase())
        .collect();

    let message = if described.is_empty() {
        "I can't do much yet.".to_string()
    } else {
        format!("I can {}.", join_or(&described))
    };

    CommandResult::ok(message)
        .with_visual("CommandList")
        .with_data(json!({ "commands": commands }))
}

fn query(intent: &ParsedIntent) -> CommandResult {
    match intent.param_str("answer") {
        Some(answer) => CommandResult::ok(answer),
        None if intent.is_fallback() => CommandResult::failure(
            "I can't look that up right now. Try again in a moment",
        ),
        None => CommandResult::ok("I don't know that yet."),
    }
}

fn emergency(intent: &ParsedIntent) -> CommandResult {
    let level = match intent.param_str("triage") {
        Some("emergency") => TriageLevel::Emergency,
        Some("urgent") => TriageLevel::Urgent,
        Some("routine") => TriageLevel::Routine,
        _ => triage::classify(&intent.transcript),
    };
    let symptoms = triage::symptoms(&intent.transcript);

    CommandResult::ok(triage::advice(level))
        .with_visual("Triage")
        .with_data(json!({ "level": level, "symptoms": symptoms }))
}

async fn acknowledge(
    alerts: &ProactiveAlertManager,
    intent: &ParsedIntent,
) -> anyhow::Result<CommandResult> {
    let id = match intent.param_str("alert_id") {
        Some(id) => Some(id.to_string()),
        None => alerts.latest_due_alert(Utc::now()).await.map(|a| a.id),
    };

    let Some(id) = id else {
        return Ok(CommandResult::ok("Okay."));
    };

    if alerts.acknowledge_alert(&id).await? {
        Ok(CommandResult::ok("Got it, I'll mark that as done.").with_data(json!({ "alertId": id })))
    } else {
        Ok(CommandResult::ok("Okay."))
    }
}

/// "a, b or c"
fn join_or(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} or {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::config::AlertSettings;
    use crate::domain::{AlertType, ProactiveAlert};

    fn router_with(alerts: Option<Arc<ProactiveAlertManager>>) -> (Arc<CommandRouter>, Arc<ContextManager>) {
        let router = Arc::new(CommandRouter::new());
        let context = Arc::new(ContextManager::default());
        register_builtin_handlers(&router, context.clone(), alerts);
        (router, context)
    }

    #[tokio::test]
    async fn test_navigate_sets_page() {
        let (router, context) = router_with(None);
        let intent = ParsedIntent::new(IntentAction::Navigate, 0.9).with_target("medications");

        let result = router.execute_command(&intent).await;
        assert!(result.success);
        assert_eq!(result.visual_component.as_deref(), Some("Page"));
        assert_eq!(context.get_context().current_page, "medications");
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let (router, _) = router_with(None);
        let result = router
            .execute_command(&ParsedIntent::new(IntentAction::Help, 1.0))
            .await;

        assert!(result.success);
        assert!(result.message.contains("open a page"));
        assert!(result.message.contains(" or "));
    }

    #[tokio::test]
    async fn test_query_returns_answer() {
        let (router, _) = router_with(None);
        let intent = ParsedIntent::new(IntentAction::Query, 0.9).with_parameter("answer", "On Friday.");

        let result = router.execute_command(&intent).await;
        assert_eq!(result.message, "On Friday.");
    }

    #[tokio::test]
    async fn test_emergency_uses_triage() {
        let (router, _) = router_with(None);
        let intent = ParsedIntent::new(IntentAction::Emergency, 0.8)
            .with_transcript("my dog ate chocolate and is having a seizure");

        let result = router.execute_command(&intent).await;
        assert!(result.success);
        assert_eq!(result.data["level"], "emergency");
        assert!(result.message.contains("emergency"));
    }

    #[tokio::test]
    async fn test_acknowledge_latest_due() {
        let alerts = ProactiveAlertManager::open(Arc::new(MemoryStore::new()), AlertSettings::default())
            .await
            .unwrap();
        let alert = ProactiveAlert::new(
            AlertType::MedicationReminder,
            "p1",
            "Pill time",
            Utc::now() - chrono::Duration::minutes(1),
        );
        alerts.schedule_alert(alert.clone()).await.unwrap();

        let (router, _) = router_with(Some(alerts.clone()));
        let result = router
            .execute_command(&ParsedIntent::new(IntentAction::Acknowledge, 0.9))
            .await;

        assert!(result.success);
        assert_eq!(result.data["alertId"], alert.id);
        assert!(alerts.get_pending_alerts().await.is_empty());
    }

    #[test]
    fn test_join_or() {
        let items: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(join_or(&items), "a, b or c");
        assert_eq!(join_or(&items[..1]), "a");
    }
}
