//! Intent dispatch.
//!
//! Handlers are opaque async functions. `execute_command` never fails: a
//! handler error or panic becomes a negative `CommandResult`, and an action
//! without a handler gets a "not supported" result.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{CommandResult, IntentAction, ParsedIntent};

/// Executes one kind of intent
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Shown by HELP
    fn description(&self) -> &str;

    async fn handle(&self, intent: &ParsedIntent) -> Result<CommandResult>;
}

struct FnHandler<F> {
    description: String,
    f: F,
}

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(ParsedIntent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<CommandResult>> + Send,
{
    fn description(&self) -> &str {
        &self.description
    }

    async fn handle(&self, intent: &ParsedIntent) -> Result<CommandResult> {
        (self.f)(intent.clone()).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(description: impl Into<String>, f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(ParsedIntent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CommandResult>> + Send + 'static,
{
    Arc::new(FnHandler {
        description: description.into(),
        f,
    })
}

/// A registered command, as listed by HELP
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub action: IntentAction,
    pub description: String,
}

/// Routes intents to handlers
#[derive(Default)]
pub struct CommandRouter {
    handlers: RwLock<BTreeMap<IntentAction, Arc<dyn CommandHandler>>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous handler
    pub fn register_handler(
        &self,
        action: IntentAction,
        handler: Arc<dyn CommandHandler>,
    ) -> Option<Arc<dyn CommandHandler>> {
        debug!(%action, description = handler.description(), "handler registered");
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(action, handler)
    }

    pub fn unregister_handler(&self, action: IntentAction) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&action)
    }

    pub fn has_handler(&self, action: IntentAction) -> bool {
        self.handler(action).is_some()
    }

    fn handler(&self, action: IntentAction) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&action)
            .cloned()
    }

    /// Registered commands in action order
    pub fn get_available_commands(&self) -> Vec<CommandInfo> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(action, handler)| CommandInfo {
                action: *action,
                description: handler.description().to_string(),
            })
            .collect()
    }

    /// Execute `intent`; never fails
    #[instrument(skip(self, intent), fields(action = %intent.action, intent_id = %intent.intent_id))]
    pub async fn execute_command(&self, intent: &ParsedIntent) -> CommandResult {
        if let Err(reason) = validate(intent) {
            warn!(%reason, "rejected intent");
            return CommandResult::failure(reason);
        }

        let Some(handler) = self.handler(intent.action) else {
            info!("no handler registered");
            return CommandResult::unsupported(intent.action);
        };

        // Run on its own task so a panicking handler cannot take the session down
        let owned = intent.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });

        match task.await {
            Ok(Ok(result)) => {
                debug!(success = result.success, "command finished");
                result
            }
            Ok(Err(e)) => {
                warn!("command failed: {:#}", e);
                CommandResult::failure(format!("{:#}", e))
            }
            Err(e) => {
                error!("command handler crashed: {}", e);
                CommandResult::failure("Something went wrong while running that command")
            }
        }
    }
}

fn validate(intent: &ParsedIntent) -> std::result::Result<(), String> {
    if intent.intent_id.trim().is_empty() {
        return Err("Invalid command: missing intent id".to_string());
    }
    if !intent.confidence.is_finite() {
        return Err("Invalid command: confidence is not a number".to_string());
    }
    if intent.action == IntentAction::Navigate && intent.target.as_deref().map_or(true, str::is_empty) {
        return Err("Where would you like to go?".to_string());
    }
    Ok(())
}
