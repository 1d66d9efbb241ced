//! Command-line interface for jojo.
//!
//! Provides commands for talking to the assistant from a terminal, trying
//! the intent parser and triage rules, managing proactive alerts and the
//! hands-free preference.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::adapters::{
    CompletionService, ConsoleRecognizer, ConsoleSynthesizer, FileStore, HttpCompletionService,
};
use crate::config::{self, ResolvedConfig};
use crate::core::session::{store_hands_free, stored_hands_free};
use crate::core::{triage, IntentParser, SessionServices, VoiceSession};

pub mod alerts;

/// jojo - Voice assistant pipeline for pet care
#[derive(Parser, Debug)]
#[command(name = "jojo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Talk to the assistant; each line typed is one utterance
    Chat {
        /// Never call the completion service
        #[arg(long)]
        offline: bool,
    },

    /// Parse one utterance and print the intent
    Parse {
        /// What the user said
        text: String,

        /// Use only the local fallback parser
        #[arg(long)]
        offline: bool,
    },

    /// Classify the severity of a described symptom
    Triage {
        /// Description of what is happening
        text: String,
    },

    /// Manage proactive alerts
    Alerts {
        #[command(subcommand)]
        command: alerts::AlertCommands,
    },

    /// Show or change the hands-free preference
    HandsFree {
        #[command(subcommand)]
        command: HandsFreeCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Hands-free preference subcommands
#[derive(Subcommand, Debug)]
pub enum HandsFreeCommands {
    /// Listen for the wake word continuously
    On,

    /// Only listen when asked
    Off,

    /// Show the stored preference
    Status,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Chat { offline } => chat(offline).await,
            Commands::Parse { text, offline } => parse(&text, offline).await,
            Commands::Triage { text } => {
                show_triage(&text);
                Ok(())
            }
            Commands::Alerts { command } => alerts::execute(command).await,
            Commands::HandsFree { command } => hands_free(command).await,
            Commands::Config => show_config(),
        }
    }
}

fn completion_service(cfg: &ResolvedConfig, offline: bool) -> Option<Arc<dyn CompletionService>> {
    if offline {
        return None;
    }
    HttpCompletionService::from_config(cfg).map(|s| Arc::new(s) as Arc<dyn CompletionService>)
}

/// Interactive console session
async fn chat(offline: bool) -> Result<()> {
    let cfg = config::config()?;
    let store = Arc::new(FileStore::open_default()?);
    let recognizer = Arc::new(ConsoleRecognizer::new("you> "));

    let mut services = SessionServices::new(
        recognizer.clone(),
        Arc::new(ConsoleSynthesizer::new("jojo")),
        store,
    );
    if let Some(service) = completion_service(cfg, offline) {
        services = services.with_completion(service);
    }

    let session = VoiceSession::open(cfg, services)
        .await
        .context("Failed to start voice session")?;

    eprintln!("Type what you would say to JoJo. Ctrl-D or Ctrl-C to quit.");

    loop {
        let report = session.alerts().check_now(Utc::now()).await?;
        for alert in &report.fired {
            if alert.requires_acknowledgment {
                session.announce_alert(alert).await;
            }
        }

        tokio::select! {
            turn = session.handle_activation() => {
                if let Err(e) = turn {
                    eprintln!("⚠️  {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            }
        }

        if recognizer.is_closed() {
            break;
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Parse one utterance and print the intent as JSON
async fn parse(text: &str, offline: bool) -> Result<()> {
    let cfg = config::config()?;
    let parser = IntentParser::new(completion_service(cfg, offline), cfg.intent.budget);

    let started = std::time::Instant::now();
    let intent = parser
        .parse_intent(text, &crate::domain::ConversationContext::default())
        .await;
    let elapsed = started.elapsed();

    println!(
        "{}",
        serde_json::to_string_pretty(&intent).context("Failed to serialize intent")?
    );
    eprintln!(
        "[{} in {}ms{}]",
        intent.action,
        elapsed.as_millis(),
        if intent.is_fallback() { ", fallback" } else { "" }
    );
    Ok(())
}

fn show_triage(text: &str) {
    let level = triage::classify(text);
    let symptoms = triage::symptoms(text);

    println!("Level:    {}", level);
    if symptoms.is_empty() {
        println!("Symptoms: (none recognised)");
    } else {
        println!("Symptoms: {}", symptoms.join(", "));
    }
    println!();
    println!("{}", triage::advice(level));
}

async fn hands_free(command: HandsFreeCommands) -> Result<()> {
    let store = FileStore::open_default()?;

    match command {
        HandsFreeCommands::On => {
            store_hands_free(&store, true)
                .await
                .context("Failed to save hands-free preference")?;
            println!("✓ Hands-free mode on. JoJo listens for \"{}\".", config::config()?.wake_word.phrase);
        }
        HandsFreeCommands::Off => {
            store_hands_free(&store, false)
                .await
                .context("Failed to save hands-free preference")?;
            println!("✓ Hands-free mode off.");
        }
        HandsFreeCommands::Status => {
            let enabled = stored_hands_free(&store)
                .await
                .context("Failed to read hands-free preference")?;
            println!("Hands-free: {}", if enabled { "on" } else { "off" });
        }
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("══════════════════════════════════════════════════════════════");
    println!("  JoJo Configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", config::store_path()?.display());
    println!();
    println!("Wake word:");
    println!("  Phrase:         {}", cfg.wake_word.phrase);
    println!("  Sensitivity:    {:.2}", cfg.wake_word.sensitivity);
    println!("  Debounce:       {}ms", cfg.wake_word.debounce.as_millis());
    println!("  Restart delay:  {}ms", cfg.wake_word.restart_delay.as_millis());
    println!();
    println!("Recognition:");
    println!("  Language:    {}", cfg.recognition.language);
    println!("  Continuous:  {}", cfg.recognition.continuous);
    println!("  Timeout:     {}s", cfg.recognition.timeout.as_secs());
    println!();
    println!("Intent parsing:");
    println!("  Budget:      {}ms", cfg.intent.budget.as_millis());
    println!(
        "  Completion:  {}",
        cfg.intent
            .completion_url
            .as_deref()
            .unwrap_or("(none - fallback parsing only)")
    );
    println!();
    println!("Context:");
    println!("  Max intents:   {}", cfg.context.max_intents);
    println!("  Max entities:  {}", cfg.context.max_entities);
    println!();
    println!("Alerts:");
    println!("  Check interval:  {}s", cfg.alerts.check_interval.as_secs());
    println!("  Expire after:    {}h", cfg.alerts.expire_after.num_hours());
    println!();
    println!("Session:");
    println!("  Max follow-ups:  {}", cfg.max_follow_ups);

    Ok(())
}
