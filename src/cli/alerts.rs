//! Alert CLI commands.
//!
//! - `jojo alerts list` - Show pending alerts
//! - `jojo alerts schedule` - Add an alert
//! - `jojo alerts ack <id>` - Acknowledge an alert
//! - `jojo alerts expire <id>` - Give up on an alert
//! - `jojo alerts check` - Run one scheduling pass now

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Subcommand, ValueEnum};

use crate::adapters::FileStore;
use crate::config;
use crate::core::{ProactiveAlertManager, ScheduleOutcome};
use crate::domain::{AlertType, Priority, ProactiveAlert};

/// Alert subcommands
#[derive(Subcommand, Debug)]
pub enum AlertCommands {
    /// List pending alerts, earliest first
    List,

    /// Schedule an alert
    Schedule {
        /// Kind of alert
        #[arg(short = 't', long = "type", value_enum, default_value = "custom")]
        alert_type: AlertKind,

        /// Pet the alert is about
        #[arg(short, long)]
        pet: String,

        /// What to say
        #[arg(short, long)]
        message: String,

        /// When (RFC 3339); defaults to now
        #[arg(long, conflicts_with = "in_minutes")]
        at: Option<String>,

        /// When, in minutes from now
        #[arg(long)]
        in_minutes: Option<i64>,

        /// low, normal or high (defaults by alert type)
        #[arg(long)]
        priority: Option<String>,

        /// Drop the alert once announced instead of waiting for "got it"
        #[arg(long)]
        no_ack: bool,
    },

    /// Acknowledge a pending alert
    Ack {
        /// Alert ID
        id: String,
    },

    /// Expire a pending alert without acknowledging it
    Expire {
        /// Alert ID
        id: String,
    },

    /// Run one scheduling pass now
    Check,
}

/// Alert type for CLI (maps to AlertType)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AlertKind {
    Medication,
    Appointment,
    Feeding,
    HealthCheck,
    Custom,
}

impl From<AlertKind> for AlertType {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Medication => AlertType::MedicationReminder,
            AlertKind::Appointment => AlertType::AppointmentReminder,
            AlertKind::Feeding => AlertType::FeedingOverdue,
            AlertKind::HealthCheck => AlertType::HealthCheck,
            AlertKind::Custom => AlertType::Custom,
        }
    }
}

/// Execute an alert command
pub async fn execute(command: AlertCommands) -> Result<()> {
    let manager = open_manager().await?;

    let outcome = match command {
        AlertCommands::List => execute_list(&manager).await,
        AlertCommands::Schedule {
            alert_type,
            pet,
            message,
            at,
            in_minutes,
            priority,
            no_ack,
        } => {
            let when = resolve_time(at.as_deref(), in_minutes)?;
            let mut alert = ProactiveAlert::new(alert_type.into(), pet, message, when)
                .with_acknowledgment(!no_ack);
            if let Some(priority) = priority {
                let priority: Priority = priority.parse().map_err(|e: String| anyhow::anyhow!(e))?;
                alert = alert.with_priority(priority);
            }
            execute_schedule(&manager, alert).await
        }
        AlertCommands::Ack { id } => execute_resolve(&manager, &id, true).await,
        AlertCommands::Expire { id } => execute_resolve(&manager, &id, false).await,
        AlertCommands::Check => execute_check(&manager).await,
    };

    manager.destroy().await;
    outcome
}

async fn open_manager() -> Result<Arc<ProactiveAlertManager>> {
    let cfg = config::config()?;
    let store = Arc::new(FileStore::open_default()?);
    ProactiveAlertManager::open(store, cfg.alerts)
        .await
        .context("Failed to load alerts")
}

fn resolve_time(at: Option<&str>, in_minutes: Option<i64>) -> Result<DateTime<Utc>> {
    match (at, in_minutes) {
        (Some(at), _) => Ok(DateTime::parse_from_rfc3339(at)
            .with_context(|| format!("Invalid time: {}", at))?
            .with_timezone(&Utc)),
        (None, Some(minutes)) => Ok(Utc::now() + Duration::minutes(minutes)),
        (None, None) => Ok(Utc::now()),
    }
}

async fn execute_list(manager: &ProactiveAlertManager) -> Result<()> {
    let pending = manager.get_pending_alerts().await;

    if pending.is_empty() {
        println!("No pending alerts");
        return Ok(());
    }

    let now = Utc::now();
    println!("{:<48} {:<18} {:<7} {}", "ID", "WHEN", "DUE", "MESSAGE");
    println!("{}", "-".repeat(100));

    for alert in pending {
        println!(
            "{:<48} {:<18} {:<7} {}",
            alert.id,
            alert.scheduled_time.format("%Y-%m-%d %H:%M"),
            if alert.is_due(now) { "yes" } else { "" },
            alert.message
        );
    }

    Ok(())
}

async fn execute_schedule(manager: &ProactiveAlertManager, alert: ProactiveAlert) -> Result<()> {
    let outcome = manager.schedule_alert(alert).await?;

    match outcome {
        ScheduleOutcome::Scheduled(id) => println!("✅ Scheduled {}", id),
        ScheduleOutcome::AlreadyPending(id) => println!("Already pending: {}", id),
        ScheduleOutcome::AlreadyAcknowledged(id) => {
            println!("Already acknowledged, not rescheduled: {}", id)
        }
        ScheduleOutcome::AlreadyExpired(id) => println!("Already expired, not rescheduled: {}", id),
    }

    Ok(())
}

async fn execute_resolve(manager: &ProactiveAlertManager, id: &str, acknowledge: bool) -> Result<()> {
    let removed = if acknowledge {
        manager.acknowledge_alert(id).await?
    } else {
        manager.expire_alert(id).await?
    };

    if removed {
        println!("✓ {} {}", if acknowledge { "Acknowledged" } else { "Expired" }, id);
    } else {
        println!("No pending alert with id {}", id);
    }

    Ok(())
}

async fn execute_check(manager: &ProactiveAlertManager) -> Result<()> {
    let report = manager.check_now(Utc::now()).await?;

    println!("Check Results:");
    println!("  Newly scheduled:  {}", report.scheduled.len());
    println!("  Fired:            {}", report.fired.len());
    println!("  Expired:          {}", report.expired.len());

    for alert in &report.fired {
        println!("  🔔 {}", alert.message);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_time() {
        let at = resolve_time(Some("2026-06-01T08:00:00Z"), None).unwrap();
        assert_eq!(at.to_rfc3339(), "2026-06-01T08:00:00+00:00");

        let later = resolve_time(None, Some(30)).unwrap();
        assert!(later > Utc::now() + Duration::minutes(29));

        assert!(resolve_time(Some("tomorrow"), None).is_err());
    }
}
