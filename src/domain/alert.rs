//! Proactive alerts: scheduled, acknowledgment-tracked reminders.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::intent::Priority;

/// Kind of proactive alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    MedicationReminder,
    AppointmentReminder,
    FeedingOverdue,
    HealthCheck,
    Custom,
}

impl AlertType {
    /// Stable slug used in alert ids
    pub fn slug(&self) -> &'static str {
        match self {
            Self::MedicationReminder => "medication_reminder",
            Self::AppointmentReminder => "appointment_reminder",
            Self::FeedingOverdue => "feeding_overdue",
            Self::HealthCheck => "health_check",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// A scheduled reminder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProactiveAlert {
    /// Unique id, format "{type}:{pet}:{hash16}"
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub pet_id: String,
    pub message: String,
    pub scheduled_time: DateTime<Utc>,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_data: Option<Value>,
    pub requires_acknowledgment: bool,
}

impl ProactiveAlert {
    /// Create an alert with a deterministic id.
    ///
    /// The same type, pet, time and message always yield the same id, so a
    /// rule re-deriving an alert after restart lands on the same record.
    pub fn new(
        alert_type: AlertType,
        pet_id: impl Into<String>,
        message: impl Into<String>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        let pet_id = pet_id.into();
        let message = message.into();
        let id = generate_alert_id(alert_type, &pet_id, scheduled_time, &message);

        let priority = match alert_type {
            AlertType::MedicationReminder | AlertType::FeedingOverdue => Priority::High,
            _ => Priority::Normal,
        };

        Self {
            id,
            alert_type,
            pet_id,
            message,
            scheduled_time,
            priority,
            visual_data: None,
            requires_acknowledgment: true,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_visual_data(mut self, data: Value) -> Self {
        self.visual_data = Some(data);
        self
    }

    pub fn with_acknowledgment(mut self, required: bool) -> Self {
        self.requires_acknowledgment = required;
        self
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether the alert's time has come
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time <= now
    }
}

/// Lifecycle state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Expired,
}

/// Change notifications published to the UI
#[derive(Debug, Clone, PartialEq)]
pub enum AlertNotice {
    /// A new alert entered the pending set
    Scheduled(ProactiveAlert),

    /// A pending alert reached its scheduled time (published once)
    Due(ProactiveAlert),

    /// An alert left the pending set
    Resolved { id: String, status: AlertStatus },
}

/// Generate an alert id: "{type}:{pet}:{hash16}"
pub fn generate_alert_id(
    alert_type: AlertType,
    pet_id: &str,
    scheduled_time: DateTime<Utc>,
    message: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(alert_type.slug().as_bytes());
    hasher.update(b"\n");
    hasher.update(pet_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(scheduled_time.to_rfc3339().as_bytes());
    hasher.update(b"\n");
    hasher.update(message.as_bytes());
    let digest = hasher.finalize();

    format!("{}:{}:{}", alert_type.slug(), pet_id, hex::encode(&digest[..8]))
}
