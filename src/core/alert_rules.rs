//! Scheduler rules that derive proactive alerts from pet-care data.
//!
//! Rules are evaluated on every alert tick. They may re-derive the same alert
//! many times; deterministic alert ids make that idempotent.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::json;

use crate::domain::{AlertType, ProactiveAlert};

/// Produces alerts for the current time
#[async_trait]
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ProactiveAlert>>;
}

/// A recurring daily medication
#[derive(Debug, Clone, PartialEq)]
pub struct MedicationSchedule {
    pub pet_id: String,
    pub pet_name: String,
    pub medication: String,
    /// Dose times (UTC)
    pub dose_times: Vec<NaiveTime>,
}

/// Reminds shortly before each daily dose
pub struct MedicationReminderRule {
    schedules: RwLock<Vec<MedicationSchedule>>,
    lead: Duration,
    window: Duration,
}

impl MedicationReminderRule {
    pub fn new(schedules: Vec<MedicationSchedule>) -> Self {
        Self {
            schedules: RwLock::new(schedules),
            lead: Duration::minutes(15),
            window: Duration::hours(2),
        }
    }

    /// How long before the dose the reminder appears
    pub fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    pub fn set_schedules(&self, schedules: Vec<MedicationSchedule>) {
        *self.schedules.write().unwrap_or_else(|e| e.into_inner()) = schedules;
    }
}

#[async_trait]
impl AlertRule for MedicationReminderRule {
    fn name(&self) -> &str {
        "medication_reminder"
    }

    async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ProactiveAlert>> {
        let schedules = self.schedules.read().unwrap_or_else(|e| e.into_inner());
        let mut alerts = Vec::new();

        for schedule in schedules.iter() {
            for time in &schedule.dose_times {
                let dose = now.date_naive().and_time(*time).and_utc();
                if now < dose - self.lead || now > dose + self.window {
                    continue;
                }

                let message = format!("Time for {}'s {}", schedule.pet_name, schedule.medication);
                alerts.push(
                    ProactiveAlert::new(AlertType::MedicationReminder, &schedule.pet_id, message, dose)
                        .with_visual_data(json!({
                            "medication": schedule.medication,
                            "dose_time": time.format("%H:%M").to_string(),
                        })),
                );
            }
        }

        Ok(alerts)
    }
}

/// Raises an alert when a pet has not been fed for too long
pub struct FeedingOverdueRule {
    last_fed: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
    overdue_after: Duration,
}

impl FeedingOverdueRule {
    pub fn new(overdue_after: Duration) -> Self {
        Self {
            last_fed: RwLock::new(HashMap::new()),
            overdue_after,
        }
    }

    /// Note a feeding; later feedings replace earlier ones
    pub fn record_feeding(&self, pet_id: &str, pet_name: &str, at: DateTime<Utc>) {
        let mut last_fed = self.last_fed.write().unwrap_or_else(|e| e.into_inner());
        let newer = last_fed.get(pet_id).map_or(true, |(_, prev)| at > *prev);
        if newer {
            last_fed.insert(pet_id.to_string(), (pet_name.to_string(), at));
        }
    }
}

impl Default for FeedingOverdueRule {
    fn default() -> Self {
        Self::new(Duration::hours(12))
    }
}

#[async_trait]
impl AlertRule for FeedingOverdueRule {
    fn name(&self) -> &str {
        "feeding_overdue"
    }

    async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ProactiveAlert>> {
        let last_fed = self.last_fed.read().unwrap_or_else(|e| e.into_inner());

        let alerts = last_fed
            .iter()
            .filter(|(_, (_, at))| now - *at >= self.overdue_after)
            .map(|(pet_id, (name, at))| {
                let message = format!(
                    "{} hasn't been fed in over {} hours",
                    name,
                    self.overdue_after.num_hours()
                );
                ProactiveAlert::new(AlertType::FeedingOverdue, pet_id, message, *at + self.overdue_after)
                    .with_visual_data(json!({ "last_fed": at.to_rfc3339() }))
            })
            .collect();

        Ok(alerts)
    }
}

/// An upcoming appointment
#[derive(Debug, Clone, PartialEq)]
pub struct Appointment {
    pub pet_id: String,
    pub pet_name: String,
    pub title: String,
    pub at: DateTime<Utc>,
}

/// Reminds a fixed lead time before each appointment
pub struct AppointmentReminderRule {
    appointments: RwLock<Vec<Appointment>>,
    lead: Duration,
}

impl AppointmentReminderRule {
    pub fn new(appointments: Vec<Appointment>, lead: Duration) -> Self {
        Self {
            appointments: RwLock::new(appointments),
            lead,
        }
    }

    pub fn set_appointments(&self, appointments: Vec<Appointment>) {
        *self.appointments.write().unwrap_or_else(|e| e.into_inner()) = appointments;
    }
}

#[async_trait]
impl AlertRule for AppointmentReminderRule {
    fn name(&self) -> &str {
        "appointment_reminder"
    }

    async fn evaluate(&self, now: DateTime<Utc>) -> Result<Vec<ProactiveAlert>> {
        let appointments = self.appointments.read().unwrap_or_else(|e| e.into_inner());

        let alerts = appointments
            .iter()
            .filter(|a| now >= a.at - self.lead && now < a.at)
            .map(|a| {
                let message = format!(
                    "{}'s {} is at {} on {}",
                    a.pet_name,
                    a.title,
                    a.at.format("%H:%M"),
                    a.at.format("%b %-d")
                );
                ProactiveAlert::new(AlertType::AppointmentReminder, &a.pet_id, message, a.at - self.lead)
                    .with_visual_data(json!({ "title": a.title, "at": a.at.to_rfc3339() }))
            })
            .collect();

        Ok(alerts)
    }
}
