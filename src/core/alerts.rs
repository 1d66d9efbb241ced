//! Proactive alert scheduling, persistence and acknowledgment.
//!
//! State lives in a `KeyValueStore` under `jojo.alerts`: the pending alerts
//! plus a record of resolved (acknowledged or expired) ids. Every mutation
//! holds the state lock while it persists, which linearizes concurrent
//! acknowledgments and keeps the store in step with memory.
//!
//! The periodic check runs on its own task. It never touches the
//! conversational pipeline; consumers learn about changes via
//! `subscribe()`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::{load_json, save_json, KeyValueStore, StoreError};
use crate::config::AlertSettings;
use crate::domain::{AlertNotice, AlertStatus, ProactiveAlert};

use super::alert_rules::AlertRule;

/// Store key for alert state
pub const ALERTS_KEY: &str = "jojo.alerts";

/// How long resolved ids are remembered
const RESOLVED_RETENTION_DAYS: i64 = 30;

/// Notices buffered per subscriber
const NOTICE_CAPACITY: usize = 64;

/// Errors raised by the alert manager
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid alert: {0}")]
    Invalid(String),

    #[error("Alert manager has been destroyed")]
    Destroyed,
}

/// Result of scheduling an alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// New alert added to the pending set
    Scheduled(String),
    /// Same id already pending
    AlreadyPending(String),
    /// Same id was acknowledged before; not resurrected
    AlreadyAcknowledged(String),
    /// Same id expired before; not resurrected
    AlreadyExpired(String),
}

impl ScheduleOutcome {
    pub fn id(&self) -> &str {
        match self {
            Self::Scheduled(id)
            | Self::AlreadyPending(id)
            | Self::AlreadyAcknowledged(id)
            | Self::AlreadyExpired(id) => id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}

/// Summary of one scheduling pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub scheduled: Vec<String>,
    pub fired: Vec<ProactiveAlert>,
    pub expired: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEntry {
    alert: ProactiveAlert,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResolvedEntry {
    status: AlertStatus,
    at: DateTime<Utc>,
}

/// Persisted form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AlertRecord {
    #[serde(default)]
    pending: Vec<PendingEntry>,
    #[serde(default)]
    resolved: BTreeMap<String, ResolvedEntry>,
}

impl AlertRecord {
    fn position(&self, id: &str) -> Option<usize> {
        self.pending.iter().position(|e| e.alert.id == id)
    }

    fn insert(&mut self, alert: ProactiveAlert) -> ScheduleOutcome {
        let id = alert.id.clone();
        if self.position(&id).is_some() {
            return ScheduleOutcome::AlreadyPending(id);
        }
        match self.resolved.get(&id).map(|r| r.status) {
            Some(AlertStatus::Expired) => return ScheduleOutcome::AlreadyExpired(id),
            Some(_) => return ScheduleOutcome::AlreadyAcknowledged(id),
            None => {}
        }
        self.pending.push(PendingEntry {
            alert,
            fired_at: None,
        });
        ScheduleOutcome::Scheduled(id)
    }

    fn resolve(&mut self, id: &str, status: AlertStatus, now: DateTime<Utc>) -> Option<ProactiveAlert> {
        let index = self.position(id)?;
        let entry = self.pending.remove(index);
        self.resolved
            .insert(id.to_string(), ResolvedEntry { status, at: now });
        Some(entry.alert)
    }

    fn prune(&mut self, now: DateTime<Utc>) -> bool {
        let cutoff = now - Duration::days(RESOLVED_RETENTION_DAYS);
        let before = self.resolved.len();
        self.resolved.retain(|_, r| r.at >= cutoff);
        before != self.resolved.len()
    }
}

struct TimerHandle {
    stop_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Owner of the pending-alert set
pub struct ProactiveAlertManager {
    store: Arc<dyn KeyValueStore>,
    settings: AlertSettings,
    state: tokio::sync::Mutex<AlertRecord>,
    notices: broadcast::Sender<AlertNotice>,
    rules: RwLock<Vec<Arc<dyn AlertRule>>>,
    timer: Mutex<Option<TimerHandle>>,
    destroyed: AtomicBool,
}

impl ProactiveAlertManager {
    /// Load persisted state and build the manager
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        settings: AlertSettings,
    ) -> Result<Arc<Self>, AlertError> {
        let mut record: AlertRecord = load_json(&*store, ALERTS_KEY).await?.unwrap_or_default();
        if record.prune(Utc::now()) {
            save_json(&*store, ALERTS_KEY, &record).await?;
        }

        info!(
            pending = record.pending.len(),
            resolved = record.resolved.len(),
            "alert state loaded"
        );

        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Ok(Arc::new(Self {
            store,
            settings,
            state: tokio::sync::Mutex::new(record),
            notices,
            rules: RwLock::new(Vec::new()),
            timer: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }))
    }

    fn ensure_alive(&self) -> Result<(), AlertError> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(AlertError::Destroyed)
        } else {
            Ok(())
        }
    }

    async fn persist(&self, record: &AlertRecord) -> Result<(), AlertError> {
        save_json(&*self.store, ALERTS_KEY, record).await?;
        Ok(())
    }

    fn publish(&self, notice: AlertNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    /// Add an alert to the pending set and persist it
    pub async fn schedule_alert(&self, alert: ProactiveAlert) -> Result<ScheduleOutcome, AlertError> {
        self.ensure_alive()?;
        if alert.id.trim().is_empty() {
            return Err(AlertError::Invalid("alert id is empty".into()));
        }

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let outcome = next.insert(alert.clone());

        if outcome.is_new() {
            self.persist(&next).await?;
            *state = next;
            info!(id = %alert.id, alert_type = %alert.alert_type, "alert scheduled");
            self.publish(AlertNotice::Scheduled(alert));
        } else {
            debug!(?outcome, "alert not rescheduled");
        }

        Ok(outcome)
    }

    /// Pending alerts, earliest first
    pub async fn get_pending_alerts(&self) -> Vec<ProactiveAlert> {
        let state = self.state.lock().await;
        let mut alerts: Vec<ProactiveAlert> =
            state.pending.iter().map(|e| e.alert.clone()).collect();
        alerts.sort_by(|a, b| {
            a.scheduled_time
                .cmp(&b.scheduled_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        alerts
    }

    /// The latest pending alert that has come due and awaits acknowledgment
    pub async fn latest_due_alert(&self, now: DateTime<Utc>) -> Option<ProactiveAlert> {
        let state = self.state.lock().await;
        state
            .pending
            .iter()
            .filter(|e| e.alert.requires_acknowledgment && (e.fired_at.is_some() || e.alert.is_due(now)))
            .max_by(|a, b| a.alert.scheduled_time.cmp(&b.alert.scheduled_time))
            .map(|e| e.alert.clone())
    }

    /// Remove one alert from the pending set.
    ///
    /// Returns `Ok(false)` for unknown or already acknowledged ids; that is
    /// not an error. Other alerts are never touched.
    pub async fn acknowledge_alert(&self, id: &str) -> Result<bool, AlertError> {
        self.resolve(id, AlertStatus::Acknowledged).await
    }

    /// Give up on an alert without acknowledgment
    pub async fn expire_alert(&self, id: &str) -> Result<bool, AlertError> {
        self.resolve(id, AlertStatus::Expired).await
    }

    async fn resolve(&self, id: &str, status: AlertStatus) -> Result<bool, AlertError> {
        self.ensure_alive()?;

        let mut state = self.state.lock().await;
        if state.position(id).is_none() {
            debug!(%id, ?status, "alert not pending, nothing to resolve");
            return Ok(false);
        }

        let mut next = state.clone();
        next.resolve(id, status, Utc::now());
        self.persist(&next).await?;
        *state = next;

        info!(%id, ?status, "alert resolved");
        self.publish(AlertNotice::Resolved {
            id: id.to_string(),
            status,
        });
        Ok(true)
    }

    /// Register a rule evaluated on every check
    pub fn add_rule(&self, rule: Arc<dyn AlertRule>) {
        debug!(rule = rule.name(), "alert rule added");
        self.rules
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(rule);
    }

    /// Change notifications: scheduled, due, resolved
    pub fn subscribe(&self) -> broadcast::Receiver<AlertNotice> {
        self.notices.subscribe()
    }

    /// Run one scheduling pass at `now`
    pub async fn check_now(&self, now: DateTime<Utc>) -> Result<CheckReport, AlertError> {
        self.ensure_alive()?;

        let rules: Vec<Arc<dyn AlertRule>> = self
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut derived = Vec::new();
        for rule in rules {
            match rule.evaluate(now).await {
                Ok(alerts) => derived.extend(alerts),
                Err(e) => warn!(rule = rule.name(), "alert rule failed: {:#}", e),
            }
        }

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let mut report = CheckReport::default();
        let mut notices = Vec::new();

        for alert in derived {
            if next.insert(alert.clone()).is_new() {
                report.scheduled.push(alert.id.clone());
                notices.push(AlertNotice::Scheduled(alert));
            }
        }

        for entry in next.pending.iter_mut() {
            if entry.fired_at.is_none() && entry.alert.is_due(now) {
                entry.fired_at = Some(now);
                report.fired.push(entry.alert.clone());
                notices.push(AlertNotice::Due(entry.alert.clone()));
            }
        }

        // Informational alerts leave once announced
        let announced: Vec<String> = next
            .pending
            .iter()
            .filter(|e| e.fired_at.is_some() && !e.alert.requires_acknowledgment)
            .map(|e| e.alert.id.clone())
            .collect();
        for id in announced {
            next.resolve(&id, AlertStatus::Acknowledged, now);
            notices.push(AlertNotice::Resolved {
                id,
                status: AlertStatus::Acknowledged,
            });
        }

        let stale: Vec<String> = next
            .pending
            .iter()
            .filter(|e| e.alert.scheduled_time + self.settings.expire_after < now)
            .map(|e| e.alert.id.clone())
            .collect();
        for id in stale {
            next.resolve(&id, AlertStatus::Expired, now);
            report.expired.push(id.clone());
            notices.push(AlertNotice::Resolved {
                id,
                status: AlertStatus::Expired,
            });
        }

        let pruned = next.prune(now);
        if !notices.is_empty() || pruned {
            self.persist(&next).await?;
            *state = next;
        }
        drop(state);

        for alert in &report.fired {
            info!(id = %alert.id, message = %alert.message, "alert due");
        }
        for notice in notices {
            self.publish(notice);
        }

        Ok(report)
    }

    /// Start the periodic check. A no-op when already running.
    pub fn start(self: &Arc<Self>) -> Result<(), AlertError> {
        self.ensure_alive()?;

        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|t| !t.task.is_finished()) {
            return Ok(());
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_timer(
            Arc::downgrade(self),
            self.settings.check_interval,
            stop_rx,
        ));
        *timer = Some(TimerHandle { stop_tx, task });

        info!(
            interval_secs = self.settings.check_interval.as_secs(),
            "alert timer started"
        );
        Ok(())
    }

    /// Stop the timer and refuse further mutations. Persisted state stays.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(());
            if let Err(e) = handle.task.await {
                warn!("alert timer ended abnormally: {}", e);
            }
        }
        info!("alert manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

async fn run_timer(
    manager: Weak<ProactiveAlertManager>,
    period: std::time::Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = interval.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                if let Err(e) = manager.check_now(Utc::now()).await {
                    match e {
                        AlertError::Destroyed => break,
                        other => warn!("alert check failed: {}", other),
                    }
                }
            }
        }
    }

    debug!("alert timer stopped");
}
