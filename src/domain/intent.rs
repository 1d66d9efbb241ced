//! Parsed intents: the structured form of what the user asked for.
//!
//! An intent is immutable once created. Builders consume `self` so the
//! value is fully formed before anyone else sees it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ambiguity note attached to every intent produced by the local parser
pub const FALLBACK_AMBIGUITY: &str = "API unavailable - using fallback parsing";

/// What the user wants the assistant to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentAction {
    /// Open a page of the app
    Navigate,

    /// Record something (feeding, medication, weight, symptom)
    LogData,

    /// Ask a question
    Query,

    /// Create an appointment or reminder
    Schedule,

    /// Change an existing record
    Update,

    /// Ask what the assistant can do
    Help,

    /// Acknowledge a proactive alert
    Acknowledge,

    /// Describe an urgent health situation
    Emergency,

    /// Answer "yes" to a pending confirmation
    Confirm,

    /// Answer "no" or abandon the current request
    Cancel,

    /// Nothing recognisable
    Unknown,
}

impl IntentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "NAVIGATE",
            Self::LogData => "LOG_DATA",
            Self::Query => "QUERY",
            Self::Schedule => "SCHEDULE",
            Self::Update => "UPDATE",
            Self::Help => "HELP",
            Self::Acknowledge => "ACKNOWLEDGE",
            Self::Emergency => "EMERGENCY",
            Self::Confirm => "CONFIRM",
            Self::Cancel => "CANCEL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for IntentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentAction {
    type Err = String;

    /// Accepts the wire names plus the loose spellings completion services
    /// tend to return ("log-data", "navigate", "logData").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match normalized.as_str() {
            "NAVIGATE" | "NAV" | "OPEN" => Ok(Self::Navigate),
            "LOGDATA" | "LOG" | "RECORD" => Ok(Self::LogData),
            "QUERY" | "QUESTION" | "ASK" => Ok(Self::Query),
            "SCHEDULE" | "BOOK" | "REMIND" => Ok(Self::Schedule),
            "UPDATE" | "EDIT" | "CHANGE" => Ok(Self::Update),
            "HELP" => Ok(Self::Help),
            "ACKNOWLEDGE" | "ACK" | "DISMISS" => Ok(Self::Acknowledge),
            "EMERGENCY" | "TRIAGE" => Ok(Self::Emergency),
            "CONFIRM" | "YES" => Ok(Self::Confirm),
            "CANCEL" | "NO" => Ok(Self::Cancel),
            "UNKNOWN" | "NONE" => Ok(Self::Unknown),
            _ => Err(format!("unknown intent action: {}", s)),
        }
    }
}

/// Urgency of an intent, response or alert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" | "medium" => Ok(Self::Normal),
            "high" | "urgent" => Ok(Self::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Kind of thing an entity refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pet,
    Date,
    Time,
    Amount,
    Medication,
    Food,
    Symptom,
    Page,
    Other,
}

/// A span of the utterance that names something concrete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,

    /// Surface value as heard (normalised to lowercase by the local parser)
    pub value: String,

    /// 0.0 - 1.0
    pub confidence: f32,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Where an intent came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    /// Parsed from speech
    #[default]
    Voice,

    /// Built from a UI action
    Manual,

    /// Injected by the proactive alert flow
    Alert,
}

/// Structured command intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedIntent {
    pub intent_id: String,
    pub action: IntentAction,
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,

    /// 0.0 - 1.0
    pub confidence: f32,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub ambiguities: Vec<String>,

    /// Original utterance (empty for manual and synthetic intents)
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub source: IntentSource,
    pub created_at: DateTime<Utc>,
}

impl ParsedIntent {
    /// Create an intent with a fresh id
    pub fn new(action: IntentAction, confidence: f32) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), action, confidence)
    }

    /// Create an intent with an explicit id
    pub fn with_id(intent_id: impl Into<String>, action: IntentAction, confidence: f32) -> Self {
        Self {
            intent_id: intent_id.into(),
            action,
            target: None,
            parameters: BTreeMap::new(),
            confidence: if confidence.is_finite() {
                confidence.clamp(0.0, 1.0)
            } else {
                0.0
            },
            requires_confirmation: false,
            priority: Priority::Normal,
            entities: Vec::new(),
            ambiguities: Vec::new(),
            transcript: String::new(),
            source: IntentSource::Voice,
            created_at: Utc::now(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = required;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_ambiguity(mut self, ambiguity: impl Into<String>) -> Self {
        let ambiguity = ambiguity.into();
        if !self.ambiguities.contains(&ambiguity) {
            self.ambiguities.push(ambiguity);
        }
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }

    pub fn with_source(mut self, source: IntentSource) -> Self {
        self.source = source;
        self
    }

    /// Whether this intent came out of the local fallback parser
    pub fn is_fallback(&self) -> bool {
        self.ambiguities.iter().any(|a| a == FALLBACK_AMBIGUITY)
    }

    /// Ambiguities the user has to resolve (the fallback note is not one)
    pub fn open_questions(&self) -> Vec<String> {
        self.ambiguities
            .iter()
            .filter(|a| a.as_str() != FALLBACK_AMBIGUITY)
            .cloned()
            .collect()
    }

    /// True when a clarification prompt must be asked before executing
    pub fn needs_clarification(&self) -> bool {
        self.ambiguities.iter().any(|a| a != FALLBACK_AMBIGUITY)
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    /// First entity of a kind
    pub fn entity(&self, kind: EntityKind) -> Option<&Entity> {
        self.entities.iter().find(|e| e.kind == kind)
    }
}
