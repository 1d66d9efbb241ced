//! Deterministic local intent parser.
//!
//! Used whenever the completion service is missing, slow or failing. Every
//! intent it produces carries a `fallback-` id and the fallback ambiguity
//! note so downstream consumers can tell it apart.

use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    ConversationContext, Entity, EntityKind, IntentAction, ParsedIntent, Priority,
    FALLBACK_AMBIGUITY,
};

use super::triage::{self, TriageLevel};

/// Asked when a pet-specific request names no pet
pub const WHICH_PET: &str = "Which pet is this for?";

/// Asked when nothing in the utterance was recognised
pub const NOT_UNDERSTOOD: &str = "I'm not sure what you'd like me to do.";

/// Lowercase, drop apostrophes, collapse everything else to single spaces
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace(['\'', '’'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word phrase containment on normalized text
pub fn has_phrase(normalized: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let haystack = format!(" {} ", normalized);
    haystack.contains(&format!(" {} ", phrase))
}

fn any_phrase(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| has_phrase(normalized, p))
}

const NAV_TRIGGERS: &[&str] = &[
    "go to",
    "go back to",
    "open",
    "show",
    "show me",
    "take me to",
    "navigate to",
    "switch to",
    "bring up",
    "view",
];

/// (page, phrases that name it)
const PAGES: &[(&str, &[&str])] = &[
    ("appointments", &["appointment", "appointments", "vet visits", "calendar"]),
    ("medications", &["medication", "medications", "meds", "medicine", "pills"]),
    ("feeding", &["feeding", "feedings", "meals", "food log", "feeding schedule"]),
    ("health", &["health", "health records", "records", "vitals", "weight"]),
    ("pets", &["pets", "my pets", "pet profiles", "profiles"]),
    ("dashboard", &["dashboard", "home", "home screen"]),
    ("settings", &["settings", "preferences"]),
    ("reminders", &["reminders", "alerts", "notifications"]),
];

const ACKNOWLEDGE: &[&str] = &[
    "okay",
    "ok",
    "got it",
    "done",
    "thanks",
    "thank you",
    "will do",
    "noted",
    "dismiss",
    "acknowledged",
    "all done",
    "i did it",
];

const YES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "yup",
    "sure",
    "confirm",
    "correct",
    "do it",
    "go ahead",
    "please do",
    "okay",
    "ok",
    "sounds good",
    "thats right",
];

const NO: &[&str] = &[
    "no",
    "nope",
    "cancel",
    "stop",
    "never mind",
    "nevermind",
    "dont",
    "do not",
    "wait",
    "not now",
];

/// Words that may pad a short reply without changing what it means
const FILLER: &[&str] = &["please", "jojo", "alright", "all right", "just", "now", "then", "that", "it", "oh", "um"];

const HELP: &[&str] = &[
    "help",
    "what can you do",
    "what can i say",
    "commands",
    "how do i use",
];

const UPDATE: &[&str] = &["update", "change", "edit", "reschedule", "move", "correct the"];

const SCHEDULE: &[&str] = &[
    "schedule",
    "book",
    "make an appointment",
    "set up an appointment",
    "remind me",
    "set a reminder",
    "add a reminder",
];

const LOG: &[&str] = &[
    "log",
    "record",
    "track",
    "note that",
    "fed",
    "just fed",
    "gave",
    "ate",
    "weighs",
    "walked",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "when", "where", "how", "why", "who", "which", "is", "are", "does", "did", "do",
    "should", "can", "could", "tell me",
];

const MEDICATIONS: &[&str] = &[
    "heartgard",
    "nexgard",
    "bravecto",
    "simparica",
    "apoquel",
    "carprofen",
    "rimadyl",
    "gabapentin",
    "prednisone",
    "insulin",
    "amoxicillin",
    "metronidazole",
    "trazodone",
    "antibiotics",
    "flea treatment",
    "heartworm pill",
    "heartworm",
];

const FOODS: &[&str] = &[
    "kibble",
    "wet food",
    "dry food",
    "canned food",
    "treats",
    "treat",
    "chicken",
    "rice",
    "breakfast",
    "lunch",
    "dinner",
];

const UNITS: &[&str] = &[
    "cup", "cups", "mg", "ml", "g", "gram", "grams", "kg", "lb", "lbs", "pound", "pounds",
    "oz", "ounce", "ounces", "tablet", "tablets", "pill", "pills", "scoop", "scoops", "can",
    "cans",
];

const DATES: &[&str] = &[
    "today",
    "tomorrow",
    "tonight",
    "yesterday",
    "next week",
    "this weekend",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const TIME_WORDS: &[&str] = &["morning", "afternoon", "evening", "noon", "midnight"];

/// Words that end in 's but are not pet names
const NOT_PETS: &[&str] = &[
    "let", "it", "that", "what", "there", "here", "who", "he", "she", "today", "tomorrow",
    "everyone",
];

/// Classify a reply to a confirmation prompt
pub fn classify_confirmation(reply: &str) -> Option<bool> {
    let normalized = normalize(reply);
    if any_phrase(&normalized, NO) {
        Some(false)
    } else if is_whole_reply(&normalized, &[YES, ACKNOWLEDGE]) && any_phrase(&normalized, YES) {
        Some(true)
    } else {
        None
    }
}

/// True when every word of `normalized` belongs to a phrase from `vocab` or
/// to filler. "okay thanks" is a whole reply; "is max okay" is not.
fn is_whole_reply(normalized: &str, vocab: &[&[&str]]) -> bool {
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    if tokens.is_empty() {
        return false;
    }

    let mut pos = 0;
    while pos < tokens.len() {
        let matched = vocab
            .iter()
            .copied()
            .chain(std::iter::once(FILLER))
            .flatten()
            .map(|phrase| phrase.split(' ').collect::<Vec<_>>())
            .filter(|words| tokens[pos..].starts_with(words))
            .map(|words| words.len())
            .max();
        match matched {
            Some(len) => pos += len,
            None => return false,
        }
    }
    // Filler alone is not a reply
    !tokens.iter().all(|t| FILLER.contains(t))
}

/// Parse `transcript` with keyword rules
pub fn parse(transcript: &str, context: &ConversationContext) -> ParsedIntent {
    let normalized = normalize(transcript);
    let word_count = normalized.split(' ').filter(|w| !w.is_empty()).count();
    let entities = extract_entities(transcript, &normalized, context);

    let (action, confidence) = classify_action(&normalized, word_count);
    debug!(%action, "fallback parse");

    let mut intent = ParsedIntent::with_id(
        format!("fallback-{}", Uuid::new_v4()),
        action,
        confidence,
    )
    .with_transcript(transcript);

    for entity in &entities {
        let key = match entity.kind {
            EntityKind::Time => "time",
            EntityKind::Date => "date",
            EntityKind::Amount => "amount",
            EntityKind::Medication => "medication",
            EntityKind::Food => "food",
            _ => continue,
        };
        if !intent.parameters.contains_key(key) {
            intent = intent.with_parameter(key, entity.value.clone());
        }
    }

    match action {
        IntentAction::Navigate => {
            if let Some(page) = find_page(&normalized) {
                intent = intent.with_target(page);
            }
        }
        IntentAction::Emergency => {
            intent = intent
                .with_priority(Priority::High)
                .with_parameter("triage", TriageLevel::Emergency.to_string());
        }
        IntentAction::Schedule => {
            let target = if any_phrase(&normalized, &["remind me", "set a reminder", "add a reminder"]) {
                "reminder"
            } else {
                "appointment"
            };
            intent = intent.with_target(target).with_confirmation(true);
        }
        IntentAction::Update => {
            intent = intent
                .with_target(find_page(&normalized).unwrap_or("record"))
                .with_confirmation(true);
        }
        IntentAction::LogData => {
            intent = intent.with_target(log_target(&normalized, &entities));
        }
        IntentAction::Query => {
            if let Some(page) = find_page(&normalized) {
                intent = intent.with_target(page);
            }
        }
        _ => {}
    }

    // Pet resolution: the utterance first, then the active pet
    let mentioned_pet = entities.iter().find(|e| e.kind == EntityKind::Pet);
    match (mentioned_pet, &context.active_pet) {
        (Some(pet), Some(active)) if active.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&pet.value)) => {
            intent = intent
                .with_parameter("pet_id", active.id.clone())
                .with_parameter("pet_name", pet.value.clone());
        }
        (Some(pet), _) => {
            intent = intent.with_parameter("pet_name", pet.value.clone());
        }
        (None, Some(active)) => {
            intent = intent.with_parameter("pet_id", active.id.clone());
            if let Some(name) = &active.name {
                intent = intent.with_parameter("pet_name", name.clone());
            }
        }
        (None, None) => {
            if matches!(action, IntentAction::LogData | IntentAction::Schedule) {
                intent = intent.with_ambiguity(WHICH_PET);
            }
        }
    }

    if action == IntentAction::Unknown {
        intent = intent.with_ambiguity(NOT_UNDERSTOOD);
    }

    for entity in entities {
        intent = intent.with_entity(entity);
    }

    intent.with_ambiguity(FALLBACK_AMBIGUITY)
}

fn classify_action(normalized: &str, word_count: usize) -> (IntentAction, f32) {
    if triage::classify(normalized) == TriageLevel::Emergency {
        return (IntentAction::Emergency, 0.8);
    }

    // Only an utterance made entirely of reply words is a reply
    if word_count <= 4 && is_whole_reply(normalized, &[NO, ACKNOWLEDGE, YES]) {
        if any_phrase(normalized, NO) {
            return (IntentAction::Cancel, 0.85);
        }
        if any_phrase(normalized, ACKNOWLEDGE) {
            return (IntentAction::Acknowledge, 0.9);
        }
        if any_phrase(normalized, YES) {
            return (IntentAction::Confirm, 0.85);
        }
    }

    if any_phrase(normalized, HELP) {
        return (IntentAction::Help, 0.9);
    }
    if any_phrase(normalized, NAV_TRIGGERS) && find_page(normalized).is_some() {
        return (IntentAction::Navigate, 0.85);
    }
    if any_phrase(normalized, UPDATE) {
        return (IntentAction::Update, 0.7);
    }
    if any_phrase(normalized, SCHEDULE) {
        return (IntentAction::Schedule, 0.7);
    }
    if any_phrase(normalized, LOG) {
        return (IntentAction::LogData, 0.7);
    }

    let first = normalized.split(' ').next().unwrap_or_default();
    if QUESTION_WORDS.contains(&first) || has_phrase(normalized, "tell me") {
        return (IntentAction::Query, 0.6);
    }

    (IntentAction::Unknown, 0.2)
}

fn find_page(normalized: &str) -> Option<&'static str> {
    PAGES
        .iter()
        .find(|(_, names)| any_phrase(normalized, names))
        .map(|(page, _)| *page)
}

fn log_target(normalized: &str, entities: &[Entity]) -> &'static str {
    let has = |kind| entities.iter().any(|e| e.kind == kind);

    if has(EntityKind::Medication) || any_phrase(normalized, &["medication", "medicine", "pill", "dose"]) {
        "medication"
    } else if has(EntityKind::Symptom) || any_phrase(normalized, &["symptom", "sick"]) {
        "symptom"
    } else if any_phrase(normalized, &["weighs", "weight"]) {
        "weight"
    } else if any_phrase(normalized, &["walked", "walk"]) {
        "activity"
    } else {
        "feeding"
    }
}

fn extract_entities(raw: &str, normalized: &str, context: &ConversationContext) -> Vec<Entity> {
    let mut entities = Vec::new();

    if let Some(pet) = find_pet(raw, normalized, context) {
        entities.push(Entity::new(EntityKind::Pet, pet, 0.8));
    }

    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();

    if let Some(time) = find_time(raw, &tokens) {
        entities.push(Entity::new(EntityKind::Time, time, 0.8));
    }

    if let Some(date) = DATES.iter().find(|d| has_phrase(normalized, d)) {
        entities.push(Entity::new(EntityKind::Date, *date, 0.8));
    }

    for pair in tokens.windows(2) {
        if pair[0].parse::<f32>().is_ok() && UNITS.contains(&pair[1]) {
            entities.push(Entity::new(EntityKind::Amount, format!("{} {}", pair[0], pair[1]), 0.8));
            break;
        }
    }

    if let Some(med) = MEDICATIONS.iter().find(|m| has_phrase(normalized, m)) {
        entities.push(Entity::new(EntityKind::Medication, *med, 0.75));
    }

    if let Some(food) = FOODS.iter().find(|f| has_phrase(normalized, f)) {
        entities.push(Entity::new(EntityKind::Food, *food, 0.7));
    }

    for symptom in triage::symptoms(normalized) {
        entities.push(Entity::new(EntityKind::Symptom, symptom, 0.7));
    }

    entities
}

/// Known pet names from context, then capitalised possessives ("Max's")
fn find_pet(raw: &str, normalized: &str, context: &ConversationContext) -> Option<String> {
    let known = context
        .active_pet
        .iter()
        .filter_map(|p| p.name.clone())
        .chain(
            context
                .recent_entities
                .iter()
                .filter(|e| e.kind == EntityKind::Pet)
                .map(|e| e.value.clone()),
        );
    for name in known {
        if has_phrase(normalized, &normalize(&name)) {
            return Some(name);
        }
    }

    raw.split_whitespace().find_map(|word| {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '’');
        let base = word
            .strip_suffix("'s")
            .or_else(|| word.strip_suffix("’s"))?;
        let starts_upper = base.chars().next().is_some_and(char::is_uppercase);
        let lowered = base.to_lowercase();
        (starts_upper && base.len() > 1 && !NOT_PETS.contains(&lowered.as_str()))
            .then(|| base.to_string())
    })
}

/// "8am", "8 am", "8:30", "8:30 pm", or a time-of-day word
fn find_time(raw: &str, tokens: &[&str]) -> Option<String> {
    let lowered = raw.to_lowercase();
    for word in lowered.split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != ':');
        if let Some((h, m)) = word.split_once(':') {
            let digits = m.trim_end_matches(|c: char| c.is_alphabetic());
            if h.parse::<u32>().is_ok_and(|h| h <= 23) && digits.len() == 2 && digits.parse::<u32>().is_ok() {
                return Some(word.to_string());
            }
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        for suffix in ["am", "pm"] {
            if let Some(hour) = token.strip_suffix(suffix) {
                if hour.parse::<u32>().is_ok_and(|h| (1..=12).contains(&h)) {
                    return Some(token.to_string());
                }
            }
        }
        if token.parse::<u32>().is_ok_and(|h| (1..=12).contains(&h)) {
            if let Some(next) = tokens.get(i + 1) {
                if *next == "am" || *next == "pm" {
                    return Some(format!("{}{}", token, next));
                }
            }
        }
    }

    TIME_WORDS
        .iter()
        .find(|w| tokens.contains(w))
        .map(|w| w.to_string())
}
