//! Severity classification for described symptoms.
//!
//! Keyword tables only. When nothing matches the level is `Routine`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::fallback::{has_phrase, normalize};

/// Severity of a described situation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriageLevel {
    Emergency,
    Urgent,
    Routine,
}

impl fmt::Display for TriageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriageLevel::Emergency => "emergency",
            TriageLevel::Urgent => "urgent",
            TriageLevel::Routine => "routine",
        };
        f.write_str(name)
    }
}

const EMERGENCY: &[&str] = &[
    "not breathing",
    "cant breathe",
    "cannot breathe",
    "trouble breathing",
    "choking",
    "seizure",
    "seizures",
    "unconscious",
    "unresponsive",
    "collapsed",
    "bleeding heavily",
    "wont stop bleeding",
    "poison",
    "poisoned",
    "ate chocolate",
    "ate grapes",
    "antifreeze",
    "hit by a car",
    "bloated",
    "heatstroke",
    "emergency",
];

const URGENT: &[&str] = &[
    "vomiting",
    "throwing up",
    "diarrhea",
    "blood",
    "bleeding",
    "limping",
    "not eating",
    "wont eat",
    "lethargic",
    "fever",
    "swollen",
    "swelling",
    "coughing",
    "wound",
    "bite",
    "in pain",
    "crying",
    "straining",
];

const ROUTINE: &[&str] = &[
    "scratching",
    "itchy",
    "shedding",
    "sneezing",
    "bad breath",
    "dandruff",
    "tired",
];

/// Classify free text
pub fn classify(text: &str) -> TriageLevel {
    let normalized = normalize(text);
    if EMERGENCY.iter().any(|k| has_phrase(&normalized, k)) {
        TriageLevel::Emergency
    } else if URGENT.iter().any(|k| has_phrase(&normalized, k)) {
        TriageLevel::Urgent
    } else {
        TriageLevel::Routine
    }
}

/// Every symptom keyword mentioned in `text`, most severe first
pub fn symptoms(text: &str) -> Vec<&'static str> {
    let normalized = normalize(text);
    EMERGENCY
        .iter()
        .chain(URGENT)
        .chain(ROUTINE)
        .filter(|k| **k != "emergency" && has_phrase(&normalized, k))
        .copied()
        .collect()
}

/// What to tell the owner
pub fn advice(level: TriageLevel) -> &'static str {
    match level {
        TriageLevel::Emergency => {
            "This sounds like an emergency. Contact your vet or the nearest emergency animal hospital right now."
        }
        TriageLevel::Urgent => {
            "This should be seen by a vet soon. Call your vet today to book a visit."
        }
        TriageLevel::Routine => {
            "Keep an eye on it and log any changes. Mention it at your next vet visit."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(classify("My dog is having a seizure!"), TriageLevel::Emergency);
        assert_eq!(classify("Max ate chocolate"), TriageLevel::Emergency);
        assert_eq!(classify("Luna has been vomiting since noon"), TriageLevel::Urgent);
        assert_eq!(classify("he won't eat his dinner"), TriageLevel::Urgent);
        assert_eq!(classify("she is scratching a lot"), TriageLevel::Routine);
    }

    #[test]
    fn test_unmatched_is_always_routine() {
        for _ in 0..20 {
            assert_eq!(classify("he seems a bit off today"), TriageLevel::Routine);
        }
    }

    #[test]
    fn test_keywords_respect_word_boundaries() {
        // "bite" must not match inside "biter"
        assert_eq!(classify("he is a biter at play"), TriageLevel::Routine);
    }

    #[test]
    fn test_symptoms_listed_by_severity() {
        assert_eq!(symptoms("vomiting and collapsed"), vec!["collapsed", "vomiting"]);
    }
}
