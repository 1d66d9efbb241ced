//! Wake Word Integration Tests
//!
//! Tests for detection accuracy, restart behavior and permission handling.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{eventually, final_event, ScriptedRecognizer};
use jojo::adapters::SpeechEvent;
use jojo::config::WakeWordSettings;
use jojo::voice::{WakeWordDetector, WakeWordError, WakeWordEvent};

fn settings() -> WakeWordSettings {
    WakeWordSettings {
        restart_delay: Duration::from_millis(10),
        ..WakeWordSettings::default()
    }
}

fn detector_with(recognizer: &Arc<ScriptedRecognizer>) -> (WakeWordDetector, Arc<Mutex<Vec<WakeWordEvent>>>) {
    let detector = WakeWordDetector::new(recognizer.clone(), settings());
    detector.initialize("hey jojo").unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = detector.on_wake_word_detected(move |event| sink.lock().unwrap().push(event.clone()));

    (detector, seen)
}

/// 100 phrases that sound like the wake phrase but are not it
fn near_misses() -> Vec<String> {
    let prefixes = ["they", "hay", "say", "pay", "okay", "play", "hey there"];
    let names = [
        "jojo", "jojos", "yoyo", "dojo", "mojo", "gogo", "coco", "jojoba", "joey", "jody", "bobo",
        "momo", "jolo", "toto",
    ];

    let mut phrases: Vec<String> = prefixes
        .iter()
        .flat_map(|p| names.iter().map(move |n| format!("{} {}", p, n)))
        .collect();
    phrases.push("jojo hey".to_string());
    phrases.push("hey joey jo".to_string());
    phrases
}

#[tokio::test]
async fn test_false_positive_rate_below_five_percent() {
    let phrases = near_misses();
    assert_eq!(phrases.len(), 100);

    let recognizer = ScriptedRecognizer::new();
    let mut script: Vec<SpeechEvent> = phrases.iter().map(|p| final_event(p, 0.9)).collect();
    // A genuine detection marks the end of the script
    script.push(final_event("hey jojo", 0.9));
    recognizer.push(script);

    let (detector, seen) = detector_with(&recognizer);
    detector.start_listening().await.unwrap();

    let genuine = eventually(Duration::from_secs(5), || {
        seen.lock().unwrap().iter().any(|e| e.transcript == "hey jojo")
    })
    .await;
    assert!(genuine, "the real wake phrase was not detected");

    let false_positives = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.transcript != "hey jojo")
        .count();
    assert!(false_positives < 5, "{} false positives", false_positives);

    detector.dispose().await;
}

#[tokio::test]
async fn test_spaced_out_phrase_matches() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push(vec![final_event("Hey, Jo Jo!", 0.8)]);

    let (detector, seen) = detector_with(&recognizer);
    detector.start_listening().await.unwrap();

    assert!(eventually(Duration::from_secs(2), || seen.lock().unwrap().len() == 1).await);
    detector.dispose().await;
}

#[tokio::test]
async fn test_low_confidence_and_debounce() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push(vec![
        final_event("hey jojo", 0.2),
        final_event("hey jojo", 0.9),
        final_event("hey jojo", 0.95),
    ]);

    let (detector, seen) = detector_with(&recognizer);
    detector.start_listening().await.unwrap();

    assert!(eventually(Duration::from_secs(2), || !seen.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1, "repeat inside the debounce window must be dropped");
    assert_eq!(seen[0].confidence, Some(0.9));

    detector.dispose().await;
}

#[tokio::test]
async fn test_nan_sensitivity_from_config_keeps_threshold() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push(vec![final_event("hey jojo", 0.2), final_event("hey jojo", 0.9)]);

    let detector = WakeWordDetector::new(
        recognizer.clone(),
        WakeWordSettings {
            sensitivity: f32::NAN,
            ..settings()
        },
    );
    detector.initialize("hey jojo").unwrap();
    assert_eq!(detector.sensitivity(), 0.5);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = detector.on_wake_word_detected(move |event| sink.lock().unwrap().push(event.clone()));
    detector.start_listening().await.unwrap();

    assert!(eventually(Duration::from_secs(2), || !seen.lock().unwrap().is_empty()).await);
    assert_eq!(seen.lock().unwrap()[0].confidence, Some(0.9));

    detector.dispose().await;
}

#[tokio::test]
async fn test_restarts_after_session_end() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push(vec![SpeechEvent::End]);
    recognizer.push(vec![SpeechEvent::Error(jojo::adapters::SpeechError::Network("offline".into()))]);
    recognizer.push(vec![final_event("hey jojo", 0.9)]);

    let (detector, seen) = detector_with(&recognizer);
    detector.start_listening().await.unwrap();

    assert!(eventually(Duration::from_secs(3), || seen.lock().unwrap().len() == 1).await);
    assert_eq!(recognizer.starts(), 3);
    assert!(detector.is_listening());

    detector.stop_listening().await;
    assert!(!detector.is_listening());
}

#[tokio::test]
async fn test_permission_denied_stops_listening() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.deny_permission(true);

    let (detector, _) = detector_with(&recognizer);
    let err = detector.start_listening().await.unwrap_err();

    assert_eq!(err, WakeWordError::PermissionDenied);
    assert!(!detector.is_listening());
}

#[tokio::test]
async fn test_revoked_permission_reports_error() {
    let recognizer = ScriptedRecognizer::new();
    recognizer.push(vec![SpeechEvent::Error(jojo::adapters::SpeechError::PermissionDenied)]);

    let (detector, _) = detector_with(&recognizer);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let _sub = detector.on_error(move |e| sink.lock().unwrap().push(e.clone()));

    detector.start_listening().await.unwrap();

    assert!(eventually(Duration::from_secs(2), || !detector.is_listening()).await);
    assert_eq!(*errors.lock().unwrap(), vec![WakeWordError::PermissionDenied]);
}

#[tokio::test]
async fn test_uninitialized_detector_refuses_to_start() {
    let detector = WakeWordDetector::new(ScriptedRecognizer::new(), settings());
    assert_eq!(
        detector.start_listening().await.unwrap_err(),
        WakeWordError::NotInitialized
    );
    assert_eq!(detector.initialize("  "), Err(WakeWordError::EmptyPhrase));
}
