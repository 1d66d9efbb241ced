//! Voice Session Integration Tests
//!
//! End-to-end turns through the session controller with scripted speech.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use common::{eventually, final_event, RecordingSynthesizer, ScriptedRecognizer};
use jojo::adapters::{MemoryStore, SpeechEvent};
use jojo::config::ResolvedConfig;
use jojo::core::session::stored_hands_free;
use jojo::core::{handler_fn, SessionError, SessionServices, VoiceSession};
use jojo::domain::{
    AlertType, AvatarState, CommandResult, Entity, EntityKind, IntentAction, ParsedIntent, PetRef,
    ProactiveAlert, ResponseKind,
};
use jojo::voice::{StateChange, WakeWordError};

struct Harness {
    session: Arc<VoiceSession>,
    capture: Arc<ScriptedRecognizer>,
    wake: Arc<ScriptedRecognizer>,
    voice: Arc<RecordingSynthesizer>,
    store: MemoryStore,
    _home: TempDir,
}

fn config(home: &TempDir) -> ResolvedConfig {
    let mut config = ResolvedConfig::with_home(home.path().to_path_buf());
    config.wake_word.restart_delay = Duration::from_millis(10);
    config.alerts.check_interval = Duration::from_millis(20);
    config
}

async fn open_with(store: MemoryStore, wake: Arc<ScriptedRecognizer>) -> Harness {
    open_configured(store, wake, |_| {}).await
}

async fn open_configured(
    store: MemoryStore,
    wake: Arc<ScriptedRecognizer>,
    tweak: impl FnOnce(&mut ResolvedConfig),
) -> Harness {
    let home = TempDir::new().unwrap();
    let capture = ScriptedRecognizer::new();
    let voice = RecordingSynthesizer::new();

    let mut config = config(&home);
    tweak(&mut config);

    let services = SessionServices::new(capture.clone(), voice.clone(), Arc::new(store.clone()))
        .with_wake_recognizer(wake.clone());
    let session = VoiceSession::open(&config, services).await.unwrap();

    Harness {
        session,
        capture,
        wake,
        voice,
        store,
        _home: home,
    }
}

async fn open() -> Harness {
    open_with(MemoryStore::new(), ScriptedRecognizer::new()).await
}

fn record_states(session: &VoiceSession) -> Arc<Mutex<Vec<StateChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    let _ = session
        .feedback()
        .on_state_change(move |c| sink.lock().unwrap().push(*c));
    changes
}

fn recording_handler(
    session: &VoiceSession,
    action: IntentAction,
    reply: &'static str,
) -> Arc<Mutex<Vec<ParsedIntent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.router().register_handler(
        action,
        handler_fn("Recording handler", move |intent: ParsedIntent| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(intent);
                Ok::<_, anyhow::Error>(CommandResult::ok(reply))
            }
        }),
    );
    seen
}

#[tokio::test]
async fn test_navigation_turn_updates_page() {
    let h = open().await;
    let changes = record_states(&h.session);

    let outcome = h.session.execute_voice_command("go to appointments").await.unwrap();

    assert!(outcome.executed());
    assert_eq!(outcome.intent.action, IntentAction::Navigate);
    assert_eq!(outcome.response.display_text, "Opening appointments.");
    assert_eq!(h.session.context().get_context().current_page, "appointments");
    assert_eq!(h.session.context().get_turn_count(), 1);
    assert_eq!(h.voice.spoken(), vec!["Opening appointments.".to_string()]);
    assert_eq!(h.session.feedback().state(), AvatarState::Idle);

    let changes = changes.lock().unwrap().clone();
    assert!(!changes.is_empty());
    for change in &changes {
        assert!(change.from.can_transition_to(change.to), "{:?}", change);
        assert!(
            !(change.from == AvatarState::Listening && change.to == AvatarState::Speaking),
            "skipped PROCESSING"
        );
    }
}

#[tokio::test]
async fn test_confirmed_schedule_executes() {
    let h = open().await;
    h.session.context().set_active_pet(PetRef::named("p1", "Max"));
    let scheduled = recording_handler(&h.session, IntentAction::Schedule, "Reminder set.");
    h.capture.push_final("yes please");

    let outcome = h
        .session
        .execute_voice_command("remind me to give Max his pill at 8am")
        .await
        .unwrap();

    assert!(outcome.executed());
    let scheduled = scheduled.lock().unwrap().clone();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].target.as_deref(), Some("reminder"));
    assert_eq!(scheduled[0].param_str("pet_id"), Some("p1"));

    let spoken = h.voice.spoken();
    assert_eq!(spoken.len(), 2);
    assert!(spoken[0].starts_with("Just to confirm"), "{}", spoken[0]);
    assert_eq!(spoken[1], "Reminder set.");
}

#[tokio::test]
async fn test_declined_schedule_does_not_execute() {
    let h = open().await;
    h.session.context().set_active_pet(PetRef::named("p1", "Max"));
    let scheduled = recording_handler(&h.session, IntentAction::Schedule, "Reminder set.");
    h.capture.push_final("no");

    let outcome = h
        .session
        .execute_voice_command("schedule a vet appointment for Max tomorrow")
        .await
        .unwrap();

    assert!(!outcome.executed());
    assert_eq!(outcome.response.display_text, "Okay, I won't do that.");
    assert!(scheduled.lock().unwrap().is_empty());
    // The declined turn is still remembered
    assert_eq!(h.session.context().get_turn_count(), 1);
}

#[tokio::test]
async fn test_clarification_answer_completes_turn() {
    let h = open().await;
    h.session
        .context()
        .add_entity(Entity::new(EntityKind::Pet, "Max", 1.0));
    let logged = recording_handler(&h.session, IntentAction::LogData, "Logged.");
    h.capture.push_final("for Max");

    let outcome = h.session.execute_voice_command("log 2 cups of kibble").await.unwrap();

    assert!(outcome.executed());
    assert_eq!(outcome.intent.param_str("pet_name"), Some("Max"));
    assert_eq!(outcome.intent.transcript, "log 2 cups of kibble for Max");
    assert_eq!(logged.lock().unwrap().len(), 1);
    assert_eq!(
        h.voice.spoken(),
        vec!["Which pet is this for?".to_string(), "Logged.".to_string()]
    );
}

#[tokio::test]
async fn test_clarification_gives_up_after_follow_ups() {
    let h = open().await;
    h.capture.push_final("banana");
    h.capture.push_final("elephant");

    let outcome = h
        .session
        .execute_voice_command("purple elephant banana")
        .await
        .unwrap();

    assert!(!outcome.executed());
    assert_eq!(outcome.response.kind, ResponseKind::Error);
    assert_eq!(h.capture.starts(), 2);
    assert_eq!(h.session.feedback().state(), AvatarState::Idle);
}

#[tokio::test]
async fn test_unheard_utterance_is_reported() {
    let h = open().await;
    let changes = record_states(&h.session);
    h.capture.push(vec![SpeechEvent::End]);

    let outcome = h.session.handle_activation().await.unwrap();

    assert!(outcome.is_none());
    let spoken = h.voice.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].contains("didn't catch that"), "{}", spoken[0]);
    assert_eq!(h.session.feedback().state(), AvatarState::Idle);
    assert!(changes
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.to == AvatarState::Error));
}

#[tokio::test]
async fn test_second_turn_while_busy_is_rejected() {
    let h = open().await;

    // No script: the capture stays open until cancelled
    let pending = {
        let session = h.session.clone();
        tokio::spawn(async move { session.handle_activation().await })
    };
    assert!(
        eventually(Duration::from_secs(1), || h.session.feedback().state()
            == AvatarState::Listening)
        .await
    );

    assert!(matches!(
        h.session.execute_voice_command("help").await,
        Err(SessionError::Busy)
    ));

    // Alerts that come due mid-turn wait for it to finish
    let alert = ProactiveAlert::new(AlertType::Custom, "p1", "Brush Max", Utc::now());
    assert!(h.session.announce_alert(&alert).await.is_none());

    h.session.cancel().await;
    assert!(pending.await.unwrap().unwrap().is_none());
    assert!(h.voice.spoken().is_empty(), "aborts are not spoken");

    let announced = h.session.announce_deferred_alerts().await;
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].kind, ResponseKind::Alert);
    assert!(h.session.announce_deferred_alerts().await.is_empty());
}

#[tokio::test]
async fn test_acknowledge_from_ui() {
    let h = open().await;
    let alert = ProactiveAlert::new(AlertType::MedicationReminder, "p1", "Time for Max's pill", Utc::now());
    let other = ProactiveAlert::new(AlertType::FeedingOverdue, "p1", "Max hasn't eaten", Utc::now());
    h.session.alerts().schedule_alert(alert.clone()).await.unwrap();
    h.session.alerts().schedule_alert(other.clone()).await.unwrap();

    let result = h.session.acknowledge_alert(&alert.id).await.unwrap();
    assert!(result.success);
    assert_eq!(result.data["alertId"], alert.id.as_str());

    assert_eq!(h.session.alerts().get_pending_alerts().await, vec![other]);

    let again = h.session.acknowledge_alert(&alert.id).await.unwrap();
    assert_eq!(again.message, "Okay.");
}

#[tokio::test]
async fn test_hands_free_follows_toggle() {
    let h = open().await;
    let indicator = Arc::new(Mutex::new(Vec::new()));
    let sink = indicator.clone();
    let _sub = h
        .session
        .on_hands_free_change(move |on| sink.lock().unwrap().push(*on));
    let detector = h.session.wake_word_detector().unwrap();

    for enabled in [true, false, true, true, false] {
        h.session.set_hands_free(enabled).await.unwrap();
        assert_eq!(detector.is_listening(), enabled);
        assert_eq!(h.session.hands_free_enabled(), enabled);
        assert_eq!(stored_hands_free(&h.store).await.unwrap(), enabled);
    }

    assert_eq!(*indicator.lock().unwrap(), vec![true, false, true, false]);
}

#[tokio::test]
async fn test_hands_free_restored_on_reopen() {
    let first = open().await;
    first.session.set_hands_free(true).await.unwrap();
    first.session.shutdown().await;

    let second = open_with(first.store.clone(), ScriptedRecognizer::new()).await;
    assert!(second.session.hands_free_enabled());
    assert!(second.session.wake_word_detector().unwrap().is_listening());
    assert_eq!(second.wake.starts(), 1);
}

#[tokio::test]
async fn test_hands_free_denied_permission() {
    let wake = ScriptedRecognizer::new();
    wake.deny_permission(true);
    let h = open_with(MemoryStore::new(), wake).await;

    let err = h.session.set_hands_free(true).await.unwrap_err();
    assert!(matches!(err, SessionError::WakeWord(WakeWordError::PermissionDenied)));
    assert!(!h.session.hands_free_enabled());
    assert!(!h.session.wake_word_detector().unwrap().is_listening());
    assert!(!stored_hands_free(&h.store).await.unwrap());
}

#[tokio::test]
async fn test_hands_free_needs_wake_recognizer() {
    let home = TempDir::new().unwrap();
    let services = SessionServices::new(
        ScriptedRecognizer::new(),
        RecordingSynthesizer::new(),
        Arc::new(MemoryStore::new()),
    );
    let session = VoiceSession::open(&config(&home), services).await.unwrap();

    assert!(session.wake_word_detector().is_none());
    assert!(matches!(
        session.set_hands_free(true).await,
        Err(SessionError::HandsFreeUnavailable)
    ));
    session.set_hands_free(false).await.unwrap();
}

#[tokio::test]
async fn test_wake_word_starts_a_turn() {
    let h = open().await;
    h.wake.push(vec![final_event("hey jojo", 0.9)]);
    h.capture.push_final("go to settings");
    h.session.set_hands_free(true).await.unwrap();

    let runner = {
        let session = h.session.clone();
        tokio::spawn(async move { session.run().await })
    };

    assert!(
        eventually(Duration::from_secs(3), || h
            .voice
            .spoken()
            .contains(&"Opening settings.".to_string()))
        .await
    );
    assert!(matches!(h.session.run().await, Err(SessionError::AlreadyRunning)));

    h.session.shutdown().await;
    runner.await.unwrap().unwrap();
    assert_eq!(h.session.context().get_context().current_page, "settings");
}

#[tokio::test]
async fn test_due_alert_is_announced_and_acknowledged_by_voice() {
    let h = open().await;
    let alert = ProactiveAlert::new(AlertType::MedicationReminder, "p1", "Time for Max's pill", Utc::now());
    h.session.alerts().schedule_alert(alert.clone()).await.unwrap();
    h.capture.push_final("got it");

    let runner = {
        let session = h.session.clone();
        tokio::spawn(async move { session.run().await })
    };

    assert!(
        eventually(Duration::from_secs(3), || h
            .voice
            .spoken()
            .contains(&"Got it, I'll mark that as done.".to_string()))
        .await
    );
    assert!(h.session.alerts().get_pending_alerts().await.is_empty());
    assert!(h.voice.spoken()[0].starts_with("Time for Max's pill."));

    h.session.shutdown().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_wake_words_heard_during_a_turn_are_dropped() {
    let wake = ScriptedRecognizer::new();
    wake.push(vec![
        final_event("hey jojo", 0.9),
        final_event("hey jojo", 0.9),
        final_event("hey jojo", 0.9),
    ]);
    let h = open_configured(MemoryStore::new(), wake, |config| {
        config.wake_word.debounce = Duration::ZERO;
        config.recognition.timeout = Duration::from_millis(200);
    })
    .await;
    h.capture.push_final("go to settings");
    h.session.set_hands_free(true).await.unwrap();

    let runner = {
        let session = h.session.clone();
        tokio::spawn(async move { session.run().await })
    };

    assert!(
        eventually(Duration::from_secs(3), || h
            .voice
            .spoken()
            .contains(&"Opening settings.".to_string()))
        .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.capture.starts(), 1);

    h.session.shutdown().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_alerts_announced_without_wake_recognizer() {
    let home = TempDir::new().unwrap();
    let capture = ScriptedRecognizer::new();
    let voice = RecordingSynthesizer::new();
    let services = SessionServices::new(capture.clone(), voice.clone(), Arc::new(MemoryStore::new()));
    let session = VoiceSession::open(&config(&home), services).await.unwrap();

    let alert = ProactiveAlert::new(AlertType::MedicationReminder, "p1", "Time for Max's pill", Utc::now());
    session.alerts().schedule_alert(alert).await.unwrap();
    capture.push_final("got it");

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run().await })
    };

    assert!(
        eventually(Duration::from_secs(3), || voice
            .spoken()
            .first()
            .is_some_and(|s| s.starts_with("Time for Max's pill.")))
        .await
    );
    assert!(!runner.is_finished());

    session.shutdown().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_question_does_not_acknowledge_due_alert() {
    let h = open().await;
    let alert = ProactiveAlert::new(
        AlertType::MedicationReminder,
        "p1",
        "Time for Max's pill",
        Utc::now() - chrono::Duration::minutes(1),
    );
    h.session.alerts().schedule_alert(alert.clone()).await.unwrap();

    let outcome = h.session.execute_voice_command("is Max okay").await.unwrap();

    assert_eq!(outcome.intent.action, IntentAction::Query);
    assert_eq!(h.session.alerts().get_pending_alerts().await, vec![alert]);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let h = open().await;
    h.session.set_hands_free(true).await.unwrap();

    h.session.shutdown().await;
    h.session.shutdown().await;

    assert!(h.session.is_closed());
    assert!(!h.session.wake_word_detector().unwrap().is_listening());
    assert!(h.session.alerts().is_destroyed());
    assert!(h.session.feedback().is_disposed());
    assert!(h.voice.cancels() >= 1);

    assert!(matches!(
        h.session.execute_voice_command("help").await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(
        h.session.set_hands_free(false).await,
        Err(SessionError::Closed)
    ));
    assert!(matches!(
        h.session.acknowledge_alert("a1").await,
        Err(SessionError::Closed)
    ));
}
