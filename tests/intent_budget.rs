//! Intent Budget Integration Tests
//!
//! The parser must answer within one second whatever the completion
//! service does. These run on tokio's paused clock, so elapsed times are
//! exact and the tests do not actually wait.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{DelayedService, FailingService, HangingService};
use jojo::adapters::CompletionService;
use jojo::core::IntentParser;
use jojo::domain::{ConversationContext, IntentAction, PetRef};
use tokio::time::Instant;

const BUDGET: Duration = Duration::from_millis(1000);

fn parser(service: Arc<dyn CompletionService>) -> IntentParser {
    IntentParser::new(Some(service), BUDGET)
}

#[tokio::test(start_paused = true)]
async fn test_slow_service_still_answers_in_budget() {
    let service = DelayedService::navigating(Duration::from_millis(800), "appointments");
    let parser = parser(service.clone());

    let started = Instant::now();
    let intent = parser
        .parse_intent("Go to appointments", &ConversationContext::default())
        .await;

    assert!(started.elapsed() <= BUDGET);
    assert_eq!(intent.action, IntentAction::Navigate);
    assert_eq!(intent.target.as_deref(), Some("appointments"));
    assert!(!intent.is_fallback());
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_service_falls_back() {
    let parser = parser(Arc::new(HangingService));

    let started = Instant::now();
    let intent = parser
        .parse_intent("Go to appointments", &ConversationContext::default())
        .await;

    assert!(started.elapsed() <= BUDGET);
    assert!(intent.is_fallback());
    assert_eq!(intent.action, IntentAction::Navigate);
    assert_eq!(intent.target.as_deref(), Some("appointments"));
}

#[tokio::test(start_paused = true)]
async fn test_too_slow_service_falls_back() {
    let service = DelayedService::navigating(Duration::from_millis(2000), "settings");
    let parser = parser(service);

    let started = Instant::now();
    let intent = parser
        .parse_intent("open my medications", &ConversationContext::default())
        .await;

    assert!(started.elapsed() <= BUDGET);
    assert!(intent.is_fallback());
    assert_eq!(intent.target.as_deref(), Some("medications"));
}

#[tokio::test(start_paused = true)]
async fn test_failing_service_falls_back_immediately() {
    let parser = parser(Arc::new(FailingService));

    let started = Instant::now();
    let intent = parser
        .parse_intent("log 2 cups of kibble", &ConversationContext::default())
        .await;

    assert!(started.elapsed() < Duration::from_millis(10));
    assert!(intent.is_fallback());
    assert_eq!(intent.action, IntentAction::LogData);
}

#[tokio::test(start_paused = true)]
async fn test_every_transcript_resolves_in_budget() {
    let parser = parser(Arc::new(HangingService));
    let mut context = ConversationContext::default();
    context.active_pet = Some(PetRef::named("p1", "Max"));

    let transcripts = [
        "",
        "   ",
        "help",
        "yes",
        "no thanks",
        "got it",
        "my cat is having a seizure",
        "remind me to give Max his pill at 8am",
        "change the dinner time",
        "what did Max eat today",
        "purple elephant banana",
        "go to the settings page",
        "Max threw up twice this morning",
        "ÿ ñ ü ∞ 🐶",
    ];

    for transcript in transcripts {
        let started = Instant::now();
        let intent = parser.parse_intent(transcript, &context).await;
        assert!(
            started.elapsed() <= BUDGET,
            "{:?} took {:?}",
            transcript,
            started.elapsed()
        );
        assert!(!intent.intent_id.is_empty());
    }
}

#[tokio::test]
async fn test_offline_parser_never_waits() {
    let parser = IntentParser::offline();
    assert!(!parser.has_service());

    let started = std::time::Instant::now();
    let intent = parser
        .parse_intent("go to feeding", &ConversationContext::default())
        .await;

    assert!(started.elapsed() < BUDGET);
    assert_eq!(intent.target.as_deref(), Some("feeding"));
}
