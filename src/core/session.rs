//! The session controller: wake word → capture → parse → confirm/clarify →
//! execute → compose → speak → idle.
//!
//! One `VoiceSession` owns one conversation. It runs at most one turn at a
//! time; the wake-word monitor and the alert timer run beside it on their
//! own tasks and only hand work over through channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::adapters::{
    load_json, save_json, AudioCapture, CompletionService, FeedbackSound, KeyValueStore,
    SilentSoundPlayer, SoundPlayer, SpeechOutcome, SpeechRecognizer, SpeechSynthesizer,
    StoreError, Utterance,
};
use crate::config::ResolvedConfig;
use crate::domain::{
    AlertNotice, AvatarState, CommandResult, IntentAction, IntentSource, ParsedIntent,
    ProactiveAlert, Response,
};
use crate::voice::{
    AudioFeedbackController, FeedbackError, Listeners, MicrophoneArbiter, RecognitionError,
    Subscription, VoiceRecognitionEngine, WakeWordDetector, WakeWordError, WakeWordEvent,
};

use super::alerts::{AlertError, ProactiveAlertManager};
use super::composer::ResponseComposer;
use super::context::{ContextManager, ManualAction};
use super::fallback::classify_confirmation;
use super::handlers::register_builtin_handlers;
use super::intent_parser::IntentParser;
use super::router::CommandRouter;

/// Store key for the hands-free preference
pub const HANDS_FREE_KEY: &str = "jojo.hands_free";

/// Errors raised by the session controller
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A voice turn is already in progress")]
    Busy,

    #[error("Session has been shut down")]
    Closed,

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Hands-free mode needs a wake-word recognizer")]
    HandsFreeUnavailable,

    #[error(transparent)]
    WakeWord(#[from] WakeWordError),

    #[error(transparent)]
    Alerts(#[from] AlertError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read the persisted hands-free preference
pub async fn stored_hands_free(store: &dyn KeyValueStore) -> Result<bool, StoreError> {
    Ok(load_json(store, HANDS_FREE_KEY).await?.unwrap_or(false))
}

/// Persist the hands-free preference
pub async fn store_hands_free(store: &dyn KeyValueStore, enabled: bool) -> Result<(), StoreError> {
    save_json(store, HANDS_FREE_KEY, &enabled).await
}

/// Collaborators a session is built from
pub struct SessionServices {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub store: Arc<dyn KeyValueStore>,
    /// Continuous recognizer for the wake word; `None` disables hands-free
    pub wake_recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub completion: Option<Arc<dyn CompletionService>>,
    pub sounds: Arc<dyn SoundPlayer>,
    pub capture: Option<Arc<dyn AudioCapture>>,
    pub microphone: MicrophoneArbiter,
}

impl SessionServices {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            store,
            wake_recognizer: None,
            completion: None,
            sounds: Arc::new(SilentSoundPlayer),
            capture: None,
            microphone: MicrophoneArbiter::new(),
        }
    }

    pub fn with_wake_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.wake_recognizer = Some(recognizer);
        self
    }

    pub fn with_completion(mut self, service: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(service);
        self
    }

    pub fn with_sounds(mut self, sounds: Arc<dyn SoundPlayer>) -> Self {
        self.sounds = sounds;
        self
    }

    pub fn with_capture(mut self, capture: Arc<dyn AudioCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_microphone(mut self, microphone: MicrophoneArbiter) -> Self {
        self.microphone = microphone;
        self
    }
}

/// What one turn produced
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The intent as finally understood
    pub intent: ParsedIntent,
    /// `None` when nothing was executed (cancelled, unresolved)
    pub result: Option<CommandResult>,
    /// The last thing said to the user
    pub response: Response,
}

impl TurnOutcome {
    pub fn executed(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Default)]
struct HandsFree {
    enabled: AtomicBool,
    listeners: Listeners<bool>,
}

impl HandsFree {
    fn set(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::SeqCst) != enabled {
            self.listeners.emit(&enabled);
        }
    }
}

/// One conversation with the assistant
pub struct VoiceSession {
    config: ResolvedConfig,
    detector: Option<WakeWordDetector>,
    engine: VoiceRecognitionEngine,
    parser: IntentParser,
    context: Arc<ContextManager>,
    router: Arc<CommandRouter>,
    composer: ResponseComposer,
    feedback: AudioFeedbackController,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn KeyValueStore>,
    alerts: Arc<ProactiveAlertManager>,
    hands_free: Arc<HandsFree>,
    hands_free_toggle: tokio::sync::Mutex<()>,
    turn_lock: tokio::sync::Mutex<()>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<WakeWordEvent>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    deferred_alerts: Mutex<Vec<ProactiveAlert>>,
    responses: Listeners<Response>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl VoiceSession {
    /// Build the pipeline, load alerts and restore hands-free mode
    pub async fn open(
        config: &ResolvedConfig,
        services: SessionServices,
    ) -> Result<Arc<Self>, SessionError> {
        let hands_free = Arc::new(HandsFree::default());
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::new();

        let detector = match services.wake_recognizer {
            Some(recognizer) => {
                let detector = WakeWordDetector::new(recognizer, config.wake_word.clone());
                detector.initialize(&config.wake_word.phrase)?;

                subscriptions.push(detector.on_wake_word_detected(move |event| {
                    let _ = wake_tx.send(event.clone());
                }));

                let state = hands_free.clone();
                subscriptions.push(detector.on_error(move |e| {
                    warn!("wake word error: {}", e);
                    if *e == WakeWordError::PermissionDenied {
                        state.set(false);
                    }
                }));
                Some(detector)
            }
            None => None,
        };

        let alerts = ProactiveAlertManager::open(services.store.clone(), config.alerts).await?;
        let context = Arc::new(ContextManager::new(config.context));
        let router = Arc::new(CommandRouter::new());
        register_builtin_handlers(&router, context.clone(), Some(alerts.clone()));

        let mut feedback = AudioFeedbackController::new(services.sounds, services.microphone);
        if let Some(capture) = services.capture {
            feedback = feedback.with_capture(capture);
        }

        let (shutdown_tx, _) = watch::channel(false);

        let session = Arc::new(Self {
            config: config.clone(),
            detector,
            engine: VoiceRecognitionEngine::new(services.recognizer, config.recognition.clone()),
            parser: IntentParser::new(services.completion, config.intent.budget),
            context,
            router,
            composer: ResponseComposer::default(),
            feedback,
            synthesizer: services.synthesizer,
            store: services.store,
            alerts,
            hands_free,
            hands_free_toggle: tokio::sync::Mutex::new(()),
            turn_lock: tokio::sync::Mutex::new(()),
            wake_rx: Mutex::new(Some(wake_rx)),
            subscriptions: Mutex::new(subscriptions),
            deferred_alerts: Mutex::new(Vec::new()),
            responses: Listeners::new(),
            shutdown_tx,
            closed: AtomicBool::new(false),
        });

        session.restore_hands_free().await;
        info!(
            hands_free = session.hands_free_enabled(),
            completion = session.parser.has_service(),
            "voice session opened"
        );
        Ok(session)
    }

    async fn restore_hands_free(&self) {
        let wanted = match stored_hands_free(&*self.store).await {
            Ok(wanted) => wanted,
            Err(e) => {
                warn!("could not read hands-free preference: {}", e);
                return;
            }
        };
        if !wanted {
            return;
        }
        let Some(detector) = &self.detector else {
            debug!("hands-free preferred but no wake-word recognizer");
            return;
        };

        match detector.start_listening().await {
            Ok(()) => self.hands_free.set(true),
            Err(e) => warn!("could not restore hands-free mode: {}", e),
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    /// Register domain handlers here
    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn alerts(&self) -> &Arc<ProactiveAlertManager> {
        &self.alerts
    }

    pub fn feedback(&self) -> &AudioFeedbackController {
        &self.feedback
    }

    pub fn recognition(&self) -> &VoiceRecognitionEngine {
        &self.engine
    }

    pub fn wake_word_detector(&self) -> Option<&WakeWordDetector> {
        self.detector.as_ref()
    }

    /// Every response the session displays or speaks
    pub fn on_response<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.responses.subscribe(callback)
    }

    // ==================== Hands-free ====================

    /// Turn continuous wake-word listening on or off and persist the choice.
    ///
    /// On return the detector's listening state equals `enabled`, unless an
    /// error is returned, in which case hands-free is off.
    pub async fn set_hands_free(&self, enabled: bool) -> Result<(), SessionError> {
        self.ensure_open()?;
        let _toggle = self.hands_free_toggle.lock().await;

        let Some(detector) = &self.detector else {
            return if enabled {
                Err(SessionError::HandsFreeUnavailable)
            } else {
                store_hands_free(&*self.store, false).await?;
                Ok(())
            };
        };

        if enabled {
            if let Err(e) = detector.start_listening().await {
                self.hands_free.set(false);
                return Err(e.into());
            }
        } else {
            detector.stop_listening().await;
        }

        self.hands_free.set(enabled);
        store_hands_free(&*self.store, enabled).await?;
        info!(enabled, "hands-free mode");
        Ok(())
    }

    pub fn hands_free_enabled(&self) -> bool {
        self.hands_free.enabled.load(Ordering::SeqCst)
    }

    /// Indicator updates for the UI
    pub fn on_hands_free_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.hands_free.listeners.subscribe(callback)
    }

    // ==================== Turns ====================

    /// Run one turn from an already-captured transcript
    pub async fn execute_voice_command(&self, transcript: &str) -> Result<TurnOutcome, SessionError> {
        let _turn = self.turn_lock.try_lock().map_err(|_| SessionError::Busy)?;
        self.ensure_open()?;

        let outcome = self.run_turn(transcript).await;
        self.settle();
        Ok(outcome)
    }

    /// Capture one utterance and run a turn on it (wake word or push-to-talk).
    ///
    /// Returns `Ok(None)` when nothing usable was heard; the user has
    /// already been told why.
    pub async fn handle_activation(&self) -> Result<Option<TurnOutcome>, SessionError> {
        let _turn = self.turn_lock.try_lock().map_err(|_| SessionError::Busy)?;
        self.ensure_open()?;

        self.feedback.play_feedback_sound(FeedbackSound::WakeDetected);
        let outcome = match self.listen().await {
            Ok(transcript) => Some(self.run_turn(&transcript).await),
            Err(e) => {
                self.report_recognition_error(&e).await;
                None
            }
        };

        self.settle();
        Ok(outcome)
    }

    #[instrument(skip(self, transcript), fields(turn = self.context.get_turn_count() + 1))]
    async fn run_turn(&self, transcript: &str) -> TurnOutcome {
        self.step(self.feedback.advance_to(AvatarState::Processing));

        let mut utterance = transcript.trim().to_string();
        debug!(%utterance, "turn started");
        let mut intent = self.parse(&utterance).await;

        let mut rounds = 0;
        while intent.needs_clarification() {
            let question = self.composer.compose_clarification(&intent.open_questions());
            if rounds >= self.config.max_follow_ups {
                if rounds == 0 {
                    self.say(&question).await;
                    return TurnOutcome {
                        intent,
                        result: None,
                        response: question,
                    };
                }
                let response = self
                    .composer
                    .compose_error_response("I still couldn't work out what you meant");
                self.say(&response).await;
                return TurnOutcome {
                    intent,
                    result: None,
                    response,
                };
            }

            self.say(&question).await;
            match self.listen().await {
                Ok(answer) => {
                    rounds += 1;
                    utterance = format!("{} {}", utterance, answer);
                    self.step(self.feedback.advance_to(AvatarState::Processing));
                    intent = self.parse(&utterance).await;
                }
                Err(e) => {
                    self.report_recognition_error(&e).await;
                    return TurnOutcome {
                        intent,
                        result: None,
                        response: question,
                    };
                }
            }
        }

        match intent.action {
            IntentAction::Cancel => {
                self.context.update_context(&intent);
                let response = self.composer.compose_response(&CommandResult::ok("Okay."));
                self.say(&response).await;
                return TurnOutcome {
                    intent,
                    result: None,
                    response,
                };
            }
            IntentAction::Confirm => {
                self.context.update_context(&intent);
                let response = self
                    .composer
                    .compose_response(&CommandResult::ok("There's nothing waiting for a yes right now."));
                self.say(&response).await;
                return TurnOutcome {
                    intent,
                    result: None,
                    response,
                };
            }
            _ => {}
        }

        if intent.requires_confirmation && !self.confirm(&intent).await {
            self.context.update_context(&intent);
            let response = self
                .composer
                .compose_response(&CommandResult::ok("Okay, I won't do that."));
            self.say(&response).await;
            return TurnOutcome {
                intent,
                result: None,
                response,
            };
        }

        let result = self.router.execute_command(&intent).await;
        self.context.update_context(&intent);

        let response = self.composer.compose_response(&result);
        self.feedback.play_feedback_sound(if result.success {
            FeedbackSound::Success
        } else {
            FeedbackSound::Error
        });
        self.say(&response).await;

        TurnOutcome {
            intent,
            result: Some(result),
            response,
        }
    }

    async fn parse(&self, utterance: &str) -> ParsedIntent {
        let context = self.context.get_context();
        self.parser
            .parse_intent(utterance, &context)
            .await
            .with_transcript(utterance)
    }

    /// Ask, then wait for a yes or no. Anything else counts as no.
    async fn confirm(&self, intent: &ParsedIntent) -> bool {
        let question = self.composer.compose_confirmation(intent);
        self.say(&question).await;

        match self.listen().await {
            Ok(reply) => {
                let decision = classify_confirmation(&reply);
                debug!(?decision, "confirmation reply");
                decision == Some(true)
            }
            Err(e) => {
                if e.is_user_visible() {
                    debug!("no confirmation heard: {}", e);
                }
                false
            }
        }
    }

    /// Open the microphone for one utterance
    async fn listen(&self) -> Result<String, RecognitionError> {
        self.step(self.feedback.show_idle());
        self.step(self.feedback.show_listening());
        self.feedback.play_feedback_sound(FeedbackSound::ListeningStart);

        let ticket = self.engine.start_recognition().await?;
        let transcript = ticket.outcome().await?;
        Ok(transcript.text)
    }

    async fn report_recognition_error(&self, error: &RecognitionError) {
        if !error.is_user_visible() {
            debug!("recognition aborted");
            return;
        }

        warn!("recognition failed: {}", error);
        self.step(self.feedback.show_error());
        self.feedback.play_feedback_sound(FeedbackSound::Error);

        let response = self.composer.compose_error_response(error.user_message());
        self.responses.emit(&response);
        self.speak_text(&response).await;
    }

    /// Display and speak `response`, walking the avatar to SPEAKING
    async fn say(&self, response: &Response) {
        self.responses.emit(response);
        if self.feedback.state() != AvatarState::Speaking {
            self.step(self.feedback.advance_to(AvatarState::Processing));
        }

        match self.synthesizer.speak(&response.text, &self.config.voice).await {
            Ok(Utterance { levels, finished }) => {
                self.step(self.feedback.show_speaking(levels));
                if let Ok(SpeechOutcome::Interrupted) = finished.await {
                    debug!("speech interrupted");
                }
            }
            Err(e) => warn!("speech synthesis failed: {}", e),
        }
    }

    /// Speak without touching the avatar
    async fn speak_text(&self, response: &Response) {
        match self.synthesizer.speak(&response.text, &self.config.voice).await {
            Ok(utterance) => {
                let _ = utterance.finished.await;
            }
            Err(e) => warn!("speech synthesis failed: {}", e),
        }
    }

    fn step(&self, transition: Result<(), FeedbackError>) {
        if let Err(e) = transition {
            debug!("feedback transition skipped: {}", e);
        }
    }

    /// Every turn ends in IDLE
    fn settle(&self) {
        self.step(self.feedback.show_idle());
    }

    // ==================== Alerts ====================

    /// Speak a due alert, or defer it while a turn is in flight.
    ///
    /// Returns the spoken response, or `None` when deferred.
    pub async fn announce_alert(&self, alert: &ProactiveAlert) -> Option<Response> {
        let Ok(_turn) = self.turn_lock.try_lock() else {
            debug!(id = %alert.id, "turn in flight, alert deferred");
            self.deferred_alerts
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(alert.clone());
            return None;
        };
        if self.ensure_open().is_err() {
            return None;
        }

        self.feedback.play_feedback_sound(FeedbackSound::Alert);
        let response = self.composer.compose_alert(alert);
        self.say(&response).await;
        self.settle();
        Some(response)
    }

    /// Announce alerts that came due during a turn
    pub async fn announce_deferred_alerts(&self) -> Vec<Response> {
        let deferred: Vec<ProactiveAlert> =
            std::mem::take(&mut *self.deferred_alerts.lock().unwrap_or_else(|e| e.into_inner()));

        let mut spoken = Vec::new();
        for alert in deferred {
            if let Some(response) = self.announce_alert(&alert).await {
                spoken.push(response);
            }
        }
        spoken
    }

    /// UI acknowledgment, routed like a spoken "got it"
    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<CommandResult, SessionError> {
        self.ensure_open()?;

        let intent = ParsedIntent::new(IntentAction::Acknowledge, 1.0)
            .with_source(IntentSource::Alert)
            .with_parameter("alert_id", alert_id);
        let result = self.router.execute_command(&intent).await;
        self.context.update_context(&intent);
        Ok(result)
    }

    /// A UI action taken without speaking
    pub fn notify_manual_action(&self, action: ManualAction) -> ParsedIntent {
        self.context.notify_manual_action(action)
    }

    // ==================== Lifecycle ====================

    /// Abort the in-flight capture and speech (stop button, navigating away)
    pub async fn cancel(&self) {
        let stopped = self.engine.stop_recognition().await;
        self.synthesizer.cancel();
        self.settle();
        debug!(stopped, "session cancelled");
    }

    /// Drive the session: wake words start turns, due alerts get announced.
    /// Returns after `shutdown()`.
    pub async fn run(self: &Arc<Self>) -> Result<(), SessionError> {
        self.ensure_open()?;
        let mut wake_rx = self
            .wake_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(SessionError::AlreadyRunning)?;
        let mut notices = self.alerts.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();
        self.alerts.start()?;

        // Without a detector the channel is closed from the start
        let mut wake_open = self.detector.is_some();

        info!("voice session running");
        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                event = wake_rx.recv(), if wake_open => match event {
                    Some(event) => {
                        info!(phrase = %event.phrase, "wake word detected");
                        self.converse().await;
                    }
                    None => wake_open = false,
                },
                notice = notices.recv() => match notice {
                    Ok(AlertNotice::Due(alert)) => {
                        if let Some(response) = self.announce_alert(&alert).await {
                            if response.expects_reply {
                                self.converse().await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "alert notices dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }

            for response in self.announce_deferred_alerts().await {
                if response.expects_reply {
                    self.converse().await;
                }
            }

            // Detections queued while a turn held the microphone are stale
            let mut stale = 0;
            while wake_rx.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!(stale, "dropped wake words heard during the turn");
            }
        }

        info!("voice session stopped");
        Ok(())
    }

    /// Activation plus any replies the assistant asked for
    async fn converse(&self) {
        let mut follow_ups = 0;
        loop {
            match self.handle_activation().await {
                Ok(Some(outcome)) if outcome.response.expects_reply && follow_ups < self.config.max_follow_ups => {
                    follow_ups += 1;
                }
                Ok(_) => break,
                Err(SessionError::Busy) => {
                    debug!("activation ignored, turn in flight");
                    break;
                }
                Err(e) => {
                    warn!("activation failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop everything and release every resource. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        self.cancel().await;

        if let Some(detector) = &self.detector {
            detector.dispose().await;
        }
        self.alerts.destroy().await;

        let subscriptions =
            std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()));
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.responses.clear();
        self.hands_free.listeners.clear();
        self.feedback.cleanup();

        info!("voice session shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
