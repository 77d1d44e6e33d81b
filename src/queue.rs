use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

use crate::classify::classify_failure;
use crate::config::{keys, Settings};
use crate::enhance::{Enhancer, TextGenerator};
use crate::error::{IllustratorError, Result};
use crate::events::{QueueEvent, StatusState};
use crate::prompt::{compose, ComposedPrompt};
use crate::providers::GenerationBackend;
use crate::store::{History, SettingsStore};
use crate::types::{
    CompletedResult, ErrorRecord, GenerationOutcome, GenerationRequest, GenerationSuccess,
    HistoryEntry, Provider, ProviderFailure, StatusReporter,
};

/// Why draining is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// A failure is waiting for the user to dismiss or retry it.
    Error,
    /// The provider asked for credentials.
    Auth,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<GenerationRequest>,
    in_flight: Option<GenerationRequest>,
    paused: Option<PauseReason>,
    live_status: String,
    completed: VecDeque<CompletedResult>,
    errors: VecDeque<ErrorRecord>,
    auth_blocked: Option<GenerationRequest>,
}

impl QueueState {
    /// Live status plus a depth indicator when more requests are waiting.
    fn status_text(&self) -> String {
        match self.pending.len() {
            0 => self.live_status.clone(),
            n => format!("{} (+{} queued)", self.live_status, n),
        }
    }

    /// Status to show when nothing is running.
    fn idle_status(&self) -> (StatusState, String) {
        match self.completed.len() {
            0 => (StatusState::Hidden, String::new()),
            1 => (StatusState::Success, "1 image ready, click to view".to_string()),
            n => (StatusState::Success, format!("{} images ready, click to view", n)),
        }
    }
}

/// Single-flight generation queue.
///
/// Requests are served one at a time in FIFO order; retries jump to the
/// head. Every failure pauses the queue until the user dismisses or retries
/// it, so nothing is resubmitted without a human decision. State changes
/// are published as [`QueueEvent`]s on the channel returned by
/// [`Orchestrator::new`].
///
/// Methods that may start work take `self: &Arc<Self>` because the in-flight
/// request runs on a spawned tokio task.
pub struct Orchestrator<B: GenerationBackend, S: SettingsStore + 'static> {
    backend: Arc<B>,
    store: Arc<S>,
    history: History<S>,
    state: Mutex<QueueState>,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl<B: GenerationBackend, S: SettingsStore + 'static> Orchestrator<B, S> {
    pub fn new(backend: B, store: Arc<S>) -> (Arc<Self>, mpsc::UnboundedReceiver<QueueEvent>) {
        Self::with_history(backend, Arc::clone(&store), History::new(store))
    }

    /// Use a custom history log (e.g. a different cap).
    pub fn with_history(
        backend: B,
        store: Arc<S>,
        history: History<S>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<QueueEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            backend: Arc::new(backend),
            store,
            history,
            state: Mutex::new(QueueState::default()),
            events: tx,
        });
        (orchestrator, rx)
    }

    pub fn history(&self) -> &History<S> {
        &self.history
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: QueueEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }

    // ── Intake ──────────────────────────────────────────────────────

    /// Compose a prompt from selected text with the current settings and
    /// enqueue it for the selected provider.
    pub async fn submit<T: TextGenerator>(
        self: &Arc<Self>,
        selection: &str,
        provider_profile_id: Option<String>,
        enhancer: &Enhancer<T>,
    ) -> Result<ComposedPrompt> {
        if selection.trim().is_empty() {
            return Err(IllustratorError::EmptySelection);
        }
        let settings = Settings::load(&*self.store).await?;
        let composed = compose(selection, &settings, enhancer).await;
        if let Some(warning) = &composed.warning {
            self.emit(QueueEvent::Warning {
                message: warning.clone(),
            });
        }
        let request = GenerationRequest::new(composed.prompt.clone(), settings.provider)
            .with_profile(provider_profile_id);
        self.enqueue(request);
        Ok(composed)
    }

    /// Append a request to the tail of the queue.
    pub fn enqueue(self: &Arc<Self>, request: GenerationRequest) {
        tracing::info!(request_id = %request.id, provider = %request.provider, "request enqueued");
        self.lock().pending.push_back(request);
        self.drain();
    }

    /// Insert a request at the head so it runs next.
    pub fn enqueue_front(self: &Arc<Self>, request: GenerationRequest) {
        tracing::info!(request_id = %request.id, provider = %request.provider, "request enqueued at head");
        self.lock().pending.push_front(request);
        self.drain();
    }

    /// Start the next request unless one is in flight, the queue is paused,
    /// or nothing is waiting.
    pub fn drain(self: &Arc<Self>) {
        let (request, text) = {
            let mut state = self.lock();
            if state.in_flight.is_some() || state.paused.is_some() {
                return;
            }
            let Some(request) = state.pending.pop_front() else {
                return;
            };
            state.in_flight = Some(request.clone());
            state.live_status = format!("Requesting image from {}...", request.provider);
            (request, state.status_text())
        };

        tracing::debug!(request_id = %request.id, "dispatching request");
        self.emit(QueueEvent::status(StatusState::Loading, text));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let reporter = this.status_reporter(&request);
            let backend = Arc::clone(&this.backend);
            let call = request.clone();
            // A panicking backend still has to release the slot.
            let outcome = match tokio::spawn(async move { backend.generate(&call, reporter).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(request_id = %request.id, error = %e, "generation task died");
                    GenerationOutcome::Failure(ProviderFailure::new(format!(
                        "Image generation stopped unexpectedly: {}",
                        e
                    )))
                }
            };
            this.finish(request, outcome).await;
        });
    }

    /// Reporter that updates the live status while `request` is in flight.
    fn status_reporter(self: &Arc<Self>, request: &GenerationRequest) -> StatusReporter {
        let weak: Weak<Self> = Arc::downgrade(self);
        let request_id = request.id.clone();
        StatusReporter::new(move |text| {
            if let Some(this) = weak.upgrade() {
                this.set_live_status(&request_id, text);
            }
        })
    }

    fn set_live_status(&self, request_id: &str, text: &str) {
        let status = {
            let mut state = self.lock();
            match &state.in_flight {
                Some(r) if r.id == request_id => {}
                _ => return,
            }
            state.live_status = text.to_string();
            state.status_text()
        };
        self.emit(QueueEvent::status(StatusState::Loading, status));
    }

    // ── Outcomes ────────────────────────────────────────────────────

    async fn finish(self: &Arc<Self>, request: GenerationRequest, outcome: GenerationOutcome) {
        match outcome {
            GenerationOutcome::Success(success) => self.on_success(request, success).await,
            GenerationOutcome::Failure(failure) => self.on_failure(request, failure),
            GenerationOutcome::AuthRequired { message } => self.on_auth_required(request, message),
        }
    }

    async fn on_success(self: &Arc<Self>, request: GenerationRequest, success: GenerationSuccess) {
        tracing::info!(
            request_id = %request.id,
            provider = %success.provider_name,
            model = %success.model,
            images = success.display_urls.len(),
            "generation succeeded"
        );
        let result = CompletedResult {
            image_urls: success.display_urls.clone(),
            prompt: request.prompt.clone(),
            provider: success.provider_name.clone(),
        };
        // History is written while this request still holds the slot, so the
        // next dispatch cannot overlap the write.
        let date = Utc::now().to_rfc3339();
        for url in success.history_urls() {
            let entry = HistoryEntry {
                date: date.clone(),
                prompt: request.prompt.clone(),
                url: url.clone(),
                provider: success.provider_name.clone(),
                model: success.model.clone(),
            };
            if let Err(e) = self.history.add(entry).await {
                tracing::warn!(request_id = %request.id, error = %e, "failed to record history");
            }
        }
        {
            let mut state = self.lock();
            state.in_flight = None;
            state.completed.push_back(result.clone());
        }

        self.emit(QueueEvent::Completed { result });
        self.emit_idle_or_loading();
        self.drain();
    }

    fn on_failure(&self, request: GenerationRequest, failure: ProviderFailure) {
        let profile_id = failure.profile_id.clone().or(request.provider_profile_id);
        let reason = classify_failure(&failure, request.provider, profile_id.as_deref());
        tracing::warn!(
            request_id = %request.id,
            provider = %request.provider,
            kind = ?reason.kind,
            retryable = reason.retryable,
            error = %failure.message,
            "generation failed, pausing queue"
        );
        let record = ErrorRecord {
            reason,
            prompt: request.prompt,
            provider: request.provider,
            provider_profile_id: profile_id,
        };
        {
            let mut state = self.lock();
            state.in_flight = None;
            state.paused = Some(PauseReason::Error);
            state.errors.push_back(record.clone());
        }
        let text = format!("Generation failed: {}", record.reason.message);
        self.emit(QueueEvent::Failed { record });
        self.emit(QueueEvent::status(StatusState::Error, text));
    }

    fn on_auth_required(&self, request: GenerationRequest, message: String) {
        tracing::warn!(request_id = %request.id, provider = %request.provider, "provider requires credentials, pausing queue");
        let prompt = request.prompt.clone();
        {
            let mut state = self.lock();
            state.in_flight = None;
            state.paused = Some(PauseReason::Auth);
            state.auth_blocked = Some(request);
        }
        self.emit(QueueEvent::AuthRequired {
            message: message.clone(),
            prompt,
        });
        self.emit(QueueEvent::status(StatusState::Error, message));
    }

    fn emit_idle_or_loading(&self) {
        let (state, text) = {
            let state = self.lock();
            if state.in_flight.is_some() {
                (StatusState::Loading, state.status_text())
            } else {
                state.idle_status()
            }
        };
        self.emit(QueueEvent::status(state, text));
    }

    // ── User decisions ──────────────────────────────────────────────

    /// Pop the next error to display. Removed from the queue once shown.
    pub fn next_error(&self) -> Option<ErrorRecord> {
        self.lock().errors.pop_front()
    }

    /// Close the error display and resume draining.
    pub fn dismiss_error(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if state.paused == Some(PauseReason::Error) {
                state.paused = None;
            }
        }
        self.emit_idle_or_loading();
        self.drain();
    }

    /// Resubmit a failed prompt, possibly edited or for another provider.
    /// The request runs next, ahead of anything already queued.
    pub fn retry(
        self: &Arc<Self>,
        edited_prompt: impl Into<String>,
        provider: Provider,
        provider_profile_id: Option<String>,
    ) {
        let request = GenerationRequest::new(edited_prompt, provider).with_profile(provider_profile_id);
        {
            let mut state = self.lock();
            if state.paused == Some(PauseReason::Error) {
                state.paused = None;
            }
        }
        self.enqueue_front(request);
    }

    /// Persist a token for the provider that asked for credentials.
    pub async fn supply_credentials(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IllustratorError::InvalidConfig("token must not be empty".into()));
        }
        self.store.set(keys::POLLINATIONS_TOKEN, json!(token)).await?;
        tracing::info!("provider token saved");
        Ok(())
    }

    /// Re-run the request that was blocked on credentials, at the head of
    /// the queue. Returns `false` if nothing was waiting.
    pub fn retry_after_auth(self: &Arc<Self>) -> bool {
        let blocked = {
            let mut state = self.lock();
            let blocked = state.auth_blocked.take();
            if blocked.is_some() && state.paused == Some(PauseReason::Auth) {
                state.paused = None;
            }
            blocked
        };
        match blocked {
            Some(request) => {
                self.enqueue_front(request);
                true
            }
            None => false,
        }
    }

    /// Give up on the request that was blocked on credentials and resume.
    pub fn cancel_auth(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.auth_blocked = None;
            if state.paused == Some(PauseReason::Auth) {
                state.paused = None;
            }
        }
        self.emit_idle_or_loading();
        self.drain();
    }

    /// Pop the oldest completed result (the user clicked the indicator).
    pub fn take_completed(&self) -> Option<CompletedResult> {
        let result = self.lock().completed.pop_front();
        if result.is_some() {
            self.emit_idle_or_loading();
        }
        result
    }

    // ── Introspection ───────────────────────────────────────────────

    pub fn is_generating(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    pub fn paused(&self) -> Option<PauseReason> {
        self.lock().paused
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.lock().completed.len()
    }

    pub fn error_len(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn status_text(&self) -> String {
        self.lock().status_text()
    }
}
