use novel_illustrator::config::keys;
use novel_illustrator::enhance::TextRequest;
use novel_illustrator::*;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Backend that answers immediately: prompts containing "forbidden" are
/// rejected, "gateway" hits a transient outage, everything else succeeds.
#[derive(Default)]
struct ScriptedBackend;

impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest, status: StatusReporter) -> GenerationOutcome {
        status.report("Rendering...");
        if request.prompt.contains("forbidden") {
            GenerationOutcome::Failure(ProviderFailure::new(
                r#"OpenAI API error 400: {"error":{"code":"moderation_blocked","message":"Your request was rejected by the safety system."}}"#,
            ))
        } else if request.prompt.contains("gateway") {
            GenerationOutcome::Failure(ProviderFailure::new("error code: 524"))
        } else {
            GenerationOutcome::Success(GenerationSuccess {
                display_urls: vec!["data:image/png;base64,AAAA".into()],
                persistent_urls: Some(vec![format!("https://img.example/{}", request.id)]),
                provider_name: request.provider.display_name().to_string(),
                model: "test-model".into(),
            })
        }
    }
}

/// Text generator that always fails, to exercise the enhancement warning path.
struct Unreachable;

impl TextGenerator for Unreachable {
    async fn generate_text(&self, _request: &TextRequest<'_>) -> std::result::Result<String, EnhanceError> {
        Err(EnhanceError::Request("connection refused".into()))
    }
}

async fn wait_for<F>(events: &mut UnboundedReceiver<QueueEvent>, pred: F) -> QueueEvent
where
    F: Fn(&QueueEvent) -> bool,
{
    loop {
        let event = events.recv().await.expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

fn styled_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_values([
        (keys::SELECTED_PROVIDER, json!("google")),
        (keys::MAIN_STYLE, json!("Anime")),
        (keys::SUB_STYLE, json!("none")),
        (keys::NEGATIVE_PROMPT_ENABLED, json!(true)),
        (keys::NEGATIVE_PROMPT_TEXT, json!("blurry")),
    ]))
}

// --- Compose → enqueue → outcome ---

#[tokio::test]
async fn test_submit_composes_and_records_history() {
    let store = styled_store();
    let (queue, mut events) = Orchestrator::new(ScriptedBackend::default(), Arc::clone(&store));
    let enhancer = Enhancer::new(Unreachable);

    let composed = queue.submit("a cat", None, &enhancer).await.unwrap();
    assert_eq!(composed.prompt, "Anime style, a cat, negative prompt: blurry");
    assert!(!composed.enhanced);

    let event = wait_for(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
    let QueueEvent::Completed { result } = event else { unreachable!() };
    assert_eq!(result.prompt, "Anime style, a cat, negative prompt: blurry");
    assert_eq!(result.provider, "Google Imagen");
    assert_eq!(result.image_urls, vec!["data:image/png;base64,AAAA"]);

    // History keeps the persistent URL, not the inline image.
    let entries = queue.history().entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].url.starts_with("https://img.example/"));
    assert_eq!(entries[0].model, "test-model");
}

#[tokio::test]
async fn test_horde_keeps_negative_prompt_out_of_text() {
    let store = styled_store();
    store.set(keys::SELECTED_PROVIDER, json!("aiHorde")).await.unwrap();
    let (queue, _events) = Orchestrator::new(ScriptedBackend::default(), store);

    let composed = queue.submit("a cat", None, &Enhancer::new(Unreachable)).await.unwrap();
    assert_eq!(composed.prompt, "Anime style, a cat");
}

#[tokio::test]
async fn test_enhancement_failure_warns_and_continues() {
    let store = styled_store();
    store.set(keys::ENHANCEMENT_ENABLED, json!(true)).await.unwrap();
    store.set(keys::ENHANCEMENT_API_KEY, json!("key")).await.unwrap();
    store.set(keys::ENHANCEMENT_ALWAYS_FALLBACK, json!(false)).await.unwrap();
    store.set(keys::ENHANCEMENT_MAX_RETRIES, json!(1)).await.unwrap();
    store.set(keys::ENHANCEMENT_RETRY_DELAY_MS, json!(0)).await.unwrap();
    let (queue, mut events) = Orchestrator::new(ScriptedBackend::default(), store);

    let composed = queue.submit("a cat", None, &Enhancer::new(Unreachable)).await.unwrap();
    assert!(composed.warning.is_some());
    assert_eq!(composed.prompt, "Anime style, a cat, negative prompt: blurry");

    let warning = wait_for(&mut events, |e| matches!(e, QueueEvent::Warning { .. })).await;
    let QueueEvent::Warning { message } = warning else { unreachable!() };
    assert!(message.contains("connection refused"));
    wait_for(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
}

#[tokio::test]
async fn test_empty_selection_rejected() {
    let (queue, _events) = Orchestrator::new(ScriptedBackend::default(), Arc::new(MemoryStore::new()));
    let err = queue.submit("   ", None, &Enhancer::new(Unreachable)).await.unwrap_err();
    assert!(matches!(err, IllustratorError::EmptySelection));
    assert_eq!(queue.pending_len(), 0);
}

// --- Failure and recovery ---

#[tokio::test]
async fn test_rejected_prompt_recovery_flow() {
    let (queue, mut events) = Orchestrator::new(ScriptedBackend::default(), Arc::new(MemoryStore::new()));
    queue.enqueue(GenerationRequest::new("a forbidden scene", Provider::OpenAiCompat));
    queue.enqueue(GenerationRequest::new("a quiet village", Provider::OpenAiCompat));

    wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
    assert_eq!(queue.paused(), Some(PauseReason::Error));
    assert_eq!(queue.pending_len(), 1);

    let record = queue.next_error().unwrap();
    assert_eq!(record.reason.kind, ErrorKind::ContentPolicyRejection);

    let mut dialog = RecoveryDialog::new(record);
    assert!(!dialog.can_retry());
    dialog.edit_prompt("a peaceful scene");
    let Some(RecoveryAction::Retry {
        prompt,
        provider,
        provider_profile_id,
    }) = dialog.retry()
    else {
        panic!("retry should be offered after editing");
    };
    queue.retry(prompt, provider, provider_profile_id);

    let first = wait_for(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
    let QueueEvent::Completed { result } = first else { unreachable!() };
    assert_eq!(result.prompt, "a peaceful scene");

    let second = wait_for(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
    let QueueEvent::Completed { result } = second else { unreachable!() };
    assert_eq!(result.prompt, "a quiet village");
    assert_eq!(queue.completed_len(), 2);
}

#[tokio::test]
async fn test_transient_failure_is_retryable_without_edit() {
    let (queue, mut events) = Orchestrator::new(ScriptedBackend::default(), Arc::new(MemoryStore::new()));
    queue.enqueue(GenerationRequest::new("gateway trouble", Provider::Pollinations));

    let event = wait_for(&mut events, |e| matches!(e, QueueEvent::Failed { .. })).await;
    let QueueEvent::Failed { record } = event else { unreachable!() };
    assert!(record.reason.retryable);
    assert_eq!(record.reason.kind, ErrorKind::TransientInfrastructure);

    let dialog = RecoveryDialog::new(queue.next_error().unwrap());
    assert!(dialog.can_retry());
    queue.dismiss_error();
    assert!(queue.paused().is_none());
}

// --- Persistence ---

#[tokio::test]
async fn test_history_survives_restart_with_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let store = Arc::new(JsonFileStore::new(&path));
        let (queue, mut events) = Orchestrator::new(ScriptedBackend::default(), store);
        queue.enqueue(GenerationRequest::new("a lighthouse", Provider::Pollinations));
        wait_for(&mut events, |e| matches!(e, QueueEvent::Completed { .. })).await;
    }

    let reopened = History::new(Arc::new(JsonFileStore::new(&path)));
    let entries = reopened.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].prompt, "a lighthouse");
    assert_eq!(entries[0].provider, "Pollinations");
}

#[tokio::test]
async fn test_settings_are_read_per_operation() {
    let store = Arc::new(MemoryStore::new());
    let (queue, _events) = Orchestrator::new(ScriptedBackend::default(), Arc::clone(&store));
    let enhancer = Enhancer::new(Unreachable);

    let plain = queue.submit("a cat", None, &enhancer).await.unwrap();
    assert_eq!(plain.prompt, "a cat");

    store.set(keys::MAIN_STYLE, json!("Watercolor")).await.unwrap();
    let styled = queue.submit("a cat", None, &enhancer).await.unwrap();
    assert_eq!(styled.prompt, "Watercolor style, a cat");
}
