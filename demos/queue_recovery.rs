//! Walk through the pause/retry flow with an offline backend that rejects
//! the first prompt on content-policy grounds.
//!
//! Run with: cargo run --example queue_recovery

use novel_illustrator::*;
use std::sync::Arc;
use std::time::Duration;

struct OfflineBackend;

impl GenerationBackend for OfflineBackend {
    async fn generate(&self, request: &GenerationRequest, status: StatusReporter) -> GenerationOutcome {
        status.report("Rendering offline...");
        tokio::time::sleep(Duration::from_millis(200)).await;
        if request.prompt.contains("blood") {
            return GenerationOutcome::Failure(ProviderFailure::new(
                "content_policy_violation: prompt rejected",
            ));
        }
        GenerationOutcome::Success(GenerationSuccess {
            display_urls: vec![format!("https://offline.example/{}.png", request.id)],
            persistent_urls: None,
            provider_name: "Offline".to_string(),
            model: "none".to_string(),
        })
    }
}

#[tokio::main]
async fn main() {
    let (queue, mut events) = Orchestrator::new(OfflineBackend, Arc::new(MemoryStore::new()));

    queue.enqueue(GenerationRequest::new("a duel, blood on the snow", Provider::Pollinations));
    queue.enqueue(GenerationRequest::new("the castle gates at night", Provider::Pollinations));

    let mut finished = 0;
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::Status { state, text } => println!("[{:?}] {}", state, text),
            QueueEvent::Failed { .. } => {
                let Some(record) = queue.next_error() else { continue };
                println!("Error: {}", record.reason.message);

                let mut dialog = RecoveryDialog::new(record);
                println!("Retry offered right away: {}", dialog.can_retry());
                dialog.edit_prompt("a duel on the snow at dusk");

                if let Some(RecoveryAction::Retry {
                    prompt,
                    provider,
                    provider_profile_id,
                }) = dialog.retry()
                {
                    println!("Retrying with edited prompt: {}", prompt);
                    queue.retry(prompt, provider, provider_profile_id);
                }
            }
            QueueEvent::Completed { result } => {
                println!("Completed: {} -> {:?}", result.prompt, result.image_urls);
                finished += 1;
                if finished == 2 {
                    break;
                }
            }
            _ => {}
        }
    }

    while let Some(result) = queue.take_completed() {
        println!("Viewed: {}", result.prompt);
    }
}
