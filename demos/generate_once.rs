//! Generate one image with the free provider and print where it went.
//!
//! Run with: cargo run --example generate_once -- "a lighthouse in a storm"

use novel_illustrator::config::keys;
use novel_illustrator::*;
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let text = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "A lone swordsman on a cliff at dawn".to_string());

    let store = Arc::new(MemoryStore::with_values([
        (keys::SELECTED_PROVIDER, json!("pollinations")),
        (keys::MAIN_STYLE, json!("Anime")),
        (keys::POLLINATIONS_WIDTH, json!(768)),
        (keys::POLLINATIONS_HEIGHT, json!(512)),
    ]));

    let router = ProviderRouter::new(Arc::clone(&store));
    let (queue, mut events) = Orchestrator::new(router, Arc::clone(&store));
    let enhancer = Enhancer::new(GeminiClient::new());

    let composed = queue.submit(&text, None, &enhancer).await?;
    println!("Prompt: {}", composed.prompt);

    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::Status { text, .. } if !text.is_empty() => println!("[status] {}", text),
            QueueEvent::Completed { result } => {
                println!("Done with {} ({} image)", result.provider, result.image_urls.len());
                break;
            }
            QueueEvent::Failed { record } => {
                println!("Failed: {} (retryable: {})", record.reason.message, record.reason.retryable);
                break;
            }
            QueueEvent::AuthRequired { message, .. } => {
                println!("Needs a token: {}", message);
                break;
            }
            _ => {}
        }
    }

    for entry in queue.history().entries().await? {
        println!("history: {} -> {}", entry.prompt, entry.url);
    }
    Ok(())
}
