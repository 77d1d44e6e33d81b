//! # novel-illustrator
//!
//! Turns passages selected from a web novel into illustrations using one of
//! several image-generation providers, one request at a time.
//!
//! ## Features
//!
//! - **Prompt composition** with style prefixes, optional AI rewriting and
//!   a global negative prompt
//! - **Prompt enhancement** across a list of fallback models with a per-model
//!   retry budget and a local fallback when every model fails
//! - **Four providers**: Pollinations, AI Horde (async jobs with polling),
//!   Google Imagen and any OpenAI-compatible `images/generations` endpoint
//! - **Single-flight queue** with head-of-queue retries, pause on failure,
//!   and a credentials flow for providers that ask for a token
//! - **Error classification** into retryable and non-retryable kinds, plus
//!   the state behind the recovery dialog
//! - **History log** capped at the most recent 100 images
//!
//! ## Quick Start
//!
//! ```no_run
//! use novel_illustrator::{
//!     Enhancer, GeminiClient, JsonFileStore, Orchestrator, ProviderRouter, QueueEvent,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> novel_illustrator::Result<()> {
//! let store = Arc::new(JsonFileStore::new("settings.json"));
//! let router = ProviderRouter::new(Arc::clone(&store));
//! let (queue, mut events) = Orchestrator::new(router, store);
//!
//! let enhancer = Enhancer::new(GeminiClient::new());
//! queue.submit("The dragon circled the burning tower.", None, &enhancer).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let QueueEvent::Completed { result } = event {
//!         println!("{:?}", result.image_urls);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod enhance;
pub mod error;
pub mod events;
pub mod prompt;
pub mod providers;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod types;

pub use classify::{classify, classify_failure, ErrorKind, MalformedKind};
pub use config::Settings;
pub use enhance::{Enhancer, GeminiClient, TextGenerator};
pub use error::{EnhanceError, IllustratorError, ResponseError, Result};
pub use events::{QueueEvent, StatusState};
pub use prompt::{compose, ComposedPrompt};
pub use providers::{GenerationBackend, ModelCatalog, ProviderRouter};
pub use queue::{Orchestrator, PauseReason};
pub use recovery::{RecoveryAction, RecoveryDialog};
pub use store::{History, JsonFileStore, MemoryStore, SettingsStore};
pub use types::{
    CompletedResult, ErrorReason, ErrorRecord, GenerationOutcome, GenerationRequest,
    GenerationSuccess, HistoryEntry, Provider, ProviderFailure, StatusReporter,
};
