//! Provider adapters and the router that dispatches requests to them.
//!
//! Adapters never return `Err`: every network, HTTP and parse problem ends
//! up as a [`GenerationOutcome`] variant for the orchestrator to match on.

pub mod google;
pub mod horde;
pub mod models;
pub mod openai_compat;
pub mod pollinations;
pub mod response;

#[cfg(test)]
pub(crate) mod test_server;

use rand::Rng;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;

use crate::config::Settings;
use crate::prompt::normalize_prompt;
use crate::store::SettingsStore;
use crate::types::{GenerationOutcome, GenerationRequest, Provider, ProviderFailure, StatusReporter};

pub use models::ModelCatalog;
pub use response::parse_provider_response;

/// Anything that can turn a request into an outcome.
///
/// The orchestrator is generic over this trait, so tests and embedding hosts
/// can substitute their own backend.
pub trait GenerationBackend: Send + Sync + 'static {
    fn generate(
        &self,
        request: &GenerationRequest,
        status: StatusReporter,
    ) -> impl Future<Output = GenerationOutcome> + Send;
}

/// Production backend: loads fresh settings per request and dispatches to
/// the adapter for the request's provider.
#[derive(Debug)]
pub struct ProviderRouter<S: SettingsStore> {
    http: Client,
    store: Arc<S>,
    catalog: ModelCatalog<S>,
}

impl<S: SettingsStore> ProviderRouter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            http: Client::new(),
            catalog: ModelCatalog::new(Arc::clone(&store)),
            store,
        }
    }

    /// Use a custom `reqwest::Client` for adapters and model lookups.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.catalog = self.catalog.with_http_client(client.clone());
        self.http = client;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog<S> {
        &self.catalog
    }
}

impl<S: SettingsStore + 'static> GenerationBackend for ProviderRouter<S> {
    async fn generate(&self, request: &GenerationRequest, status: StatusReporter) -> GenerationOutcome {
        let settings = match Settings::load(&*self.store).await {
            Ok(settings) => settings,
            Err(e) => {
                return GenerationOutcome::Failure(ProviderFailure::new(format!(
                    "Could not read settings: {}",
                    e
                )))
            }
        };
        let prompt = normalize_prompt(&request.prompt);
        tracing::info!(
            request_id = %request.id,
            provider = %request.provider,
            "dispatching generation request"
        );

        match request.provider {
            Provider::Pollinations => {
                pollinations::generate(&self.http, &settings.pollinations, &prompt, &self.catalog).await
            }
            Provider::AiHorde => {
                horde::generate(
                    &self.http,
                    &settings.horde,
                    settings.negative.active_text(),
                    &prompt,
                    &status,
                    &self.catalog,
                )
                .await
            }
            Provider::Google => google::generate(&self.http, &settings.google, &prompt).await,
            Provider::OpenAiCompat => {
                openai_compat::generate(
                    &self.http,
                    &settings.openai,
                    request.provider_profile_id.as_deref(),
                    &prompt,
                )
                .await
            }
        }
    }
}

/// A configured seed, or a fresh random one when the setting is negative.
pub fn resolve_seed(configured: i64) -> i64 {
    if configured >= 0 {
        configured
    } else {
        rand::rng().random_range(0..=i64::from(u32::MAX))
    }
}
