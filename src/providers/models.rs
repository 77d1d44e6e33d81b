use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::{IllustratorError, Result};
use crate::store::SettingsStore;
use crate::types::Provider;

/// Prefix of the store keys holding cached model lists.
pub const MODEL_CACHE_PREFIX: &str = "cachedModels";

/// A model list fetched from a provider, as cached in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedModels {
    pub models: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Store key for `provider`'s cached model list.
pub fn cache_key(provider: Provider) -> String {
    format!("{}.{}", MODEL_CACHE_PREFIX, provider.as_str())
}

/// Fetches and caches the model lists that the settings UI offers.
///
/// Only the free provider and the worker pool publish model lists. Entries
/// stay cached until [`invalidate`](Self::invalidate) is called, which the
/// adapters do when a provider reports an unknown model.
#[derive(Debug)]
pub struct ModelCatalog<S: SettingsStore> {
    http: Client,
    store: Arc<S>,
}

impl<S: SettingsStore> Clone for ModelCatalog<S> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SettingsStore> ModelCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            http: Client::new(),
            store,
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Cached list if present, otherwise fetched and cached.
    pub async fn models(&self, provider: Provider) -> Result<Vec<String>> {
        if let Some(cached) = self.cached(provider).await? {
            return Ok(cached.models);
        }
        self.refresh(provider).await
    }

    /// The cached entry, ignoring entries that no longer deserialize.
    pub async fn cached(&self, provider: Provider) -> Result<Option<CachedModels>> {
        let Some(value) = self.store.get(&cache_key(provider)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value(value).ok())
    }

    /// Fetch the list from the provider and replace the cache.
    pub async fn refresh(&self, provider: Provider) -> Result<Vec<String>> {
        let settings = Settings::load(&*self.store).await?;
        let models = match provider {
            Provider::Pollinations => {
                let url = format!("{}/models", settings.pollinations.endpoint.trim_end_matches('/'));
                parse_pollinations_models(&self.fetch_json(&url).await?)
            }
            Provider::AiHorde => {
                let url = format!(
                    "{}/status/models?type=image",
                    settings.horde.endpoint.trim_end_matches('/')
                );
                parse_horde_models(&self.fetch_json(&url).await?)
            }
            other => {
                return Err(IllustratorError::InvalidConfig(format!(
                    "{} does not publish a model list",
                    other
                )))
            }
        };

        tracing::info!(provider = %provider, count = models.len(), "model list refreshed");
        let entry = CachedModels {
            models: models.clone(),
            fetched_at: Utc::now(),
        };
        self.store
            .set(&cache_key(provider), serde_json::to_value(&entry)?)
            .await?;
        Ok(models)
    }

    /// Drop the cached list so the next lookup refetches it.
    pub async fn invalidate(&self, provider: Provider) -> Result<()> {
        tracing::info!(provider = %provider, "invalidating cached model list");
        self.store.remove(&cache_key(provider)).await
    }

    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| IllustratorError::Other(format!("Cannot fetch model list from {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(IllustratorError::Other(format!(
                "Model list request to {} failed with HTTP {}",
                url,
                resp.status().as_u16()
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| IllustratorError::Other(format!("Failed to read model list: {}", e)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// The free provider answers with either plain names or `{name: ...}` objects.
pub fn parse_pollinations_models(json: &Value) -> Vec<String> {
    json.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_str()
                        .or_else(|| item.get("name").and_then(Value::as_str))
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Worker-pool models, busiest first (most workers serving them).
pub fn parse_horde_models(json: &Value) -> Vec<String> {
    let mut models: Vec<(String, u64)> = json
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name").and_then(Value::as_str)?;
                    let count = item.get("count").and_then(Value::as_u64).unwrap_or(0);
                    Some((name.to_string(), count))
                })
                .collect()
        })
        .unwrap_or_default();
    models.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    models.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_parse_pollinations_models_mixed_shapes() {
        let json = json!(["flux", {"name": "turbo", "description": "fast"}, 42]);
        assert_eq!(parse_pollinations_models(&json), vec!["flux", "turbo"]);
        assert!(parse_pollinations_models(&json!({"error": "x"})).is_empty());
    }

    #[test]
    fn test_parse_horde_models_sorted_by_workers() {
        let json = json!([
            {"name": "Deliberate", "count": 3},
            {"name": "stable_diffusion", "count": 12},
            {"name": "AlbedoBase XL", "count": 12},
            {"count": 99}
        ]);
        assert_eq!(
            parse_horde_models(&json),
            vec!["AlbedoBase XL", "stable_diffusion", "Deliberate"]
        );
    }

    #[tokio::test]
    async fn test_cached_models_served_without_fetch() {
        let entry = json!({"models": ["flux", "turbo"], "fetchedAt": "2024-05-01T12:00:00Z"});
        let store = Arc::new(MemoryStore::with_values([(cache_key(Provider::Pollinations), entry)]));
        let catalog = ModelCatalog::new(Arc::clone(&store));

        assert_eq!(catalog.models(Provider::Pollinations).await.unwrap(), vec!["flux", "turbo"]);

        catalog.invalidate(Provider::Pollinations).await.unwrap();
        assert!(catalog.cached(Provider::Pollinations).await.unwrap().is_none());
        assert!(store.get("cachedModels.pollinations").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_catalog_for_hosted_providers() {
        let catalog = ModelCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog.refresh(Provider::Google).await.unwrap_err();
        assert!(matches!(err, IllustratorError::InvalidConfig(_)));
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(cache_key(Provider::AiHorde), "cachedModels.aiHorde");
    }
}
