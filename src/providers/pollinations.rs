//! Free image-by-URL provider: one GET, the response body is the image.

use base64::Engine;
use reqwest::{Client, Url};
use std::time::Duration;

use super::models::ModelCatalog;
use super::resolve_seed;
use crate::classify::ErrorKind;
use crate::config::PollinationsSettings;
use crate::store::SettingsStore;
use crate::types::{GenerationOutcome, GenerationSuccess, Provider, ProviderFailure};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Build the request URL. The token is only included when `with_token` is
/// set, so the same call yields the shareable URL kept in history.
pub fn build_url(
    settings: &PollinationsSettings,
    prompt: &str,
    seed: i64,
    with_token: bool,
) -> Result<Url, String> {
    let mut url = Url::parse(settings.endpoint.trim_end_matches('/'))
        .map_err(|e| format!("Invalid Pollinations endpoint '{}': {}", settings.endpoint, e))?;
    url.path_segments_mut()
        .map_err(|_| format!("Invalid Pollinations endpoint '{}'", settings.endpoint))?
        .pop_if_empty()
        .push("prompt")
        .push(prompt);

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("model", &settings.model)
            .append_pair("width", &settings.width.to_string())
            .append_pair("height", &settings.height.to_string())
            .append_pair("seed", &seed.to_string())
            .append_pair("enhance", bool_flag(settings.enhance))
            .append_pair("safe", bool_flag(settings.safe))
            .append_pair("nologo", bool_flag(settings.nologo))
            .append_pair("private", bool_flag(settings.private));
        let token = settings.token.trim();
        if with_token && !token.is_empty() {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

fn bool_flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// What a non-2xx response means.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorResponse {
    ModelNotFound,
    AuthRequired,
    Other,
}

pub fn interpret_error(status: u16, body: &str) -> ErrorResponse {
    let lower = body.to_lowercase();
    if lower.contains("model not found") {
        ErrorResponse::ModelNotFound
    } else if status == 401 || lower.contains("authentication required") {
        ErrorResponse::AuthRequired
    } else {
        ErrorResponse::Other
    }
}

/// Encode image bytes as a displayable `data:` URI.
pub fn data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        content_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub async fn generate<S: SettingsStore>(
    http: &Client,
    settings: &PollinationsSettings,
    prompt: &str,
    catalog: &ModelCatalog<S>,
) -> GenerationOutcome {
    let seed = resolve_seed(settings.seed);
    let (url, persistent) = match (
        build_url(settings, prompt, seed, true),
        build_url(settings, prompt, seed, false),
    ) {
        (Ok(url), Ok(persistent)) => (url, persistent),
        (Err(e), _) | (_, Err(e)) => return GenerationOutcome::Failure(ProviderFailure::new(e)),
    };

    tracing::debug!(model = %settings.model, seed, "requesting Pollinations image");
    let resp = match http.get(url).timeout(REQUEST_TIMEOUT).send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            return GenerationOutcome::Failure(ProviderFailure::new(format!(
                "Pollinations request timed out after {}s",
                REQUEST_TIMEOUT.as_secs()
            )))
        }
        Err(e) => {
            return GenerationOutcome::Failure(ProviderFailure::new(format!(
                "Cannot reach Pollinations: {}",
                e
            )))
        }
    };

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return match interpret_error(status.as_u16(), &body) {
            ErrorResponse::ModelNotFound => {
                if let Err(e) = catalog.invalidate(Provider::Pollinations).await {
                    tracing::warn!(error = %e, "failed to invalidate Pollinations model cache");
                }
                GenerationOutcome::Failure(
                    ProviderFailure::new(format!(
                        "Pollinations model '{}' was not found. Pick another model in settings. ({})",
                        settings.model,
                        body.trim()
                    ))
                    .with_kind(ErrorKind::ModelUnavailable),
                )
            }
            ErrorResponse::AuthRequired => GenerationOutcome::AuthRequired {
                message: format!(
                    "Pollinations needs an API token to use the '{}' model. Enter a token to continue.",
                    settings.model
                ),
            },
            ErrorResponse::Other => GenerationOutcome::Failure(ProviderFailure::new(format!(
                "Pollinations API error (HTTP {}): {}",
                status.as_u16(),
                body.trim()
            ))),
        };
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());

    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return GenerationOutcome::Failure(ProviderFailure::new(format!(
                "Failed to read Pollinations image: {}",
                e
            )))
        }
    };

    if !content_type.starts_with("image/") {
        let body = String::from_utf8_lossy(&bytes);
        return GenerationOutcome::Failure(ProviderFailure::new(format!(
            "Pollinations returned {} instead of an image: {}",
            content_type,
            body.trim()
        )));
    }
    if bytes.is_empty() {
        return GenerationOutcome::Failure(ProviderFailure::new("Pollinations returned an empty image"));
    }

    GenerationOutcome::Success(GenerationSuccess {
        display_urls: vec![data_uri(&content_type, &bytes)],
        persistent_urls: Some(vec![persistent.to_string()]),
        provider_name: Provider::Pollinations.display_name().to_string(),
        model: settings.model.clone(),
    })
}
