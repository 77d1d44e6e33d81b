//! User-configured OpenAI-compatible `images/generations` endpoints.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::response::parse_provider_response;
use crate::classify::{extract_json_message, ErrorKind, MalformedKind};
use crate::config::{OpenAiCompatSettings, OpenAiProfile};
use crate::types::{GenerationOutcome, GenerationSuccess, Provider, ProviderFailure};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

pub fn build_body(profile: &OpenAiProfile, prompt: &str) -> Value {
    json!({
        "model": profile.model,
        "prompt": prompt,
        "n": profile.count.max(1),
        "size": profile.size,
        "response_format": profile.response_format,
    })
}

/// Convert `data[]` items into displayable URLs, skipping unusable ones.
pub fn parse_images(json: &Value) -> Vec<String> {
    json.get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    if let Some(b64) = item.get("b64_json").and_then(Value::as_str).filter(|s| !s.is_empty()) {
                        return Some(format!("data:image/png;base64,{}", b64));
                    }
                    item.get("url")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Map an API error body onto a failure, recognising the conditions that
/// need special handling.
pub fn api_failure(status: u16, body: &str) -> ProviderFailure {
    let detail = extract_json_message(body).unwrap_or_else(|| body.trim().to_string());
    let lower = detail.to_lowercase();

    if lower.contains("invalid api key") || lower.contains("incorrect api key") {
        return ProviderFailure::new(format!(
            "The API key for this endpoint was rejected ({}). Update the profile's key in settings.",
            detail
        ))
        .with_kind(ErrorKind::AuthenticationRequired)
        .retryable(false);
    }
    if lower.contains("ip address mismatch") {
        return ProviderFailure::new(format!(
            "The endpoint saw a different IP address than the one your key is bound to ({}). \
             This often clears up on the next attempt.",
            detail
        ))
        .retryable(true);
    }

    // Keep the raw body so host-specific glitch rules can still see it.
    ProviderFailure::new(format!(
        "{} API error (HTTP {}): {}",
        Provider::OpenAiCompat.display_name(),
        status,
        body.trim()
    ))
}

pub async fn generate(
    http: &Client,
    settings: &OpenAiCompatSettings,
    profile_id: Option<&str>,
    prompt: &str,
) -> GenerationOutcome {
    let provider = Provider::OpenAiCompat.display_name();
    let Some(profile) = settings.resolve(profile_id) else {
        let wanted = profile_id.unwrap_or(&settings.default_profile);
        let message = if wanted.trim().is_empty() {
            "No OpenAI-compatible profile selected. Add a profile in settings or choose another provider."
                .to_string()
        } else {
            format!(
                "No OpenAI-compatible profile matches '{}'. Add it in settings or choose another provider.",
                wanted.trim()
            )
        };
        return GenerationOutcome::Failure(ProviderFailure::new(message));
    };

    let url = format!("{}/images/generations", profile.base_url.trim().trim_end_matches('/'));
    tracing::debug!(base_url = %profile.base_url, model = %profile.model, "requesting OpenAI-compatible images");

    let mut request = http
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .json(&build_body(profile, prompt));
    if !profile.api_key.trim().is_empty() {
        request = request.bearer_auth(profile.api_key.trim());
    }

    let result = match request.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            interpret_response(status, &text, &profile.model)
        }
        Err(e) if e.is_timeout() => Err(ProviderFailure::new(format!(
            "{} request timed out after {}s",
            provider,
            REQUEST_TIMEOUT.as_secs()
        ))),
        Err(e) => Err(ProviderFailure::new(format!(
            "Cannot reach {}: {}",
            profile.base_url, e
        ))),
    };
    // Report the profile actually used so host-specific rules can match.
    GenerationOutcome::from(result.map_err(|f| f.with_profile(profile.base_url.trim())))
}

/// Interpret a completed HTTP exchange.
pub fn interpret_response(status: u16, body: &str, model: &str) -> Result<GenerationSuccess, ProviderFailure> {
    let provider = Provider::OpenAiCompat.display_name();
    let json = match parse_provider_response(provider, status, body) {
        Ok(json) => json,
        // A JSON error body is more useful than a parse error; a plain-text
        // error body is still worth classifying by its text.
        Err(e) if (200..300).contains(&status) => return Err(e.into()),
        Err(e) => {
            return Err(match e.malformed_kind() {
                MalformedKind::HtmlResponse => e.into(),
                _ => api_failure(status, body),
            })
        }
    };

    if !(200..300).contains(&status) || json.get("error").is_some() {
        return Err(api_failure(status, body));
    }

    let urls = parse_images(&json);
    if urls.is_empty() {
        return Err(ProviderFailure::new(format!(
            "{} returned no usable images",
            provider
        )));
    }
    Ok(GenerationSuccess {
        display_urls: urls,
        persistent_urls: None,
        provider_name: provider.to_string(),
        model: model.to_string(),
    })
}
