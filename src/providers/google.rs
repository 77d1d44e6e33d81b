//! Hosted multi-image provider (Imagen `predict`).

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::response::parse_provider_response;
use crate::classify::{extract_json_message, ErrorKind};
use crate::config::GoogleSettings;
use crate::types::{GenerationOutcome, GenerationSuccess, Provider, ProviderFailure};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Request body. "fast" model variants reject the `imageSize` parameter.
pub fn build_body(settings: &GoogleSettings, prompt: &str) -> Value {
    let mut parameters = json!({
        "sampleCount": settings.sample_count.max(1),
        "aspectRatio": settings.aspect_ratio,
        "personGeneration": settings.person_generation,
    });
    let size = settings.image_size.trim();
    if !settings.model.to_lowercase().contains("fast") && !size.is_empty() {
        parameters["imageSize"] = json!(size);
    }
    json!({
        "instances": [{ "prompt": prompt }],
        "parameters": parameters,
    })
}

/// Turn `predictions[]` into `data:` URIs.
pub fn parse_predictions(json: &Value) -> Vec<String> {
    json.get("predictions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    let data = p.get("bytesBase64Encoded").and_then(Value::as_str)?;
                    let mime = p.get("mimeType").and_then(Value::as_str).unwrap_or("image/png");
                    Some(format!("data:{};base64,{}", mime, data))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub async fn generate(http: &Client, settings: &GoogleSettings, prompt: &str) -> GenerationOutcome {
    let provider = Provider::Google.display_name();
    if settings.api_key.trim().is_empty() {
        return GenerationOutcome::Failure(
            ProviderFailure::new("No Google API key configured. Add one in settings.")
                .with_kind(ErrorKind::AuthenticationRequired),
        );
    }

    let url = format!(
        "{}/models/{}:predict",
        settings.endpoint.trim_end_matches('/'),
        settings.model
    );
    tracing::debug!(model = %settings.model, samples = settings.sample_count, "requesting Imagen predictions");

    let resp = match http
        .post(&url)
        .header("x-goog-api-key", settings.api_key.trim())
        .timeout(REQUEST_TIMEOUT)
        .json(&build_body(settings, prompt))
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            return GenerationOutcome::Failure(ProviderFailure::new(format!(
                "{} request timed out after {}s",
                provider,
                REQUEST_TIMEOUT.as_secs()
            )))
        }
        Err(e) => {
            return GenerationOutcome::Failure(ProviderFailure::new(format!(
                "Cannot reach {}: {}",
                provider, e
            )))
        }
    };

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        let detail = extract_json_message(&text).unwrap_or_else(|| text.trim().to_string());
        let mut failure = ProviderFailure::new(format!(
            "{} API error (HTTP {}): {}",
            provider,
            status.as_u16(),
            detail
        ));
        if matches!(status.as_u16(), 401 | 403) {
            failure = failure.with_kind(ErrorKind::AuthenticationRequired);
        }
        return GenerationOutcome::Failure(failure);
    }

    let json = match parse_provider_response(provider, status.as_u16(), &text) {
        Ok(json) => json,
        Err(e) => return GenerationOutcome::Failure(e.into()),
    };

    let urls = parse_predictions(&json);
    if urls.is_empty() {
        return GenerationOutcome::Failure(ProviderFailure::new(format!(
            "{} returned no images. The prompt was probably filtered by the provider's safety system.",
            provider
        )));
    }

    GenerationOutcome::Success(GenerationSuccess {
        display_urls: urls,
        persistent_urls: None,
        provider_name: provider.to_string(),
        model: settings.model.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_includes_image_size() {
        let body = build_body(&GoogleSettings::default(), "a cat");
        assert_eq!(body["instances"][0]["prompt"], "a cat");
        assert_eq!(body["parameters"]["sampleCount"], 1);
        assert_eq!(body["parameters"]["aspectRatio"], "1:1");
        assert_eq!(body["parameters"]["personGeneration"], "allow_adult");
        assert_eq!(body["parameters"]["imageSize"], "1K");
    }

    #[test]
    fn test_fast_model_omits_image_size() {
        let settings = GoogleSettings {
            model: "imagen-4.0-fast-generate-001".into(),
            ..GoogleSettings::default()
        };
        let body = build_body(&settings, "a cat");
        assert!(body["parameters"].get("imageSize").is_none());
    }

    #[test]
    fn test_predictions_to_data_uris() {
        let json = json!({
            "predictions": [
                {"bytesBase64Encoded": "AAA", "mimeType": "image/png"},
                {"bytesBase64Encoded": "BBB"},
                {"raiFilteredReason": "blocked"}
            ]
        });
        assert_eq!(
            parse_predictions(&json),
            vec!["data:image/png;base64,AAA", "data:image/png;base64,BBB"]
        );
        assert!(parse_predictions(&json!({})).is_empty());
    }
}
