use reqwest::Client;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use crate::config::Settings;
use crate::error::EnhanceError;

const DEFAULT_TEMPLATE: &str = "You are an expert prompt writer for AI image generators. Rewrite \
the text below into a single vivid, concrete image description: name the subject, setting, \
composition, lighting, mood and colour palette. Keep every character, object and action from \
the original. Reply with the rewritten prompt only, without quotes, labels or commentary.";

/// Appended by the local fallback when no booster is already present.
pub const QUALITY_BOOSTERS: &[&str] = &[
    "highly detailed",
    "sharp focus",
    "professional lighting",
    "vivid colors",
    "masterpiece",
];

/// One call to the external text-rewriting API.
#[derive(Debug, Clone)]
pub struct TextRequest<'a> {
    pub endpoint: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
    pub instruction: &'a str,
    pub prompt: &'a str,
    pub timeout: Duration,
}

/// A text-generation backend that returns its single best candidate.
pub trait TextGenerator: Send + Sync {
    fn generate_text(
        &self,
        request: &TextRequest<'_>,
    ) -> impl Future<Output = Result<String, EnhanceError>> + Send;
}

/// Client for the Gemini `generateContent` API.
#[derive(Debug, Clone, Default)]
pub struct GeminiClient {
    http: Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom `reqwest::Client` (for proxies, pooling, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }
}

impl TextGenerator for GeminiClient {
    async fn generate_text(&self, request: &TextRequest<'_>) -> Result<String, EnhanceError> {
        let url = format!(
            "{}/models/{}:generateContent",
            request.endpoint.trim_end_matches('/'),
            request.model
        );
        let body = json!({
            "contents": [{
                "parts": [{
                    "text": format!("{}\n\nPrompt to rewrite:\n{}", request.instruction, request.prompt)
                }]
            }],
            "generationConfig": {
                "temperature": 0.7,
                "candidateCount": 1,
            },
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", request.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnhanceError::Timeout(request.timeout.as_secs())
                } else {
                    EnhanceError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EnhanceError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(EnhanceError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Err(EnhanceError::EmptyResponse);
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| EnhanceError::Api {
            status: status.as_u16(),
            body: format!("unparseable response: {}", e),
        })?;
        parse_candidate(&json, status.as_u16())
    }
}

/// Pull the first candidate's text out of a `generateContent` response.
fn parse_candidate(json: &Value, status: u16) -> Result<String, EnhanceError> {
    if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
        return Err(EnhanceError::Api {
            status,
            body: message.to_string(),
        });
    }
    let text = json
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if text.is_empty() {
        return Err(EnhanceError::EmptyResponse);
    }
    Ok(text.to_string())
}

/// Rewrites prompts through a [`TextGenerator`], walking a list of candidate
/// models with a per-model retry budget.
#[derive(Debug)]
pub struct Enhancer<T: TextGenerator> {
    generator: T,
}

impl<T: TextGenerator> Enhancer<T> {
    pub fn new(generator: T) -> Self {
        Self { generator }
    }

    pub fn generator(&self) -> &T {
        &self.generator
    }

    /// Enhance `prompt` using the enhancement and style settings.
    ///
    /// The first successful attempt wins. When every model is exhausted the
    /// local heuristic result is returned if `always_fallback` is set,
    /// otherwise [`EnhanceError::Exhausted`] carrying the last error.
    pub async fn enhance(&self, prompt: &str, settings: &Settings) -> Result<String, EnhanceError> {
        let e = &settings.enhancement;
        let cleaned = clean_prompt(prompt);

        if !e.has_api_key() {
            return self.exhausted(&cleaned, settings, EnhanceError::MissingApiKey);
        }

        let instruction = build_instruction(settings);
        let models = candidate_models(&e.model, &e.fallback_models);
        let attempts = e.max_retries_per_model.max(1);
        let mut last_error = EnhanceError::EmptyResponse;

        for (index, model) in models.iter().enumerate() {
            let timeout = if index == 0 {
                e.primary_timeout
            } else {
                e.fallback_timeout
            };

            for attempt in 1..=attempts {
                if attempt > 1 && !e.retry_delay.is_zero() {
                    tokio::time::sleep(e.retry_delay).await;
                }

                let request = TextRequest {
                    endpoint: &e.endpoint,
                    api_key: &e.api_key,
                    model,
                    instruction: &instruction,
                    prompt: &cleaned,
                    timeout,
                };

                let outcome = match tokio::time::timeout(timeout, self.generator.generate_text(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(EnhanceError::Timeout(timeout.as_secs())),
                };

                match outcome.map(|text| strip_wrapping_quotes(&text)) {
                    Ok(text) if !text.is_empty() => {
                        tracing::debug!(model = %model, attempt, "prompt enhanced");
                        return Ok(text);
                    }
                    Ok(_) => last_error = EnhanceError::EmptyResponse,
                    Err(err) => last_error = err,
                }
                tracing::warn!(
                    model = %model,
                    attempt,
                    max_attempts = attempts,
                    error = %last_error,
                    "enhancement attempt failed"
                );
            }
        }

        self.exhausted(&cleaned, settings, last_error)
    }

    fn exhausted(
        &self,
        cleaned: &str,
        settings: &Settings,
        last_error: EnhanceError,
    ) -> Result<String, EnhanceError> {
        if settings.enhancement.always_fallback {
            tracing::info!(error = %last_error, "all enhancement models failed, using local fallback");
            Ok(heuristic_enhance(cleaned))
        } else {
            Err(EnhanceError::Exhausted {
                last_error: last_error.to_string(),
            })
        }
    }
}

/// Primary model first, then fallbacks, with blanks and duplicates removed.
pub fn candidate_models(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut models: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
    for model in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        let model = model.trim();
        if !model.is_empty() && !models.iter().any(|m| m == model) {
            models.push(model.to_string());
        }
    }
    models
}

/// The base template (user override or built-in) plus a style-preserving layer.
pub fn build_instruction(settings: &Settings) -> String {
    let template = settings.enhancement.template.trim();
    let base = if template.is_empty() {
        DEFAULT_TEMPLATE
    } else {
        template
    };

    let style = &settings.style;
    let layer = if let Some(custom) = style.active_custom_style() {
        format!(
            "The prompt uses the custom art style \"{}\". Keep that exact style in the \
             rewritten prompt and do not substitute a different medium or art style.",
            custom
        )
    } else if style.has_main_style() {
        let described = if style.has_sub_style() {
            format!("{} ({})", style.main_style.trim(), style.sub_style.trim())
        } else {
            style.main_style.trim().to_string()
        };
        format!("Keep the {} art style in the rewritten prompt.", described)
    } else {
        String::new()
    };

    if layer.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\n{}", base, layer)
    }
}

/// Collapse all whitespace runs to single spaces.
fn clean_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_wrapping_quotes(text: &str) -> String {
    const QUOTES: &[char] = &['"', '\'', '`', '\u{201c}', '\u{201d}', '\u{2018}', '\u{2019}'];
    text.trim().trim_matches(QUOTES).trim().to_string()
}

/// Local stand-in for enhancement: append the quality boosters unless one is
/// already present, then tidy up repeated commas.
pub fn heuristic_enhance(prompt: &str) -> String {
    let lower = prompt.to_lowercase();
    let mut out = prompt.trim().to_string();
    if !QUALITY_BOOSTERS.iter().any(|b| lower.contains(b)) {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&QUALITY_BOOSTERS.join(", "));
    }
    collapse_commas(&out)
}

fn collapse_commas(text: &str) -> String {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnhancementSettings, StyleSettings};
    use std::sync::Mutex;

    /// Replies with each scripted result in turn, recording the model asked.
    struct Scripted {
        replies: Mutex<Vec<Result<String, EnhanceError>>>,
        models: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<String, EnhanceError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                models: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self::new(Vec::new())
        }

        fn models(&self) -> Vec<String> {
            self.models.lock().unwrap().clone()
        }
    }

    impl TextGenerator for Scripted {
        async fn generate_text(&self, request: &TextRequest<'_>) -> Result<String, EnhanceError> {
            self.models.lock().unwrap().push(request.model.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(EnhanceError::Api {
                    status: 503,
                    body: "overloaded".into(),
                }))
        }
    }

    /// Never answers, so only the timeout can end the attempt.
    struct Silent;

    impl TextGenerator for Silent {
        async fn generate_text(&self, _request: &TextRequest<'_>) -> Result<String, EnhanceError> {
            std::future::pending().await
        }
    }

    fn settings(always_fallback: bool) -> Settings {
        Settings::default().with_enhancement(
            EnhancementSettings::default()
                .with_enabled(true)
                .with_api_key("key")
                .with_model("primary")
                .with_fallback_models(vec!["fallback-a".into(), "fallback-b".into()])
                .with_max_retries(2)
                .with_always_fallback(always_fallback),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_with_fallback_returns_boosted_prompt() {
        let enhancer = Enhancer::new(Scripted::failing());
        let out = enhancer.enhance("a cat on a roof", &settings(true)).await.unwrap();
        assert!(out.starts_with("a cat on a roof"));
        assert!(QUALITY_BOOSTERS.iter().any(|b| out.contains(b)));
        // 3 models x 2 attempts
        assert_eq!(enhancer.generator().models().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_fallback_reports_last_error() {
        let enhancer = Enhancer::new(Scripted::failing());
        let err = enhancer.enhance("a cat", &settings(false)).await.unwrap_err();
        match err {
            EnhanceError::Exhausted { last_error } => assert!(last_error.contains("overloaded")),
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_models_tried_in_order_with_retries() {
        let enhancer = Enhancer::new(Scripted::new(vec![
            Err(EnhanceError::EmptyResponse),
            Err(EnhanceError::Request("reset".into())),
            Ok("  \"a vivid cat\"  ".into()),
        ]));
        let out = enhancer.enhance("a cat", &settings(false)).await.unwrap();
        assert_eq!(out, "a vivid cat");
        assert_eq!(enhancer.generator().models(), vec!["primary", "primary", "fallback-a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delay_between_attempts() {
        let enhancer = Enhancer::new(Scripted::new(vec![
            Err(EnhanceError::EmptyResponse),
            Ok("done".into()),
        ]));
        let start = tokio::time::Instant::now();
        enhancer.enhance("a cat", &settings(false)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_moves_on() {
        let mut s = settings(false);
        s.enhancement.fallback_models.clear();
        s.enhancement.max_retries_per_model = 1;
        let enhancer = Enhancer::new(Silent);
        let err = enhancer.enhance("a cat", &s).await.unwrap_err();
        assert_eq!(
            err,
            EnhanceError::Exhausted {
                last_error: EnhanceError::Timeout(45).to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_reply_counts_as_failure() {
        let mut s = settings(false);
        s.enhancement.fallback_models.clear();
        s.enhancement.max_retries_per_model = 1;
        let enhancer = Enhancer::new(Scripted::new(vec![Ok("\"\"".into())]));
        assert!(enhancer.enhance("a cat", &s).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_key_uses_fallback_or_fails() {
        let mut s = settings(true);
        s.enhancement.api_key.clear();
        let enhancer = Enhancer::new(Scripted::failing());
        assert!(enhancer.enhance("a cat", &s).await.unwrap().contains("sharp focus"));
        assert!(enhancer.generator().models().is_empty());

        s.enhancement.always_fallback = false;
        assert!(enhancer.enhance("a cat", &s).await.is_err());
    }

    #[test]
    fn test_candidate_models_dedupes_primary() {
        let models = candidate_models(
            "gemini-2.0-flash",
            &["gemini-1.5-flash".into(), "gemini-2.0-flash".into(), " ".into(), "gemini-1.5-flash".into()],
        );
        assert_eq!(models, vec!["gemini-2.0-flash", "gemini-1.5-flash"]);
    }

    #[test]
    fn test_instruction_style_layers() {
        let plain = build_instruction(&Settings::default());
        assert_eq!(plain, DEFAULT_TEMPLATE);

        let custom = Settings::default()
            .with_style(StyleSettings::default().with_main_style("Anime").with_custom_style("ink wash"));
        let text = build_instruction(&custom);
        assert!(text.contains("\"ink wash\""));
        assert!(text.contains("do not substitute"));

        let mut main = Settings::default()
            .with_style(StyleSettings::default().with_main_style("Anime").with_sub_style("cel shaded"));
        main.enhancement.template = "Rewrite it.".into();
        assert_eq!(
            build_instruction(&main),
            "Rewrite it.\n\nKeep the Anime (cel shaded) art style in the rewritten prompt."
        );
    }

    #[test]
    fn test_heuristic_skips_when_booster_present() {
        assert_eq!(heuristic_enhance("a cat, Highly Detailed,, night"), "a cat, Highly Detailed, night");
        let boosted = heuristic_enhance("a cat");
        assert_eq!(
            boosted,
            "a cat, highly detailed, sharp focus, professional lighting, vivid colors, masterpiece"
        );
    }

    #[test]
    fn test_strip_wrapping_quotes() {
        assert_eq!(strip_wrapping_quotes("\u{201c}a cat\u{201d}"), "a cat");
        assert_eq!(strip_wrapping_quotes("'a cat'\n"), "a cat");
    }

    #[test]
    fn test_parse_candidate() {
        let ok = json!({"candidates": [{"content": {"parts": [{"text": " a cat \n"}]}}]});
        assert_eq!(parse_candidate(&ok, 200).unwrap(), "a cat");

        let err = json!({"error": {"code": 400, "message": "API key not valid"}});
        assert!(matches!(parse_candidate(&err, 200), Err(EnhanceError::Api { .. })));

        let empty = json!({"candidates": []});
        assert_eq!(parse_candidate(&empty, 200), Err(EnhanceError::EmptyResponse));
    }
}
