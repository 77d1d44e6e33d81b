use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::classify::ErrorKind;

/// The image-generation backends the orchestrator can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provider {
    /// Free, synchronous image-by-URL provider.
    Pollinations,
    /// Community worker pool with asynchronous jobs.
    AiHorde,
    /// Hosted multi-image predict endpoint.
    Google,
    /// User-configured OpenAI-compatible endpoint.
    OpenAiCompat,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Pollinations,
        Provider::AiHorde,
        Provider::Google,
        Provider::OpenAiCompat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Pollinations => "pollinations",
            Provider::AiHorde => "aiHorde",
            Provider::Google => "google",
            Provider::OpenAiCompat => "openAICompat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pollinations" => Some(Provider::Pollinations),
            "aihorde" | "horde" | "ai-horde" => Some(Provider::AiHorde),
            "google" | "imagen" => Some(Provider::Google),
            "openaicompat" | "openai" | "openai-compat" => Some(Provider::OpenAiCompat),
            _ => None,
        }
    }

    /// Human-readable name used in status text, history, and error records.
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Pollinations => "Pollinations",
            Provider::AiHorde => "AI Horde",
            Provider::Google => "Google Imagen",
            Provider::OpenAiCompat => "OpenAI Compatible",
        }
    }

    /// Whether the provider accepts the negative prompt as its own payload
    /// field. Every other provider gets it appended to the prompt text.
    pub fn accepts_negative_field(&self) -> bool {
        matches!(self, Provider::AiHorde)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A finished prompt waiting for (or undergoing) generation.
///
/// Immutable once enqueued; consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub id: String,
    pub prompt: String,
    pub provider: Provider,
    pub provider_profile_id: Option<String>,
}

impl GenerationRequest {
    /// Create a new request with a generated UUID.
    pub fn new(prompt: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            provider,
            provider_profile_id: None,
        }
    }

    /// Pin the request to a specific OpenAI-compatible profile (by base URL).
    pub fn with_profile(mut self, profile_id: Option<String>) -> Self {
        self.provider_profile_id = profile_id.filter(|p| !p.trim().is_empty());
        self
    }
}

impl PartialEq for GenerationRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A successful generation waiting to be viewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedResult {
    pub image_urls: Vec<String>,
    pub prompt: String,
    pub provider: String,
}

/// Classified failure reason shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReason {
    pub message: String,
    pub retryable: bool,
    pub kind: ErrorKind,
}

/// A failed generation waiting for a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub reason: ErrorReason,
    pub prompt: String,
    pub provider: Provider,
    pub provider_profile_id: Option<String>,
}

/// One generated image in the capped history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: String,
    pub prompt: String,
    pub url: String,
    pub provider: String,
    pub model: String,
}

/// Payload of a successful provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSuccess {
    /// URLs the host can display immediately (may be `data:` URIs).
    pub display_urls: Vec<String>,
    /// Long-lived URLs for history. `None` means the display URLs are persistent.
    pub persistent_urls: Option<Vec<String>>,
    pub provider_name: String,
    pub model: String,
}

impl GenerationSuccess {
    /// URLs to record in history: persistent URLs when present, else display URLs.
    pub fn history_urls(&self) -> &[String] {
        self.persistent_urls.as_deref().unwrap_or(&self.display_urls)
    }
}

/// Failure reported by a provider adapter, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub message: String,
    /// Adapter-level knowledge about the failure (e.g. an auth rejection or a
    /// malformed body). `None` leaves everything to the classifier.
    pub kind: Option<ErrorKind>,
    /// Adapter override of the retryable flag.
    pub retryable: Option<bool>,
    /// Profile (base URL) the adapter resolved, when it differs from what
    /// the request named (e.g. the configured default).
    pub profile_id: Option<String>,
}

impl ProviderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            retryable: None,
            profile_id: None,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }
}

/// Terminal outcome of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success(GenerationSuccess),
    Failure(ProviderFailure),
    /// The provider wants credentials before it will serve this prompt.
    AuthRequired { message: String },
}

impl From<Result<GenerationSuccess, ProviderFailure>> for GenerationOutcome {
    fn from(result: Result<GenerationSuccess, ProviderFailure>) -> Self {
        match result {
            Ok(success) => GenerationOutcome::Success(success),
            Err(failure) => GenerationOutcome::Failure(failure),
        }
    }
}

/// Handle adapters use to publish live status text for the in-flight request.
#[derive(Clone)]
pub struct StatusReporter {
    sink: Arc<dyn Fn(&str) + Send + Sync>,
}

impl StatusReporter {
    pub fn new(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that discards every update.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, text: &str) {
        (self.sink)(text);
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}
