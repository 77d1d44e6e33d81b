//! Maps raw provider failures onto a small taxonomy with a retryable flag.
//!
//! Rules are ordered and the first match wins:
//!
//! 1. transient infrastructure (gateway timeouts, 502s, unreachable origin)
//! 2. known provider glitches for specific provider/host pairs
//! 3. safety / moderation rejections
//! 4. structured message extraction from an embedded JSON body

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ErrorReason, Provider, ProviderFailure};

/// Sub-kinds of an unreadable provider response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MalformedKind {
    /// An HTML error page where JSON was expected.
    HtmlResponse,
    /// Not JSON at all (the parser failed on the first character).
    MalformedJson,
    /// JSON that failed to parse further in, or had the wrong shape.
    GenericParseError,
}

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "detail")]
pub enum ErrorKind {
    TransientInfrastructure,
    KnownProviderGlitch,
    ContentPolicyRejection,
    AuthenticationRequired,
    ModelUnavailable,
    MalformedResponse(MalformedKind),
    Unknown,
}

impl ErrorKind {
    /// Default retryable flag for the kind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientInfrastructure | ErrorKind::KnownProviderGlitch
        )
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "error code: 524",
    "524: a timeout occurred",
    "timed out",
    "502 bad gateway",
    "unable to reach the origin service",
];

const CONTENT_POLICY_MARKERS: &[&str] = &[
    "moderation_blocked",
    "content_policy_violation",
    "safety system",
    "safety_violations",
    "responsible ai practices",
    "flagged by our content",
];

const TRANSIENT_MESSAGE: &str = "The image service did not respond in time (gateway timeout or \
     temporary outage). This is usually temporary; try again in a moment.";

const CONTENT_POLICY_MESSAGE: &str = "The provider's safety system rejected this prompt. Edit the \
     prompt to remove content that may violate its content policy, or switch provider.";

/// A provider/host pair whose error body is known to be a transient glitch.
struct KnownGlitch {
    provider: Provider,
    host_fragment: &'static str,
    body_markers: &'static [&'static str],
    message: &'static str,
}

const KNOWN_GLITCHES: &[KnownGlitch] = &[KnownGlitch {
    provider: Provider::OpenAiCompat,
    host_fragment: "api.airforce",
    body_markers: &["\"error\"", "internal server error"],
    message: "This endpoint intermittently fails with an internal error. Retrying the same \
              prompt usually succeeds, just as the provider's own clients retry automatically.",
}];

/// Classify a raw failure message.
///
/// `provider_profile_id` is the base URL of an OpenAI-compatible profile,
/// used for host-specific rules.
pub fn classify(
    raw_message: &str,
    provider: Provider,
    provider_profile_id: Option<&str>,
) -> ErrorReason {
    let lower = raw_message.to_lowercase();

    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return ErrorReason {
            message: TRANSIENT_MESSAGE.to_string(),
            retryable: true,
            kind: ErrorKind::TransientInfrastructure,
        };
    }

    if let Some(glitch) = known_glitch(&lower, provider, provider_profile_id) {
        return ErrorReason {
            message: glitch.message.to_string(),
            retryable: true,
            kind: ErrorKind::KnownProviderGlitch,
        };
    }

    if CONTENT_POLICY_MARKERS.iter().any(|m| lower.contains(m)) || mentions_nsfw_block(&lower) {
        return ErrorReason {
            message: CONTENT_POLICY_MESSAGE.to_string(),
            retryable: false,
            kind: ErrorKind::ContentPolicyRejection,
        };
    }

    let message = extract_json_message(raw_message).unwrap_or_else(|| raw_message.trim().to_string());
    ErrorReason {
        message,
        retryable: false,
        kind: ErrorKind::Unknown,
    }
}

/// Classify an adapter failure, letting adapter knowledge refine rule 4.
///
/// Rules 1-3 always win. When nothing matched, the adapter's kind and
/// retryable override (if any) replace the `Unknown` defaults.
pub fn classify_failure(
    failure: &ProviderFailure,
    provider: Provider,
    provider_profile_id: Option<&str>,
) -> ErrorReason {
    let mut reason = classify(&failure.message, provider, provider_profile_id);
    if reason.kind == ErrorKind::Unknown {
        if let Some(kind) = failure.kind {
            reason.kind = kind;
            reason.retryable = kind.is_retryable();
        }
        if let Some(retryable) = failure.retryable {
            reason.retryable = retryable;
        }
    }
    reason
}

fn known_glitch(
    lower: &str,
    provider: Provider,
    provider_profile_id: Option<&str>,
) -> Option<&'static KnownGlitch> {
    let host = provider_profile_id.map(str::to_lowercase).unwrap_or_default();
    KNOWN_GLITCHES.iter().find(|g| {
        g.provider == provider
            && host.contains(g.host_fragment)
            && g.body_markers.iter().all(|m| lower.contains(m))
    })
}

fn mentions_nsfw_block(lower: &str) -> bool {
    lower.contains("nsfw") && (lower.contains("block") || lower.contains("censor"))
}

/// Find the first `{ ... }` span in `raw` and pull out `message` or
/// `error.message` (or a string `error`).
pub fn extract_json_message(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let json: Value = serde_json::from_str(&raw[start..=end]).ok()?;

    let message = json
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| json.get("error").and_then(Value::as_str))?;

    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}
