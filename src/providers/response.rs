//! Reading provider response bodies as JSON.
//!
//! Providers misbehave in a few recognisable ways: an HTML error page from a
//! proxy, a plain-text body such as `Internal Server Error`, or JSON that is
//! truncated or shaped wrongly. Each becomes a distinct [`ResponseError`].

use serde_json::Value;

use crate::classify::{ErrorKind, MalformedKind};
use crate::error::ResponseError;
use crate::types::ProviderFailure;

const SNIPPET_CHARS: usize = 200;

/// Parse `body` as JSON, sniffing out HTML pages and non-JSON text first.
pub fn parse_provider_response(provider: &str, status: u16, body: &str) -> Result<Value, ResponseError> {
    if looks_like_html(body) {
        return Err(ResponseError::HtmlResponse {
            provider: provider.to_string(),
            status,
        });
    }

    serde_json::from_str(body).map_err(|e| {
        // Failing on the very first character means the body was never JSON.
        if e.line() == 1 && e.column() <= 1 {
            ResponseError::MalformedJson {
                provider: provider.to_string(),
                status,
                snippet: snippet(body),
            }
        } else {
            ResponseError::GenericParse {
                provider: provider.to_string(),
                status,
                detail: e.to_string(),
            }
        }
    })
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(256).collect::<String>().to_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<head>")
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty body)".to_string();
    }
    let mut out: String = trimmed.chars().take(SNIPPET_CHARS).collect();
    if trimmed.chars().count() > SNIPPET_CHARS {
        out.push_str("...");
    }
    out
}

impl ResponseError {
    pub fn malformed_kind(&self) -> MalformedKind {
        match self {
            ResponseError::HtmlResponse { .. } => MalformedKind::HtmlResponse,
            ResponseError::MalformedJson { .. } => MalformedKind::MalformedJson,
            ResponseError::GenericParse { .. } => MalformedKind::GenericParseError,
        }
    }
}

impl From<ResponseError> for ProviderFailure {
    fn from(err: ResponseError) -> Self {
        let kind = ErrorKind::MalformedResponse(err.malformed_kind());
        ProviderFailure::new(err.to_string()).with_kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_page_detected() {
        let body = "\n<!DOCTYPE html><html><head><title>502</title></head></html>";
        let err = parse_provider_response("OpenAI Compatible", 502, body).unwrap_err();
        assert_eq!(err.malformed_kind(), MalformedKind::HtmlResponse);
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[test]
    fn test_plain_text_is_malformed_json() {
        let err = parse_provider_response("OpenAI Compatible", 500, "Internal Server Error").unwrap_err();
        match err {
            ResponseError::MalformedJson { snippet, .. } => assert_eq!(snippet, "Internal Server Error"),
            other => panic!("Expected MalformedJson, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_body_is_malformed_json() {
        let err = parse_provider_response("Google Imagen", 200, "").unwrap_err();
        assert_eq!(err.malformed_kind(), MalformedKind::MalformedJson);
    }

    #[test]
    fn test_truncated_json_is_generic_parse() {
        let err = parse_provider_response("OpenAI Compatible", 200, r#"{"data": [{"url": "#).unwrap_err();
        assert_eq!(err.malformed_kind(), MalformedKind::GenericParseError);
    }

    #[test]
    fn test_valid_json_parses() {
        let value = parse_provider_response("AI Horde", 202, r#"{"id": "abc"}"#).unwrap();
        assert_eq!(value["id"], "abc");
    }

    #[test]
    fn test_into_failure_carries_kind() {
        let failure: ProviderFailure = ResponseError::HtmlResponse {
            provider: "x".into(),
            status: 404,
        }
        .into();
        assert_eq!(
            failure.kind,
            Some(ErrorKind::MalformedResponse(MalformedKind::HtmlResponse))
        );
    }

    #[test]
    fn test_long_snippet_truncated() {
        let body = "x".repeat(500);
        match parse_provider_response("p", 500, &body).unwrap_err() {
            ResponseError::MalformedJson { snippet, .. } => {
                assert_eq!(snippet.len(), SNIPPET_CHARS + 3);
                assert!(snippet.ends_with("..."));
            }
            other => panic!("Expected MalformedJson, got {:?}", other),
        }
    }
}
