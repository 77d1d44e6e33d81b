use thiserror::Error;

/// Crate-level errors for storage and configuration.
///
/// Provider adapters do not use this type: their failures travel as
/// [`GenerationOutcome`](crate::types::GenerationOutcome) variants.
#[derive(Error, Debug)]
pub enum IllustratorError {
    #[error("Settings store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Nothing to illustrate: the selected text is empty")]
    EmptySelection,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, IllustratorError>;

/// Errors from a single call to the text-rewriting API, and the terminal
/// error once every candidate model is exhausted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnhanceError {
    #[error("Cannot reach enhancement API: {0}")]
    Request(String),

    #[error("Enhancement request timed out after {0}s")]
    Timeout(u64),

    #[error("Enhancement API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Enhancement API returned an empty response")]
    EmptyResponse,

    #[error("No enhancement API key configured")]
    MissingApiKey,

    #[error("All enhancement models failed. Last error: {last_error}")]
    Exhausted { last_error: String },
}

/// Why a provider response body could not be read as JSON.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    #[error(
        "{provider} returned an HTML page instead of JSON (HTTP {status}). \
         Check the endpoint URL; the service may be down or behind a login page."
    )]
    HtmlResponse { provider: String, status: u16 },

    #[error("{provider} returned a response that is not JSON (HTTP {status}): {snippet}")]
    MalformedJson {
        provider: String,
        status: u16,
        snippet: String,
    },

    #[error("Failed to parse {provider} response (HTTP {status}): {detail}")]
    GenericParse {
        provider: String,
        status: u16,
        detail: String,
    },
}
