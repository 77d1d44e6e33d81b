//! State behind the error dialog.
//!
//! The dialog shows one [`ErrorRecord`], lets the user edit the prompt and
//! switch provider, and offers retry. A retryable error shows the retry
//! action straight away. A non-retryable one hides it until the prompt or
//! the provider selection actually changes, so a rejected prompt is not
//! resubmitted blindly.

use crate::types::{ErrorRecord, Provider};

/// What the user decided.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    Retry {
        prompt: String,
        provider: Provider,
        provider_profile_id: Option<String>,
    },
    Dismiss,
}

#[derive(Debug, Clone)]
pub struct RecoveryDialog {
    record: ErrorRecord,
    prompt: String,
    provider: Provider,
    provider_profile_id: Option<String>,
    retry_revealed: bool,
}

impl RecoveryDialog {
    pub fn new(record: ErrorRecord) -> Self {
        Self {
            prompt: record.prompt.clone(),
            provider: record.provider,
            provider_profile_id: record.provider_profile_id.clone(),
            retry_revealed: record.reason.retryable,
            record,
        }
    }

    pub fn record(&self) -> &ErrorRecord {
        &self.record
    }

    /// Classified message to display.
    pub fn message(&self) -> &str {
        &self.record.reason.message
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn provider_profile_id(&self) -> Option<&str> {
        self.provider_profile_id.as_deref()
    }

    /// Whether the retry action is currently offered.
    pub fn can_retry(&self) -> bool {
        self.retry_revealed
    }

    pub fn edit_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
        self.reveal_if_changed();
    }

    /// Switch provider. The profile only applies to the OpenAI-compatible
    /// provider and is dropped for the others.
    pub fn select_provider(&mut self, provider: Provider, profile_id: Option<String>) {
        self.provider = provider;
        self.provider_profile_id = match provider {
            Provider::OpenAiCompat => profile_id.filter(|p| !p.trim().is_empty()),
            _ => None,
        };
        self.reveal_if_changed();
    }

    fn reveal_if_changed(&mut self) {
        // Once shown, retry stays available even if the edit is undone.
        if self.prompt.trim() != self.record.prompt.trim()
            || self.provider != self.record.provider
            || self.provider_profile_id != self.record.provider_profile_id
        {
            self.retry_revealed = true;
        }
    }

    /// The retry action, if it is offered and the prompt is not blank.
    pub fn retry(&self) -> Option<RecoveryAction> {
        if !self.retry_revealed || self.prompt.trim().is_empty() {
            return None;
        }
        Some(RecoveryAction::Retry {
            prompt: self.prompt.trim().to_string(),
            provider: self.provider,
            provider_profile_id: self.provider_profile_id.clone(),
        })
    }

    pub fn dismiss(&self) -> RecoveryAction {
        RecoveryAction::Dismiss
    }
}
