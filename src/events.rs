use serde::{Deserialize, Serialize};

use crate::types::{CompletedResult, ErrorRecord};

/// Status indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusState {
    Hidden,
    Loading,
    Success,
    Error,
}

/// Emitted by the orchestrator whenever host-visible state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum QueueEvent {
    /// Status indicator update.
    #[serde(rename_all = "camelCase")]
    Status { state: StatusState, text: String },

    /// A generation finished; the result is waiting in the completed buffer.
    #[serde(rename_all = "camelCase")]
    Completed { result: CompletedResult },

    /// A generation failed; the queue is paused until the error is
    /// dismissed or retried.
    #[serde(rename_all = "camelCase")]
    Failed { record: ErrorRecord },

    /// The provider wants credentials; the queue is paused until they are
    /// supplied and the request is retried.
    #[serde(rename_all = "camelCase")]
    AuthRequired { message: String, prompt: String },

    /// Non-fatal problem worth a brief notice, such as a failed enhancement.
    #[serde(rename_all = "camelCase")]
    Warning { message: String },
}

impl QueueEvent {
    pub fn status(state: StatusState, text: impl Into<String>) -> Self {
        QueueEvent::Status {
            state,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_event_json() {
        let event = QueueEvent::status(StatusState::Loading, "Requesting...");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "status", "state": "loading", "text": "Requesting..."})
        );
    }

    #[test]
    fn test_auth_event_json() {
        let event = QueueEvent::AuthRequired {
            message: "token needed".into(),
            prompt: "a cat".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "authRequired");
        assert_eq!(value["prompt"], "a cat");
    }
}
