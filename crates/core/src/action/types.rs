//! Action API trait and wire types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for action invocations.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Action API connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Action API error: {0}")]
    ApiError(String),

    #[error("Request timeout")]
    Timeout,

    /// The API answered but refused the action.
    #[error("Action {action} rejected: {message}")]
    Rejected { action: String, message: String },

    /// The API answered success but the payload is unusable.
    #[error("Action {action} returned an invalid payload: {message}")]
    Payload { action: String, message: String },
}

impl ActionError {
    /// Transport-level failures that a bounded retry may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, ActionError::Timeout | ActionError::ConnectionFailed(_))
    }
}

/// One request against the action API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRequest {
    /// Action name, e.g. `generate_invoice`.
    pub action: String,

    /// Opaque action parameters.
    pub parameters: serde_json::Value,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }
}

/// Binary payload attached to an upload-style action.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Successful action output: a structured result or a binary artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    /// Structured JSON result.
    Result(serde_json::Value),

    /// Raw artifact bytes.
    Artifact(Vec<u8>),
}

impl ActionOutput {
    pub fn as_result(&self) -> Option<&serde_json::Value> {
        match self {
            ActionOutput::Result(value) => Some(value),
            ActionOutput::Artifact(_) => None,
        }
    }

    pub fn into_artifact(self) -> Option<Vec<u8>> {
        match self {
            ActionOutput::Artifact(bytes) => Some(bytes),
            ActionOutput::Result(_) => None,
        }
    }

    /// Read a string field out of a structured result.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.as_result()?.get(key)?.as_str()
    }
}

/// Trait for action API backends.
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Backend name for logging/audit.
    fn name(&self) -> &str;

    /// Invoke one action.
    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutput, ActionError>;

    /// Invoke one action with an attached binary artifact.
    async fn invoke_with_artifact(
        &self,
        request: &ActionRequest,
        artifact: ArtifactPayload,
    ) -> Result<ActionOutput, ActionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transient_classification() {
        assert!(ActionError::Timeout.is_transient());
        assert!(ActionError::ConnectionFailed("refused".to_string()).is_transient());
        assert!(!ActionError::ApiError("500".to_string()).is_transient());
        assert!(!ActionError::Rejected {
            action: "x".to_string(),
            message: "no".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_result_str_access() {
        let output = ActionOutput::Result(json!({"document_id": "DOC-1", "count": 2}));
        assert_eq!(output.result_str("document_id"), Some("DOC-1"));
        assert_eq!(output.result_str("count"), None);
        assert_eq!(output.result_str("missing"), None);

        let artifact = ActionOutput::Artifact(vec![1, 2, 3]);
        assert_eq!(artifact.result_str("document_id"), None);
    }

    #[test]
    fn test_into_artifact() {
        let artifact = ActionOutput::Artifact(vec![9, 9]);
        assert_eq!(artifact.into_artifact(), Some(vec![9, 9]));

        let result = ActionOutput::Result(json!({}));
        assert_eq!(result.into_artifact(), None);
    }

    #[test]
    fn test_request_serialization() {
        let request = ActionRequest::new("generate_invoice", json!({"reference": "PO-1"}));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"action\":\"generate_invoice\""));
        assert!(json.contains("\"reference\":\"PO-1\""));
    }
}
