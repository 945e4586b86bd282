//! Mock action client for testing.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::action::{ActionClient, ActionError, ActionOutput, ActionRequest, ArtifactPayload};

/// A recorded invocation for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAction {
    /// The request that was made.
    pub request: ActionRequest,
    /// Attached artifact, for upload-style actions.
    pub artifact: Option<ArtifactPayload>,
}

impl RecordedAction {
    /// The `reference` parameter of the request, if present.
    pub fn reference(&self) -> Option<&str> {
        self.request.parameters.get("reference")?.as_str()
    }
}

/// Mock implementation of the ActionClient trait.
///
/// Provides controllable behavior for testing:
/// - Queue per-action responses, consumed in order
/// - Inject one-shot failures for a specific (action, reference) pair
/// - Track every invocation for call-count assertions
///
/// Without configuration each known action answers with a plausible
/// default: collection returns a document id derived from the reference,
/// downloads return bytes derived from the action and reference, and
/// uploads return a protocol derived from the reference.
#[derive(Debug, Default)]
pub struct MockActionClient {
    /// Queued responses keyed by action name, consumed front-first.
    responses: Arc<RwLock<HashMap<String, VecDeque<Result<ActionOutput, ActionError>>>>>,
    /// One-shot failures keyed by (action, reference), consumed front-first.
    failures: Arc<RwLock<HashMap<(String, String), VecDeque<ActionError>>>>,
    /// Recorded invocations, in call order.
    calls: Arc<RwLock<Vec<RecordedAction>>>,
}

impl MockActionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for the given action.
    pub async fn push_response(&self, action: &str, response: Result<ActionOutput, ActionError>) {
        self.responses
            .write()
            .await
            .entry(action.to_string())
            .or_default()
            .push_back(response);
    }

    /// Make the next invocation of `action` for `reference` fail.
    pub async fn fail_next(&self, action: &str, reference: &str, error: ActionError) {
        self.failures
            .write()
            .await
            .entry((action.to_string(), reference.to_string()))
            .or_default()
            .push_back(error);
    }

    /// All recorded invocations, in call order.
    pub async fn calls(&self) -> Vec<RecordedAction> {
        self.calls.read().await.clone()
    }

    /// Recorded invocations of one action.
    pub async fn calls_for(&self, action: &str) -> Vec<RecordedAction> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.request.action == action)
            .cloned()
            .collect()
    }

    /// The `reference` parameter of each invocation of one action.
    pub async fn references_for(&self, action: &str) -> Vec<String> {
        self.calls_for(action)
            .await
            .iter()
            .filter_map(|call| call.reference().map(str::to_string))
            .collect()
    }

    /// Number of invocations performed, failures included.
    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }

    /// Recorded invocations that carried an artifact.
    pub async fn uploads(&self) -> Vec<RecordedAction> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.artifact.is_some())
            .cloned()
            .collect()
    }

    async fn handle(
        &self,
        request: &ActionRequest,
        artifact: Option<ArtifactPayload>,
    ) -> Result<ActionOutput, ActionError> {
        self.calls.write().await.push(RecordedAction {
            request: request.clone(),
            artifact,
        });

        let reference = request
            .parameters
            .get("reference")
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .to_string();

        if let Some(error) = self
            .failures
            .write()
            .await
            .get_mut(&(request.action.clone(), reference.clone()))
            .and_then(|queue| queue.pop_front())
        {
            return Err(error);
        }

        if let Some(response) = self
            .responses
            .write()
            .await
            .get_mut(&request.action)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }

        Ok(match request.action.as_str() {
            "generate_invoice" => ActionOutput::Result(json!({"scheduled": true})),
            "collect_invoice" => {
                ActionOutput::Result(json!({"document_id": format!("DOC-{}", reference)}))
            }
            "download_invoice" | "download_state_slip" | "download_municipal_slip" => {
                ActionOutput::Artifact(format!("{}:{}", request.action, reference).into_bytes())
            }
            "upload_invoice" => {
                ActionOutput::Result(json!({"protocol": format!("PROT-{}", reference)}))
            }
            _ => ActionOutput::Result(json!({"ok": true})),
        })
    }
}

#[async_trait]
impl ActionClient for MockActionClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutput, ActionError> {
        self.handle(request, None).await
    }

    async fn invoke_with_artifact(
        &self,
        request: &ActionRequest,
        artifact: ArtifactPayload,
    ) -> Result<ActionOutput, ActionError> {
        self.handle(request, Some(artifact)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_behaviors() {
        let client = MockActionClient::new();

        let collect = client
            .invoke(&ActionRequest::new(
                "collect_invoice",
                json!({"reference": "PO-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(collect.result_str("document_id"), Some("DOC-PO-1"));

        let download = client
            .invoke(&ActionRequest::new(
                "download_invoice",
                json!({"reference": "PO-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(
            download.into_artifact().unwrap(),
            b"download_invoice:PO-1".to_vec()
        );

        let upload = client
            .invoke_with_artifact(
                &ActionRequest::new("upload_invoice", json!({"reference": "PO-1"})),
                ArtifactPayload {
                    filename: "m.bin".to_string(),
                    bytes: vec![1],
                },
            )
            .await
            .unwrap();
        assert_eq!(upload.result_str("protocol"), Some("PROT-PO-1"));
    }

    #[tokio::test]
    async fn test_queued_response_overrides_default() {
        let client = MockActionClient::new();
        client
            .push_response(
                "collect_invoice",
                Ok(ActionOutput::Result(json!({"document_id": "OVERRIDE"}))),
            )
            .await;

        let request = ActionRequest::new("collect_invoice", json!({"reference": "PO-1"}));
        let first = client.invoke(&request).await.unwrap();
        assert_eq!(first.result_str("document_id"), Some("OVERRIDE"));

        // The queue is consumed; the default takes over again.
        let second = client.invoke(&request).await.unwrap();
        assert_eq!(second.result_str("document_id"), Some("DOC-PO-1"));
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot_and_per_reference() {
        let client = MockActionClient::new();
        client
            .fail_next(
                "generate_invoice",
                "PO-2",
                ActionError::ApiError("boom".to_string()),
            )
            .await;

        let ok = ActionRequest::new("generate_invoice", json!({"reference": "PO-1"}));
        let bad = ActionRequest::new("generate_invoice", json!({"reference": "PO-2"}));

        assert!(client.invoke(&ok).await.is_ok());
        assert!(client.invoke(&bad).await.is_err());
        assert!(client.invoke(&bad).await.is_ok());
        assert_eq!(client.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_recorded_calls_and_uploads() {
        let client = MockActionClient::new();
        client
            .invoke(&ActionRequest::new(
                "generate_invoice",
                json!({"reference": "PO-1"}),
            ))
            .await
            .unwrap();
        client
            .invoke_with_artifact(
                &ActionRequest::new("upload_invoice", json!({"reference": "PO-1"})),
                ArtifactPayload {
                    filename: "m.bin".to_string(),
                    bytes: vec![7, 7],
                },
            )
            .await
            .unwrap();

        assert_eq!(client.call_count().await, 2);
        assert_eq!(
            client.references_for("generate_invoice").await,
            vec!["PO-1".to_string()]
        );

        let uploads = client.uploads().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].artifact.as_ref().unwrap().bytes, vec![7, 7]);
    }
}
