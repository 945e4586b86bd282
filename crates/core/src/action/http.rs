//! HTTP action API client.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::ActionsConfig;
use crate::metrics;

use super::types::{ActionClient, ActionError, ActionOutput, ActionRequest, ArtifactPayload};

/// JSON envelope returned by the action API for structured responses.
#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    success: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Action API client with bounded transport retries.
///
/// Retries cover timeouts and connection failures only; an answer from the
/// API, even a rejection, is final. Group-level failure policy lives in the
/// pipeline, not here.
pub struct HttpActionClient {
    client: Client,
    config: ActionsConfig,
}

impl HttpActionClient {
    pub fn new(config: ActionsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/actions", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(
        &self,
        request: &ActionRequest,
        artifact: Option<&ArtifactPayload>,
    ) -> Result<ActionOutput, ActionError> {
        let builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key);

        let builder = match artifact {
            Some(payload) => {
                let body = serde_json::to_string(request)
                    .map_err(|e| ActionError::ApiError(format!("request encoding: {}", e)))?;
                let form = reqwest::multipart::Form::new()
                    .text("request", body)
                    .part(
                        "artifact",
                        reqwest::multipart::Part::bytes(payload.bytes.clone())
                            .file_name(payload.filename.clone()),
                    );
                builder.multipart(form)
            }
            None => builder.json(request),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout
            } else if e.is_connect() {
                ActionError::ConnectionFailed(e.to_string())
            } else {
                ActionError::ApiError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ActionError::ApiError(format!(
                "HTTP {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let envelope: ActionEnvelope = response
                .json()
                .await
                .map_err(|e| ActionError::ApiError(format!("Failed to parse response: {}", e)))?;
            unpack_envelope(&request.action, envelope)
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ActionError::ApiError(format!("Failed to read artifact: {}", e)))?;
            Ok(ActionOutput::Artifact(bytes.to_vec()))
        }
    }

    async fn send_with_retries(
        &self,
        request: &ActionRequest,
        artifact: Option<&ArtifactPayload>,
    ) -> Result<ActionOutput, ActionError> {
        let start = Instant::now();
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 0u32;

        let outcome = loop {
            match self.send_once(request, artifact).await {
                Ok(output) => break Ok(output),
                Err(e) if e.is_transient() && attempt < self.config.transport_retries => {
                    attempt += 1;
                    warn!(
                        action = %request.action,
                        attempt = attempt,
                        error = %e,
                        "Transient action failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => break Err(e),
            }
        };

        let status = if outcome.is_ok() { "success" } else { "error" };
        metrics::ACTION_CALLS
            .with_label_values(&[request.action.as_str(), status])
            .inc();
        metrics::ACTION_CALL_DURATION
            .with_label_values(&[request.action.as_str()])
            .observe(start.elapsed().as_secs_f64());

        debug!(
            action = %request.action,
            status = status,
            attempts = attempt + 1,
            "Action call finished"
        );
        outcome
    }
}

/// Turn the JSON envelope into an output or a rejection.
fn unpack_envelope(action: &str, envelope: ActionEnvelope) -> Result<ActionOutput, ActionError> {
    if envelope.success {
        Ok(ActionOutput::Result(
            envelope.result.unwrap_or(serde_json::Value::Null),
        ))
    } else {
        Err(ActionError::Rejected {
            action: action.to_string(),
            message: envelope
                .error
                .unwrap_or_else(|| "unspecified error".to_string()),
        })
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, request: &ActionRequest) -> Result<ActionOutput, ActionError> {
        self.send_with_retries(request, None).await
    }

    async fn invoke_with_artifact(
        &self,
        request: &ActionRequest,
        artifact: ArtifactPayload,
    ) -> Result<ActionOutput, ActionError> {
        self.send_with_retries(request, Some(&artifact)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> ActionsConfig {
        ActionsConfig {
            base_url: "http://localhost:8081/".to_string(),
            api_key: "key".to_string(),
            timeout_secs: 10,
            transport_retries: 2,
            retry_backoff_ms: 10,
        }
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = HttpActionClient::new(test_config());
        assert_eq!(client.endpoint(), "http://localhost:8081/v1/actions");
    }

    #[test]
    fn test_unpack_success_envelope() {
        let envelope = ActionEnvelope {
            success: true,
            result: Some(json!({"protocol": "P-1"})),
            error: None,
        };
        let output = unpack_envelope("upload_invoice", envelope).unwrap();
        assert_eq!(output.result_str("protocol"), Some("P-1"));
    }

    #[test]
    fn test_unpack_success_without_result() {
        let envelope = ActionEnvelope {
            success: true,
            result: None,
            error: None,
        };
        let output = unpack_envelope("generate_invoice", envelope).unwrap();
        assert_eq!(output.as_result(), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_unpack_rejection() {
        let envelope = ActionEnvelope {
            success: false,
            result: None,
            error: Some("document not ready".to_string()),
        };
        let err = unpack_envelope("collect_invoice", envelope).unwrap_err();
        match err {
            ActionError::Rejected { action, message } => {
                assert_eq!(action, "collect_invoice");
                assert_eq!(message, "document not ready");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_rejection_without_message() {
        let envelope = ActionEnvelope {
            success: false,
            result: None,
            error: None,
        };
        let err = unpack_envelope("x", envelope).unwrap_err();
        assert!(err.to_string().contains("unspecified"));
    }
}
