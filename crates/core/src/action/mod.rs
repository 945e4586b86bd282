//! Opaque action API client used by every pipeline step.

mod http;
mod types;

pub use http::HttpActionClient;
pub use types::{ActionClient, ActionError, ActionOutput, ActionRequest, ArtifactPayload};
