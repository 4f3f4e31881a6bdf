//! HTTP client for the vision-language extraction service.
//!
//! The service exposes two endpoints that take the document inline:
//! `POST {base}/classify` and `POST {base}/extract`, both with a JSON body
//! `{ "mimeType": ..., "data": <base64> }`.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::traits::{Classifier, Extractor};
use crate::types::{Classification, ExtractedInvoice};
use crate::AgentError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRequest<'a> {
    mime_type: &'a str,
    data: String,
}

/// Classifier and extractor backed by one HTTP endpoint.
#[derive(Clone)]
pub struct VisionAgentClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl VisionAgentClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, AgentError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Fatal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        bytes: Bytes,
        mime_type: &str,
    ) -> Result<T, AgentError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let body = DocumentRequest {
            mime_type,
            data: STANDARD.encode(&bytes),
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                AgentError::Retryable(e.to_string())
            } else {
                AgentError::Fatal(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(%url, %status, size = bytes.len(), "vision agent responded");
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AgentError::Fatal(format!("malformed {endpoint} response: {e}")))
    }
}

fn classify_status(status: StatusCode, text: String) -> AgentError {
    let msg = format!("{status}: {text}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AgentError::Retryable(msg)
    } else {
        AgentError::Fatal(msg)
    }
}

#[async_trait]
impl Classifier for VisionAgentClient {
    async fn classify(&self, bytes: Bytes, mime_type: &str) -> Result<Classification, AgentError> {
        let mut classification: Classification = self.post("classify", bytes, mime_type).await?;
        classification.confidence = classification.confidence.clamp(0.0, 1.0);
        Ok(classification)
    }
}

#[async_trait]
impl Extractor for VisionAgentClient {
    async fn extract(&self, bytes: Bytes, mime_type: &str) -> Result<ExtractedInvoice, AgentError> {
        let mut invoice: ExtractedInvoice = self.post("extract", bytes, mime_type).await?;
        invoice.extraction_confidence = invoice.extraction_confidence.clamp(0.0, 1.0);
        Ok(invoice)
    }
}
