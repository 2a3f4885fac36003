//! HTTP boundary for the chat endpoint.
//!
//! The pipeline talks to a [`ChatTransport`] trait rather than to reqwest
//! directly so tests can script responses. The real implementation POSTs the
//! transcript as JSON and exposes the response body as a raw byte stream for
//! the decoder.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::error::ChatError;
use crate::types::ChatRequest;

/// Response body as it arrives from the wire, chunk by chunk.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Status plus streaming body. For non-2xx statuses the pipeline collects
/// the body into a string and parses it as an error payload.
pub struct ChatResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl ChatResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string (error payloads are small).
    pub async fn collect_body(mut self) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.next().await {
            match chunk {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(err) => {
                    tracing::debug!("Error body truncated: {err}");
                    break;
                }
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

#[async_trait]
pub trait ChatTransport: Send {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError>;
}

/// reqwest-backed transport for the configured endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body: BodyStream =
            Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(ChatError::from)));
        Ok(ChatResponse { status, body })
    }
}
