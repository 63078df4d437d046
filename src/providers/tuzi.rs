//! Tuzi chat-completions adapter.
//!
//! Tries a plain JSON completion first. When that fails for any reason other
//! than a refusal or bad credentials, the same request is replayed over the
//! SSE streaming transport and the deltas are reassembled before extraction.

use super::chat::{image_from_completion, ChatCompletionRequest};
use super::http::ProviderHttpClient;
use super::ImageProvider;
use crate::classify::ErrorClassifier;
use crate::error::ErrorKind;
use crate::extract::PayloadExtractor;
use crate::models::GenerationRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.tu-zi.com/v1";
const COMPLETIONS_PATH: &str = "/chat/completions";

#[derive(Debug, Clone)]
pub struct TuziProvider {
    http: ProviderHttpClient,
    api_key: String,
    extractor: PayloadExtractor,
}

impl TuziProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new("tuzi", client.clone(), DEFAULT_BASE_URL),
            api_key,
            extractor: PayloadExtractor::new(client),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.http.set_base_url(base_url);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http.set_timeout(timeout);
        self
    }

    fn build_request(&self, request: &GenerationRequest) -> ChatCompletionRequest {
        if request.aspect_ratio().is_some() || request.resolution().is_some() {
            tracing::warn!(
                "Tuzi encodes size in the model name ({}), dropping aspect_ratio/resolution",
                request.model
            );
        }
        let mut body = ChatCompletionRequest::for_generation(request, &request.model);
        body.stream = Some(false);
        body
    }

    async fn complete(&self, body: &ChatCompletionRequest) -> Result<Vec<u8>> {
        let response = self
            .http
            .send_json(
                self.http
                    .post(COMPLETIONS_PATH)
                    .bearer_auth(&self.api_key)
                    .json(body),
            )
            .await?;
        image_from_completion(self.name(), &self.extractor, response).await
    }

    async fn complete_streaming(&self, body: &ChatCompletionRequest) -> Result<Vec<u8>> {
        let response = self
            .http
            .send(
                self.http
                    .post(COMPLETIONS_PATH)
                    .bearer_auth(&self.api_key)
                    .header("Accept", "text/event-stream")
                    .json(&body.clone().streaming()),
            )
            .await?;

        let mut stream = response.bytes_stream();
        let mut assembler = StreamAssembler::default();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                tracing::error!("Tuzi stream interrupted: {}", e);
                Error::GarbledPayload(format!("stream interrupted: {}", e))
            })?;
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                assembler.feed_line(&String::from_utf8_lossy(&line));
            }
        }
        if !pending.is_empty() {
            assembler.feed_line(&String::from_utf8_lossy(&pending));
        }

        tracing::debug!(
            "Tuzi stream finished: frames={}, bad_frames={}, done={}, content_len={}",
            assembler.frames,
            assembler.bad_frames,
            assembler.saw_done,
            assembler.content.len()
        );

        let incomplete = !assembler.saw_done || assembler.bad_frames > 0;
        let completion = assembler.into_completion();
        match image_from_completion(self.name(), &self.extractor, completion).await {
            Err(Error::ExtractionFailed(message)) if incomplete => {
                Err(Error::GarbledPayload(format!("incomplete stream: {}", message)))
            }
            other => other,
        }
    }
}

#[async_trait]
impl ImageProvider for TuziProvider {
    fn name(&self) -> &'static str {
        "tuzi"
    }

    async fn generate_one(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        tracing::debug!(
            "Tuzi request: model={}, reference_images={}",
            request.model,
            request.reference_images.len()
        );
        let body = self.build_request(request);

        match self.complete(&body).await {
            Ok(image) => Ok(image),
            Err(e) => match ErrorClassifier.classify(&e) {
                ErrorKind::ContentRefused | ErrorKind::Unauthorized => Err(e),
                kind => {
                    tracing::warn!(
                        "Tuzi non-streaming call failed ({}), retrying over streaming: {}",
                        kind,
                        e
                    );
                    self.complete_streaming(&body).await
                }
            },
        }
    }
}

/// Reassembles `chat.completion.chunk` SSE frames into one completion.
#[derive(Debug, Default)]
struct StreamAssembler {
    content: String,
    refusal: String,
    images: Vec<Value>,
    finish_reason: Option<String>,
    frames: usize,
    bad_frames: usize,
    saw_done: bool,
}

impl StreamAssembler {
    fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.saw_done = true;
            return;
        }

        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Skipping malformed stream frame: {}", e);
                self.bad_frames += 1;
                return;
            }
        };
        self.frames += 1;

        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return;
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
        let Some(delta) = choice.get("delta") else {
            return;
        };
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            self.content.push_str(text);
        }
        if let Some(text) = delta.get("refusal").and_then(Value::as_str) {
            self.refusal.push_str(text);
        }
        if let Some(images) = delta.get("images").and_then(Value::as_array) {
            self.images.extend(images.iter().cloned());
        }
    }

    /// Shape the accumulated deltas like a non-streaming response.
    fn into_completion(self) -> Value {
        let refusal = (!self.refusal.is_empty()).then_some(self.refusal);
        json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": self.content,
                    "images": self.images,
                    "refusal": refusal,
                },
                "finish_reason": self.finish_reason,
            }]
        })
    }
}
