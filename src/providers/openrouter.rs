use super::chat::{image_from_completion, ChatCompletionRequest, ChatImageConfig};
use super::http::ProviderHttpClient;
use super::ImageProvider;
use crate::extract::PayloadExtractor;
use crate::models::GenerationRequest;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai";
const COMPLETIONS_PATH: &str = "/api/v1/chat/completions";
const REFERER: &str = "http://localhost:5000";
const TITLE: &str = "image-relay";

/// Gemini image models routed through OpenRouter truncate without a generous
/// completion budget.
const GEMINI_MAX_TOKENS: u32 = 4000;

/// OpenRouter chat-completions adapter with image output modality.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    http: ProviderHttpClient,
    api_key: String,
    extractor: PayloadExtractor,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new("openrouter", client.clone(), DEFAULT_BASE_URL),
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
        let mut body = ChatCompletionRequest::for_generation(request, &request.model);
        body.modalities = Some(vec!["image".to_string(), "text".to_string()]);

        if request.model.to_lowercase().contains("gemini") {
            body.max_tokens = Some(GEMINI_MAX_TOKENS);
            body.stream = Some(false);
            body.image_config = request.aspect_ratio().map(|ratio| ChatImageConfig {
                aspect_ratio: ratio.to_string(),
            });
        } else if request.aspect_ratio().is_some() {
            tracing::warn!(
                "Model {} does not take an aspect ratio via OpenRouter, dropping it",
                request.model
            );
        }
        if request.resolution().is_some() {
            tracing::warn!("OpenRouter does not support resolution, dropping it");
        }

        body
    }
}

#[async_trait]
impl ImageProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn generate_one(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        tracing::debug!(
            "OpenRouter request: model={}, reference_images={}",
            request.model,
            request.reference_images.len()
        );

        let body = self.build_request(request);
        let response = self
            .http
            .send_json(
                self.http
                    .post(COMPLETIONS_PATH)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("HTTP-Referer", REFERER)
                    .header("X-Title", TITLE)
                    .json(&body),
            )
            .await?;

        image_from_completion(self.name(), &self.extractor, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::TINY_PNG;
    use crate::Error;
    use base64::Engine as _;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_provider(server: &MockServer) -> OpenRouterProvider {
        OpenRouterProvider::new("or-key".to_string(), reqwest::Client::new())
            .with_base_url(server.uri())
    }

    fn png_data_uri() -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(TINY_PNG)
        )
    }

    #[test]
    fn test_gemini_models_get_extra_parameters() {
        let provider = OpenRouterProvider::new("k".to_string(), reqwest::Client::new());
        let request = GenerationRequest::new("a fox", "google/gemini-2.5-flash-image")
            .with_param("aspect_ratio", "3:2");
        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["stream"], false);
        assert_eq!(body["modalities"], json!(["image", "text"]));
        assert_eq!(body["image_config"]["aspect_ratio"], "3:2");

        let request = GenerationRequest::new("a fox", "openai/gpt-5-image");
        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("image_config").is_none());
    }

    #[tokio::test]
    async fn test_generate_reads_message_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("Authorization", "Bearer or-key"))
            .and(header("X-Title", "image-relay"))
            .and(body_partial_json(json!({ "model": "google/gemini-2.5-flash-image" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "images": [{ "type": "image_url", "image_url": { "url": png_data_uri() } }]
                    },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 12 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest::new("a fox", "google/gemini-2.5-flash-image");
        let image = make_provider(&server).generate_one(&request).await.unwrap();
        assert_eq!(image, TINY_PNG);
    }

    #[tokio::test]
    async fn test_soft_refusal_in_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": "This request was blocked by Google Gemini safety filters.",
                        "refusal": null
                    }
                }]
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new("x", "google/gemini-2.5-flash-image");
        let err = make_provider(&server).generate_one(&request).await.unwrap_err();
        assert!(matches!(err, Error::ContentRefused(_)));
    }

    #[tokio::test]
    async fn test_reasoning_text_is_ignored() {
        let server = MockServer::start().await;
        let noisy = "QUJD".repeat(2000);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "content": "Sure, here is a short story instead.",
                        "reasoning": noisy
                    }
                }]
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new("x", "google/gemini-2.5-flash-image");
        let err = make_provider(&server).generate_one(&request).await.unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "No auth credentials found", "code": 401 }
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new("x", "google/gemini-2.5-flash-image");
        let err = make_provider(&server).generate_one(&request).await.unwrap_err();
        match err {
            Error::Api { status, body, .. } => {
                assert_eq!(status, 401);
                assert_eq!(body, "No auth credentials found (401)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
