use super::http::ProviderHttpClient;
use super::{detect_soft_refusal, ImageProvider, ProviderCapabilities};
use crate::extract::PayloadExtractor;
use crate::mime::sniff_image_format;
use crate::models::GenerationRequest;
use crate::payload::Payload;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const GENERATIONS_PATH: &str = "/v1/images/generations";
const EDITS_PATH: &str = "/v1/images/edits";

/// The images API accepts `n` up to 10; keep batches small so one failed
/// call costs at most a few indices.
const MAX_IMAGES_PER_CALL: usize = 4;

#[derive(Debug, Serialize)]
struct ImageGenerationRequest {
    model: String,
    prompt: String,
    n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
}

fn size_for_aspect_ratio(ratio: &str) -> Option<&'static str> {
    match ratio {
        "1:1" => Some("1024x1024"),
        "3:2" => Some("1536x1024"),
        "2:3" => Some("1024x1536"),
        _ => None,
    }
}

/// OpenAI images API adapter (`gpt-image-1` and friends).
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http: ProviderHttpClient,
    api_key: String,
    extractor: PayloadExtractor,
}

impl OpenAiProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new("openai", client.clone(), DEFAULT_BASE_URL),
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

    fn size(request: &GenerationRequest) -> Option<String> {
        if request.resolution().is_some() {
            tracing::warn!("OpenAI images API does not take a resolution, dropping it");
        }
        let ratio = request.aspect_ratio()?;
        let size = size_for_aspect_ratio(ratio);
        if size.is_none() {
            tracing::warn!("Aspect ratio {} has no OpenAI size, using the default", ratio);
        }
        size.map(str::to_string)
    }

    async fn generate(&self, request: &GenerationRequest, count: usize) -> Result<Value> {
        tracing::debug!(
            "OpenAI images request: model={}, n={}, reference_images={}, temperature ignored",
            request.model,
            count,
            request.reference_images.len()
        );

        if request.is_edit() {
            let form = self.edit_form(request, count)?;
            self.http
                .send_json(
                    self.http
                        .post(EDITS_PATH)
                        .bearer_auth(&self.api_key)
                        .multipart(form),
                )
                .await
        } else {
            let body = ImageGenerationRequest {
                model: request.model.clone(),
                prompt: request.prompt.clone(),
                n: count,
                size: Self::size(request),
            };
            self.http
                .send_json(
                    self.http
                        .post(GENERATIONS_PATH)
                        .bearer_auth(&self.api_key)
                        .json(&body),
                )
                .await
        }
    }

    fn edit_form(&self, request: &GenerationRequest, count: usize) -> Result<Form> {
        let mut form = Form::new()
            .text("model", request.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", count.to_string());
        if let Some(size) = Self::size(request) {
            form = form.text("size", size);
        }
        for (i, image) in request.reference_images.iter().enumerate() {
            let format = sniff_image_format(image).ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "reference image {} is not a supported format",
                    i + 1
                ))
            })?;
            let part = Part::bytes(image.clone())
                .file_name(format!("reference-{}.{}", i + 1, format.extension()))
                .mime_str(format.mime())?;
            form = form.part("image[]", part);
        }
        Ok(form)
    }
}

/// The images API reports moderation as a 400 with `moderation_blocked`.
fn refusal_from_api_error(error: Error) -> Error {
    match error {
        Error::Api { status: 400, body, .. }
            if body.contains("moderation_blocked") || body.contains("safety system") =>
        {
            tracing::error!("OpenAI refused the request: {}", body);
            Error::ContentRefused(body)
        }
        other => other,
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_images_per_call: MAX_IMAGES_PER_CALL,
        }
    }

    async fn generate_one(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        self.generate_many(request, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::ExtractionFailed("openai response contained no image".to_string())
            })
    }

    /// Returns every image found in `data`, in order. Fewer than `count`
    /// images is not an error here; the coordinator marks the missing indices.
    async fn generate_many(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let response = self
            .generate(request, count)
            .await
            .map_err(refusal_from_api_error)?;

        let items = match response.get("data") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut images = Vec::with_capacity(items.len());
        for item in items {
            if let Some(image) = self.extractor.extract(&Payload::from(item)).await {
                images.push(image);
            }
        }

        if images.is_empty() {
            let text = response.get("error").map(Value::to_string).unwrap_or_default();
            if let Some(keyword) = detect_soft_refusal(&text) {
                return Err(Error::ContentRefused(format!(
                    "openai declined the request ({})",
                    keyword
                )));
            }
            tracing::error!(
                "openai: no image in response: {}",
                Payload::from(response).truncated_for_log()
            );
            return Err(Error::ExtractionFailed(
                "openai response contained no image".to_string(),
            ));
        }

        if images.len() < count {
            tracing::warn!("OpenAI returned {} of {} requested images", images.len(), count);
        }
        Ok(images)
    }
}
