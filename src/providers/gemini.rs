use super::http::ProviderHttpClient;
use super::{extract_or_refuse, ImageProvider};
use crate::extract::PayloadExtractor;
use crate::mime::detect_image_mime;
use crate::models::GenerationRequest;
use crate::payload::Payload;
use crate::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Finish reasons that mean the candidate was withheld for policy reasons.
const REFUSAL_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "IMAGE_SAFETY",
    "BLOCKLIST",
    "SPII",
];

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

/// Untagged union of text and inline media content parts.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<String>,
}

/// Response fields consulted for refusal signals only.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResponseStatus {
    prompt_feedback: Option<PromptFeedback>,
    candidates: Vec<CandidateStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CandidateStatus {
    finish_reason: Option<String>,
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<TextPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextPart {
    text: Option<String>,
}

impl ResponseStatus {
    fn refusal(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Some(format!("prompt blocked: {}", reason));
        }
        self.candidates
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .find(|reason| REFUSAL_FINISH_REASONS.contains(reason))
            .map(|reason| format!("candidate withheld: {}", reason))
    }

    fn text(&self) -> Option<String> {
        let text: Vec<&str> = self
            .candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.is_empty()).then(|| text.join("\n"))
    }
}

/// Which optional knobs a Gemini image model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModelSupport {
    aspect_ratio: bool,
    resolution: bool,
}

fn model_support(model_id: &str) -> ModelSupport {
    let base = model_id.split(':').next().unwrap_or(model_id);
    match base {
        "gemini-3-pro-image-preview" => ModelSupport {
            aspect_ratio: true,
            resolution: true,
        },
        "gemini-2.5-flash-image" => ModelSupport {
            aspect_ratio: true,
            resolution: false,
        },
        other => {
            tracing::debug!("Unknown Gemini model {}, assuming aspect ratio only", other);
            ModelSupport {
                aspect_ratio: true,
                resolution: false,
            }
        }
    }
}

/// Bare model ID without `google/` routing or `models/` path prefixes.
fn model_id(model: &str) -> &str {
    let model = model.strip_prefix("google/").unwrap_or(model);
    model.strip_prefix("models/").unwrap_or(model)
}

/// Google Gemini `generateContent` adapter.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    http: ProviderHttpClient,
    api_key: String,
    extractor: PayloadExtractor,
}

impl GeminiProvider {
    pub fn new(api_key: String, client: reqwest::Client) -> Self {
        Self {
            http: ProviderHttpClient::new("google", client.clone(), DEFAULT_BASE_URL),
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

    fn build_request(&self, request: &GenerationRequest, model: &str) -> GenerateContentRequest {
        let support = model_support(model);

        let aspect_ratio = request.aspect_ratio().map(str::to_string);
        if aspect_ratio.is_some() && !support.aspect_ratio {
            tracing::warn!("Model {} does not support aspect_ratio, dropping it", model);
        }
        let resolution = request.resolution().map(str::to_string);
        if resolution.is_some() && !support.resolution {
            tracing::warn!("Model {} does not support resolution, dropping it", model);
        }

        let aspect_ratio = aspect_ratio.filter(|_| support.aspect_ratio);
        let image_size = resolution.filter(|_| support.resolution);
        let image_config = (aspect_ratio.is_some() || image_size.is_some()).then_some(ImageConfig {
            aspect_ratio,
            image_size,
        });

        let mut parts = vec![Part::Text {
            text: request.prompt.clone(),
        }];
        parts.extend(request.reference_images.iter().map(|image| Part::InlineData {
            inline_data: InlineData {
                mime_type: detect_image_mime(image).to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(image),
            },
        }));

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
                image_config,
            },
        }
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn generate_one(&self, request: &GenerationRequest) -> Result<Vec<u8>> {
        let model = model_id(&request.model);
        tracing::debug!(
            "Gemini request: model={}, reference_images={}",
            model,
            request.reference_images.len()
        );

        let body = self.build_request(request, model);
        let path = format!("/v1beta/models/{}:generateContent", model);
        let response: Value = self
            .http
            .send_json(
                self.http
                    .post(&path)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body),
            )
            .await?;

        let status: ResponseStatus = serde_json::from_value(response.clone()).unwrap_or_default();
        if let Some(reason) = status.refusal() {
            tracing::error!("Gemini refused the request: {}", reason);
            return Err(Error::ContentRefused(reason));
        }

        let payload = Payload::from(response);
        extract_or_refuse(self.name(), &self.extractor, &payload, status.text().as_deref()).await
    }
}
