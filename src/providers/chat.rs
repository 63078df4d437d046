//! OpenAI-compatible chat-completions payloads shared by the OpenRouter and
//! Tuzi adapters.

use super::extract_or_refuse;
use crate::extract::PayloadExtractor;
use crate::mime::detect_image_mime;
use crate::models::GenerationRequest;
use crate::payload::Payload;
use crate::{Error, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ChatImageConfig>,
}

impl ChatCompletionRequest {
    /// Plain single-turn request: one user message carrying the prompt and
    /// every reference image inline.
    pub fn for_generation(request: &GenerationRequest, model: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage::user(request)],
            temperature: request.temperature,
            max_tokens: None,
            stream: None,
            modalities: None,
            image_config: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatImageConfig {
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<MessagePart>,
}

impl ChatMessage {
    fn user(request: &GenerationRequest) -> Self {
        let mut content = vec![MessagePart::text(&request.prompt)];
        content.extend(request.reference_images.iter().map(|image| {
            MessagePart::image(format!(
                "data:{};base64,{}",
                detect_image_mime(image),
                base64::engine::general_purpose::STANDARD.encode(image)
            ))
        }));
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// One content segment in multipart message input.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
}

impl MessagePart {
    fn text(text: &str) -> Self {
        Self {
            part_type: "text".to_string(),
            text: Some(text.to_string()),
            image_url: None,
        }
    }

    fn image(url: String) -> Self {
        Self {
            part_type: "image_url".to_string(),
            text: None,
            image_url: Some(ImageUrl { url }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// The few response fields an adapter needs to spot an explicit refusal.
/// Image data itself is never read through these types.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefusalEnvelope {
    choices: Vec<RefusalChoice>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefusalChoice {
    message: Option<RefusalMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RefusalMessage {
    content: Option<Value>,
    refusal: Option<String>,
}

fn first_choice(response: &Value) -> Option<RefusalChoice> {
    serde_json::from_value::<RefusalEnvelope>(response.clone())
        .ok()?
        .choices
        .into_iter()
        .next()
}

/// Explicit refusal signal: a non-empty `message.refusal`, or a
/// `content_filter` finish reason.
pub fn explicit_refusal(response: &Value) -> Option<String> {
    let choice = first_choice(response)?;
    if let Some(refusal) = choice
        .message
        .as_ref()
        .and_then(|m| m.refusal.as_deref())
        .filter(|r| !r.trim().is_empty())
    {
        return Some(refusal.to_string());
    }
    match choice.finish_reason.as_deref() {
        Some("content_filter") => Some("finish_reason=content_filter".to_string()),
        _ => None,
    }
}

/// Text of the first choice's message, when it is a plain string.
pub fn message_text(response: &Value) -> Option<String> {
    match first_choice(response)?.message?.content? {
        Value::String(text) => Some(text),
        _ => None,
    }
}

/// Refusal check, then deep search over the whole response, then the
/// soft-refusal heuristic on the message text.
pub async fn image_from_completion(
    provider: &'static str,
    extractor: &PayloadExtractor,
    response: Value,
) -> Result<Vec<u8>> {
    if let Some(reason) = explicit_refusal(&response) {
        tracing::error!("{}: refusal in response: {}", provider, reason);
        return Err(Error::ContentRefused(reason));
    }
    let text = message_text(&response);
    let payload = Payload::from(response);
    extract_or_refuse(provider, extractor, &payload, text.as_deref()).await
}
