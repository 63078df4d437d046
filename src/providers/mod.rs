//! Vendor adapters for image generation
//!
//! Each adapter translates a [`GenerationRequest`] into one vendor's wire
//! format, issues the call with its own injected HTTP client, and runs the
//! response through the [`PayloadExtractor`] to produce raw image bytes.

pub mod chat;
pub mod gemini;
pub mod http;
pub mod mock;
pub mod openai;
pub mod openrouter;
pub mod tuzi;

pub use gemini::GeminiProvider;
pub use mock::{MockImageProvider, MockReply};
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;
pub use tuzi::TuziProvider;

use crate::extract::PayloadExtractor;
use crate::models::{Config, GenerationRequest, ProviderKind};
use crate::payload::Payload;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// What a vendor can do in a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// How many images one request can return. The coordinator splits larger
    /// jobs into this many indices per call.
    pub max_images_per_call: usize,
}

impl ProviderCapabilities {
    pub const SINGLE_IMAGE: Self = Self {
        max_images_per_call: 1,
    };
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::SINGLE_IMAGE
    }

    /// Generate exactly one image. Single attempt; retry is applied by the caller.
    async fn generate_one(&self, request: &GenerationRequest) -> Result<Vec<u8>>;

    /// Generate up to `count` images in one call.
    ///
    /// Only meaningful for providers whose capabilities allow more than one
    /// image per call; the default handles `count == 1`.
    async fn generate_many(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<Vec<u8>>> {
        if count == 1 {
            return Ok(vec![self.generate_one(request).await?]);
        }
        Err(Error::InvalidRequest(format!(
            "{} returns one image per call (asked for {})",
            self.name(),
            count
        )))
    }
}

/// Phrases that mark a text-only reply as a policy refusal.
///
/// Matching is a plain substring test over free text, so a legitimate caption
/// that quotes one of these phrases is misread as a refusal. Kept as-is until
/// product decides on a stricter signal.
const SOFT_REFUSAL_KEYWORDS: &[&str] = &[
    "blocked by Google Gemini",
    "PROHIBITED_CONTENT",
    "blocked by policy",
    "content is prohibited",
    "violates our content policy",
    "不符合内容政策",
    "违反了内容政策",
];

pub fn detect_soft_refusal(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    SOFT_REFUSAL_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lowered.contains(&keyword.to_lowercase()))
}

/// Shared tail of every adapter once an explicit refusal has been ruled out:
/// deep search, then the soft-refusal heuristic, then `ExtractionFailed`.
pub(crate) async fn extract_or_refuse(
    provider: &str,
    extractor: &PayloadExtractor,
    payload: &Payload,
    text: Option<&str>,
) -> Result<Vec<u8>> {
    if let Some(image) = extractor.extract(payload).await {
        tracing::debug!("{}: extracted image ({} bytes)", provider, image.len());
        return Ok(image);
    }

    if let Some(keyword) = text.and_then(detect_soft_refusal) {
        tracing::error!("{}: response text matched refusal keyword '{}'", provider, keyword);
        return Err(Error::ContentRefused(format!(
            "{} declined the request ({})",
            provider, keyword
        )));
    }

    tracing::error!(
        "{}: no image in response: {}",
        provider,
        payload.truncated_for_log()
    );
    Err(Error::ExtractionFailed(format!(
        "{} response contained no image",
        provider
    )))
}

/// Construct the adapter for `kind` around an explicitly owned HTTP client.
pub fn build_provider(
    kind: ProviderKind,
    api_key: String,
    client: reqwest::Client,
    config: &Config,
) -> Arc<dyn ImageProvider> {
    tracing::info!("Image provider: {} (timeout {:?})", kind, config.request_timeout);
    let timeout = config.request_timeout;
    match kind {
        ProviderKind::Google => {
            Arc::new(GeminiProvider::new(api_key, client).with_timeout(timeout))
        }
        ProviderKind::OpenRouter => {
            Arc::new(OpenRouterProvider::new(api_key, client).with_timeout(timeout))
        }
        ProviderKind::Tuzi => Arc::new(
            TuziProvider::new(api_key, client)
                .with_base_url(config.tuzi_base_url.clone())
                .with_timeout(timeout),
        ),
        ProviderKind::OpenAi => {
            Arc::new(OpenAiProvider::new(api_key, client).with_timeout(timeout))
        }
    }
}
