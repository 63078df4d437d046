//! Data models and structures
//!
//! Defines the normalized generation request, per-image outcomes, provider
//! selection and environment-driven configuration.

use crate::error::ErrorKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on images per generation call.
pub const MAX_IMAGE_COUNT: usize = 5;

pub const PARAM_ASPECT_RATIO: &str = "aspect_ratio";
pub const PARAM_RESOLUTION: &str = "resolution";

/// Provider-neutral description of one generation/edit job.
///
/// Immutable once built; the coordinator shares it behind an `Arc` across all
/// concurrently dispatched single-image tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub reference_images: Vec<Vec<u8>>,
    pub temperature: f32,
    pub model: String,
    pub provider_params: BTreeMap<String, String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images: Vec::new(),
            temperature: 0.8,
            model: model.into(),
            provider_params: BTreeMap::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_reference_image(mut self, image: Vec<u8>) -> Self {
        self.reference_images.push(image);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.provider_params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.provider_params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn aspect_ratio(&self) -> Option<&str> {
        self.param(PARAM_ASPECT_RATIO)
    }

    pub fn resolution(&self) -> Option<&str> {
        self.param(PARAM_RESOLUTION)
    }

    pub fn is_edit(&self) -> bool {
        !self.reference_images.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::InvalidRequest("prompt must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::InvalidRequest(format!(
                "temperature must be within [0, 1] (got {})",
                self.temperature
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidRequest("model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Result for one requested image. `index` is 1-based and fixed at dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Success {
        index: usize,
        image: Vec<u8>,
    },
    Failure {
        index: usize,
        kind: ErrorKind,
        message: String,
    },
}

impl GenerationOutcome {
    pub fn index(&self) -> usize {
        match self {
            GenerationOutcome::Success { index, .. } | GenerationOutcome::Failure { index, .. } => {
                *index
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    OpenRouter,
    Tuzi,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Tuzi => "tuzi",
            ProviderKind::OpenAi => "openai",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Google => "gemini-3-pro-image-preview",
            ProviderKind::OpenRouter => "google/gemini-2.5-flash-image",
            ProviderKind::Tuzi => "gemini-3-pro-image-preview-2k",
            ProviderKind::OpenAi => "gpt-image-1",
        }
    }

    fn api_key_var(self) -> &'static str {
        match self {
            ProviderKind::Google => "GOOGLE_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
            ProviderKind::Tuzi => "TUZI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(ProviderKind::Google),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "tuzi" => Ok(ProviderKind::Tuzi),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(Error::Config(format!("Unknown provider: {}", other))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub default_provider: ProviderKind,
    pub default_temperature_edit: f32,
    pub default_temperature_generate: f32,
    pub google_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub tuzi_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub tuzi_base_url: String,
    pub output_dir: PathBuf,
    /// Per-call HTTP timeout applied by every adapter.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_provider: ProviderKind::Google,
            default_temperature_edit: 0.7,
            default_temperature_generate: 0.8,
            google_api_key: None,
            openrouter_api_key: None,
            tuzi_api_key: None,
            openai_api_key: None,
            tuzi_base_url: "https://api.tu-zi.com/v1".to_string(),
            output_dir: PathBuf::from("output"),
            request_timeout: crate::providers::http::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let default_provider = match non_empty("DEFAULT_PROVIDER") {
            Some(value) => value.parse()?,
            None => defaults.default_provider,
        };

        let parse_temperature = |key: &str, fallback: f32| -> Result<f32> {
            match non_empty(key) {
                Some(value) => {
                    let parsed: f32 = value.trim().parse().map_err(|_| {
                        Error::Config(format!("{} must be a number (got '{}')", key, value))
                    })?;
                    if !(0.0..=1.0).contains(&parsed) {
                        return Err(Error::Config(format!(
                            "{} must be within [0, 1] (got {})",
                            key, parsed
                        )));
                    }
                    Ok(parsed)
                }
                None => Ok(fallback),
            }
        };

        let request_timeout = match non_empty("REQUEST_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(Error::Config(format!(
                        "REQUEST_TIMEOUT_SECS must be a positive integer (got '{}')",
                        value
                    )))
                }
            },
            None => defaults.request_timeout,
        };

        Ok(Self {
            default_provider,
            default_temperature_edit: parse_temperature(
                "DEFAULT_TEMPERATURE_EDIT",
                defaults.default_temperature_edit,
            )?,
            default_temperature_generate: parse_temperature(
                "DEFAULT_TEMPERATURE_GENERATE",
                defaults.default_temperature_generate,
            )?,
            google_api_key: non_empty(ProviderKind::Google.api_key_var()),
            openrouter_api_key: non_empty(ProviderKind::OpenRouter.api_key_var()),
            tuzi_api_key: non_empty(ProviderKind::Tuzi.api_key_var()),
            openai_api_key: non_empty(ProviderKind::OpenAi.api_key_var()),
            tuzi_base_url: non_empty("TUZI_BASE_URL").unwrap_or(defaults.tuzi_base_url),
            output_dir: non_empty("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            request_timeout,
        })
    }

    /// Credential for `provider`; the core only checks presence.
    pub fn api_key_for(&self, provider: ProviderKind) -> Result<String> {
        let key = match provider {
            ProviderKind::Google => &self.google_api_key,
            ProviderKind::OpenRouter => &self.openrouter_api_key,
            ProviderKind::Tuzi => &self.tuzi_api_key,
            ProviderKind::OpenAi => &self.openai_api_key,
        };
        key.clone().ok_or_else(|| {
            Error::Config(format!(
                "{} not set (required for provider {})",
                provider.api_key_var(),
                provider
            ))
        })
    }

    pub fn default_temperature(&self, edit: bool) -> f32 {
        if edit {
            self.default_temperature_edit
        } else {
            self.default_temperature_generate
        }
    }
}

/// A missing `.env` is fine; one that exists but does not parse is not.
fn load_dotenv<T>(loaded: dotenvy::Result<T>) -> Result<()> {
    match loaded {
        Err(e) if !e.not_found() => Err(e.into()),
        _ => Ok(()),
    }
}
