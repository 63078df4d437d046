//! Server-Sent-Events records announcing each finished image.

use crate::error::ErrorKind;
use crate::models::GenerationOutcome;
use crate::storage::SavedImage;
use crate::{Error, Result};
use serde::Serialize;

/// Terminates every event stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Error,
}

/// One `data:` record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageEvent {
    /// 1-based; absent on whole-request errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ImageEvent {
    pub fn saved(index: usize, saved: &SavedImage) -> Self {
        Self {
            index: Some(index),
            status: EventStatus::Success,
            filename: Some(saved.filename.clone()),
            download_url: Some(saved.download_url.clone()),
            image_data: Some(saved.image_data.clone()),
            error_kind: None,
            message: None,
        }
    }

    pub fn failed(index: usize, kind: ErrorKind, message: &str) -> Self {
        Self {
            index: Some(index),
            status: EventStatus::Error,
            filename: None,
            download_url: None,
            image_data: None,
            error_kind: Some(kind),
            message: Some(message.to_string()),
        }
    }

    /// Record for an outcome; successes need their [`SavedImage`].
    pub fn from_outcome(outcome: &GenerationOutcome, saved: Option<&SavedImage>) -> Self {
        match (outcome, saved) {
            (GenerationOutcome::Success { index, .. }, Some(saved)) => Self::saved(*index, saved),
            (GenerationOutcome::Success { index, .. }, None) => Self::failed(
                *index,
                ErrorKind::Unknown,
                "image generated but could not be stored",
            ),
            (GenerationOutcome::Failure { index, kind, message }, _) => {
                Self::failed(*index, *kind, message)
            }
        }
    }

    /// Whole-request failure such as validation or every index failing.
    pub fn request_failed(kind: ErrorKind, error: &Error) -> Self {
        Self {
            index: None,
            status: EventStatus::Error,
            filename: None,
            download_url: None,
            image_data: None,
            error_kind: Some(kind),
            message: Some(error.to_string()),
        }
    }

    pub fn to_sse_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
