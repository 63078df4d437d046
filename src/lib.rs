//! Multi-provider image generation relay
//!
//! Turns one text prompt (plus optional reference images) into up to five
//! images by fanning out concurrent calls to a remote image model, digging
//! the image bytes out of whatever response shape the vendor returns, and
//! streaming each result back as it completes.

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod extract;
pub mod mime;
pub mod models;
pub mod payload;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod storage;

pub use error::{Error, ErrorKind, Result};
