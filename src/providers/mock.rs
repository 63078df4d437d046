use super::{ImageProvider, ProviderCapabilities};
use crate::models::GenerationRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A 1x1 PNG, small enough to inline and valid enough to pass magic checks.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, // PNG signature
    0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1x1 pixel
    0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49,
    0x44, 0x41, // IDAT chunk
    0x54, 0x08, 0x99, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0xE2,
    0x25, 0x00, 0xBC, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, // IEND chunk
    0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Scripted outcome of one mock call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Image(Vec<u8>),
    /// Becomes [`Error::Api`] with this status and body.
    Status(u16, String),
    Refused(String),
    NoImage,
}

impl MockReply {
    fn into_result(self) -> Result<Vec<u8>> {
        match self {
            MockReply::Image(bytes) => Ok(bytes),
            MockReply::Status(status, body) => Err(Error::Api {
                provider: "mock",
                status,
                body,
            }),
            MockReply::Refused(reason) => Err(Error::ContentRefused(reason)),
            MockReply::NoImage => Err(Error::ExtractionFailed(
                "mock response contained no image".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    reply: MockReply,
    delay: Duration,
}

/// In-memory [`ImageProvider`] for tests.
///
/// Replies are consumed in call order; once the script runs out the last
/// step repeats. With no script every call returns [`TINY_PNG`]. Clones
/// share the script and the call counter.
#[derive(Debug, Clone)]
pub struct MockImageProvider {
    steps: Arc<Mutex<Vec<Step>>>,
    call_count: Arc<AtomicUsize>,
    max_images_per_call: usize,
}

impl MockImageProvider {
    pub fn new() -> Self {
        Self {
            steps: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(AtomicUsize::new(0)),
            max_images_per_call: 1,
        }
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.with_delayed_reply(reply, Duration::ZERO)
    }

    pub fn with_delayed_reply(self, reply: MockReply, delay: Duration) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Step { reply, delay });
        self
    }

    pub fn with_max_images_per_call(mut self, max_images_per_call: usize) -> Self {
        self.max_images_per_call = max_images_per_call;
        self
    }

    pub fn get_call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        let steps = self.steps.lock().unwrap_or_else(PoisonError::into_inner);
        steps
            .get(call)
            .or_else(|| steps.last())
            .cloned()
            .unwrap_or(Step {
                reply: MockReply::Image(TINY_PNG.to_vec()),
                delay: Duration::ZERO,
            })
    }
}

impl Default for MockImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for MockImageProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            max_images_per_call: self.max_images_per_call,
        }
    }

    async fn generate_one(&self, _request: &GenerationRequest) -> Result<Vec<u8>> {
        let step = self.next_step();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.reply.into_result()
    }

    /// One scripted step answers the whole batch.
    async fn generate_many(
        &self,
        request: &GenerationRequest,
        count: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let image = self.generate_one(request).await?;
        Ok(vec![image; count])
    }
}
