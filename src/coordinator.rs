//! Fans one generation request out into `count` independent image tasks and
//! streams each result back as soon as it settles.

use crate::classify::ErrorClassifier;
use crate::error::{ErrorKind, IndexedFailure};
use crate::mime::is_valid_image;
use crate::models::{GenerationOutcome, GenerationRequest, MAX_IMAGE_COUNT};
use crate::providers::ImageProvider;
use crate::retry::RetryExecutor;
use crate::{Error, Result};
use futures::stream::{BoxStream, FuturesUnordered};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcomes of one request, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    pub requested: usize,
    pub outcomes: Vec<GenerationOutcome>,
}

impl GenerationReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// At least one image, but fewer than requested.
    pub fn is_partial(&self) -> bool {
        let succeeded = self.succeeded();
        succeeded > 0 && succeeded < self.requested
    }

    pub fn images(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.outcomes.iter().filter_map(|o| match o {
            GenerationOutcome::Success { index, image } => Some((*index, image.as_slice())),
            GenerationOutcome::Failure { .. } => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationCoordinator {
    retry: RetryExecutor,
}

impl GenerationCoordinator {
    pub fn new(retry: RetryExecutor) -> Self {
        Self { retry }
    }

    /// Stream of per-index outcomes in completion order.
    ///
    /// Failures are held back until the first success. If nothing succeeds
    /// the stream carries a single [`Error::AllFailed`] and no outcomes.
    /// Dropping the stream cancels whatever is still in flight.
    pub fn stream(
        &self,
        request: Arc<GenerationRequest>,
        count: usize,
        provider: Arc<dyn ImageProvider>,
    ) -> BoxStream<'static, Result<GenerationOutcome>> {
        let retry = self.retry.clone();

        async_stream::stream! {
            if let Err(e) = validate(&request, count) {
                warn!("Rejected generation request: {}", e);
                yield Err(e);
                return;
            }

            let per_call = provider.capabilities().max_images_per_call.max(1);
            let chunks = plan_chunks(count, per_call);
            info!(
                "Dispatching {} image(s) via {} in {} call(s)",
                count,
                provider.name(),
                chunks.len()
            );

            let mut tasks = FuturesUnordered::new();
            for indices in chunks {
                tasks.push(run_chunk(
                    retry.clone(),
                    Arc::clone(&provider),
                    Arc::clone(&request),
                    indices,
                ));
            }

            let mut succeeded = 0usize;
            let mut held: Vec<GenerationOutcome> = Vec::new();
            let mut failures: Vec<IndexedFailure> = Vec::new();

            while let Some(outcomes) = tasks.next().await {
                for outcome in outcomes {
                    match failure_record(&outcome) {
                        None => {
                            succeeded += 1;
                            yield Ok(outcome);
                            for pending in std::mem::take(&mut held) {
                                yield Ok(pending);
                            }
                        }
                        Some(failure) => {
                            failures.push(failure);
                            if succeeded > 0 {
                                yield Ok(outcome);
                            } else {
                                held.push(outcome);
                            }
                        }
                    }
                }
            }

            if succeeded == 0 {
                error!("All {} image generations failed", count);
                failures.sort_by_key(|f| f.index);
                yield Err(Error::AllFailed { requested: count, failures });
            } else if succeeded < count {
                warn!(
                    "Partial degradation: {} of {} images generated",
                    succeeded, count
                );
            } else {
                info!("All {} images generated", count);
            }
        }
        .boxed()
    }

    /// Drive [`stream`](Self::stream) to completion.
    pub async fn collect(
        &self,
        request: Arc<GenerationRequest>,
        count: usize,
        provider: Arc<dyn ImageProvider>,
    ) -> Result<GenerationReport> {
        let mut stream = self.stream(request, count, provider);
        let mut outcomes = Vec::with_capacity(count);
        while let Some(item) = stream.next().await {
            outcomes.push(item?);
        }
        Ok(GenerationReport {
            requested: count,
            outcomes,
        })
    }
}

fn validate(request: &GenerationRequest, count: usize) -> Result<()> {
    if !(1..=MAX_IMAGE_COUNT).contains(&count) {
        return Err(Error::InvalidRequest(format!(
            "image count must be between 1 and {}, got {}",
            MAX_IMAGE_COUNT, count
        )));
    }
    request.validate()
}

fn failure_record(outcome: &GenerationOutcome) -> Option<IndexedFailure> {
    match outcome {
        GenerationOutcome::Success { .. } => None,
        GenerationOutcome::Failure {
            index,
            kind,
            message,
        } => Some(IndexedFailure {
            index: *index,
            kind: *kind,
            message: message.clone(),
        }),
    }
}

/// Split `1..=count` into consecutive runs of at most `per_call` indices.
fn plan_chunks(count: usize, per_call: usize) -> Vec<Vec<usize>> {
    (1..=count)
        .collect::<Vec<_>>()
        .chunks(per_call)
        .map(<[usize]>::to_vec)
        .collect()
}

/// One provider call (with retry) covering `indices`.
async fn run_chunk(
    retry: RetryExecutor,
    provider: Arc<dyn ImageProvider>,
    request: Arc<GenerationRequest>,
    indices: Vec<usize>,
) -> Vec<GenerationOutcome> {
    let n = indices.len();
    let label = match indices.as_slice() {
        [index] => format!("{} #{}", provider.name(), index),
        _ => format!("{} #{:?}", provider.name(), indices),
    };

    let result = retry
        .execute(&label, || {
            let provider = Arc::clone(&provider);
            let request = Arc::clone(&request);
            async move {
                if n == 1 {
                    provider.generate_one(&request).await.map(|image| vec![image])
                } else {
                    provider.generate_many(&request, n).await
                }
            }
        })
        .await;

    match result {
        Ok(images) => {
            let returned = images.len();
            if returned < n {
                warn!("[{}] provider returned {} of {} images", label, returned, n);
            }
            let mut images = images.into_iter();
            indices
                .into_iter()
                .map(|index| match images.next() {
                    Some(image) if is_valid_image(&image) => {
                        debug!("[{}] image #{} ready ({} bytes)", label, index, image.len());
                        GenerationOutcome::Success { index, image }
                    }
                    Some(_) => GenerationOutcome::Failure {
                        index,
                        kind: ErrorKind::ExtractionFailed,
                        message: "provider returned bytes that are not a recognized image"
                            .to_string(),
                    },
                    None => GenerationOutcome::Failure {
                        index,
                        kind: ErrorKind::ExtractionFailed,
                        message: format!("provider returned only {} of {} images", returned, n),
                    },
                })
                .collect()
        }
        Err(e) => {
            let kind = ErrorClassifier.classify(&e);
            error!("[{}] failed ({}): {}", label, kind, e);
            let message = e.to_string();
            indices
                .into_iter()
                .map(|index| GenerationOutcome::Failure {
                    index,
                    kind,
                    message: message.clone(),
                })
                .collect()
        }
    }
}
