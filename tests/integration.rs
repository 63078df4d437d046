use base64::Engine as _;
use futures::StreamExt;
use image_relay::coordinator::GenerationCoordinator;
use image_relay::events::{ImageEvent, DONE_FRAME};
use image_relay::models::{GenerationOutcome, GenerationRequest};
use image_relay::providers::mock::TINY_PNG;
use image_relay::providers::{
    GeminiProvider, ImageProvider, MockImageProvider, MockReply, OpenRouterProvider,
};
use image_relay::retry::{RetryExecutor, RetryPolicy};
use image_relay::storage::OutputStore;
use image_relay::{Error, ErrorKind};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_coordinator() -> GenerationCoordinator {
    GenerationCoordinator::new(RetryExecutor::new(RetryPolicy {
        max_attempts: 5,
        unit: Duration::from_millis(1),
        max_delay: Duration::from_millis(20),
    }))
}

fn request(model: &str) -> Arc<GenerationRequest> {
    Arc::new(GenerationRequest::new("a paper boat on a rainy street", model))
}

#[tokio::test]
async fn test_four_images_all_succeed() {
    let provider: Arc<dyn ImageProvider> = Arc::new(MockImageProvider::new());
    let report = fast_coordinator()
        .collect(request("mock"), 4, provider)
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failed(), 0);
    let indices: BTreeSet<usize> = report.images().map(|(index, _)| index).collect();
    assert_eq!(indices, BTreeSet::from([1, 2, 3, 4]));
}

#[tokio::test]
async fn test_one_terminal_failure_degrades_partially() {
    let provider = MockImageProvider::new()
        .with_reply(MockReply::Image(TINY_PNG.to_vec()))
        .with_reply(MockReply::Refused("PROHIBITED_CONTENT".to_string()))
        .with_reply(MockReply::Image(TINY_PNG.to_vec()));

    let report = fast_coordinator()
        .collect(request("mock"), 3, Arc::new(provider.clone()))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.is_partial());
    match report.outcomes.iter().find(|o| !o.is_success()).unwrap() {
        GenerationOutcome::Failure { index, kind, .. } => {
            assert_eq!(*index, 2);
            assert_eq!(*kind, ErrorKind::ContentRefused);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // The refusal is not retried.
    assert_eq!(provider.get_call_count(), 3);
}

#[tokio::test]
async fn test_every_index_failing_escalates() {
    let provider = MockImageProvider::new().with_reply(MockReply::NoImage);
    let items: Vec<_> = fast_coordinator()
        .stream(request("mock"), 2, Arc::new(provider))
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    let err = items.into_iter().next().unwrap().unwrap_err();
    assert!(err.is_aggregate_failure());
    assert!(err.to_string().contains("All 2 image generations failed"));
}

#[tokio::test]
async fn test_gemini_rate_limit_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro-image-preview:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Resource exhausted"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-3-pro-image-preview:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "inlineData": {
                    "mimeType": "image/png",
                    "data": base64::engine::general_purpose::STANDARD.encode(TINY_PNG)
                } }] }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = GeminiProvider::new("key".to_string(), reqwest::Client::new())
        .with_base_url(server.uri());
    let report = fast_coordinator()
        .collect(request("gemini-3-pro-image-preview"), 1, Arc::new(provider))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 1);
    let (_, image) = report.images().next().unwrap();
    assert_eq!(image, TINY_PNG);
}

#[tokio::test]
async fn test_openrouter_unauthorized_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::new("bad".to_string(), reqwest::Client::new())
        .with_base_url(server.uri());
    let err = fast_coordinator()
        .collect(request("google/gemini-2.5-flash-image"), 1, Arc::new(provider))
        .await
        .unwrap_err();

    match err {
        Error::AllFailed { failures, .. } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].kind, ErrorKind::Unauthorized);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_outcomes_saved_and_framed_as_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = OutputStore::in_dir(dir.path().to_path_buf(), false);
    let provider = MockImageProvider::new();

    let mut stream = fast_coordinator().stream(request("mock"), 2, Arc::new(provider));
    let mut frames = Vec::new();
    while let Some(item) = stream.next().await {
        let outcome = item.unwrap();
        let saved = match &outcome {
            GenerationOutcome::Success { index, image } => Some(store.save(*index, image).unwrap()),
            GenerationOutcome::Failure { .. } => None,
        };
        frames.push(ImageEvent::from_outcome(&outcome, saved.as_ref()).to_sse_frame().unwrap());
    }
    frames.push(DONE_FRAME.to_string());

    assert_eq!(frames.len(), 3);
    assert!(frames[..2].iter().all(|f| f.contains("\"status\":\"success\"")));
    assert_eq!(frames[2], "data: [DONE]\n\n");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}
