//! Deep search for an embedded image inside an arbitrary provider response.
//!
//! Traversal is depth-first and priority-ordered: explicit image fields on a
//! mapping are tried before its other values, local decodes before network
//! fetches. Every candidate must pass [`crate::mime::is_valid_image`]; a
//! rejected candidate never aborts the search.

use crate::mime::is_valid_image;
use crate::payload::Payload;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields whose content is metadata, never an image.
const NOISE_KEYS: &[&str] = &[
    "reasoning",
    "reasoning_details",
    "usage",
    "usageMetadata",
    "prompt_tokens_details",
    "completion_tokens_details",
    "annotations",
    "citations",
];

/// Fields handled by the high-confidence pass; skipped by the generic walk.
const PRIORITY_KEYS: &[&str] = &[
    "b64_json",
    "inlineData",
    "inline_data",
    "images",
    "tool_calls",
    "url",
];

/// Strings shorter than this are never treated as bare base64.
const RAW_BASE64_MIN_LEN: usize = 5000;

/// Matches serde_json's own nesting limit, so anything that parsed is searchable.
const MAX_DEPTH: usize = 128;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/[A-Za-z0-9.+-]+;base64,([A-Za-z0-9+/_=-]+)").expect("valid regex")
});

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(\s*([^)\s]+)\s*\)").expect("valid regex"));

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://\S+\.(?:png|jpe?g|webp|gif)(?:\?\S*)?$").expect("valid regex")
});

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decode base64 that may be missing its `=` padding or wrapped across lines.
///
/// Returns `None` for malformed input instead of an error.
pub fn decode_base64_lenient(input: &str) -> Option<Vec<u8>> {
    let mut cleaned: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    let missing = cleaned.len() % 4;
    if missing != 0 {
        cleaned.extend(std::iter::repeat('=').take(4 - missing));
    }

    let engine = if cleaned.contains(|c: char| c == '-' || c == '_') {
        &URL_SAFE_LENIENT
    } else {
        &STANDARD_LENIENT
    };
    match engine.decode(cleaned.as_bytes()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("base64 decode rejected candidate ({}): {}", e, preview(input));
            None
        }
    }
}

/// Decode and keep only buffers with a known image header.
fn decode_image(input: &str) -> Option<Vec<u8>> {
    decode_base64_lenient(input).filter(|bytes| {
        let ok = is_valid_image(bytes);
        if !ok {
            debug!(
                "Decoded candidate failed header check (first bytes: {:02X?})",
                &bytes[..bytes.len().min(8)]
            );
        }
        ok
    })
}

fn preview(s: &str) -> String {
    s.chars().take(80).collect()
}

#[derive(Debug, Clone)]
pub struct PayloadExtractor {
    client: reqwest::Client,
    fetch_timeout: Duration,
}

impl PayloadExtractor {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Returns the first validated image in `payload`, or `None` (not found).
    pub async fn extract(&self, payload: &Payload) -> Option<Vec<u8>> {
        self.search(payload, 0).await
    }

    pub async fn extract_value(&self, value: Value) -> Option<Vec<u8>> {
        self.extract(&Payload::from(value)).await
    }

    fn search<'a>(&'a self, node: &'a Payload, depth: usize) -> BoxFuture<'a, Option<Vec<u8>>> {
        async move {
            if depth > MAX_DEPTH {
                warn!("Deep search: depth limit {} reached, pruning branch", MAX_DEPTH);
                return None;
            }
            match node {
                Payload::Map(fields) => {
                    if let Some(found) = self.search_priority_fields(node, depth).await {
                        return Some(found);
                    }
                    for (key, value) in fields {
                        if NOISE_KEYS.contains(&key.as_str()) {
                            debug!("Deep search: skipping noise field '{}'", key);
                            continue;
                        }
                        if PRIORITY_KEYS.contains(&key.as_str()) {
                            continue;
                        }
                        if let Some(found) = self.search(value, depth + 1).await {
                            return Some(found);
                        }
                    }
                    None
                }
                Payload::Seq(items) => {
                    for item in items {
                        if let Some(found) = self.search(item, depth + 1).await {
                            return Some(found);
                        }
                    }
                    None
                }
                Payload::Str(s) => self.search_str(s, depth).await,
                Payload::Other => None,
            }
        }
        .boxed()
    }

    async fn search_priority_fields(&self, map: &Payload, depth: usize) -> Option<Vec<u8>> {
        if let Some(b64) = map.get("b64_json").and_then(Payload::as_str) {
            debug!("Deep search: found 'b64_json' field");
            if let Some(image) = decode_image(b64) {
                return Some(image);
            }
        }

        for key in ["inlineData", "inline_data"] {
            if let Some(data) = map
                .get(key)
                .and_then(|inline| inline.get("data"))
                .and_then(Payload::as_str)
            {
                debug!("Deep search: found '{}' field", key);
                if let Some(image) = decode_image(data) {
                    return Some(image);
                }
            }
        }

        for key in ["images", "tool_calls"] {
            if let Some(value) = map.get(key).filter(|v| !v.is_empty()) {
                debug!("Deep search: descending into '{}'", key);
                if let Some(image) = self.search(value, depth + 1).await {
                    return Some(image);
                }
            }
        }

        if let Some(url) = map.get("url").and_then(Payload::as_str) {
            if url.starts_with("data:") {
                if let Some(image) = self.search_str(url, depth).await {
                    return Some(image);
                }
            } else if IMAGE_URL.is_match(url.trim()) {
                debug!("Deep search: found image url field: {}", preview(url));
                if let Some(image) = self.fetch_image(url.trim()).await {
                    return Some(image);
                }
            }
        }

        None
    }

    async fn search_str(&self, s: &str, depth: usize) -> Option<Vec<u8>> {
        for caps in DATA_URI.captures_iter(s) {
            debug!("Deep search: found data URI");
            if let Some(image) = decode_image(&caps[1]) {
                return Some(image);
            }
        }

        let trimmed = s.trim();

        // Some gateways return the message body as a serialized JSON document.
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                debug!("Deep search: string holds a JSON document, descending");
                let nested = Payload::from(value);
                if let Some(image) = self.search(&nested, depth + 1).await {
                    return Some(image);
                }
            }
        }

        let links: Vec<String> = MARKDOWN_IMAGE
            .captures_iter(s)
            .map(|caps| caps[1].to_string())
            .filter(|target| target.starts_with("http://") || target.starts_with("https://"))
            .collect();
        for target in links {
            debug!("Deep search: found Markdown image link: {}", preview(&target));
            if let Some(image) = self.fetch_image(&target).await {
                return Some(image);
            }
        }

        if IMAGE_URL.is_match(trimmed) {
            debug!("Deep search: found bare image URL: {}", preview(trimmed));
            if let Some(image) = self.fetch_image(trimmed).await {
                return Some(image);
            }
        }

        if trimmed.len() > RAW_BASE64_MIN_LEN && !trimmed.contains(char::is_whitespace) {
            debug!("Deep search: trying raw base64 candidate (len={})", trimmed.len());
            if let Some(image) = decode_image(trimmed) {
                return Some(image);
            }
        }

        None
    }

    /// Best-effort download; any failure just rejects the candidate.
    async fn fetch_image(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Image download failed for {}: {}", preview(url), e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                "Image download for {} returned status {}",
                preview(url),
                response.status()
            );
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read image body from {}: {}", preview(url), e);
                return None;
            }
        };

        if is_valid_image(&bytes) {
            debug!("Downloaded {} bytes from {}", bytes.len(), preview(url));
            Some(bytes.to_vec())
        } else {
            warn!("Downloaded body from {} is not a recognized image", preview(url));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::TINY_PNG;
    use base64::engine::general_purpose::STANDARD;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46];

    fn extractor() -> PayloadExtractor {
        PayloadExtractor::new(reqwest::Client::new()).with_fetch_timeout(Duration::from_secs(2))
    }

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_decode_restores_missing_padding() {
        assert_eq!(decode_base64_lenient("YWJjZA").unwrap(), b"abcd".to_vec());
        assert_eq!(
            decode_base64_lenient("YWJjZA"),
            decode_base64_lenient("YWJjZA==")
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_base64_lenient("!!!invalid-base64!!!").is_none());
        assert!(decode_base64_lenient("").is_none());
        assert!(decode_base64_lenient("A").is_none());
    }

    #[test]
    fn test_decode_tolerates_line_wrapping_and_url_safe() {
        let encoded = b64(TINY_PNG);
        let wrapped = format!("{}\n{}", &encoded[..20], &encoded[20..]);
        assert_eq!(decode_base64_lenient(&wrapped).unwrap(), TINY_PNG.to_vec());

        let url_safe = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode([0xFB, 0xFF, 0xBF]);
        assert_eq!(decode_base64_lenient(&url_safe).unwrap(), vec![0xFB, 0xFF, 0xBF]);
    }

    #[tokio::test]
    async fn test_finds_b64_json_at_depth() {
        let payload = json!({
            "created": 1,
            "data": [{ "meta": { "items": [{ "b64_json": b64(TINY_PNG) }] } }]
        });
        let found = extractor().extract_value(payload).await.unwrap();
        assert_eq!(found, TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_finds_image_nested_near_parser_limit() {
        let levels = 120;
        let wire = format!(
            "{}{{\"b64_json\":\"{}\"}}{}",
            "{\"wrap\":".repeat(levels),
            b64(TINY_PNG),
            "}".repeat(levels)
        );
        let payload: serde_json::Value = serde_json::from_str(&wire).unwrap();
        let found = extractor().extract_value(payload).await.unwrap();
        assert_eq!(found, TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_finds_gemini_inline_data() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/jpeg", "data": b64(JPEG) } }
                ]}
            }]
        });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), JPEG.to_vec());
    }

    #[tokio::test]
    async fn test_finds_openrouter_images_array() {
        let payload = json!({
            "choices": [{
                "message": {
                    "content": "",
                    "images": [{
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/png;base64,{}", b64(TINY_PNG)) }
                    }]
                }
            }]
        });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_corrupted_magic_number_is_not_found() {
        let mut corrupted = TINY_PNG.to_vec();
        corrupted[0] = 0x00;
        let payload = json!({
            "b64_json": b64(&corrupted),
            "content": format!("data:image/png;base64,{}", b64(&corrupted)),
        });
        assert!(extractor().extract_value(payload).await.is_none());
    }

    #[tokio::test]
    async fn test_structured_field_beats_string_match() {
        let payload = json!({
            "content": format!("data:image/jpeg;base64,{}", b64(JPEG)),
            "b64_json": b64(TINY_PNG),
        });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_noise_fields_are_skipped() {
        let payload = json!({
            "usage": { "detail": format!("data:image/png;base64,{}", b64(TINY_PNG)) },
            "reasoning": format!("data:image/png;base64,{}", b64(TINY_PNG)),
        });
        assert!(extractor().extract_value(payload).await.is_none());
    }

    #[tokio::test]
    async fn test_data_uri_inside_markdown_text() {
        let text = format!(
            "Sure! ![result](data:image/png;base64,{}) Enjoy.",
            b64(TINY_PNG).trim_end_matches('=')
        );
        let payload = json!({ "choices": [{ "message": { "content": text } }] });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_json_document_inside_string() {
        let inner = json!({ "type": "image", "b64_json": b64(TINY_PNG) }).to_string();
        let payload = json!({ "content": inner });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_raw_base64_needs_long_unbroken_string() {
        let mut big = TINY_PNG.to_vec();
        big.extend(std::iter::repeat(0u8).take(4000));
        let encoded = b64(&big);
        assert!(encoded.len() > RAW_BASE64_MIN_LEN);

        let found = extractor()
            .extract_value(json!({ "content": encoded.clone() }))
            .await
            .unwrap();
        assert_eq!(found, big);

        let short = json!({ "content": b64(TINY_PNG) });
        assert!(extractor().extract_value(short).await.is_none());

        let spaced = format!("{} {}", &encoded[..3000], &encoded[3000..]);
        assert!(extractor()
            .extract_value(json!({ "content": spaced }))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_url_field_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out/result.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(TINY_PNG.to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/out/result.png?sig=abc", server.uri());
        let payload = json!({ "data": [{ "url": url }] });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), TINY_PNG.to_vec());
    }

    #[tokio::test]
    async fn test_markdown_link_is_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/cat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(JPEG.to_vec()))
            .mount(&server)
            .await;

        let content = format!("Here is your image:\n\n![cat]({}/files/cat.jpg)", server.uri());
        let payload = json!({ "choices": [{ "message": { "content": content } }] });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), JPEG.to_vec());
    }

    #[tokio::test]
    async fn test_failed_download_falls_through_to_next_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/not-an-image.png"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let payload = json!({
            "first": format!("{}/missing.png", server.uri()),
            "second": format!("{}/not-an-image.png", server.uri()),
            "third": { "b64_json": b64(JPEG) },
        });
        assert_eq!(extractor().extract_value(payload).await.unwrap(), JPEG.to_vec());
    }

    #[tokio::test]
    async fn test_plain_text_is_not_found() {
        let payload = json!({
            "choices": [{ "message": { "content": "I cannot draw that, but here is a poem." } }],
            "usage": { "total_tokens": 12 }
        });
        assert!(extractor().extract_value(payload).await.is_none());
    }
}
