use crate::{Error, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

/// Image models routinely take a minute or more to answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Thin REST wrapper shared by all adapters.
///
/// Owns the provider's base URL and request timeout and maps non-2xx
/// responses onto [`Error::Api`]. Authentication headers differ per vendor
/// and are attached by the adapter on the returned [`RequestBuilder`].
#[derive(Debug, Clone)]
pub struct ProviderHttpClient {
    provider: &'static str,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ProviderHttpClient {
    pub fn new(provider: &'static str, client: Client, base_url: impl Into<String>) -> Self {
        let mut http = Self {
            provider,
            client,
            base_url: String::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        http.set_base_url(base_url);
        http
    }

    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// POST builder for `{base_url}{path}` with the request timeout applied.
    pub fn post(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.post(url).timeout(self.timeout)
    }

    /// Send and fail on any non-success status. The body is left unread.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            tracing::error!("Failed to send request to {}: {}", self.provider, e);
            e
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await?;
            tracing::error!(
                "{} API error (status {}): {}",
                self.provider,
                status,
                error_text
            );
            return Err(Error::Api {
                provider: self.provider,
                status: status.as_u16(),
                body: readable_error_body(&error_text),
            });
        }

        Ok(response)
    }

    /// Send and decode the body as JSON.
    ///
    /// A 2xx body that is not valid JSON is reported as
    /// [`Error::GarbledPayload`], which the classifier treats as transient.
    pub async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.send(request).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                "Failed to parse {} response: {}\nBody: {}",
                self.provider,
                e,
                preview(&body)
            );
            Error::GarbledPayload(format!("{} returned unparseable JSON: {}", self.provider, e))
        })
    }
}

/// Prefer `error.message` from a JSON error envelope, else the raw text.
fn readable_error_body(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| {
            let error = value.get("error")?;
            let message = error.get("message").and_then(Value::as_str)?;
            let code = error
                .get("code")
                .map(|code| match code {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .filter(|code| !code.is_empty() && code != "null");
            Some(match code {
                Some(code) => format!("{} ({})", message, code),
                None => message.to_string(),
            })
        })
        .unwrap_or_else(|| text.to_string())
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
