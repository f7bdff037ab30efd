use super::{ChatRequest, Completion, ProviderBackend, ProviderError};
use async_trait::async_trait;
use reqwest::StatusCode;

/// OpenAI-compatible API backend.
///
/// Works with Cerebras, OpenRouter, Gemini's OpenAI endpoint, Ollama, Groq and
/// any other provider that implements `POST {base}/chat/completions`.
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleBackend {
    http: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    /// Creates a backend with a fresh HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    fn build_body(request: &ChatRequest<'_>) -> serde_json::Value {
        serde_json::json!({
            "model": request.provider.model,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_prompt},
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }

    fn add_provider_headers(
        request: &ChatRequest<'_>,
        builder: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        let mut builder = builder.header("Content-Type", "application/json");
        if let Some(key) = request.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        for (name, value) in &request.provider.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

fn classify_send_error(err: &reqwest::Error, request: &ChatRequest<'_>) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Transient(format!("Timeout ({}ms)", request.timeout.as_millis()))
    } else if err.is_connect() {
        ProviderError::Transient(format!("Connection error: {err}"))
    } else {
        ProviderError::Transient(format!("Request error: {err}"))
    }
}

fn classify_status(status: StatusCode) -> Option<ProviderError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(ProviderError::Transient("Rate limited (429)".into()))
    } else if status.is_server_error() {
        Some(ProviderError::Transient(format!(
            "Server error ({})",
            status.as_u16()
        )))
    } else if !status.is_success() {
        Some(ProviderError::Rejected(format!(
            "HTTP error ({})",
            status.as_u16()
        )))
    } else {
        None
    }
}

/// Extracts the first choice's text and the usage block.
pub(crate) fn parse_completion(body: &serde_json::Value) -> Completion {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .trim()
        .to_string();
    let usage = &body["usage"];
    let count = |field: &str| {
        usage[field]
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
    };
    Completion {
        content,
        tokens_in: count("prompt_tokens"),
        tokens_out: count("completion_tokens"),
    }
}

#[async_trait]
impl ProviderBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<Completion, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            request.provider.base_url.trim_end_matches('/')
        );
        let builder = self.http.post(&url).timeout(request.timeout);
        let resp = Self::add_provider_headers(request, builder)
            .json(&Self::build_body(request))
            .send()
            .await
            .map_err(|e| classify_send_error(&e, request))?;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Rejected(format!("Invalid response body: {e}")))?;

        Ok(parse_completion(&body))
    }
}
