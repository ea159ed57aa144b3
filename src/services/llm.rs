use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Non-success HTTP answer from a provider.
#[derive(Debug, thiserror::Error)]
#[error("{provider} API error ({status}): {body}")]
pub struct ApiStatusError {
    pub provider: &'static str,
    pub status: reqwest::StatusCode,
    pub body: String,
}

impl ApiStatusError {
    /// Server errors, timeouts and rate limits may pass; other 4xx answers will not.
    pub fn is_transient(&self) -> bool {
        self.status.is_server_error()
            || self.status == reqwest::StatusCode::REQUEST_TIMEOUT
            || self.status == reqwest::StatusCode::TOO_MANY_REQUESTS
    }
}

/// Stateless text completion: one user message in, the generated text out.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "openrouter", "openai", "gemini" or "ollama"
    #[serde(default)]
    pub model: Option<String>,
    /// Total attempts per request, the first one included.
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub openrouter: Option<ApiKeyConfig>,
    pub openai: Option<OpenAIConfig>,
    pub gemini: Option<ApiKeyConfig>,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApiKeyConfig {
    pub api_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
}

fn default_provider() -> String {
    "openrouter".to_string()
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    2
}
fn default_timeout() -> u64 {
    120
}
fn default_ollama_url() -> String {
    OLLAMA_BASE_URL.to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            retry_count: default_retry_count(),
            retry_delay_seconds: default_retry_delay(),
            timeout_seconds: default_timeout(),
            openrouter: None,
            openai: None,
            gemini: None,
            ollama: None,
        }
    }
}

impl LlmConfig {
    /// Configured model, or the provider's default.
    pub fn model_name(&self) -> String {
        if let Some(model) = self.model.as_deref().filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        match self.provider.as_str() {
            "openai" => "gpt-4o-mini",
            "gemini" => "gemini-2.0-flash",
            "ollama" => "llama3.1",
            _ => "mistralai/devstral-small:free",
        }
        .to_string()
    }

    pub fn api_key(&self) -> Option<&str> {
        let key = match self.provider.as_str() {
            "openrouter" => self.openrouter.as_ref().map(|c| c.api_key.as_str()),
            "openai" => self.openai.as_ref().map(|c| c.api_key.as_str()),
            "gemini" => self.gemini.as_ref().map(|c| c.api_key.as_str()),
            _ => None,
        };
        key.filter(|k| !k.trim().is_empty())
    }

    pub fn set_api_key(&mut self, api_key: String) {
        match self.provider.as_str() {
            "openrouter" => self.openrouter = Some(ApiKeyConfig { api_key }),
            "openai" => self.openai.get_or_insert_with(Default::default).api_key = api_key,
            "gemini" => self.gemini = Some(ApiKeyConfig { api_key }),
            _ => {}
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.provider != "ollama"
    }
}

/// Builds the configured provider client, wrapped in the retry policy.
pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .context("Failed to build HTTP client")?;

    let inner: Box<dyn LlmClient> = match config.provider.as_str() {
        "openrouter" => {
            let key = config.api_key().context("OpenRouter API key missing")?;
            Box::new(OpenAIClient::new(http, key, OPENROUTER_BASE_URL))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            let key = config.api_key().context("OpenAI API key missing")?;
            let base_url = cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Box::new(OpenAIClient::new(http, key, base_url))
        }
        "gemini" => {
            let key = config.api_key().context("Gemini API key missing")?;
            Box::new(GeminiClient::new(http, key, GEMINI_BASE_URL))
        }
        "ollama" => {
            let base_url = config
                .ollama
                .as_ref()
                .map_or(OLLAMA_BASE_URL, |c| c.base_url.as_str());
            Box::new(OllamaClient::new(http, base_url))
        }
        _ => return Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    };

    Ok(Box::new(RetryingClient::new(
        inner,
        config.retry_count,
        Duration::from_secs(config.retry_delay_seconds),
    )))
}

// --- Retry ---

/// Retries every failure of the wrapped client with a fixed pause between attempts.
#[derive(Debug)]
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    attempts: usize,
    delay: Duration,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, attempts: usize, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let mut last_error = anyhow!("Unknown error");

        for attempt in 0..self.attempts {
            if attempt > 0 {
                warn!(
                    "Completion failed (attempt {}/{}), retrying in {:?}...",
                    attempt, self.attempts, self.delay
                );
                tokio::time::sleep(self.delay).await;
            }

            match self.inner.complete(model, prompt).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Completion error: {:#}", e);
                    let permanent = e
                        .downcast_ref::<ApiStatusError>()
                        .is_some_and(|status| !status.is_transient());
                    if permanent {
                        return Err(e.context("Completion rejected, not retrying"));
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error.context(format!("Completion still failing after {} attempts", self.attempts)))
    }
}

// --- OpenAI-compatible (OpenRouter, OpenAI) ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(client: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    error: Option<OpenAIError>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: String,
}

impl OpenAIResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("API returned error: {}", err.message));
        }
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("Response empty or missing content"))
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model,
            messages: vec![OpenAIMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await?;
            return Err(ApiStatusError { provider: "OpenAI-compatible", status, body }.into());
        }

        let response_text = resp.text().await?;
        debug!("completion response: {} bytes", response_text.len());
        let result: OpenAIResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse completion response. Body: {}", response_text))?;
        result.into_text()
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(client: reqwest::Client, api_key: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))?;

        if let Some(part) = first.content.and_then(|c| c.parts.into_iter().next()) {
            return Ok(part.text);
        }

        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        Err(anyhow!("Gemini response empty. Finish reason: {}", reason))
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![GeminiPart { text: prompt }],
            }],
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await?;
            return Err(ApiStatusError { provider: "Gemini", status, body }.into());
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse Gemini response. Body: {}", response_text))?;
        result.into_text()
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model,
            messages: vec![OpenAIMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await?;
            return Err(ApiStatusError { provider: "Ollama", status, body }.into());
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct FlakyClient {
        failures_left: Arc<Mutex<usize>>,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok("listo".to_string())
        }
    }

    fn flaky(failures: usize) -> (FlakyClient, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let client = FlakyClient {
            failures_left: Arc::new(Mutex::new(failures)),
            calls: calls.clone(),
        };
        (client, calls)
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let (client, calls) = flaky(2);
        let retrying = RetryingClient::new(Box::new(client), 3, Duration::ZERO);

        let text = retrying.complete("m", "p").await.unwrap();
        assert_eq!(text, "listo");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let (client, calls) = flaky(10);
        let retrying = RetryingClient::new(Box::new(client), 3, Duration::ZERO);

        let err = retrying.complete("m", "p").await.unwrap_err();
        assert_eq!(*calls.lock().unwrap(), 3);
        let message = format!("{:#}", err);
        assert!(message.contains("after 3 attempts"));
        assert!(message.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let (client, _calls) = flaky(2);
        let retrying = RetryingClient::new(Box::new(client), 3, Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        retrying.complete("m", "p").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[derive(Debug)]
    struct StatusClient {
        status: reqwest::StatusCode,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for StatusClient {
        async fn complete(&self, _model: &str, _prompt: &str) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Err(ApiStatusError {
                provider: "OpenAI-compatible",
                status: self.status,
                body: "{}".to_string(),
            }
            .into())
        }
    }

    async fn attempts_for(status: reqwest::StatusCode) -> usize {
        let calls = Arc::new(Mutex::new(0));
        let client = StatusClient {
            status,
            calls: calls.clone(),
        };
        let retrying = RetryingClient::new(Box::new(client), 3, Duration::ZERO);
        assert!(retrying.complete("m", "p").await.is_err());
        let count = *calls.lock().unwrap();
        count
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        assert_eq!(attempts_for(reqwest::StatusCode::UNAUTHORIZED).await, 1);
        assert_eq!(attempts_for(reqwest::StatusCode::BAD_REQUEST).await, 1);
    }

    #[tokio::test]
    async fn test_transient_statuses_are_retried() {
        assert_eq!(attempts_for(reqwest::StatusCode::TOO_MANY_REQUESTS).await, 3);
        assert_eq!(attempts_for(reqwest::StatusCode::REQUEST_TIMEOUT).await, 3);
        assert_eq!(attempts_for(reqwest::StatusCode::BAD_GATEWAY).await, 3);
    }

    #[test]
    fn test_model_name_defaults() {
        let mut config = LlmConfig::default();
        assert_eq!(config.model_name(), "mistralai/devstral-small:free");

        config.provider = "gemini".to_string();
        assert_eq!(config.model_name(), "gemini-2.0-flash");

        config.model = Some("gemini-2.5-pro".to_string());
        assert_eq!(config.model_name(), "gemini-2.5-pro");
    }

    #[test]
    fn test_create_llm_requires_key() {
        let config = LlmConfig::default();
        let err = create_llm(&config).unwrap_err();
        assert!(err.to_string().contains("OpenRouter API key missing"));

        let mut config = LlmConfig::default();
        config.set_api_key("sk-or-test".to_string());
        assert!(create_llm(&config).is_ok());
    }

    #[test]
    fn test_create_llm_unknown_provider() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm(&config).is_err());
    }

    #[test]
    fn test_request_is_single_user_message() {
        let body = OpenAIRequest {
            model: "mistralai/devstral-small:free",
            messages: vec![OpenAIMessage {
                role: "user",
                content: "Hola",
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "mistralai/devstral-small:free",
                "messages": [{"role": "user", "content": "Hola"}]
            })
        );
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "gen-123",
            "model": "mistralai/devstral-small:free",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "{\"synthesis\": \"...\"}"
                },
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.into_text().unwrap(), "{\"synthesis\": \"...\"}");
    }

    #[test]
    fn test_openai_response_error_body() {
        let json = r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#;
        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        let err = result.into_text().unwrap_err();
        assert!(err.to_string().contains("Rate limit exceeded"));
    }

    #[test]
    fn test_openai_response_empty_choices() {
        let result: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(result.into_text().is_err());
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.into_text().unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_response_parsing_success() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Hola mundo" }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.into_text().unwrap(), "Hola mundo");
    }
}
