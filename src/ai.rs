use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::ModelRequest;

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError>;
    fn name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rate limited: {message}")]
    RateLimited { provider: String, message: String },

    #[error("{provider} quota exceeded: {message}")]
    QuotaExceeded { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} sent an unusable response: {message}")]
    Malformed { provider: String, message: String },
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded { .. })
    }

    fn malformed(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Malformed {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Map a non-success HTTP status and body to a provider error.
pub fn classify_status(provider: &str, status: u16, body: &str) -> ProviderError {
    let lowered = body.to_lowercase();
    let provider = provider.to_string();
    let message = crate::models::prefix(body.trim(), 300).to_string();

    if status == 402 || (status == 429 && lowered.contains("insufficient_quota")) {
        ProviderError::QuotaExceeded { provider, message }
    } else if status == 429 || lowered.contains("rate_limit") || lowered.contains("rate limit") {
        ProviderError::RateLimited { provider, message }
    } else {
        ProviderError::Http {
            provider,
            status,
            body: message,
        }
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn send_json<T: Serialize>(
    provider: &str,
    builder: reqwest::blocking::RequestBuilder,
    body: &T,
) -> Result<String, ProviderError> {
    let response = builder.json(body).send().map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    let text = response.text().map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(classify_status(provider, status.as_u16(), &text));
    }
    Ok(text)
}

fn non_empty(provider: &str, text: Option<String>) -> Result<String, ProviderError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(ProviderError::malformed(provider, "empty completion")),
    }
}

// --- OpenAI-compatible chat completions (Groq, OpenRouter, Together) ---

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const TOGETHER_API_URL: &str = "https://api.together.xyz/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug)]
pub struct ChatCompletionsProvider {
    name: &'static str,
    url: &'static str,
    api_key: String,
    model_id: String,
    supports_json_mode: bool,
    client: reqwest::blocking::Client,
}

impl ChatCompletionsProvider {
    fn new(
        name: &'static str,
        url: &'static str,
        api_key: &str,
        model_id: &str,
        supports_json_mode: bool,
    ) -> Result<Self> {
        Ok(Self {
            name,
            url,
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            supports_json_mode,
            client: http_client(Duration::from_secs(30))?,
        })
    }

    pub fn groq(api_key: &str, model_id: &str) -> Result<Self> {
        Self::new("groq", GROQ_API_URL, api_key, model_id, true)
    }

    pub fn openrouter(api_key: &str, model_id: &str) -> Result<Self> {
        Self::new("openrouter", OPENROUTER_API_URL, api_key, model_id, false)
    }

    pub fn together(api_key: &str, model_id: &str) -> Result<Self> {
        Self::new("together", TOGETHER_API_URL, api_key, model_id, false)
    }

    fn build_request(&self, request: &ModelRequest) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        ChatRequest {
            model: self.model_id.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: (request.json_output && self.supports_json_mode).then_some(ResponseFormat {
                format_type: "json_object",
            }),
        }
    }
}

impl AIProvider for ChatCompletionsProvider {
    fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let body = self.build_request(request);
        let builder = self
            .client
            .post(self.url)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let text = send_json(self.name, builder, &body)?;

        let api_response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(self.name, e.to_string()))?;
        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content);
        non_empty(self.name, content)
    }

    fn name(&self) -> &str {
        self.name
    }
}

// --- Gemini provider ---

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1/models";

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model_id: &str) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            client: http_client(Duration::from_secs(30))?,
        })
    }

    fn build_request(request: &ModelRequest) -> GeminiRequest {
        // The v1 endpoint has no system role; fold it into the prompt.
        let text = match &request.system {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };
        GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                top_p: 0.95,
                top_k: 40,
            },
        }
    }
}

impl AIProvider for GeminiProvider {
    fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model_id);
        let builder = self.client.post(url).query(&[("key", self.api_key.as_str())]);
        let text = send_json("gemini", builder, &Self::build_request(request))?;

        let api_response: GeminiResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::malformed("gemini", e.to_string()))?;
        let content = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text);
        non_empty("gemini", content)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// --- Hugging Face inference provider ---

const HUGGINGFACE_API_BASE: &str = "https://router.huggingface.co/models";

#[derive(Debug, Serialize)]
struct HuggingFaceParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Serialize)]
struct HuggingFaceRequest {
    inputs: String,
    parameters: HuggingFaceParameters,
}

#[derive(Debug, Deserialize)]
struct HuggingFaceGeneration {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HuggingFaceResponse {
    Batch(Vec<HuggingFaceGeneration>),
    Single(HuggingFaceGeneration),
}

impl HuggingFaceResponse {
    fn into_text(self) -> Option<String> {
        match self {
            HuggingFaceResponse::Batch(items) => items.into_iter().next().map(|g| g.generated_text),
            HuggingFaceResponse::Single(item) => Some(item.generated_text),
        }
    }
}

#[derive(Debug)]
pub struct HuggingFaceProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl HuggingFaceProvider {
    pub fn new(api_key: &str, model_id: &str) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            client: http_client(Duration::from_secs(60))?,
        })
    }
}

impl AIProvider for HuggingFaceProvider {
    fn complete(&self, request: &ModelRequest) -> Result<String, ProviderError> {
        let inputs = match &request.system {
            Some(system) => format!("{system}\n\n{}", request.prompt),
            None => request.prompt.clone(),
        };
        let body = HuggingFaceRequest {
            inputs,
            parameters: HuggingFaceParameters {
                temperature: request.temperature,
                max_new_tokens: request.max_tokens,
                return_full_text: false,
            },
        };
        let builder = self
            .client
            .post(format!("{HUGGINGFACE_API_BASE}/{}", self.model_id))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let text = send_json("huggingface", builder, &body)?;

        let api_response: HuggingFaceResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed("huggingface", e.to_string()))?;
        non_empty("huggingface", api_response.into_text())
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

// --- Reply parsing ---

static JSON_OBJECT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?s)\{.*\}").expect("static regex"));

/// Drop Markdown code fences a model wrapped around its answer.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// The span from the first `{` to the last `}` of a model reply.
pub fn extract_json_object(text: &str) -> Option<String> {
    let cleaned = strip_code_fences(text);
    JSON_OBJECT.find(&cleaned).map(|m| m.as_str().to_string())
}

pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T> {
    let object = extract_json_object(text).ok_or_else(|| anyhow!("no JSON object in model reply"))?;
    serde_json::from_str(&object).context("Failed to parse model reply as JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Intent;

    #[test]
    fn test_classify_status_quota() {
        assert!(classify_status("groq", 402, "payment required").is_quota());
        assert!(classify_status("openrouter", 429, r#"{"error":{"code":"insufficient_quota"}}"#).is_quota());
    }

    #[test]
    fn test_classify_status_rate_limit() {
        assert!(classify_status("groq", 429, "slow down").is_rate_limit());
        assert!(classify_status("groq", 400, r#"{"error":{"code":"rate_limit_exceeded"}}"#).is_rate_limit());
        assert!(classify_status("gemini", 503, "Rate limit reached for model").is_rate_limit());
    }

    #[test]
    fn test_classify_status_other() {
        let err = classify_status("gemini", 500, "internal");
        assert!(matches!(err, ProviderError::Http { status: 500, .. }));
        assert!(!err.is_rate_limit());
        assert!(!err.is_quota());
        assert_eq!(err.to_string(), "gemini returned HTTP 500: internal");
    }

    #[test]
    fn test_extract_json_object_from_fenced_reply() {
        let reply = "Sure! Here it is:\n```json\n{\"score\": 80, \"reason\": \"Good {fit}\"}\n```\nThanks";
        assert_eq!(
            extract_json_object(reply).as_deref(),
            Some("{\"score\": 80, \"reason\": \"Good {fit}\"}")
        );
        assert_eq!(extract_json_object("no braces here"), None);
    }

    #[test]
    fn test_parse_reply_into_struct() {
        #[derive(Deserialize)]
        struct Verdict {
            status: String,
        }
        let verdict: Verdict = parse_reply("```{\"status\": \"PASS\", \"feedback\": \"\"}```").unwrap();
        assert_eq!(verdict.status, "PASS");
        assert!(parse_reply::<Verdict>("PASS").is_err());
    }

    #[test]
    fn test_json_mode_only_sent_to_groq() {
        let request = ModelRequest::new(Intent::Rank, "score this")
            .system("Output valid JSON only.")
            .temperature(0.1)
            .json_output();

        let groq = ChatCompletionsProvider::groq("key", "llama-3.3-70b-versatile").unwrap();
        let body = serde_json::to_value(groq.build_request(&request)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "score this");

        let together = ChatCompletionsProvider::together("key", "m").unwrap();
        let body = serde_json::to_value(together.build_request(&request)).unwrap();
        assert!(body.get("response_format").is_none());
        assert_eq!(together.name(), "together");
    }

    #[test]
    fn test_gemini_request_shape() {
        let request = ModelRequest::new(Intent::Draft, "Write a letter").temperature(0.7);
        let body = serde_json::to_value(GeminiProvider::build_request(&request)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Write a letter");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1000);
        assert_eq!(body["generationConfig"]["topK"], 40);
    }

    #[test]
    fn test_huggingface_response_shapes() {
        let batch: HuggingFaceResponse = serde_json::from_str(r#"[{"generated_text": "hello"}]"#).unwrap();
        assert_eq!(batch.into_text().as_deref(), Some("hello"));
        let single: HuggingFaceResponse = serde_json::from_str(r#"{"generated_text": "hi"}"#).unwrap();
        assert_eq!(single.into_text().as_deref(), Some("hi"));
    }
}
