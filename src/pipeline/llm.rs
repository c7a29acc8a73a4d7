//! Ollama HTTP client for local LLM inference.
//!
//! Two trait seams: `LlmClient` for text generation (extraction and
//! classification prompts) and `VisionClient` for image-bearing chat
//! (page OCR). `OllamaClient` implements both over blocking reqwest;
//! pipeline runs happen on blocking worker threads.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Cannot reach Ollama at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Ollama returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse Ollama response: {0}")]
    ResponseParsing(String),
}

/// Text generation seam. Implemented by `OllamaClient` in production and
/// `MockLlmClient` in tests.
pub trait LlmClient: Send + Sync {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        temperature: f32,
    ) -> Result<String, LlmError>;

    fn list_models(&self) -> Result<Vec<String>, LlmError>;

    fn is_model_available(&self, model: &str) -> Result<bool, LlmError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(model)))
    }
}

/// Vision chat seam for page OCR.
pub trait VisionClient: Send + Sync {
    /// `images` are base64-encoded PNGs.
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, LlmError>;
}

pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        }
    }

    /// Default Ollama instance at localhost:11434 with 5-minute timeout.
    pub fn default_local() -> Self {
        Self::new(crate::config::DEFAULT_OLLAMA_URL, 300)
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            LlmError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TaggedModel>,
}

#[derive(Deserialize)]
struct TaggedModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            options: GenerateOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

impl VisionClient for OllamaClient {
    fn chat_with_images(
        &self,
        model: &str,
        prompt: &str,
        images: &[String],
        system: Option<&str>,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
                images: None,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
            images: Some(images),
        });

        let body = ChatRequest {
            model,
            messages,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        Ok(parsed.message.content)
    }
}

/// Reasoning backend resolved once at startup. When no model is reachable
/// the pipeline runs far enough to mark the document failed with a
/// human-readable reason instead of panicking mid-run.
pub enum ReasoningService {
    Available {
        client: std::sync::Arc<dyn LlmClient>,
        model: String,
    },
    Unavailable {
        reason: String,
    },
}

impl ReasoningService {
    pub fn is_available(&self) -> bool {
        matches!(self, ReasoningService::Available { .. })
    }
}

/// Mock LLM client for testing — pops queued responses in order,
/// repeating the last one when the queue runs dry.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    available_models: Vec<String>,
    fail: bool,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(response.to_string()),
            available_models: vec![crate::config::DEFAULT_REASONING_MODEL.to_string()],
            fail: false,
        }
    }

    /// Queue distinct responses for successive `generate` calls.
    pub fn with_responses(responses: Vec<&str>) -> Self {
        let mut queue: VecDeque<String> = responses.iter().map(|s| s.to_string()).collect();
        let last = queue.back().cloned().unwrap_or_default();
        // Keep the last response as the fallback once the queue drains
        if queue.len() == 1 {
            queue.pop_front();
        }
        Self {
            responses: Mutex::new(queue),
            last: Mutex::new(last),
            available_models: vec![crate::config::DEFAULT_REASONING_MODEL.to_string()],
            fail: false,
        }
    }

    /// Every call fails with a connection error.
    pub fn failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            last: Mutex::new(String::new()),
            available_models: vec![],
            fail: true,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }
}

impl LlmClient for MockLlmClient {
    fn generate(
        &self,
        _model: &str,
        _prompt: &str,
        _system: &str,
        _temperature: f32,
    ) -> Result<String, LlmError> {
        if self.fail {
            return Err(LlmError::Connection("mock".into()));
        }
        let mut queue = self.responses.lock().expect("mock lock");
        match queue.pop_front() {
            Some(next) => {
                *self.last.lock().expect("mock lock") = next.clone();
                Ok(next)
            }
            None => Ok(self.last.lock().expect("mock lock").clone()),
        }
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if self.fail {
            return Err(LlmError::Connection("mock".into()));
        }
        Ok(self.available_models.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_client_returns_configured_response() {
        let client = MockLlmClient::new("test response");
        let result = client.generate("model", "prompt", "system", 0.0).unwrap();
        assert_eq!(result, "test response");
    }

    #[test]
    fn mock_client_pops_queued_responses_in_order() {
        let client = MockLlmClient::with_responses(vec!["first", "second"]);
        assert_eq!(client.generate("m", "p", "s", 0.0).unwrap(), "first");
        assert_eq!(client.generate("m", "p", "s", 0.0).unwrap(), "second");
        // Queue drained — repeats the last response
        assert_eq!(client.generate("m", "p", "s", 0.0).unwrap(), "second");
    }

    #[test]
    fn mock_failing_client_errors() {
        let client = MockLlmClient::failing();
        assert!(client.generate("m", "p", "s", 0.0).is_err());
        assert!(client.list_models().is_err());
    }

    #[test]
    fn mock_client_model_availability() {
        let client = MockLlmClient::new("").with_models(vec!["qwen2.5:14b".into()]);
        assert!(client.is_model_available("qwen2.5").unwrap());
        assert!(!client.is_model_available("medgemma").unwrap());
    }

    #[test]
    fn ollama_client_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", 60);
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local();
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.timeout_secs, 300);
    }

    #[test]
    fn reasoning_service_availability() {
        let available = ReasoningService::Available {
            client: std::sync::Arc::new(MockLlmClient::new("ok")),
            model: "qwen2.5:14b".into(),
        };
        assert!(available.is_available());

        let unavailable = ReasoningService::Unavailable {
            reason: "Ollama not reachable".into(),
        };
        assert!(!unavailable.is_available());
    }
}
