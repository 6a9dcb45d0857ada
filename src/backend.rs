//! Model backends: OpenAI-hosted chat completions and a local Ollama server.
//!
//! Both present the same call contract — send a prompt for a named model,
//! get assistant text back — so the repair loop never cares which one the
//! model selector picked.

use crate::config::Config;
use crate::error::GenError;
use crate::util::truncate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// System prompt sent with every hosted request.
const SYSTEM_PROMPT: &str = "You are a coder for Blender Python programs.";

// Fixed sampling parameters for code generation.
const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 1024;
const TOP_P: f32 = 1.0;

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Model identifiers offered by the model selector, with a short label.
/// Anything not listed here is routed to the local server as-is.
pub const MODEL_CHOICES: &[(&str, &str)] = &[
    ("chatgpt", "OpenAI hosted (model name from config)"),
    ("gemma2", "Gemma 2 via Ollama"),
    ("llama3.2", "Llama 3.2 via Ollama"),
    ("codellama", "Code Llama via Ollama"),
    ("qwen2.5-coder:3b", "Qwen 2.5 Coder via Ollama"),
    ("vanilj/Phi-4", "Phi-4 via Ollama"),
];

/// Capability shared by every backend: send a prompt, return assistant text.
#[allow(async_fn_in_trait)]
pub trait ModelClient {
    async fn invoke(&self, prompt: &str) -> Result<String, GenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Hosted,
    Local,
}

/// Maps model identifiers to backend kinds.
///
/// Selection happens once per submission; the rest of the control flow
/// only ever sees the resolved [`Backend`].
pub struct BackendRegistry {
    routes: HashMap<String, BackendKind>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert("chatgpt".to_string(), BackendKind::Hosted);
        for (id, _) in MODEL_CHOICES.iter().filter(|(id, _)| *id != "chatgpt") {
            routes.insert(id.to_string(), BackendKind::Local);
        }
        Self { routes }
    }
}

impl BackendRegistry {
    /// Resolve a model identifier to a ready-to-call backend.
    ///
    /// Unknown identifiers are assumed to be resolvable by the local
    /// server, so new Ollama models work without touching this table.
    /// Hosted resolution fails with a configuration error when no API key
    /// is available — before any network call is made.
    pub fn resolve(&self, model_id: &str, config: &Config) -> Result<Backend, GenError> {
        let kind = self
            .routes
            .get(model_id)
            .copied()
            .unwrap_or(BackendKind::Local);

        match kind {
            BackendKind::Hosted => {
                let api_key = config.resolve_api_key().ok_or_else(|| {
                    GenError::Config(
                        "OpenAI API key is not configured. Run `scenesmith --setup` or set OPENAI_API_KEY."
                            .to_string(),
                    )
                })?;
                Ok(Backend::OpenAi(OpenAiBackend {
                    api_key,
                    model: config.openai_model.clone(),
                }))
            }
            BackendKind::Local => Ok(Backend::Ollama(OllamaBackend {
                host: ollama_host(),
                model: model_id.to_string(),
            })),
        }
    }
}

/// Read OLLAMA_HOST, warning (non-fatally) when it is unset.
fn ollama_host() -> String {
    match std::env::var("OLLAMA_HOST") {
        Ok(host) if !host.trim().is_empty() => host.trim().trim_end_matches('/').to_string(),
        _ => {
            eprintln!(
                "  Warning: OLLAMA_HOST is not set. If the connection fails, point it at your Ollama server (assuming {}).",
                DEFAULT_OLLAMA_HOST
            );
            DEFAULT_OLLAMA_HOST.to_string()
        }
    }
}

/// A backend selected for one submission.
#[derive(Debug, Clone)]
pub enum Backend {
    /// OpenAI-hosted chat completion. Requires an API key.
    OpenAi(OpenAiBackend),
    /// Locally served Ollama chat model.
    Ollama(OllamaBackend),
}

impl ModelClient for Backend {
    async fn invoke(&self, prompt: &str) -> Result<String, GenError> {
        match self {
            Backend::OpenAi(backend) => backend.invoke(prompt).await,
            Backend::Ollama(backend) => backend.invoke(prompt).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    api_key: String,
    model: String,
}

#[derive(Debug, Clone)]
pub struct OllamaBackend {
    host: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<MessageContent>,
}

fn http_client() -> Result<reqwest::Client, GenError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| GenError::Transport(format!("failed to build HTTP client: {}", e)))
}

impl OpenAiBackend {
    async fn invoke(&self, prompt: &str) -> Result<String, GenError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            top_p: TOP_P,
        };

        let response = http_client()?
            .post(OPENAI_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GenError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let detail = match status.as_u16() {
                401 => "Invalid API key. Run `scenesmith --setup` to update it.".to_string(),
                429 => "Rate limited by OpenAI. Try again in a few minutes.".to_string(),
                500..=599 => format!(
                    "OpenAI server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            return Err(GenError::Transport(detail));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GenError::Transport(format!("failed to parse OpenAI response: {}", e)))?;

        parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| GenError::Transport("response contained no completions".to_string()))
    }
}

impl OllamaBackend {
    async fn invoke(&self, prompt: &str) -> Result<String, GenError> {
        let request = OllamaRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
        };

        let url = format!("{}/api/chat", self.host);
        let response = http_client()?
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenError::Transport(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(GenError::Transport(format!(
                "Ollama error {}: {}",
                status,
                truncate(&text, 200)
            )));
        }

        let parsed: OllamaResponse = serde_json::from_str(&text)
            .map_err(|e| GenError::Transport(format!("failed to parse Ollama response: {}", e)))?;

        // Any shape other than a chat message is a transport failure.
        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| GenError::Transport("Ollama response contained no message".to_string()))
    }
}
