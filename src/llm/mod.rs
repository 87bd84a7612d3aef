//! LLM access: tool-calling detection and plain completion.
//!
//! Speaks the OpenAI-compatible chat-completions format. The engine only
//! ever needs two operations, one tool-call round with `tool_choice: auto`
//! and one system+user completion, both behind a trait so tests can swap in
//! a scripted client.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Definition of a tool exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call returned by the model. Arguments are kept as the raw JSON
/// string the model produced; parsing is the caller's concern.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: String,
}

/// Outcome of one tool-call round: a tool call, a plain assistant message,
/// both, or neither.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub tool_call: Option<ToolInvocation>,
    pub message: Option<String>,
}

/// LLM client operations the engine depends on.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One tool-call round with `tool_choice: auto`.
    async fn chat_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<ChatOutcome>;

    /// One system+user completion, no tools.
    async fn complete(&self, system: &str, user: &str, model: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    base_url: String,
    api_key: String,
    max_tokens: u32,
    http: reqwest::Client,
}

// -- Wire request/response types --------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolPayload<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ToolPayload<'a> {
    r#type: &'a str,
    function: FunctionPayload<'a>,
}

#[derive(Debug, Serialize)]
struct FunctionPayload<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPayload>,
}

#[derive(Debug, Deserialize)]
struct ToolCallPayload {
    function: FunctionCallPayload,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPayload {
    name: String,
    arguments: String,
}

impl OpenAiChatClient {
    /// Create a new client with a per-request timeout.
    pub fn new(base_url: &str, api_key: &str, max_tokens: u32, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_tokens,
            http,
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ResponseMessage> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!("LLM request to model: {}", request.model);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("LLM request failed ({}): {}", status, body);
        }

        let body: ChatResponse = resp.json().await.context("Failed to parse LLM response")?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .unwrap_or(Choice {
                message: ResponseMessage {
                    content: None,
                    tool_calls: Vec::new(),
                },
            });
        Ok(choice.message)
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn chat_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<ChatOutcome> {
        let tool_payloads: Option<Vec<ToolPayload>> = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| ToolPayload {
                        r#type: "function",
                        function: FunctionPayload {
                            name: &t.name,
                            description: &t.description,
                            parameters: &t.parameters,
                        },
                    })
                    .collect(),
            )
        };

        let request = ChatRequest {
            model,
            messages: vec![MessagePayload {
                role: "user",
                content: prompt,
            }],
            tool_choice: tool_payloads.as_ref().map(|_| "auto"),
            tools: tool_payloads,
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };

        let message = self.send(&request).await?;
        let tool_call = message.tool_calls.into_iter().next().map(|tc| ToolInvocation {
            name: tc.function.name,
            arguments: tc.function.arguments,
        });

        Ok(ChatOutcome {
            tool_call,
            message: message.content,
        })
    }

    async fn complete(&self, system: &str, user: &str, model: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![
                MessagePayload {
                    role: "system",
                    content: system,
                },
                MessagePayload {
                    role: "user",
                    content: user,
                },
            ],
            tools: None,
            tool_choice: None,
            max_tokens: self.max_tokens,
            temperature: 0.7,
        };

        let message = self.send(&request).await?;
        message
            .content
            .filter(|c| !c.trim().is_empty())
            .context("LLM completion returned no content")
    }
}

// ---------------------------------------------------------------------------
// Scripted client for tests and examples
// ---------------------------------------------------------------------------

/// Scripted LLM client: returns queued outcomes in order.
#[derive(Default)]
pub struct MockLlmClient {
    outcomes: std::sync::Mutex<std::collections::VecDeque<ChatOutcome>>,
    completions: std::sync::Mutex<std::collections::VecDeque<Result<String, String>>>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn push_outcome(&self, outcome: ChatOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_completion(&self, text: &str) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
    }

    pub fn push_completion_error(&self, message: &str) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_with_tools(
        &self,
        prompt: &str,
        _tools: &[ToolDefinition],
        _model: &str,
    ) -> Result<ChatOutcome> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => Ok(outcome),
            None => bail!("mock LLM has no scripted outcome"),
        }
    }

    async fn complete(&self, _system: &str, user: &str, _model: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        match self.completions.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => bail!("{}", message),
            None => bail!("mock LLM has no scripted completion"),
        }
    }
}
