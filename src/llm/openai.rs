//! `OpenAI` chat-completions provider implementation

use super::types::{LlmMessage, LlmRequest, LlmResponse, TokenUsage, ToolCall};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `OpenAI` chat models used by the agency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIModel {
    GPT4o,
    GPT4oMini,
}

impl OpenAIModel {
    pub fn model_id(self) -> &'static str {
        match self {
            OpenAIModel::GPT4o => "gpt-4o",
            OpenAIModel::GPT4oMini => "gpt-4o-mini",
        }
    }

    pub fn all() -> &'static [OpenAIModel] {
        &[OpenAIModel::GPT4o, OpenAIModel::GPT4oMini]
    }
}

pub struct OpenAIService {
    client: Client,
    api_key: String,
    model: OpenAIModel,
    endpoint: String,
}

impl OpenAIService {
    pub fn new(api_key: String, model: OpenAIModel, gateway: Option<&str>) -> Result<Self, LlmError> {
        let endpoint = match gateway {
            Some(gw) => format!("{}/openai/v1/chat/completions", gw.trim_end_matches('/')),
            None => "https://api.openai.com/v1/chat/completions".to_string(),
        };

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Network(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            endpoint,
        })
    }

    fn chat_request(&self, request: &LlmRequest) -> ChatRequest {
        let mut messages = vec![ChatMessage::text("system", &request.instructions)];
        messages.extend(request.messages.iter().map(ChatMessage::from));

        let tools = request
            .tools
            .iter()
            .map(|t| ChatTool {
                r#type: "function",
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect();

        let tool_choice = request.forced_tool.as_ref().map(|name| {
            serde_json::json!({
                "type": "function",
                "function": { "name": name }
            })
        });

        ChatRequest {
            model: self.model.model_id(),
            messages,
            tools,
            tool_choice,
            temperature: request.temperature,
        }
    }

    fn into_response(resp: ChatResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("completion without choices".to_string()))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter(|tc| !tc.function.name.is_empty())
            .map(|tc| ToolCall {
                // Unparseable arguments reach the capability as a string and fail its schema
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
                id: tc.id,
                name: tc.function.name,
            })
            .collect();

        Ok(LlmResponse {
            text: choice.message.content.filter(|t| !t.trim().is_empty()),
            calls,
            usage: TokenUsage {
                prompt: u64::from(resp.usage.prompt_tokens),
                completion: u64::from(resp.usage.completion_tokens),
            },
        })
    }

    fn classify_error(status: StatusCode, body: &str) -> LlmError {
        let message = serde_json::from_str::<ChatErrorBody>(body)
            .map_or_else(|_| body.to_string(), |b| b.error.message);
        match status.as_u16() {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::rate_limited(message),
            400 | 404 | 413 | 422 => LlmError::InvalidRequest(message),
            code @ 500..=599 => LlmError::unavailable(code, message),
            _ => LlmError::Malformed(format!("HTTP {status}: {message}")),
        }
    }

    /// Delay requested by a `Retry-After` header given in seconds
    fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get(reqwest::header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.chat_request(request))
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = Self::retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(format!("body interrupted: {e}")))?;

        if !status.is_success() {
            let err = Self::classify_error(status, &body);
            return Err(match retry_after {
                Some(delay) => err.with_retry_after(delay),
                None => err,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::Malformed(format!("{e}: {body}")))?;
        Self::into_response(parsed)
    }

    fn model_id(&self) -> &str {
        self.model.model_id()
    }
}

// Wire format

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: &'static str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

impl From<&LlmMessage> for ChatMessage {
    fn from(msg: &LlmMessage) -> Self {
        match msg {
            LlmMessage::User(text) => ChatMessage::text("user", text),
            LlmMessage::Assistant { text, calls } => ChatMessage {
                role: "assistant".to_string(),
                content: text.clone(),
                tool_calls: (!calls.is_empty()).then(|| {
                    calls
                        .iter()
                        .map(|c| ChatToolCall {
                            id: c.id.clone(),
                            r#type: "function".to_string(),
                            function: ChatFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.to_string(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
            },
            LlmMessage::ToolResult {
                call_id,
                content,
                is_error,
            } => ChatMessage {
                role: "tool".to_string(),
                content: Some(if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                }),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatTool {
    r#type: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    id: String,
    r#type: String,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatErrorBody {
    error: ChatErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}
