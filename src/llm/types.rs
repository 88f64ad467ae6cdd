//! Provider-neutral completion vocabulary
//!
//! Mirrors the three message shapes a conversation transcript holds: what
//! the client said, what the assistant said or requested, and what a
//! requested function returned.

use serde_json::Value;

/// A function the model may call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A function call emitted by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmMessage {
    User(String),
    Assistant {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub instructions: String,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolDefinition>,
    /// The model must call this tool instead of answering in text
    pub forced_tool: Option<String>,
    pub temperature: f32,
}

impl LlmRequest {
    /// Free choice between answering and calling any of `tools`
    pub fn open(
        instructions: impl Into<String>,
        messages: Vec<LlmMessage>,
        tools: Vec<ToolDefinition>,
        temperature: f32,
    ) -> Self {
        Self {
            instructions: instructions.into(),
            messages,
            tools,
            forced_tool: None,
            temperature,
        }
    }

    /// Exactly one call to `tool`, as structured output
    pub fn forced(
        instructions: impl Into<String>,
        messages: Vec<LlmMessage>,
        tool: ToolDefinition,
        temperature: f32,
    ) -> Self {
        Self {
            forced_tool: Some(tool.name.clone()),
            ..Self::open(instructions, messages, vec![tool], temperature)
        }
    }
}

/// Token counts reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Non-blank text, if the model wrote any
    pub text: Option<String>,
    pub calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

#[cfg(test)]
impl LlmResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: (!text.trim().is_empty()).then_some(text),
            ..Self::default()
        }
    }

    pub fn with_call(mut self, id: &str, name: &str, arguments: Value) -> Self {
        self.calls.push(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        });
        self
    }
}
