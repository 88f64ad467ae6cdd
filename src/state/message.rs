//! Transcript messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    CapabilityResult,
}

/// A capability invocation requested by an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    /// Correlation id, echoed by the matching capability result
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CapabilityRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One transcript entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_requests: Vec<CapabilityRequest>,
    /// Set on capability results only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Name of the capability that produced a result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// User message injected by the router from a pending delegation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub synthetic: bool,
}

impl Message {
    fn base(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            capability_requests: Vec::new(),
            correlation_id: None,
            capability: None,
            is_error: false,
            synthetic: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, Some(text.into()))
    }

    pub fn synthetic_user(text: impl Into<String>) -> Self {
        Self {
            synthetic: true,
            ..Self::user(text)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, Some(text.into()))
    }

    /// Assistant message carrying capability requests; empty text becomes null
    pub fn assistant_with_requests(text: Option<String>, requests: Vec<CapabilityRequest>) -> Self {
        let content = text.filter(|t| !t.trim().is_empty());
        Self {
            capability_requests: requests,
            ..Self::base(Role::Assistant, content)
        }
    }

    pub fn capability_result(
        request: &CapabilityRequest,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            correlation_id: Some(request.id.clone()),
            capability: Some(request.name.clone()),
            is_error,
            ..Self::base(Role::CapabilityResult, Some(output.into()))
        }
    }

    /// Non-empty text content
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// Assistant message with text and no pending requests
    pub fn is_final_answer(&self) -> bool {
        self.role == Role::Assistant && self.capability_requests.is_empty() && self.text().is_some()
    }
}
