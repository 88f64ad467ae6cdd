//! Generation and classification service
//!
//! The core's view of the natural-language service: a handler asks for the
//! next step given its instructions, the transcript and its allowed
//! capabilities; the router asks for one label out of a fixed set.
//! `LlmGeneration` implements both on top of an [`LlmService`].

use crate::handler::HandlerKind;
use crate::llm::{
    LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService, ToolCall, ToolDefinition,
};
use crate::state::{CapabilityRequest, Message, Role};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Attempts per generation call, retries included
const MAX_ATTEMPTS: u32 = 3;

/// Forced function used for structured classification output
const ROUTE_FUNCTION: &str = "route";

/// One handler decision request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub handler: HandlerKind,
    pub instructions: String,
    pub transcript: Vec<Message>,
    /// Only these capabilities may be requested
    pub capabilities: Vec<ToolDefinition>,
    pub temperature: f32,
}

/// One routing classification request
#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub instructions: String,
    pub transcript: Vec<Message>,
    pub labels: Vec<String>,
    pub temperature: f32,
}

/// What the generation service decided
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    /// Final natural-language answer
    Answer(String),
    /// One or more capability requests, with optional accompanying text
    Requests {
        text: Option<String>,
        requests: Vec<CapabilityRequest>,
    },
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError>;

    /// Returns the raw label. Callers validate it against the label set.
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, LlmError>;
}

/// [`GenerationService`] backed by a completion provider
pub struct LlmGeneration {
    llm: Arc<dyn LlmService>,
    backoff_base: Duration,
}

impl LlmGeneration {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self {
            llm,
            backoff_base: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlmService;

    fn request(transcript: Vec<Message>) -> GenerationRequest {
        GenerationRequest {
            handler: HandlerKind::Search,
            instructions: "Tu es ImmoFinder.".to_string(),
            transcript,
            capabilities: vec![],
            temperature: 0.3,
        }
    }

    #[test]
    fn test_transcript_maps_one_to_one() {
        let a = CapabilityRequest::new("c1", "search_properties", json!({}));
        let b = CapabilityRequest::new("c2", "get_property_statistics", json!({"area": "Rabat"}));
        let transcript = vec![
            Message::user("Cherche"),
            Message::assistant_with_requests(Some("Je regarde".to_string()), vec![a.clone(), b.clone()]),
            Message::capability_result(&a, "[]", false),
            Message::capability_result(&b, "boom", true),
        ];

        let msgs = to_llm_messages(&transcript);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], LlmMessage::User("Cherche".to_string()));
        match &msgs[1] {
            LlmMessage::Assistant { text, calls } => {
                assert_eq!(text.as_deref(), Some("Je regarde"));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].arguments["area"], "Rabat");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            msgs[3],
            LlmMessage::ToolResult {
                call_id: "c2".to_string(),
                content: "boom".to_string(),
                is_error: true,
            }
        );
    }

    #[tokio::test]
    async fn test_generate_answer_and_requests() {
        let llm = Arc::new(MockLlmService::new("mock"));
        llm.queue_response(LlmResponse::answer("Bonjour !"));
        llm.queue_response(
            LlmResponse::answer("  ").with_call("call_1", "search_properties", json!({"city": "Rabat"})),
        );
        let generation = LlmGeneration::new(llm.clone());

        let first = generation.generate(&request(vec![Message::user("Salut")])).await.unwrap();
        assert_eq!(first, Generation::Answer("Bonjour !".to_string()));

        let second = generation.generate(&request(vec![Message::user("Rabat")])).await.unwrap();
        match second {
            Generation::Requests { text, requests } => {
                assert!(text.is_none());
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].id, "call_1");
                assert_eq!(requests[0].arguments["city"], "Rabat");
            }
            other => panic!("unexpected {other:?}"),
        }

        let recorded = llm.recorded_requests();
        assert!((recorded[0].temperature - 0.3).abs() < f32::EPSILON);
        assert!(recorded[0].forced_tool.is_none());
    }

    #[tokio::test]
    async fn test_classify_forces_route_function() {
        let llm = Arc::new(MockLlmService::new("mock"));
        llm.queue_response(LlmResponse::default().with_call(
            "call_r",
            "route",
            json!({"next": "SEARCH_AGENT"}),
        ));
        let generation = LlmGeneration::new(llm.clone());

        let label = generation
            .classify(&ClassificationRequest {
                instructions: "Route".to_string(),
                transcript: vec![Message::user("Je cherche un appartement")],
                labels: vec!["SEARCH_AGENT".to_string(), "GENERAL_CHAT".to_string()],
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(label, "SEARCH_AGENT");

        let sent = &llm.recorded_requests()[0];
        assert_eq!(sent.forced_tool.as_deref(), Some("route"));
        assert_eq!(sent.tools.len(), 1);
        assert_eq!(sent.tools[0].input_schema["properties"]["next"]["enum"][1], "GENERAL_CHAT");
    }

    #[tokio::test]
    async fn test_classify_falls_back_to_text() {
        let llm = Arc::new(MockLlmService::new("mock"));
        llm.queue_response(LlmResponse::answer(" LEGAL \n"));
        let generation = LlmGeneration::new(llm);
        let label = generation
            .classify(&ClassificationRequest {
                instructions: String::new(),
                transcript: vec![],
                labels: vec![],
                temperature: 0.0,
            })
            .await
            .unwrap();
        assert_eq!(label, "LEGAL");
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried() {
        let llm = Arc::new(MockLlmService::new("mock"));
        llm.queue_error(LlmError::unavailable(502, "bad gateway"));
        llm.queue_error(LlmError::rate_limited("slow down"));
        llm.queue_response(LlmResponse::answer("ok"));
        let generation = LlmGeneration::new(llm.clone()).with_backoff_base(Duration::from_millis(1));

        let out = generation.generate(&request(vec![])).await.unwrap();
        assert_eq!(out, Generation::Answer("ok".to_string()));
        assert_eq!(llm.recorded_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_auth_is_not_retried() {
        let llm = Arc::new(MockLlmService::new("mock"));
        for _ in 0..4 {
            llm.queue_error(LlmError::Network("reset".to_string()));
        }
        let generation = LlmGeneration::new(llm.clone()).with_backoff_base(Duration::from_millis(1));
        assert!(generation.generate(&request(vec![])).await.is_err());
        assert_eq!(llm.recorded_requests().len(), 3);

        let llm = Arc::new(MockLlmService::new("mock"));
        llm.queue_error(LlmError::Auth("bad key".to_string()));
        let generation = LlmGeneration::new(llm.clone()).with_backoff_base(Duration::from_millis(1));
        assert!(generation.generate(&request(vec![])).await.is_err());
        assert_eq!(llm.recorded_requests().len(), 1);
    }
}
