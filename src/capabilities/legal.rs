//! Legal knowledge retrieval

use super::backend::LegalKnowledge;
use super::{parse_input, Capability, CapabilityContext, CapabilityOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct QueryInput {
    question: String,
}

/// `query_legal_knowledge`
pub struct QueryLegalKnowledge {
    knowledge: Arc<dyn LegalKnowledge>,
}

impl QueryLegalKnowledge {
    pub fn new(knowledge: Arc<dyn LegalKnowledge>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Capability for QueryLegalKnowledge {
    fn name(&self) -> &'static str {
        "query_legal_knowledge"
    }

    fn description(&self) -> String {
        "Search the Moroccan real-estate law knowledge base. Returns an answer with its sources, \
         or no_information."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["question"],
            "properties": {"question": {"type": "string"}}
        })
    }

    async fn run(&self, input: Value, _ctx: CapabilityContext) -> CapabilityOutput {
        let input: QueryInput = match parse_input(input) {
            Ok(i) => i,
            Err(out) => return out,
        };
        if input.question.trim().is_empty() {
            return CapabilityOutput::error("Empty question");
        }

        match self.knowledge.query(&input.question).await {
            Ok(Some(answer)) => CapabilityOutput::json(&json!({
                "found": true,
                "answer": answer.answer,
                "sources": answer.sources,
            })),
            Ok(None) => CapabilityOutput::json(&json!({"found": false, "no_information": true})),
            Err(e) => CapabilityOutput::error(format!("Knowledge base unavailable: {e}")),
        }
    }
}
