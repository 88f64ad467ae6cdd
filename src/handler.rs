//! Task handlers
//!
//! A handler is data: an instruction template, the capability set it may
//! invoke, a temperature and an optional reply post-processor. The loop
//! driving any handler lives in [`runner`] and is identical for all four.

pub mod policy;
pub mod prompts;
mod runner;

#[cfg(test)]
mod proptests;

pub use policy::PostProcessor;
pub use runner::{HandlerLoop, LoopError, LoopStatus, FALLBACK_REPLY};

use crate::capabilities::{CapabilityRegistry, CapabilitySet};
use crate::llm::ToolDefinition;
use crate::state::ConversationState;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Intrinsic capability recording a delegation for the router
pub const HAND_OFF: &str = "hand_off";

/// The four handler identifiers; also the router's label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerKind {
    #[serde(rename = "SEARCH_AGENT")]
    Search,
    #[serde(rename = "NEGOTIATION_AGENT")]
    Negotiation,
    #[serde(rename = "JURIDIQUE_ADVISOR")]
    Legal,
    #[serde(rename = "GENERAL_CHAT")]
    GeneralChat,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Search,
        HandlerKind::Negotiation,
        HandlerKind::Legal,
        HandlerKind::GeneralChat,
    ];

    pub fn label(self) -> &'static str {
        match self {
            HandlerKind::Search => "SEARCH_AGENT",
            HandlerKind::Negotiation => "NEGOTIATION_AGENT",
            HandlerKind::Legal => "JURIDIQUE_ADVISOR",
            HandlerKind::GeneralChat => "GENERAL_CHAT",
        }
    }

    /// Exact label match; anything else is not a handler
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    pub fn labels() -> Vec<&'static str> {
        Self::ALL.iter().map(|k| k.label()).collect()
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Static configuration of one handler
#[derive(Debug)]
pub struct HandlerProfile {
    pub kind: HandlerKind,
    pub instructions: fn(&ConversationState) -> String,
    pub temperature: f32,
    /// Offered the `hand_off` intrinsic
    pub delegates: bool,
    pub post_processor: Option<PostProcessor>,
}

static PROFILES: [HandlerProfile; 4] = [
    HandlerProfile {
        kind: HandlerKind::Search,
        instructions: prompts::search,
        temperature: 0.3,
        delegates: true,
        post_processor: Some(PostProcessor::CaptureSearchResults),
    },
    HandlerProfile {
        kind: HandlerKind::Negotiation,
        instructions: prompts::negotiation,
        temperature: 0.4,
        delegates: true,
        post_processor: Some(PostProcessor::RedactFloorPrice),
    },
    HandlerProfile {
        kind: HandlerKind::Legal,
        instructions: prompts::legal,
        temperature: 0.2,
        delegates: false,
        post_processor: None,
    },
    HandlerProfile {
        kind: HandlerKind::GeneralChat,
        instructions: prompts::general_chat,
        temperature: 0.5,
        delegates: false,
        post_processor: None,
    },
];

impl HandlerProfile {
    pub fn of(kind: HandlerKind) -> &'static HandlerProfile {
        match kind {
            HandlerKind::Search => &PROFILES[0],
            HandlerKind::Negotiation => &PROFILES[1],
            HandlerKind::Legal => &PROFILES[2],
            HandlerKind::GeneralChat => &PROFILES[3],
        }
    }
}

fn hand_off_definition() -> ToolDefinition {
    ToolDefinition {
        name: HAND_OFF.to_string(),
        description: "Redirect a sub-question outside your domain (legal, general) to the right \
                      advisor. It will be answered on the client's next message."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "required": ["question"],
            "properties": {
                "question": {"type": "string", "description": "La question à transmettre"}
            }
        }),
    }
}

/// A profile bound to its declared capabilities
#[derive(Debug, Clone)]
pub struct Handler {
    profile: &'static HandlerProfile,
    capabilities: CapabilitySet,
}

impl Handler {
    pub fn new(kind: HandlerKind, registry: &CapabilityRegistry) -> Self {
        Self {
            profile: HandlerProfile::of(kind),
            capabilities: registry.for_handler(kind),
        }
    }

    pub fn kind(&self) -> HandlerKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &'static HandlerProfile {
        self.profile
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Instructions rendered against the current state
    pub fn instructions(&self, state: &ConversationState) -> String {
        (self.profile.instructions)(state)
    }

    /// Everything the generation service may request from this handler
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.capabilities.definitions();
        if self.profile.delegates {
            defs.push(hand_off_definition());
        }
        defs
    }

    pub fn may_request(&self, name: &str) -> bool {
        (self.profile.delegates && name == HAND_OFF) || self.capabilities.contains(name)
    }
}
