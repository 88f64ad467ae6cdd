//! External capabilities handlers may invoke
//!
//! Capabilities are stateless: backends are injected at construction and
//! all per-call context comes through `CapabilityContext`. Each external
//! capability is declared by exactly one handler.

pub mod backend;
mod alerts;
mod legal;
pub mod memory;
mod negotiation;
mod property;

pub use alerts::{CreatePropertyAlert, DeleteMyAlert, ListMyAlerts};
pub use backend::Backends;
pub use legal::QueryLegalKnowledge;
pub use negotiation::{GetNegotiationDetails, NotifyOwnerOfDeal};
pub use property::{GetPropertyDetails, GetPropertyStatistics, SearchProperties};

use crate::handler::HandlerKind;
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result of a capability execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOutput {
    pub success: bool,
    pub output: String,
}

impl CapabilityOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Serialize a JSON payload as a successful output
    pub fn json(value: &Value) -> Self {
        Self::success(value.to_string())
    }
}

/// Per-invocation context
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    /// Caller-initiated cancellation
    pub cancel: CancellationToken,
    /// Session the turn belongs to (alerts are scoped by it)
    pub session_id: String,
}

impl CapabilityContext {
    pub fn new(cancel: CancellationToken, session_id: impl Into<String>) -> Self {
        Self {
            cancel,
            session_id: session_id.into(),
        }
    }
}

/// A typed external operation a handler may request
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;

    /// Description for the generation service
    fn description(&self) -> String;

    /// JSON schema of the input
    fn input_schema(&self) -> Value;

    /// Execute the capability. Failures are reported through the output.
    async fn run(&self, input: Value, ctx: CapabilityContext) -> CapabilityOutput;
}

/// Deserialize a capability input, producing an error output on mismatch
pub(crate) fn parse_input<T: DeserializeOwned>(input: Value) -> Result<T, CapabilityOutput> {
    serde_json::from_value(input).map_err(|e| CapabilityOutput::error(format!("Invalid input: {e}")))
}

/// Capabilities declared by one handler
#[derive(Clone, Default)]
pub struct CapabilitySet {
    capabilities: Vec<Arc<dyn Capability>>,
}

impl CapabilitySet {
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name() == name)
    }

    /// Definitions offered to the generation service
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.capabilities
            .iter()
            .map(|c| ToolDefinition {
                name: c.name().to_string(),
                description: c.description(),
                input_schema: c.input_schema(),
            })
            .collect()
    }

    /// Execute a capability by name; `None` if it is not declared here
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: CapabilityContext,
    ) -> Option<CapabilityOutput> {
        let capability = self.capabilities.iter().find(|c| c.name() == name)?;
        Some(capability.run(input, ctx).await)
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Capability {name} already declared by {owner}")]
    DuplicateCapability { name: String, owner: HandlerKind },
}

/// Which handler may invoke which capability
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    sets: HashMap<HandlerKind, CapabilitySet>,
    owners: HashMap<&'static str, HandlerKind>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard declarations: search, negotiation and legal capabilities.
    /// General chat declares none.
    pub fn standard(backends: &Backends) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        registry.declare(
            HandlerKind::Search,
            Arc::new(SearchProperties::new(backends.catalog.clone())),
        )?;
        registry.declare(
            HandlerKind::Search,
            Arc::new(GetPropertyStatistics::new(backends.catalog.clone())),
        )?;
        registry.declare(
            HandlerKind::Search,
            Arc::new(GetPropertyDetails::new(backends.catalog.clone())),
        )?;
        registry.declare(
            HandlerKind::Search,
            Arc::new(CreatePropertyAlert::new(backends.alerts.clone())),
        )?;
        registry.declare(
            HandlerKind::Search,
            Arc::new(ListMyAlerts::new(backends.alerts.clone())),
        )?;
        registry.declare(
            HandlerKind::Search,
            Arc::new(DeleteMyAlert::new(backends.alerts.clone())),
        )?;

        registry.declare(
            HandlerKind::Negotiation,
            Arc::new(GetNegotiationDetails::new(backends.catalog.clone())),
        )?;
        registry.declare(
            HandlerKind::Negotiation,
            Arc::new(NotifyOwnerOfDeal::new(backends.notifier.clone())),
        )?;

        registry.declare(
            HandlerKind::Legal,
            Arc::new(QueryLegalKnowledge::new(backends.legal.clone())),
        )?;

        Ok(registry)
    }

    /// Declare a capability for a handler
    pub fn declare(
        &mut self,
        handler: HandlerKind,
        capability: Arc<dyn Capability>,
    ) -> Result<(), RegistryError> {
        let name = capability.name();
        if let Some(owner) = self.owner_of(name) {
            return Err(RegistryError::DuplicateCapability {
                name: name.to_string(),
                owner,
            });
        }
        self.owners.insert(name, handler);
        self.sets
            .entry(handler)
            .or_default()
            .capabilities
            .push(capability);
        Ok(())
    }

    /// Capabilities a handler may invoke (empty when none declared)
    pub fn for_handler(&self, handler: HandlerKind) -> CapabilitySet {
        self.sets.get(&handler).cloned().unwrap_or_default()
    }

    pub fn owner_of(&self, name: &str) -> Option<HandlerKind> {
        self.owners.get(name).copied()
    }
}
