//! Standing search alerts

use super::backend::{AlertStore, SearchCriteria};
use super::property::criteria_schema;
use super::{parse_input, Capability, CapabilityContext, CapabilityOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// `create_property_alert`
pub struct CreatePropertyAlert {
    store: Arc<dyn AlertStore>,
}

impl CreatePropertyAlert {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for CreatePropertyAlert {
    fn name(&self) -> &'static str {
        "create_property_alert"
    }

    fn description(&self) -> String {
        "Create a standing alert for the given criteria. Only call after the client confirmed they want one.".to_string()
    }

    fn input_schema(&self) -> Value {
        criteria_schema()
    }

    async fn run(&self, input: Value, ctx: CapabilityContext) -> CapabilityOutput {
        let criteria: SearchCriteria = match parse_input(input) {
            Ok(c) => c,
            Err(out) => return out,
        };
        if criteria.is_empty() {
            return CapabilityOutput::error("An alert needs at least one criterion");
        }

        match self.store.create(&ctx.session_id, criteria).await {
            Ok(alert) => {
                tracing::info!(alert_id = %alert.id, session = %ctx.session_id, "Alert created");
                CapabilityOutput::json(&json!({"created": true, "alert": alert}))
            }
            Err(e) => CapabilityOutput::error(format!("Alert creation failed: {e}")),
        }
    }
}

/// `list_my_alerts`
pub struct ListMyAlerts {
    store: Arc<dyn AlertStore>,
}

impl ListMyAlerts {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for ListMyAlerts {
    fn name(&self) -> &'static str {
        "list_my_alerts"
    }

    fn description(&self) -> String {
        "List the client's standing alerts.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn run(&self, _input: Value, ctx: CapabilityContext) -> CapabilityOutput {
        match self.store.list(&ctx.session_id).await {
            Ok(alerts) => CapabilityOutput::json(&json!({"count": alerts.len(), "alerts": alerts})),
            Err(e) => CapabilityOutput::error(format!("Listing alerts failed: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteInput {
    alert_id: String,
}

/// `delete_my_alert`
pub struct DeleteMyAlert {
    store: Arc<dyn AlertStore>,
}

impl DeleteMyAlert {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Capability for DeleteMyAlert {
    fn name(&self) -> &'static str {
        "delete_my_alert"
    }

    fn description(&self) -> String {
        "Delete one of the client's alerts by id.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["alert_id"],
            "properties": {"alert_id": {"type": "string"}}
        })
    }

    async fn run(&self, input: Value, ctx: CapabilityContext) -> CapabilityOutput {
        let input: DeleteInput = match parse_input(input) {
            Ok(i) => i,
            Err(out) => return out,
        };

        match self.store.delete(&ctx.session_id, &input.alert_id).await {
            Ok(true) => CapabilityOutput::json(&json!({"deleted": true})),
            Ok(false) => CapabilityOutput::error(format!("No alert with id {}", input.alert_id)),
            Err(e) => CapabilityOutput::error(format!("Alert deletion failed: {e}")),
        }
    }
}
