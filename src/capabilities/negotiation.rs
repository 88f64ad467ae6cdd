//! Owner-side negotiation terms and deal notification

use super::backend::{DealNotifier, DealSummary, PropertyCatalog};
use super::{parse_input, Capability, CapabilityContext, CapabilityOutput};
use crate::handler::policy::evaluate_offer;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct TermsInput {
    property_id: String,
    #[serde(default)]
    offer: Option<u64>,
}

/// `get_property_negotiation_details`
///
/// Returns the confidential floor price alongside the listing price. When the
/// client's offer is supplied, the policy decision is computed here so the
/// negotiator never does the arithmetic itself.
pub struct GetNegotiationDetails {
    catalog: Arc<dyn PropertyCatalog>,
}

impl GetNegotiationDetails {
    pub fn new(catalog: Arc<dyn PropertyCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Capability for GetNegotiationDetails {
    fn name(&self) -> &'static str {
        "get_property_negotiation_details"
    }

    fn description(&self) -> String {
        "Confidential negotiation terms of a listing (floor price, listing price, selling points). \
         Pass the client's offer in MAD to get the decision to apply."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["property_id"],
            "properties": {
                "property_id": {"type": "string", "description": "Identifiant interne (24 caractères hexadécimaux)"},
                "offer": {"type": "integer", "minimum": 0, "description": "Offre du client en MAD"}
            }
        })
    }

    async fn run(&self, input: Value, _ctx: CapabilityContext) -> CapabilityOutput {
        let input: TermsInput = match parse_input(input) {
            Ok(i) => i,
            Err(out) => return out,
        };

        match self.catalog.negotiation_terms(&input.property_id).await {
            Ok(Some(terms)) => {
                let mut payload = json!({"found": true, "terms": terms});
                if let Some(offer) = input.offer {
                    let decision = evaluate_offer(offer, terms.floor_price, terms.listing_price);
                    payload["offer_assessment"] = json!(decision);
                }
                CapabilityOutput::json(&payload)
            }
            Ok(None) => CapabilityOutput::json(&json!({
                "found": false,
                "property_id": input.property_id,
            })),
            Err(e) => CapabilityOutput::error(format!("Lookup failed: {e}")),
        }
    }
}

/// `notify_owner_of_deal`
///
/// Fire-and-forget: a failure is reported once, never retried.
pub struct NotifyOwnerOfDeal {
    notifier: Arc<dyn DealNotifier>,
}

impl NotifyOwnerOfDeal {
    pub fn new(notifier: Arc<dyn DealNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Capability for NotifyOwnerOfDeal {
    fn name(&self) -> &'static str {
        "notify_owner_of_deal"
    }

    fn description(&self) -> String {
        "Notify the owner that a deal was agreed. Requires the client's name and phone number.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["property_id", "client_name", "client_phone", "final_price", "summary"],
            "properties": {
                "property_id": {"type": "string"},
                "client_name": {"type": "string"},
                "client_phone": {"type": "string"},
                "final_price": {"type": "integer", "minimum": 0},
                "summary": {"type": "string", "description": "Résumé de l'accord"}
            }
        })
    }

    async fn run(&self, input: Value, _ctx: CapabilityContext) -> CapabilityOutput {
        let deal: DealSummary = match parse_input(input) {
            Ok(d) => d,
            Err(out) => return out,
        };

        match self.notifier.notify_owner(&deal).await {
            Ok(()) => CapabilityOutput::json(&json!({"notified": true})),
            Err(e) => {
                tracing::warn!(property_id = %deal.property_id, error = %e, "Owner notification failed");
                CapabilityOutput::error(format!("Notification failed: {e}"))
            }
        }
    }
}
