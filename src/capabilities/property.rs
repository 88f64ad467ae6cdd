//! Listing search, details and market statistics

use super::backend::{PropertyCatalog, SearchCriteria};
use super::{parse_input, Capability, CapabilityContext, CapabilityOutput};
use crate::state::MAX_DISPLAYED_RESULTS;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub(crate) fn criteria_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "city": {"type": "string", "description": "Ville, ex. Casablanca"},
            "district": {"type": "string", "description": "Quartier, ex. Maarif"},
            "transaction": {"type": "string", "enum": ["rent", "sale"]},
            "property_type": {"type": "string", "description": "appartement, villa, bureau, terrain..."},
            "min_bedrooms": {"type": "integer", "minimum": 0},
            "max_price": {"type": "integer", "minimum": 0, "description": "Budget maximum en MAD"},
            "min_surface_m2": {"type": "integer", "minimum": 0}
        }
    })
}

/// `search_properties`
pub struct SearchProperties {
    catalog: Arc<dyn PropertyCatalog>,
}

impl SearchProperties {
    pub fn new(catalog: Arc<dyn PropertyCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Capability for SearchProperties {
    fn name(&self) -> &'static str {
        "search_properties"
    }

    fn description(&self) -> String {
        "Search listings (rent or sale) matching the client's criteria. Returns at most 5 listings.".to_string()
    }

    fn input_schema(&self) -> Value {
        criteria_schema()
    }

    async fn run(&self, input: Value, ctx: CapabilityContext) -> CapabilityOutput {
        let criteria: SearchCriteria = match parse_input(input) {
            Ok(c) => c,
            Err(out) => return out,
        };

        // Catalog searches can be slow; an interrupted turn does not wait for one
        let found = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => {
                return CapabilityOutput::error("Search cancelled");
            }
            found = self.catalog.search(&criteria) => found,
        };

        match found {
            Ok(mut results) => {
                results.truncate(MAX_DISPLAYED_RESULTS);
                let mut payload = json!({
                    "count": results.len(),
                    "results": results,
                });
                if payload["count"] == 0 {
                    payload["hint"] = json!(
                        "Aucun bien trouvé. Propose au client de créer une alerte (create_property_alert)."
                    );
                }
                CapabilityOutput::json(&payload)
            }
            Err(e) => CapabilityOutput::error(format!("Search failed: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetailsInput {
    property_id: String,
}

/// `get_property_details`
pub struct GetPropertyDetails {
    catalog: Arc<dyn PropertyCatalog>,
}

impl GetPropertyDetails {
    pub fn new(catalog: Arc<dyn PropertyCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Capability for GetPropertyDetails {
    fn name(&self) -> &'static str {
        "get_property_details"
    }

    fn description(&self) -> String {
        "Full details of one listing, by its internal id (never shown to the client).".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["property_id"],
            "properties": {
                "property_id": {"type": "string", "description": "Identifiant interne (24 caractères hexadécimaux)"}
            }
        })
    }

    async fn run(&self, input: Value, _ctx: CapabilityContext) -> CapabilityOutput {
        let input: DetailsInput = match parse_input(input) {
            Ok(i) => i,
            Err(out) => return out,
        };

        match self.catalog.details(&input.property_id).await {
            Ok(Some(detail)) => CapabilityOutput::json(&json!({"found": true, "property": detail})),
            Ok(None) => CapabilityOutput::json(&json!({
                "found": false,
                "property_id": input.property_id,
            })),
            Err(e) => CapabilityOutput::error(format!("Lookup failed: {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatisticsInput {
    area: String,
}

/// `get_property_statistics`
pub struct GetPropertyStatistics {
    catalog: Arc<dyn PropertyCatalog>,
}

impl GetPropertyStatistics {
    pub fn new(catalog: Arc<dyn PropertyCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Capability for GetPropertyStatistics {
    fn name(&self) -> &'static str {
        "get_property_statistics"
    }

    fn description(&self) -> String {
        "Local market statistics (listing count, average and range of prices) for a city or district.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["area"],
            "properties": {
                "area": {"type": "string", "description": "Ville ou quartier"}
            }
        })
    }

    async fn run(&self, input: Value, _ctx: CapabilityContext) -> CapabilityOutput {
        let input: StatisticsInput = match parse_input(input) {
            Ok(i) => i,
            Err(out) => return out,
        };

        match self.catalog.statistics(&input.area).await {
            Ok(stats) => CapabilityOutput::json(&json!(stats)),
            Err(e) => CapabilityOutput::error(format!("Statistics failed: {e}")),
        }
    }
}
