//! Contracts of the external systems behind the capabilities

use crate::state::{PropertySummary, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Search filters; also the payload of a standing alert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub transaction: Option<Transaction>,
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub min_bedrooms: Option<u32>,
    #[serde(default)]
    pub max_price: Option<u64>,
    #[serde(default)]
    pub min_surface_m2: Option<u32>,
}

impl SearchCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDetail {
    #[serde(flatten)]
    pub summary: PropertySummary,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStats {
    pub area: String,
    pub listing_count: usize,
    pub average_price: Option<u64>,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub average_price_per_m2: Option<u64>,
}

/// Owner-side negotiation terms. `floor_price` is confidential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationTerms {
    pub property_id: String,
    pub floor_price: u64,
    pub listing_price: u64,
    pub selling_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub criteria: SearchCriteria,
    pub created_at: DateTime<Utc>,
}

/// Agreed deal forwarded to the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSummary {
    pub property_id: String,
    pub client_name: String,
    pub client_phone: String,
    pub final_price: u64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Listing database
#[async_trait]
pub trait PropertyCatalog: Send + Sync {
    /// Matching listings, at most the server-defined cap
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<PropertySummary>, BackendError>;

    async fn details(&self, property_id: &str) -> Result<Option<PropertyDetail>, BackendError>;

    async fn statistics(&self, area: &str) -> Result<MarketStats, BackendError>;

    async fn negotiation_terms(
        &self,
        property_id: &str,
    ) -> Result<Option<NegotiationTerms>, BackendError>;
}

/// Standing search alerts, scoped by session
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create(&self, session_id: &str, criteria: SearchCriteria) -> Result<Alert, BackendError>;

    async fn list(&self, session_id: &str) -> Result<Vec<Alert>, BackendError>;

    /// Returns false when no such alert exists for the session
    async fn delete(&self, session_id: &str, alert_id: &str) -> Result<bool, BackendError>;
}

/// Contract rendering and owner e-mail, fire-and-forget
#[async_trait]
pub trait DealNotifier: Send + Sync {
    async fn notify_owner(&self, deal: &DealSummary) -> Result<(), BackendError>;
}

/// Retrieval-backed legal knowledge base
#[async_trait]
pub trait LegalKnowledge: Send + Sync {
    /// `None` when the knowledge base has nothing on the question
    async fn query(&self, question: &str) -> Result<Option<LegalAnswer>, BackendError>;
}

/// The backends injected into the standard capabilities
#[derive(Clone)]
pub struct Backends {
    pub catalog: Arc<dyn PropertyCatalog>,
    pub alerts: Arc<dyn AlertStore>,
    pub notifier: Arc<dyn DealNotifier>,
    pub legal: Arc<dyn LegalKnowledge>,
}
