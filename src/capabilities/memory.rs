//! Bundled in-process backends
//!
//! Used by the CLI when no external listing service is wired in, and by
//! tests. The legal knowledge base and the contract/e-mail pipeline live
//! outside this crate, so their stand-ins only log or report no information.

use super::backend::{
    Alert, AlertStore, BackendError, DealNotifier, DealSummary, LegalAnswer, LegalKnowledge,
    MarketStats, NegotiationTerms, PropertyCatalog, PropertyDetail, SearchCriteria,
};
use crate::state::{PropertySummary, MAX_DISPLAYED_RESULTS};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("Cannot read listings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid listings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One listing as stored in the listings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(flatten)]
    pub summary: PropertySummary,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    /// Owner's confidential minimum; defaults to the listing price
    #[serde(default)]
    pub floor_price: Option<u64>,
}

/// Lowercase and strip French diacritics
fn fold(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

fn mentions(haystack: &str, needle: &str) -> bool {
    fold(haystack).contains(&fold(needle))
}

impl Listing {
    fn matches(&self, c: &SearchCriteria) -> bool {
        let p = &self.summary;
        if let Some(city) = &c.city {
            if !mentions(&p.city, city) {
                return false;
            }
        }
        if let Some(district) = &c.district {
            if !p.district.as_deref().is_some_and(|d| mentions(d, district)) {
                return false;
            }
        }
        if c.transaction.is_some_and(|t| t != p.transaction) {
            return false;
        }
        if let Some(kind) = &c.property_type {
            if !p.property_type.as_deref().is_some_and(|k| mentions(k, kind)) {
                return false;
            }
        }
        if let Some(min) = c.min_bedrooms {
            if p.bedrooms.unwrap_or(0) < min {
                return false;
            }
        }
        if c.max_price.is_some_and(|max| p.price > max) {
            return false;
        }
        if let Some(min) = c.min_surface_m2 {
            if p.surface_m2.unwrap_or(0) < min {
                return false;
            }
        }
        true
    }

    fn in_area(&self, area: &str) -> bool {
        mentions(&self.summary.city, area)
            || self
                .summary
                .district
                .as_deref()
                .is_some_and(|d| mentions(d, area))
    }
}

/// Listing catalog held in memory
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    listings: Vec<Listing>,
}

impl InMemoryCatalog {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self { listings }
    }

    /// Load a JSON array of listings
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogLoadError> {
        let raw = std::fs::read_to_string(path)?;
        let listings: Vec<Listing> = serde_json::from_str(&raw)?;
        Ok(Self::new(listings))
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    fn find(&self, property_id: &str) -> Option<&Listing> {
        self.listings
            .iter()
            .find(|l| l.summary.id.eq_ignore_ascii_case(property_id))
    }
}

#[async_trait]
impl PropertyCatalog for InMemoryCatalog {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<PropertySummary>, BackendError> {
        let mut found: Vec<PropertySummary> = self
            .listings
            .iter()
            .filter(|l| l.matches(criteria))
            .map(|l| l.summary.clone())
            .collect();
        found.sort_by_key(|p| p.price);
        found.truncate(MAX_DISPLAYED_RESULTS);
        Ok(found)
    }

    async fn details(&self, property_id: &str) -> Result<Option<PropertyDetail>, BackendError> {
        Ok(self.find(property_id).map(|l| PropertyDetail {
            summary: l.summary.clone(),
            description: l.description.clone(),
            features: l.features.clone(),
        }))
    }

    async fn statistics(&self, area: &str) -> Result<MarketStats, BackendError> {
        let prices: Vec<u64> = self
            .listings
            .iter()
            .filter(|l| l.in_area(area))
            .map(|l| l.summary.price)
            .collect();
        let per_m2: Vec<u64> = self
            .listings
            .iter()
            .filter(|l| l.in_area(area))
            .filter_map(|l| {
                l.summary
                    .surface_m2
                    .filter(|s| *s > 0)
                    .map(|s| l.summary.price / u64::from(s))
            })
            .collect();

        let average = |v: &[u64]| (!v.is_empty()).then(|| v.iter().sum::<u64>() / v.len() as u64);

        Ok(MarketStats {
            area: area.to_string(),
            listing_count: prices.len(),
            average_price: average(&prices),
            min_price: prices.iter().min().copied(),
            max_price: prices.iter().max().copied(),
            average_price_per_m2: average(&per_m2),
        })
    }

    async fn negotiation_terms(
        &self,
        property_id: &str,
    ) -> Result<Option<NegotiationTerms>, BackendError> {
        Ok(self.find(property_id).map(|l| NegotiationTerms {
            property_id: l.summary.id.clone(),
            floor_price: l.floor_price.unwrap_or(l.summary.price),
            listing_price: l.summary.price,
            selling_points: l.features.clone(),
        }))
    }
}

/// Alerts kept per session for the lifetime of the process
#[derive(Debug, Default)]
pub struct InMemoryAlerts {
    alerts: Mutex<HashMap<String, Vec<Alert>>>,
}

impl InMemoryAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer that panicked mid-update leaves the store unusable
    fn store(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Alert>>>, BackendError> {
        self.alerts
            .lock()
            .map_err(|_| BackendError::Unavailable("alert store poisoned".to_string()))
    }
}

#[async_trait]
impl AlertStore for InMemoryAlerts {
    async fn create(&self, session_id: &str, criteria: SearchCriteria) -> Result<Alert, BackendError> {
        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            criteria,
            created_at: Utc::now(),
        };
        self.store()?
            .entry(session_id.to_string())
            .or_default()
            .push(alert.clone());
        Ok(alert)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Alert>, BackendError> {
        Ok(self.store()?.get(session_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, session_id: &str, alert_id: &str) -> Result<bool, BackendError> {
        let mut alerts = self.store()?;
        let Some(mine) = alerts.get_mut(session_id) else {
            return Ok(false);
        };
        let before = mine.len();
        mine.retain(|a| a.id != alert_id);
        Ok(mine.len() != before)
    }
}

/// Logs agreed deals; contract rendering and e-mail are handled elsewhere
#[derive(Debug, Default)]
pub struct LogDealNotifier;

#[async_trait]
impl DealNotifier for LogDealNotifier {
    async fn notify_owner(&self, deal: &DealSummary) -> Result<(), BackendError> {
        tracing::info!(
            property_id = %deal.property_id,
            client = %deal.client_name,
            final_price = deal.final_price,
            "Deal agreed, owner notification queued"
        );
        Ok(())
    }
}

/// Knowledge base stand-in with nothing indexed
#[derive(Debug, Default)]
pub struct UnavailableLegalKnowledge;

#[async_trait]
impl LegalKnowledge for UnavailableLegalKnowledge {
    async fn query(&self, question: &str) -> Result<Option<LegalAnswer>, BackendError> {
        tracing::debug!(question, "No legal knowledge base configured");
        Ok(None)
    }
}
