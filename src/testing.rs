//! Mock implementations for testing
//!
//! Scripted generation and provider services, plus capability backends
//! that record what they were asked to do.

use crate::capabilities::backend::{
    BackendError, Backends, DealNotifier, DealSummary, LegalAnswer, LegalKnowledge, MarketStats,
    NegotiationTerms, PropertyCatalog, PropertyDetail, SearchCriteria,
};
use crate::capabilities::memory::{InMemoryAlerts, InMemoryCatalog, Listing};
use crate::capabilities::CapabilityContext;
use crate::generation::{ClassificationRequest, Generation, GenerationRequest, GenerationService};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::state::{CapabilityRequest, PropertySummary, Transaction};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Generation Service
// ============================================================================

/// Generation service returning queued decisions and labels
#[derive(Default)]
pub struct MockGeneration {
    generations: Mutex<VecDeque<Result<Generation, LlmError>>>,
    labels: Mutex<VecDeque<Result<String, LlmError>>>,
    /// Record of all generation requests made
    pub generation_requests: Mutex<Vec<GenerationRequest>>,
    /// Record of all classification requests made
    pub classification_requests: Mutex<Vec<ClassificationRequest>>,
}

impl MockGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_answer(&self, text: &str) {
        self.generations
            .lock()
            .unwrap()
            .push_back(Ok(Generation::Answer(text.to_string())));
    }

    /// Queue one response requesting `(id, capability, arguments)` triples
    pub fn queue_requests(&self, requests: Vec<(&str, &str, Value)>) {
        self.push_requests(None, requests);
    }

    pub fn queue_requests_with_text(&self, text: &str, requests: Vec<(&str, &str, Value)>) {
        self.push_requests(Some(text.to_string()), requests);
    }

    fn push_requests(&self, text: Option<String>, requests: Vec<(&str, &str, Value)>) {
        let requests = requests
            .into_iter()
            .map(|(id, name, args)| CapabilityRequest::new(id, name, args))
            .collect();
        self.generations
            .lock()
            .unwrap()
            .push_back(Ok(Generation::Requests { text, requests }));
    }

    pub fn queue_generation_error(&self, error: LlmError) {
        self.generations.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_label(&self, label: &str) {
        self.labels.lock().unwrap().push_back(Ok(label.to_string()));
    }

    pub fn queue_classification_error(&self, error: LlmError) {
        self.labels.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_generations(&self) -> Vec<GenerationRequest> {
        self.generation_requests.lock().unwrap().clone()
    }

    pub fn recorded_classifications(&self) -> Vec<ClassificationRequest> {
        self.classification_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, LlmError> {
        self.generation_requests.lock().unwrap().push(request.clone());
        self.generations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("No mock generation queued".to_string())))
    }

    async fn classify(&self, request: &ClassificationRequest) -> Result<String, LlmError> {
        self.classification_requests
            .lock()
            .unwrap()
            .push(request.clone());
        self.labels
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("No mock label queued".to_string())))
    }
}

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Provider returning queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Network("No mock response queued".to_string())))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Capability backends
// ============================================================================

/// Listing `n`: hex id of `n`, two bedrooms, floor at 90% of the price
pub fn listing(n: u64, city: &str, price: u64) -> Listing {
    Listing {
        summary: PropertySummary {
            id: format!("{n:024x}"),
            title: format!("Appartement {n}"),
            city: city.to_string(),
            district: Some("Centre".to_string()),
            transaction: Transaction::Rent,
            property_type: Some("appartement".to_string()),
            price,
            bedrooms: Some(2),
            surface_m2: Some(80),
        },
        description: Some("Lumineux, proche tramway".to_string()),
        features: vec!["Ascenseur".to_string(), "Parking".to_string()],
        floor_price: Some(price * 9 / 10),
    }
}

pub fn test_ctx() -> CapabilityContext {
    CapabilityContext::new(CancellationToken::new(), "test")
}

/// Notifier recording every deal
#[derive(Default)]
struct RecordingNotifier {
    deals: Mutex<Vec<DealSummary>>,
    fail: bool,
}

#[async_trait]
impl DealNotifier for RecordingNotifier {
    async fn notify_owner(&self, deal: &DealSummary) -> Result<(), BackendError> {
        if self.fail {
            return Err(BackendError::Unavailable("smtp down".to_string()));
        }
        self.deals.lock().unwrap().push(deal.clone());
        Ok(())
    }
}

struct FixedLegalKnowledge(Option<LegalAnswer>);

#[async_trait]
impl LegalKnowledge for FixedLegalKnowledge {
    async fn query(&self, _question: &str) -> Result<Option<LegalAnswer>, BackendError> {
        Ok(self.0.clone())
    }
}

/// Catalog that trips a cancellation token when searched, as a user
/// interrupt arriving while a capability is in flight
struct CancellingCatalog {
    inner: InMemoryCatalog,
    cancel: CancellationToken,
}

#[async_trait]
impl PropertyCatalog for CancellingCatalog {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<PropertySummary>, BackendError> {
        self.cancel.cancel();
        self.inner.search(criteria).await
    }

    async fn details(&self, property_id: &str) -> Result<Option<PropertyDetail>, BackendError> {
        self.inner.details(property_id).await
    }

    async fn statistics(&self, area: &str) -> Result<MarketStats, BackendError> {
        self.inner.statistics(area).await
    }

    async fn negotiation_terms(
        &self,
        property_id: &str,
    ) -> Result<Option<NegotiationTerms>, BackendError> {
        self.inner.negotiation_terms(property_id).await
    }
}

/// Builder of capability backends for tests
pub struct TestBackends {
    listings: Vec<Listing>,
    legal_answer: Option<LegalAnswer>,
    alerts: Arc<InMemoryAlerts>,
    notifier: Arc<RecordingNotifier>,
    cancel_on_search: Option<CancellationToken>,
}

pub fn test_backends() -> TestBackends {
    TestBackends {
        listings: Vec::new(),
        legal_answer: None,
        alerts: Arc::new(InMemoryAlerts::new()),
        notifier: Arc::new(RecordingNotifier::default()),
        cancel_on_search: None,
    }
}

impl TestBackends {
    pub fn with_listings(mut self, listings: Vec<Listing>) -> Self {
        self.listings = listings;
        self
    }

    pub fn with_legal_answer(mut self, answer: LegalAnswer) -> Self {
        self.legal_answer = Some(answer);
        self
    }

    pub fn failing_notifier(mut self) -> Self {
        self.notifier = Arc::new(RecordingNotifier {
            deals: Mutex::new(Vec::new()),
            fail: true,
        });
        self
    }

    pub fn cancel_on_search(mut self, cancel: CancellationToken) -> Self {
        self.cancel_on_search = Some(cancel);
        self
    }

    pub fn notified_deals(&self) -> Vec<DealSummary> {
        self.notifier.deals.lock().unwrap().clone()
    }

    pub fn backends(&self) -> Backends {
        let inner = InMemoryCatalog::new(self.listings.clone());
        let catalog: Arc<dyn PropertyCatalog> = match &self.cancel_on_search {
            Some(cancel) => Arc::new(CancellingCatalog {
                inner,
                cancel: cancel.clone(),
            }),
            None => Arc::new(inner),
        };
        Backends {
            catalog,
            alerts: self.alerts.clone(),
            notifier: self.notifier.clone(),
            legal: Arc::new(FixedLegalKnowledge(self.legal_answer.clone())),
        }
    }
}
