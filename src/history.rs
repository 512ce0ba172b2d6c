use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::storage::{HistoryRecord, HistoryStore};
use crate::types::{GenerationRequest, ProviderOutcome};

/// Failed outcomes are not recorded and store errors are only logged.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, outcome: &ProviderOutcome, request: &GenerationRequest) -> bool {
        if !outcome.is_success() {
            return false;
        }
        let record = Self::to_record(outcome, request);
        match self.store.append(&record).await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(provider = %outcome.provider, error = %err, "error when persisting history");
                false
            }
        }
    }

    fn to_record(outcome: &ProviderOutcome, request: &GenerationRequest) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            name: outcome.image_url.clone(),
            service: outcome.provider.service().to_string(),
            kind: outcome.kind.as_str().to_string(),
            ai_model: outcome.model.clone(),
            ai_configuration: outcome.configuration.clone(),
            prompt: outcome.prompt.clone(),
            description: request.description.clone(),
            style: request.style.clone(),
            color_scheme: request.color_scheme.clone(),
            text: request.text.clone(),
            text_style: request.text_style.clone(),
            layout: request.layout.clone(),
            theme: request.theme.clone(),
            additional_elements: request.additional_elements.clone(),
            product: request.product.clone(),
            created_at: Utc::now(),
        }
    }
}
