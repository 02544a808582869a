// ============================================
// Recommendation Pipeline
// ============================================
//
// Composes the ranking stages for one request:
//
//   candidate pool -> geo/attribute filter -> CF scoring -> bandit rerank -> top-k
//
// CF scoring prefers the trained factor model; without one it falls back to
// the log-derived online scorer, and without a user identity it is skipped
// entirely so ranking degrades to content/geo + bandit. The retrain trigger
// check runs inline at the start of every request but never blocks on or
// observes the training job.

use crate::error::{AppError, Result};
use crate::jobs::retrain::RetrainScheduler;
use crate::models::{Candidate, InteractionEvent, Query};
use crate::services::bandit::{feature_vector, LinUcb};
use crate::services::cf_offline::{FactorModel, ModelMetadata};
use crate::services::cf_online::OnlineCf;
use crate::services::filter::CandidateFilter;
use crate::storage::InteractionStore;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const MAX_TOP_K: usize = 100;

pub struct RecommendationPipeline {
    filter: CandidateFilter,
    cf_model: Arc<FactorModel>,
    store: Arc<dyn InteractionStore>,
    scheduler: Arc<RetrainScheduler>,
    /// Shared bandit weights; scoring reads them, observed rewards update them.
    bandit: Mutex<LinUcb>,
    default_top_k: usize,
}

impl RecommendationPipeline {
    pub fn new(
        cf_model: Arc<FactorModel>,
        store: Arc<dyn InteractionStore>,
        scheduler: Arc<RetrainScheduler>,
        bandit_alpha: f64,
        default_top_k: usize,
    ) -> Self {
        Self {
            filter: CandidateFilter::new(),
            cf_model,
            store,
            scheduler,
            bandit: Mutex::new(LinUcb::new(bandit_alpha)),
            default_top_k,
        }
    }

    /// Rank a candidate pool for one request.
    ///
    /// Data sparsity never fails the request: an empty pool at any stage
    /// yields an empty result. Only malformed input is rejected.
    pub async fn recommend(
        &self,
        query: &Query,
        pool: Vec<Candidate>,
        user_id: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<Candidate>> {
        query.validate().map_err(AppError::Validation)?;
        let top_k = top_k.unwrap_or(self.default_top_k).min(MAX_TOP_K).max(1);

        // Fire-and-forget: the request never waits on training.
        self.scheduler.maybe_trigger().await;

        let filtered = self.filter.filter(pool, query);
        if filtered.is_empty() {
            debug!("no candidates survived filtering");
            return Ok(Vec::new());
        }

        let cf_scored = match user_id.filter(|u| !u.is_empty()) {
            Some(user) if self.cf_model.available() => {
                debug!(user = user, "scoring with trained factor model");
                self.cf_model.rerank(user, filtered, top_k)
            }
            Some(user) => {
                debug!(user = user, "no trained model; using online CF fallback");
                match self.store.positive_events().await {
                    Ok(events) => OnlineCf::from_events(&events).rerank(user, filtered, top_k),
                    Err(err) => {
                        warn!(error = %err, "interaction log unavailable; skipping CF stage");
                        filtered
                    }
                }
            }
            None => filtered,
        };

        let ranked = {
            let bandit = self.bandit.lock().expect("bandit weights lock poisoned");
            bandit.rerank(cf_scored, query, top_k)
        };
        Ok(ranked)
    }

    /// Persist one interaction event for the web-facing collaborator.
    pub async fn log_interaction(&self, event: InteractionEvent) -> Result<()> {
        self.store.append(event).await
    }

    /// Fold an observed reward for a shown candidate back into the bandit.
    pub fn observe_reward(&self, candidate: &Candidate, query: &Query, reward: f64) {
        let x = feature_vector(candidate, query);
        self.bandit
            .lock()
            .expect("bandit weights lock poisoned")
            .update(&x, reward);
    }

    pub fn model_metadata(&self) -> ModelMetadata {
        self.cf_model.metadata()
    }

    pub fn is_training(&self) -> bool {
        self.scheduler.state().is_training()
    }
}
