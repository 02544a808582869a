use crate::error::AppError;
use crate::models::{
    ActionKind, Candidate, InteractionContext, InteractionEvent, PriceRange, Query,
};
use crate::services::RecommendationPipeline;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub struct AppState {
    pub pipeline: Arc<RecommendationPipeline>,
}

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    /// Absent for anonymous requests; CF scoring is skipped without it.
    #[serde(default)]
    pub user_id: Option<String>,
    pub query: Query,
    /// Raw pool from the retrieval collaborator.
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RankResponse {
    pub results: Vec<Candidate>,
}

/// Rank a candidate pool for a parsed query.
#[post("/v2/recommendations/rank")]
pub async fn rank_candidates(
    state: web::Data<AppState>,
    body: web::Json<RankRequest>,
) -> Result<HttpResponse, AppError> {
    let RankRequest {
        user_id,
        query,
        candidates,
        top_k,
    } = body.into_inner();

    debug!(
        pool_size = candidates.len(),
        has_user = user_id.is_some(),
        "rank request received"
    );

    let results = state
        .pipeline
        .recommend(&query, candidates, user_id.as_deref(), top_k)
        .await?;
    Ok(HttpResponse::Ok().json(RankResponse { results }))
}

#[derive(Debug, Deserialize)]
pub struct InteractionRequest {
    pub user_id: String,
    pub item_id: String,
    pub action: ActionKind,
    #[serde(default)]
    pub reward: Option<f64>,
    #[serde(default)]
    pub context: InteractionContext,
    /// Snapshot of the shown candidate, when the caller still has it; used
    /// to fold the observed reward back into the bandit weights.
    #[serde(default)]
    pub candidate: Option<Candidate>,
}

/// Persist one interaction event (impression, click, like, ...).
#[post("/v2/interactions")]
pub async fn record_interaction(
    state: web::Data<AppState>,
    body: web::Json<InteractionRequest>,
) -> Result<HttpResponse, AppError> {
    let req = body.into_inner();
    let event = InteractionEvent::new(
        req.user_id,
        req.item_id,
        req.action,
        req.reward,
        req.context,
    );

    if let Some(candidate) = &req.candidate {
        let query = Query {
            intent: event.context.intent.clone().unwrap_or_default(),
            cuisine: event.context.cuisine.clone(),
            price_range: PriceRange {
                min: event.context.price_min,
                max: event.context.price_max,
            },
            ..Query::default()
        };
        state.pipeline.observe_reward(candidate, &query, event.reward);
    }

    state.pipeline.log_interaction(event).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
pub struct ModelInfoResponse {
    #[serde(flatten)]
    pub model: crate::services::ModelMetadata,
    pub training_active: bool,
}

/// Trained-model metadata plus scheduler state.
#[get("/v2/model/info")]
pub async fn get_model_info(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(ModelInfoResponse {
        model: state.pipeline.model_metadata(),
        training_active: state.pipeline.is_training(),
    }))
}
