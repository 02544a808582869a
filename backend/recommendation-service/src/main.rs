use actix_web::{web, App, HttpServer};
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recommendation_service::config::Config;
use recommendation_service::handlers::{
    get_model_info, rank_candidates, record_interaction, AppState,
};
use recommendation_service::jobs::{RetrainScheduler, SgdMfConfig, SgdMfTrainer};
use recommendation_service::services::{FactorModel, RecommendationPipeline};
use recommendation_service::storage::{
    InteractionStore, MemoryInteractionStore, PgInteractionStore,
};

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    tracing::info!(
        "Starting {} v{}",
        config.service.service_name,
        env!("CARGO_PKG_VERSION")
    );

    // Interaction log: Postgres when configured, in-memory otherwise.
    let store: Arc<dyn InteractionStore> = match config.database.url.as_deref() {
        Some(url) => {
            let store = PgInteractionStore::connect(url, config.database.max_connections)
                .await
                .expect("Failed to connect to database");
            store
                .ensure_schema()
                .await
                .expect("Failed to prepare interactions schema");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; interaction log will not survive restarts");
            Arc::new(MemoryInteractionStore::new())
        }
    };

    let cf_model = Arc::new(FactorModel::open(&config.model.artifact_path));
    let trainer = Arc::new(SgdMfTrainer::new(SgdMfConfig {
        factors: config.retrain.factors,
        iterations: config.retrain.iterations,
        learning_rate: config.retrain.learning_rate,
        regularization: config.retrain.regularization,
    }));
    let scheduler = Arc::new(RetrainScheduler::new(
        config.retrain.threshold,
        &config.model.artifact_path,
        &config.model.meta_path,
        Arc::clone(&store),
        trainer,
    ));
    let pipeline = Arc::new(RecommendationPipeline::new(
        cf_model,
        store,
        scheduler,
        config.bandit.alpha,
        config.pipeline.default_top_k,
    ));

    let state = web::Data::new(AppState { pipeline });

    let bind_addr = format!("0.0.0.0:{}", config.service.http_port);
    tracing::info!("HTTP server listening on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(|| async { "OK" }))
            .service(rank_candidates)
            .service(record_interaction)
            .service(get_model_info)
    })
    .bind(bind_addr)?
    .run()
    .await
}
