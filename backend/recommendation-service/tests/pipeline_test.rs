use recommendation_service::jobs::{RetrainScheduler, SgdMfConfig, SgdMfTrainer};
use recommendation_service::models::{
    ActionKind, Candidate, GeoPoint, InteractionContext, InteractionEvent, Query,
};
use recommendation_service::services::{FactorModel, RecommendationPipeline};
use recommendation_service::storage::{InteractionStore, MemoryInteractionStore};
use recommendation_service::AppError;
use std::sync::Arc;
use std::time::Duration;

fn candidate(id: &str, lat: f64, lng: f64) -> Candidate {
    Candidate {
        id: Some(id.to_string()),
        name: id.to_string(),
        address: String::new(),
        lat: Some(lat),
        lng: Some(lng),
        rating: Some(4.0),
        review_count: None,
        price_range: None,
        cuisines: vec!["vietnamese".to_string()],
        categories: vec![],
        url: None,
        distance_km: None,
        cf_score: 0.0,
    }
}

fn like(user: &str, item: &str) -> InteractionEvent {
    InteractionEvent::new(
        user,
        item,
        ActionKind::Like,
        None,
        InteractionContext::default(),
    )
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<MemoryInteractionStore>,
    pipeline: RecommendationPipeline,
    artifact_path: std::path::PathBuf,
}

fn harness(retrain_threshold: u64) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_path = dir.path().join("cf_model.bin");
    let meta_path = dir.path().join("cf_model_meta.json");

    let store = Arc::new(MemoryInteractionStore::new());
    let trainer = Arc::new(SgdMfTrainer::new(SgdMfConfig {
        factors: 8,
        iterations: 200,
        ..SgdMfConfig::default()
    }));
    let scheduler = Arc::new(RetrainScheduler::new(
        retrain_threshold,
        &artifact_path,
        &meta_path,
        store.clone() as Arc<dyn InteractionStore>,
        trainer,
    ));
    let cf_model = Arc::new(FactorModel::open(&artifact_path));
    let pipeline = RecommendationPipeline::new(
        cf_model,
        store.clone() as Arc<dyn InteractionStore>,
        scheduler,
        1.0,
        5,
    );

    Harness {
        _dir: dir,
        store,
        pipeline,
        artifact_path,
    }
}

async fn wait_until_trained(h: &Harness) {
    for _ in 0..300 {
        if !h.pipeline.is_training() && h.artifact_path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background training never produced an artifact");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_pool_yields_empty_ranking() {
    let h = harness(1_000);
    let ranked = h
        .pipeline
        .recommend(&Query::default(), Vec::new(), Some("u1"), None)
        .await
        .expect("recommend");
    assert!(ranked.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filtering_can_empty_the_pool_without_error() {
    let h = harness(1_000);
    let query = Query {
        location: Some(GeoPoint {
            lat: 16.065,
            lng: 108.229,
        }),
        distance_limit_km: Some(2.0),
        ..Query::default()
    };
    // Only a far-away candidate: everything is filtered out.
    let pool = vec![candidate("far", 16.50, 108.90)];
    let ranked = h
        .pipeline
        .recommend(&query, pool, None, None)
        .await
        .expect("recommend");
    assert!(ranked.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_anonymous_request_ranks_without_cf() {
    let h = harness(1_000);
    let pool = vec![
        candidate("a", 16.066, 108.230),
        candidate("b", 16.067, 108.231),
    ];
    let ranked = h
        .pipeline
        .recommend(&Query::default(), pool, None, Some(2))
        .await
        .expect("recommend");
    assert_eq!(ranked.len(), 2);
    assert!(ranked.iter().all(|c| c.cf_score == 0.0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_online_fallback_surfaces_neighbor_favorites() {
    let h = harness(1_000);

    // target and neighbor agree on "a"; the neighbor also likes "b".
    for event in [
        like("target", "a"),
        like("neighbor", "a"),
        like("neighbor", "b"),
    ] {
        h.store.append(event).await.expect("append");
    }

    let pool = vec![
        candidate("z", 16.066, 108.230),
        candidate("b", 16.067, 108.231),
    ];
    let ranked = h
        .pipeline
        .recommend(&Query::default(), pool, Some("target"), Some(2))
        .await
        .expect("recommend");

    assert_eq!(ranked.len(), 2);
    let b = ranked
        .iter()
        .find(|c| c.id.as_deref() == Some("b"))
        .expect("b present");
    let z = ranked
        .iter()
        .find(|c| c.id.as_deref() == Some("z"))
        .expect("z present");
    assert!(b.cf_score > 0.0);
    assert_eq!(z.cf_score, 0.0);
    // The bandit sees the cf_score feature, so the neighbor favorite ranks first.
    assert_eq!(ranked[0].id.as_deref(), Some("b"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_background_retraining_promotes_offline_model() {
    let h = harness(10);

    // Ten positive interactions put the scheduler at its threshold.
    for i in 0..9 {
        h.store
            .append(like("u1", &format!("r{i}")))
            .await
            .expect("append");
    }
    h.store.append(like("u2", "r0")).await.expect("append");

    assert!(!h.pipeline.model_metadata().available);

    // The first request fires the trigger and must not block on training.
    let pool = vec![candidate("r0", 16.066, 108.230)];
    h.pipeline
        .recommend(&Query::default(), pool.clone(), Some("u1"), None)
        .await
        .expect("recommend");

    wait_until_trained(&h).await;

    // The hot-reloading reader now sees the trained artifact.
    assert!(h.pipeline.model_metadata().available);
    let ranked = h
        .pipeline
        .recommend(&Query::default(), pool, Some("u1"), None)
        .await
        .expect("recommend");
    assert_eq!(ranked.len(), 1);
    assert!(
        ranked[0].cf_score > 0.0,
        "offline model should score the liked item positively, got {}",
        ranked[0].cf_score
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_query_is_a_validation_error() {
    let h = harness(1_000);
    let query = Query {
        location: Some(GeoPoint {
            lat: 123.0,
            lng: 500.0,
        }),
        ..Query::default()
    };
    let err = h
        .pipeline
        .recommend(&query, vec![candidate("a", 16.0, 108.0)], None, None)
        .await
        .expect_err("must reject");
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_observed_rewards_shift_the_ranking() {
    let h = harness(1_000);

    let mut near = candidate("near", 16.066, 108.230);
    near.rating = Some(3.0);
    let mut far = candidate("far", 16.2, 108.4);
    far.rating = Some(3.0);

    let query = Query {
        location: Some(GeoPoint {
            lat: 16.065,
            lng: 108.229,
        }),
        ..Query::default()
    };

    // Reward the distant venue repeatedly; the learned distance weight
    // eventually overcomes the tie.
    let mut rewarded = far.clone();
    rewarded.distance_km = Some(20.0);
    for _ in 0..50 {
        h.pipeline.observe_reward(&rewarded, &query, 1.0);
    }

    let ranked = h
        .pipeline
        .recommend(&query, vec![near, far], None, Some(2))
        .await
        .expect("recommend");
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].id.as_deref(), Some("far"));
}
