// ============================================
// Background Retraining Scheduler
// ============================================
//
// Watches the growth of positive interactions and launches at most one
// background training job when enough new signal accumulated since the last
// successful run. The trigger check runs inline on the request path, so it
// must never block and never propagate a failure.
//
// State machine: Idle <-> Training, guarded by a mutex on the flip. The lock
// is held only for the check-and-set, never across the job itself. A second
// trigger while a job runs is a silent no-op; nothing is queued.

use crate::error::Result;
use crate::jobs::trainer::CfTrainer;
use crate::services::cf_offline::ModelArtifact;
use crate::storage::InteractionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Idle/Training flag behind its own lock scope. Only `try_begin` and
/// `complete` touch the flag; the raw boolean is never exposed.
#[derive(Debug, Default)]
pub struct TrainingState {
    active: Mutex<bool>,
}

impl TrainingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically flip Idle -> Training. Returns false when a job already
    /// holds the Training state.
    pub fn try_begin(&self) -> bool {
        let mut active = self.active.lock().expect("training state lock poisoned");
        if *active {
            false
        } else {
            *active = true;
            true
        }
    }

    /// Return to Idle. Runs on every job exit path, success or failure.
    pub fn complete(&self) {
        let mut active = self.active.lock().expect("training state lock poisoned");
        *active = false;
    }

    pub fn is_training(&self) -> bool {
        *self.active.lock().expect("training state lock poisoned")
    }
}

/// Companion metadata record persisted next to the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainMeta {
    /// Positive-interaction count observed when training was triggered.
    pub trained_positive_count: u64,
    pub trained_at: DateTime<Utc>,
}

impl TrainMeta {
    /// Missing or unreadable metadata reads as "never trained".
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "unreadable retrain metadata");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }
}

pub struct RetrainScheduler {
    /// Minimum growth in positive interactions since the watermark.
    threshold: u64,
    artifact_path: PathBuf,
    meta_path: PathBuf,
    store: Arc<dyn InteractionStore>,
    trainer: Arc<dyn CfTrainer>,
    state: Arc<TrainingState>,
}

impl RetrainScheduler {
    pub fn new(
        threshold: u64,
        artifact_path: impl Into<PathBuf>,
        meta_path: impl Into<PathBuf>,
        store: Arc<dyn InteractionStore>,
        trainer: Arc<dyn CfTrainer>,
    ) -> Self {
        Self {
            threshold,
            artifact_path: artifact_path.into(),
            meta_path: meta_path.into(),
            store,
            trainer,
            state: Arc::new(TrainingState::new()),
        }
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Decide whether enough new positive signal accumulated. A watermark
    /// ahead of the log (log reset, restored backup) counts as zero, so
    /// retraining resumes once the threshold is reached again.
    pub fn should_trigger(&self, positives: u64, watermark: u64) -> bool {
        let effective = if watermark > positives { 0 } else { watermark };
        positives - effective >= self.threshold
    }

    /// Inline trigger check. Launches the training job detached; the calling
    /// request neither waits for nor observes its outcome. Every failure is
    /// logged and dropped here.
    pub async fn maybe_trigger(&self) {
        let positives = match self.store.positive_count().await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "retrain check skipped: positive count unavailable");
                return;
            }
        };
        let watermark = TrainMeta::load(&self.meta_path)
            .map(|meta| meta.trained_positive_count)
            .unwrap_or(0);

        if !self.should_trigger(positives, watermark) {
            return;
        }
        if !self.state.try_begin() {
            debug!("retraining already in progress; trigger dropped");
            return;
        }

        info!(
            positives = positives,
            watermark = watermark,
            "launching background retraining"
        );

        let store = Arc::clone(&self.store);
        let trainer = Arc::clone(&self.trainer);
        let state = Arc::clone(&self.state);
        let artifact_path = self.artifact_path.clone();
        let meta_path = self.meta_path.clone();
        tokio::spawn(async move {
            match run_training(store, trainer, &artifact_path, &meta_path, positives).await {
                Ok(artifact) => info!(
                    users = artifact.user_index.len(),
                    items = artifact.item_index.len(),
                    positives = positives,
                    "retraining complete"
                ),
                Err(err) => warn!(error = %err, "retraining failed"),
            }
            state.complete();
        });
    }
}

/// The job body: load the log, train, persist artifact then watermark.
///
/// The watermark records the positive count observed at trigger time, not at
/// completion, so interactions arriving during training still count toward
/// the next trigger.
async fn run_training(
    store: Arc<dyn InteractionStore>,
    trainer: Arc<dyn CfTrainer>,
    artifact_path: &Path,
    meta_path: &Path,
    positives_at_trigger: u64,
) -> Result<ModelArtifact> {
    let events = store.all_events().await?;
    let artifact = tokio::task::spawn_blocking(move || trainer.train(&events))
        .await
        .map_err(|err| crate::error::AppError::Training(err.to_string()))??;
    artifact.save(artifact_path)?;
    TrainMeta {
        trained_positive_count: positives_at_trigger,
        trained_at: Utc::now(),
    }
    .save(meta_path)?;
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{ActionKind, InteractionContext, InteractionEvent};
    use crate::storage::MemoryInteractionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTrainer {
        invocations: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingTrainer {
        fn new(delay: Duration, fail: bool) -> Self {
            Self {
                invocations: AtomicUsize::new(0),
                delay,
                fail,
            }
        }
    }

    impl CfTrainer for CountingTrainer {
        fn train(&self, _events: &[InteractionEvent]) -> Result<ModelArtifact> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(AppError::Training("boom".to_string()));
            }
            Ok(ModelArtifact {
                version: crate::services::cf_offline::ARTIFACT_FORMAT_VERSION,
                user_index: Default::default(),
                item_index: Default::default(),
                user_factors: vec![],
                item_factors: vec![],
                factors: 0,
            })
        }
    }

    async fn seed_positives(store: &MemoryInteractionStore, count: usize) {
        for i in 0..count {
            store
                .append(InteractionEvent::new(
                    format!("u{i}"),
                    format!("r{i}"),
                    ActionKind::Like,
                    None,
                    InteractionContext::default(),
                ))
                .await
                .expect("append");
        }
    }

    async fn wait_idle(state: &TrainingState) {
        for _ in 0..200 {
            if !state.is_training() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("training state never returned to idle");
    }

    fn scheduler(
        dir: &tempfile::TempDir,
        threshold: u64,
        store: Arc<dyn InteractionStore>,
        trainer: Arc<dyn CfTrainer>,
    ) -> RetrainScheduler {
        RetrainScheduler::new(
            threshold,
            dir.path().join("cf_model.bin"),
            dir.path().join("cf_model_meta.json"),
            store,
            trainer,
        )
    }

    #[test]
    fn test_trigger_threshold_arithmetic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryInteractionStore::new());
        let trainer = Arc::new(CountingTrainer::new(Duration::ZERO, false));
        let sched = scheduler(&dir, 10, store, trainer);

        // watermark 5: 14 positives is one short, 15 meets the threshold.
        assert!(!sched.should_trigger(14, 5));
        assert!(sched.should_trigger(15, 5));

        // A watermark ahead of the log counts as zero.
        assert!(sched.should_trigger(12, 20));
        assert!(!sched.should_trigger(5, 20));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_training_job_and_watermark_at_trigger_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryInteractionStore::new());
        seed_positives(&store, 12).await;

        let trainer = Arc::new(CountingTrainer::new(Duration::from_millis(150), false));
        let sched = scheduler(
            &dir,
            10,
            store.clone() as Arc<dyn InteractionStore>,
            trainer.clone() as Arc<dyn CfTrainer>,
        );

        // Two rapid triggers while the first job sleeps: exactly one job.
        sched.maybe_trigger().await;
        sched.maybe_trigger().await;
        wait_idle(sched.state()).await;
        assert_eq!(trainer.invocations.load(Ordering::SeqCst), 1);

        // Watermark equals the positive count observed at trigger time.
        let meta = TrainMeta::load(&dir.path().join("cf_model_meta.json")).expect("meta");
        assert_eq!(meta.trained_positive_count, 12);
        assert!(dir.path().join("cf_model.bin").exists());

        // No new signal: the next check stays quiet.
        sched.maybe_trigger().await;
        wait_idle(sched.state()).await;
        assert_eq!(trainer.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_training_failure_returns_to_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryInteractionStore::new());
        seed_positives(&store, 10).await;

        let trainer = Arc::new(CountingTrainer::new(Duration::ZERO, true));
        let sched = scheduler(
            &dir,
            10,
            store.clone() as Arc<dyn InteractionStore>,
            trainer.clone() as Arc<dyn CfTrainer>,
        );

        sched.maybe_trigger().await;
        wait_idle(sched.state()).await;
        assert_eq!(trainer.invocations.load(Ordering::SeqCst), 1);
        // No artifact, no watermark update.
        assert!(!dir.path().join("cf_model.bin").exists());
        assert!(TrainMeta::load(&dir.path().join("cf_model_meta.json")).is_none());

        // The failed run did not wedge the state machine.
        sched.maybe_trigger().await;
        wait_idle(sched.state()).await;
        assert_eq!(trainer.invocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_training_state_try_begin_is_exclusive() {
        let state = TrainingState::new();
        assert!(state.try_begin());
        assert!(!state.try_begin());
        state.complete();
        assert!(state.try_begin());
    }
}
