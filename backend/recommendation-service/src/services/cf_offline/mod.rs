// ============================================
// Offline Collaborative Filtering Scorer
// ============================================
//
// Scores (user, item) pairs as the inner product of factor vectors produced
// by background training, loaded from a single versioned binary artifact.
//
// The reader keeps an internal last-seen modification token and reloads the
// artifact whenever the token changes, so every request sees an
// eventually-consistent model without restarts. The trainer writes to a
// temporary file and renames it into place, so a concurrent reader observes
// either the old or the fully-new artifact, never a partial one.

use crate::error::{AppError, Result};
use crate::models::Candidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::{info, warn};

/// Bumped whenever the serialized layout changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Persisted output of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    /// Stable id -> row offset into the factor matrices.
    pub user_index: HashMap<String, usize>,
    pub item_index: HashMap<String, usize>,
    pub user_factors: Vec<Vec<f32>>,
    pub item_factors: Vec<Vec<f32>>,
    /// Factor dimensionality.
    pub factors: usize,
}

impl ModelArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes)?;
        if artifact.version != ARTIFACT_FORMAT_VERSION {
            return Err(AppError::ModelArtifact(format!(
                "unsupported artifact version {} (expected {})",
                artifact.version, ARTIFACT_FORMAT_VERSION
            )));
        }
        Ok(artifact)
    }

    /// Write to a sibling temp file, then atomically rename into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = bincode::serialize(self)?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ModelState {
    artifact: Option<ModelArtifact>,
    /// Modification token of the artifact backing `artifact`.
    modified: Option<SystemTime>,
}

/// Summary exposed through the model-info endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ModelMetadata {
    pub available: bool,
    pub user_count: usize,
    pub item_count: usize,
    pub factors: usize,
    pub loaded_from: String,
    pub artifact_modified_at: Option<DateTime<Utc>>,
}

/// Hot-reloading reader over the trained factor artifact.
pub struct FactorModel {
    artifact_path: PathBuf,
    state: RwLock<ModelState>,
}

impl FactorModel {
    /// Open a reader over `path`. A missing artifact is not an error; the
    /// model simply reports unavailable until training produces one.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let model = Self {
            artifact_path: path.into(),
            state: RwLock::new(ModelState::default()),
        };
        model.ensure_fresh();
        model
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Reload the artifact if its on-disk modification token moved since the
    /// last load. A vanished artifact leaves the loaded model untouched.
    pub fn ensure_fresh(&self) {
        let mtime = match fs::metadata(&self.artifact_path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return,
        };

        let stale = {
            let state = self.state.read().expect("model state lock poisoned");
            state.modified != Some(mtime)
        };
        if !stale {
            return;
        }

        match ModelArtifact::load(&self.artifact_path) {
            Ok(artifact) => {
                info!(
                    users = artifact.user_index.len(),
                    items = artifact.item_index.len(),
                    factors = artifact.factors,
                    path = %self.artifact_path.display(),
                    "factor model artifact loaded"
                );
                let mut state = self.state.write().expect("model state lock poisoned");
                state.artifact = Some(artifact);
                state.modified = Some(mtime);
            }
            Err(err) => {
                warn!(
                    error = %err,
                    path = %self.artifact_path.display(),
                    "failed to load factor model artifact; keeping previous model"
                );
                // Remember the token so the broken file is not re-read on
                // every score call; a rewritten artifact moves it again.
                let mut state = self.state.write().expect("model state lock poisoned");
                state.modified = Some(mtime);
            }
        }
    }

    pub fn available(&self) -> bool {
        self.ensure_fresh();
        self.state
            .read()
            .expect("model state lock poisoned")
            .artifact
            .is_some()
    }

    /// Whether the trained model knows this user at all.
    pub fn has_user(&self, user_id: &str) -> bool {
        self.ensure_fresh();
        let state = self.state.read().expect("model state lock poisoned");
        state
            .artifact
            .as_ref()
            .map(|a| a.user_index.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Inner product of the user's and item's factor vectors.
    ///
    /// Unknown ids and offsets outside the factor matrices score 0.0; sparse
    /// identity data must never fail a request.
    pub fn score(&self, user_id: &str, item_id: &str) -> f64 {
        self.ensure_fresh();
        let state = self.state.read().expect("model state lock poisoned");
        let Some(artifact) = state.artifact.as_ref() else {
            return 0.0;
        };
        let (Some(&uidx), Some(&iidx)) = (
            artifact.user_index.get(user_id),
            artifact.item_index.get(item_id),
        ) else {
            return 0.0;
        };
        if uidx >= artifact.user_factors.len() || iidx >= artifact.item_factors.len() {
            return 0.0;
        }
        artifact.user_factors[uidx]
            .iter()
            .zip(artifact.item_factors[iidx].iter())
            .map(|(u, v)| (*u as f64) * (*v as f64))
            .sum()
    }

    /// Attach `cf_score` to every candidate, sort descending (stable, so
    /// input order breaks ties) and keep the top k.
    pub fn rerank(&self, user_id: &str, candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
        self.ensure_fresh();
        let mut scored: Vec<Candidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(idx, mut c)| {
                c.cf_score = self.score(user_id, &c.identity_key(idx));
                c
            })
            .collect();
        scored.sort_by(|a, b| {
            b.cf_score
                .partial_cmp(&a.cf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }

    pub fn metadata(&self) -> ModelMetadata {
        self.ensure_fresh();
        let state = self.state.read().expect("model state lock poisoned");
        ModelMetadata {
            available: state.artifact.is_some(),
            user_count: state
                .artifact
                .as_ref()
                .map(|a| a.user_index.len())
                .unwrap_or(0),
            item_count: state
                .artifact
                .as_ref()
                .map(|a| a.item_index.len())
                .unwrap_or(0),
            factors: state.artifact.as_ref().map(|a| a.factors).unwrap_or(0),
            loaded_from: self.artifact_path.display().to_string(),
            artifact_modified_at: state.modified.map(DateTime::<Utc>::from),
        }
    }
}
