// ============================================
// Contextual Bandit Reranker (diagonal LinUCB)
// ============================================
//
// Linear upper-confidence-bound scorer over a shared weight vector with
// per-feature uncertainty.
//
// Score:
//   predict(x) = sum_i (b_i / A_diag_i) * x_i
//   bonus(x)   = alpha * sqrt(sum_i x_i^2 / A_diag_i)
//   score(x)   = predict(x) + bonus(x)
//
// Update, given an observed reward for a shown candidate:
//   A_diag_i += x_i^2
//   b_i      += x_i * reward
//
// The diagonal approximation of the covariance keeps the model a pair of
// flat vectors while still inflating rarely-seen feature combinations.

use crate::models::{Candidate, Query};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Features: [bias, rating, -distance_km, price_fit, cf_score].
pub const FEATURE_DIM: usize = 5;

/// Default exploration coefficient.
pub const DEFAULT_ALPHA: f64 = 1.0;

/// Price compatibility indicator.
///
/// +1 when the candidate's price interval does not provably conflict with
/// the requested one, -1 when the intervals are provably disjoint, and 0
/// when the request carries no price bounds at all.
fn price_fit(candidate: &Candidate, query: &Query) -> f64 {
    if query.price_range.is_empty() {
        return 0.0;
    }
    let item = candidate.price_range.unwrap_or_default();
    if let (Some(user_min), Some(item_max)) = (query.price_range.min, item.max) {
        if item_max < user_min {
            return -1.0;
        }
    }
    if let (Some(user_max), Some(item_min)) = (query.price_range.max, item.min) {
        if item_min > user_max {
            return -1.0;
        }
    }
    1.0
}

/// Build the candidate's feature vector. Unknown distance contributes 0,
/// not a fabricated "close".
pub fn feature_vector(candidate: &Candidate, query: &Query) -> [f64; FEATURE_DIM] {
    [
        1.0,
        candidate.rating.unwrap_or(0.0),
        -candidate.distance_km.unwrap_or(0.0),
        price_fit(candidate, query),
        candidate.cf_score,
    ]
}

/// Shared LinUCB weights. Read-only during scoring; mutated only by
/// `update`, so the caller decides when observed rewards flow back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinUcb {
    alpha: f64,
    a_diag: [f64; FEATURE_DIM],
    b: [f64; FEATURE_DIM],
}

impl Default for LinUcb {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

impl LinUcb {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            a_diag: [1.0; FEATURE_DIM],
            b: [0.0; FEATURE_DIM],
        }
    }

    fn theta(&self) -> [f64; FEATURE_DIM] {
        let mut theta = [0.0; FEATURE_DIM];
        for i in 0..FEATURE_DIM {
            theta[i] = self.b[i] / self.a_diag[i];
        }
        theta
    }

    /// Point estimate plus exploration bonus.
    pub fn score(&self, x: &[f64; FEATURE_DIM]) -> f64 {
        let theta = self.theta();
        let predicted: f64 = theta.iter().zip(x.iter()).map(|(t, xi)| t * xi).sum();
        let uncertainty: f64 = x
            .iter()
            .zip(self.a_diag.iter())
            .map(|(xi, a)| xi * xi / a)
            .sum();
        predicted + self.alpha * uncertainty.sqrt()
    }

    /// Fold one observed reward into the weights.
    pub fn update(&mut self, x: &[f64; FEATURE_DIM], reward: f64) {
        for i in 0..FEATURE_DIM {
            self.a_diag[i] += x[i] * x[i];
            self.b[i] += x[i] * reward;
        }
        debug!(reward = reward, "bandit weights updated");
    }

    /// Score every candidate, sort descending (stable, so input order breaks
    /// ties) and keep the top k.
    pub fn rerank(
        &self,
        candidates: Vec<Candidate>,
        query: &Query,
        top_k: usize,
    ) -> Vec<Candidate> {
        let mut scored: Vec<(f64, Candidate)> = candidates
            .into_iter()
            .map(|candidate| {
                let x = feature_vector(&candidate, query);
                (self.score(&x), candidate)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, candidate)| candidate)
            .collect()
    }
}
