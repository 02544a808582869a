// ============================================
// Collaborative Filtering Trainer
// ============================================
//
// Turns the raw interaction log into a factor artifact. The scheduler only
// depends on the `CfTrainer` seam; the baseline implementation below fits
// factor vectors with seeded SGD matrix factorization over implicit
// feedback, so the service is self-contained without an external training
// pipeline.
//
// Per-pair aggregation before fitting:
//   dislike        -> clamp to -0.5
//   like           -> lift to 1.0
//   click          -> +0.1 per click, capped at 1.0
//   explicit r > 0 -> keep the maximum
// Only strictly positive aggregates are fed to the factorizer.

use crate::error::{AppError, Result};
use crate::models::{ActionKind, InteractionEvent};
use crate::services::cf_offline::{ModelArtifact, ARTIFACT_FORMAT_VERSION};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Black-box training call: events in, factor matrices out.
pub trait CfTrainer: Send + Sync {
    fn train(&self, events: &[InteractionEvent]) -> Result<ModelArtifact>;
}

/// Collapse raw events into one signed reward per (user, item) pair, keeping
/// only pairs with positive aggregate signal.
pub fn aggregate_rewards(events: &[InteractionEvent]) -> Vec<(String, String, f64)> {
    let mut aggregated: HashMap<(String, String), f64> = HashMap::new();
    for event in events {
        let user = event.user_id.trim();
        let item = event.item_id.trim();
        if user.is_empty() || item.is_empty() {
            continue;
        }
        let entry = aggregated
            .entry((user.to_string(), item.to_string()))
            .or_insert(0.0);
        match event.action {
            ActionKind::Dislike => *entry = entry.min(-0.5),
            ActionKind::Like => *entry = entry.max(1.0),
            ActionKind::Click => *entry = (*entry + 0.1).min(1.0),
            _ if event.reward > 0.0 => *entry = entry.max(event.reward),
            _ => {}
        }
    }
    aggregated
        .into_iter()
        .filter(|(_, reward)| *reward > 0.0)
        .map(|((user, item), reward)| (user, item, reward))
        .collect()
}

/// Baseline factorizer configuration.
#[derive(Debug, Clone)]
pub struct SgdMfConfig {
    pub factors: usize,
    pub iterations: usize,
    pub learning_rate: f64,
    pub regularization: f64,
}

impl Default for SgdMfConfig {
    fn default() -> Self {
        Self {
            factors: 64,
            iterations: 20,
            learning_rate: 0.05,
            regularization: 0.08,
        }
    }
}

/// Seeded SGD matrix factorization over implicit positive feedback.
///
/// Deterministic for a given log: indices are assigned in sorted id order
/// and factor initialization uses a fixed seed.
pub struct SgdMfTrainer {
    config: SgdMfConfig,
}

const INIT_SEED: u64 = 42;

impl SgdMfTrainer {
    pub fn new(config: SgdMfConfig) -> Self {
        Self { config }
    }
}

impl Default for SgdMfTrainer {
    fn default() -> Self {
        Self::new(SgdMfConfig::default())
    }
}

impl CfTrainer for SgdMfTrainer {
    fn train(&self, events: &[InteractionEvent]) -> Result<ModelArtifact> {
        let mut pairs = aggregate_rewards(events);
        if pairs.is_empty() {
            return Err(AppError::DegenerateTrainingData);
        }
        // Deterministic pass order regardless of HashMap iteration.
        pairs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

        let users: BTreeSet<&str> = pairs.iter().map(|(u, _, _)| u.as_str()).collect();
        let items: BTreeSet<&str> = pairs.iter().map(|(_, i, _)| i.as_str()).collect();
        let user_index: HashMap<String, usize> = users
            .iter()
            .enumerate()
            .map(|(idx, u)| (u.to_string(), idx))
            .collect();
        let item_index: HashMap<String, usize> = items
            .iter()
            .enumerate()
            .map(|(idx, i)| (i.to_string(), idx))
            .collect();

        let k = self.config.factors;
        let mut rng = StdRng::seed_from_u64(INIT_SEED);
        let scale = 1.0 / (k as f64).sqrt();
        let mut user_factors =
            Array2::from_shape_fn((user_index.len(), k), |_| rng.gen_range(-scale..scale));
        let mut item_factors =
            Array2::from_shape_fn((item_index.len(), k), |_| rng.gen_range(-scale..scale));

        let triples: Vec<(usize, usize, f64)> = pairs
            .iter()
            .map(|(u, i, r)| (user_index[u.as_str()], item_index[i.as_str()], *r))
            .collect();

        let lr = self.config.learning_rate;
        let reg = self.config.regularization;
        for _ in 0..self.config.iterations {
            for &(uidx, iidx, reward) in &triples {
                let u_row = user_factors.row(uidx).to_owned();
                let i_row = item_factors.row(iidx).to_owned();
                let predicted = u_row.dot(&i_row);
                let err = reward - predicted;

                let u_next = &u_row + &((&i_row * err - &u_row * reg) * lr);
                let i_next = &i_row + &((&u_row * err - &i_row * reg) * lr);
                user_factors.row_mut(uidx).assign(&u_next);
                item_factors.row_mut(iidx).assign(&i_next);
            }
        }

        info!(
            users = user_index.len(),
            items = item_index.len(),
            factors = k,
            positive_pairs = triples.len(),
            "factor model trained"
        );

        Ok(ModelArtifact {
            version: ARTIFACT_FORMAT_VERSION,
            user_factors: user_factors
                .rows()
                .into_iter()
                .map(|row| row.iter().map(|v| *v as f32).collect())
                .collect(),
            item_factors: item_factors
                .rows()
                .into_iter()
                .map(|row| row.iter().map(|v| *v as f32).collect())
                .collect(),
            user_index,
            item_index,
            factors: k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionContext;

    fn event(user: &str, item: &str, action: ActionKind, reward: Option<f64>) -> InteractionEvent {
        InteractionEvent::new(user, item, action, reward, InteractionContext::default())
    }

    #[test]
    fn test_aggregation_rules() {
        let events = vec![
            // Clicks accumulate, capped at 1.0.
            event("u1", "a", ActionKind::Click, None),
            event("u1", "a", ActionKind::Click, None),
            // A like lifts to 1.0 no matter the click total.
            event("u1", "b", ActionKind::Click, None),
            event("u1", "b", ActionKind::Like, None),
            // A dislike pins the pair negative; it never trains.
            event("u1", "c", ActionKind::Like, None),
            event("u1", "c", ActionKind::Dislike, None),
            // Impressions carry nothing.
            event("u2", "a", ActionKind::Impression, None),
        ];

        let mut pairs = aggregate_rewards(&events);
        pairs.sort_by(|a, b| a.1.cmp(&b.1));

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1, "a");
        assert!((pairs[0].2 - 0.2).abs() < 1e-9);
        assert_eq!(pairs[1].1, "b");
        assert_eq!(pairs[1].2, 1.0);
    }

    #[test]
    fn test_training_requires_positive_signal() {
        let trainer = SgdMfTrainer::default();
        let events = vec![event("u1", "a", ActionKind::Impression, None)];
        assert!(matches!(
            trainer.train(&events),
            Err(AppError::DegenerateTrainingData)
        ));
    }

    #[test]
    fn test_trained_artifact_is_consistent_and_deterministic() {
        let events = vec![
            event("u1", "a", ActionKind::Like, None),
            event("u1", "b", ActionKind::Like, None),
            event("u2", "b", ActionKind::Like, None),
            event("u2", "c", ActionKind::Click, None),
        ];

        let trainer = SgdMfTrainer::new(SgdMfConfig {
            factors: 8,
            ..SgdMfConfig::default()
        });
        let artifact = trainer.train(&events).expect("train");

        assert_eq!(artifact.user_factors.len(), artifact.user_index.len());
        assert_eq!(artifact.item_factors.len(), artifact.item_index.len());
        assert_eq!(artifact.factors, 8);
        assert!(artifact.user_factors.iter().all(|row| row.len() == 8));

        let again = trainer.train(&events).expect("train again");
        assert_eq!(artifact.user_factors, again.user_factors);
        assert_eq!(artifact.item_factors, again.item_factors);
    }

    #[test]
    fn test_factorization_fits_observed_preferences() {
        let events = vec![
            event("u1", "a", ActionKind::Like, None),
            event("u2", "b", ActionKind::Like, None),
        ];

        let trainer = SgdMfTrainer::new(SgdMfConfig {
            factors: 8,
            iterations: 400,
            ..SgdMfConfig::default()
        });
        let artifact = trainer.train(&events).expect("train");

        let dot = |user: &str, item: &str| -> f64 {
            let u = artifact.user_index[user];
            let i = artifact.item_index[item];
            artifact.user_factors[u]
                .iter()
                .zip(artifact.item_factors[i].iter())
                .map(|(a, b)| (*a as f64) * (*b as f64))
                .sum()
        };

        // Observed pairs converge toward their reward of 1.0.
        assert!(dot("u1", "a") > 0.5, "got {}", dot("u1", "a"));
        assert!(dot("u2", "b") > 0.5, "got {}", dot("u2", "b"));
    }
}
