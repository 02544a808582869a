// ============================================
// Online Collaborative Filtering Fallback
// ============================================
//
// Memory-based scorer built straight from the interaction log, used while no
// trained factor artifact exists yet.
//
// Scoring:
//   score[c] = sum over similar users of jaccard(target, other) * reward(other, c)
// restricted to positive similarities and positive rewards. A candidate no
// neighbor has touched falls back to 0.1 * popularity(c), so globally liked
// items still surface for cold-start users while direct social signal always
// outranks pure popularity.

use crate::models::{Candidate, InteractionEvent};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Scale applied to the popularity fallback so it never beats neighbor signal.
const POPULARITY_FALLBACK_SCALE: f64 = 0.1;

/// Memory-based scorer over positively-rewarded interactions.
#[derive(Debug, Default)]
pub struct OnlineCf {
    /// user -> set of items the user positively interacted with.
    user_items: HashMap<String, HashSet<String>>,
    /// item -> sum of positive rewards across all users.
    item_popularity: HashMap<String, f64>,
    /// user -> item -> last positive reward.
    user_item_reward: HashMap<String, HashMap<String, f64>>,
}

impl OnlineCf {
    /// Build the in-memory tables once from the raw log. Events with an
    /// empty user or item id, or a non-positive reward, carry no signal.
    pub fn from_events(events: &[InteractionEvent]) -> Self {
        let mut model = Self::default();
        for event in events {
            let user = event.user_id.trim();
            let item = event.item_id.trim();
            if user.is_empty() || item.is_empty() || event.reward <= 0.0 {
                continue;
            }
            model
                .user_items
                .entry(user.to_string())
                .or_default()
                .insert(item.to_string());
            *model.item_popularity.entry(item.to_string()).or_default() += event.reward;
            model
                .user_item_reward
                .entry(user.to_string())
                .or_default()
                .insert(item.to_string(), event.reward);
        }
        debug!(
            users = model.user_items.len(),
            items = model.item_popularity.len(),
            "online CF tables built"
        );
        model
    }

    pub fn user_count(&self) -> usize {
        self.user_items.len()
    }

    /// |A ∩ B| / |A ∪ B|; zero when either set is empty.
    fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        let intersection = a.intersection(b).count();
        let union = a.union(b).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }

    /// Score candidates for a user, sorted descending (stable, so input
    /// order breaks ties) and truncated to `top_k`. Every candidate receives
    /// a score, even with zero signal.
    pub fn score_candidates(
        &self,
        user_id: &str,
        candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<(Candidate, f64)> {
        let empty = HashSet::new();
        let user_set = self.user_items.get(user_id).unwrap_or(&empty);

        let similarities: HashMap<&String, f64> = self
            .user_items
            .iter()
            .filter(|(other, _)| other.as_str() != user_id)
            .filter_map(|(other, items)| {
                let sim = Self::jaccard(user_set, items);
                (sim > 0.0).then_some((other, sim))
            })
            .collect();

        let mut seen_ids = HashSet::new();
        let mut scored: Vec<(Candidate, f64)> = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.into_iter().enumerate() {
            let key = candidate.identity_key(index);
            if !seen_ids.insert(key.clone()) {
                continue;
            }

            let mut score: f64 = similarities
                .iter()
                .filter_map(|(other, sim)| {
                    self.user_item_reward
                        .get(other.as_str())
                        .and_then(|rewards| rewards.get(&key))
                        .filter(|r| **r > 0.0)
                        .map(|r| sim * r)
                })
                .sum();

            if score == 0.0 {
                if let Some(popularity) = self.item_popularity.get(&key) {
                    score = POPULARITY_FALLBACK_SCALE * popularity;
                }
            }

            scored.push((candidate, score));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Score, attach `cf_score` and return the candidates alone.
    pub fn rerank(&self, user_id: &str, candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
        self.score_candidates(user_id, candidates, top_k)
            .into_iter()
            .map(|(mut candidate, score)| {
                candidate.cf_score = score;
                candidate
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, InteractionContext};

    fn event(user: &str, item: &str, reward: f64) -> InteractionEvent {
        InteractionEvent::new(
            user,
            item,
            ActionKind::Like,
            Some(reward),
            InteractionContext::default(),
        )
    }

    fn candidate(id: &str) -> Candidate {
        Candidate {
            id: Some(id.to_string()),
            name: id.to_string(),
            address: String::new(),
            lat: None,
            lng: None,
            rating: None,
            review_count: None,
            price_range: None,
            cuisines: vec![],
            categories: vec![],
            url: None,
            distance_km: None,
            cf_score: 0.0,
        }
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_jaccard_properties() {
        assert_eq!(OnlineCf::jaccard(&set(&[]), &set(&["a"])), 0.0);
        assert_eq!(OnlineCf::jaccard(&set(&["a"]), &set(&[])), 0.0);
        assert_eq!(OnlineCf::jaccard(&set(&["a"]), &set(&["b"])), 0.0);
        assert_eq!(OnlineCf::jaccard(&set(&["a", "b"]), &set(&["a", "b"])), 1.0);
        let third = OnlineCf::jaccard(&set(&["a", "b"]), &set(&["b", "c"]));
        assert!((third - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_neighbor_score_is_similarity_times_reward() {
        // target and "neighbor" share one of two liked items; the candidate
        // is the neighbor's other liked item with reward 1.0.
        let events = vec![
            event("target", "a", 1.0),
            event("target", "b", 1.0),
            event("neighbor", "b", 1.0),
            event("neighbor", "c", 1.0),
        ];
        let model = OnlineCf::from_events(&events);

        let scored = model.score_candidates("target", vec![candidate("c")], 5);
        assert_eq!(scored.len(), 1);
        assert!((scored[0].1 - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_popularity_fallback_when_no_neighbor_signal() {
        // "loner" shares nothing with anyone; "c" has global popularity 2.5.
        let events = vec![
            event("loner", "x", 1.0),
            event("fan1", "c", 1.0),
            event("fan2", "c", 1.5),
        ];
        let model = OnlineCf::from_events(&events);

        let scored = model.score_candidates("loner", vec![candidate("c")], 5);
        assert!((scored[0].1 - 0.1 * 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_unseen_candidate_scores_zero_and_keeps_order() {
        let events = vec![event("someone", "a", 1.0)];
        let model = OnlineCf::from_events(&events);

        let scored =
            model.score_candidates("target", vec![candidate("p"), candidate("q")], 5);
        assert_eq!(scored.len(), 2);
        assert_eq!(scored[0].0.id.as_deref(), Some("p"));
        assert_eq!(scored[0].1, 0.0);
        assert_eq!(scored[1].1, 0.0);
    }

    #[test]
    fn test_negative_rewards_carry_no_signal() {
        let events = vec![
            event("u1", "a", -0.5),
            event("u1", "", 1.0),
            event("", "a", 1.0),
        ];
        let model = OnlineCf::from_events(&events);
        assert_eq!(model.user_count(), 0);
    }

    #[test]
    fn test_rerank_truncates_and_attaches_cf_score() {
        let events = vec![
            event("target", "a", 1.0),
            event("other", "a", 1.0),
            event("other", "b", 1.0),
            event("other", "c", 0.5),
        ];
        let model = OnlineCf::from_events(&events);

        let ranked = model.rerank(
            "target",
            vec![candidate("c"), candidate("b"), candidate("z")],
            2,
        );
        assert_eq!(ranked.len(), 2);
        // similarity = |{a}| / |{a,b,c}| = 1/3; b scores 1/3, c scores 1/6.
        assert_eq!(ranked[0].id.as_deref(), Some("b"));
        assert!((ranked[0].cf_score - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(ranked[1].id.as_deref(), Some("c"));
        assert!((ranked[1].cf_score - 0.5 / 3.0).abs() < 1e-9);
    }
}
