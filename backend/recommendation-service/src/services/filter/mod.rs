// ============================================
// Geo / Attribute Candidate Filter
// ============================================
//
// Narrows the raw candidate pool by cuisine, minimum rating and distance
// before any personalized scoring runs.
//
// Policy on missing data is always permissive: an unknown rating or an
// absent coordinate pair passes its check, so a sparse catalog never
// starves the pipeline.

use crate::models::{Candidate, Query};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Synonyms unioned into the requested cuisine tokens before matching, so a
/// request in one vocabulary matches listings tagged in another.
static CUISINE_ALIASES: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut aliases: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    aliases.insert("fried chicken", &["ga ran", "fried chicken", "chicken"]);
    aliases.insert("chicken", &["ga", "ga ran", "chicken"]);
    aliases.insert("korean", &["han quoc", "korean"]);
    aliases.insert("bbq", &["barbecue", "nuong", "bbq"]);
    aliases.insert("seafood", &["hai san", "seafood"]);
    aliases.insert("hotpot", &["lau", "hotpot"]);
    aliases.insert("vegetarian", &["chay", "an chay", "vegetarian"]);
    aliases
});

/// Great-circle distance in kilometers (haversine formula).
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Lowercase and strip diacritics for fuzzy contains checks.
fn normalize_text(value: &str) -> String {
    value
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}

fn expand_requested(requested: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(requested.len());
    for token in requested {
        expanded.push(token.clone());
        if let Some(synonyms) = CUISINE_ALIASES.get(token.to_lowercase().as_str()) {
            expanded.extend(synonyms.iter().map(|s| s.to_string()));
        }
    }
    expanded
}

/// Candidate pool filter driven entirely by the parsed query.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter;

impl CandidateFilter {
    pub fn new() -> Self {
        Self
    }

    /// Keep candidates passing every requested check, attaching the computed
    /// distance when both coordinate pairs are known.
    pub fn filter(&self, pool: Vec<Candidate>, query: &Query) -> Vec<Candidate> {
        let pool_size = pool.len();
        let mut kept = Vec::with_capacity(pool_size);

        for mut candidate in pool {
            if !self.passes_cuisine(&candidate, &query.cuisine) {
                continue;
            }
            if !self.passes_rating(&candidate, query.rating_min) {
                continue;
            }

            let distance = self.distance_to(&candidate, query);
            if let (Some(limit), Some(dist)) = (query.distance_limit_km, distance) {
                if dist > limit {
                    continue;
                }
            }

            candidate.distance_km = distance;
            kept.push(candidate);
        }

        debug!(
            pool_size = pool_size,
            kept = kept.len(),
            cuisine_tokens = query.cuisine.len(),
            "candidate pool filtered"
        );

        kept
    }

    /// No cuisine requested passes everything; otherwise any expanded token
    /// must appear as a substring of a cuisine, category or name field.
    fn passes_cuisine(&self, candidate: &Candidate, requested: &[String]) -> bool {
        if requested.is_empty() {
            return true;
        }

        let mut fields: Vec<String> = candidate
            .cuisines
            .iter()
            .chain(candidate.categories.iter())
            .map(|f| normalize_text(f))
            .collect();
        fields.push(normalize_text(&candidate.name));

        expand_requested(requested)
            .iter()
            .map(|t| normalize_text(t))
            .any(|token| fields.iter().any(|field| field.contains(&token)))
    }

    /// Unknown rating passes, to avoid over-filtering sparse data.
    fn passes_rating(&self, candidate: &Candidate, rating_min: Option<f64>) -> bool {
        match (rating_min, candidate.rating) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(min), Some(rating)) => rating >= min,
        }
    }

    /// Distance is computable only when both coordinate pairs exist.
    fn distance_to(&self, candidate: &Candidate, query: &Query) -> Option<f64> {
        let user = query.location.as_ref()?;
        let (lat, lng) = (candidate.lat?, candidate.lng?);
        Some(haversine_km(user.lat, user.lng, lat, lng))
    }
}
