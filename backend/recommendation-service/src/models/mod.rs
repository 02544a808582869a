use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A venue candidate flowing through the ranking pipeline.
///
/// Produced by the upstream retrieval collaborator; ranking stages enrich it
/// (`distance_km`, `cf_score`) but never restructure it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Stable venue identifier, when the catalog has one.
    #[serde(default, alias = "restaurant_id")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    /// Average rating; `None` means the catalog has no rating data.
    #[serde(default, alias = "avg_rating")]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub price_range: Option<PriceRange>,
    #[serde(default, alias = "cuisine")]
    pub cuisines: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Detail / ordering URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Great-circle distance from the requesting user, attached by the
    /// filter stage when both coordinate pairs are known. `None` means
    /// "no data", which downstream stages must not conflate with "close".
    #[serde(default)]
    pub distance_km: Option<f64>,
    /// Collaborative-filtering score attached during ranking.
    #[serde(default)]
    pub cf_score: f64,
}

impl Candidate {
    /// Resolve the identity key used for interaction lookups.
    ///
    /// Falls back id -> url -> positional index so every candidate is
    /// addressable even on a sparse catalog.
    pub fn identity_key(&self, index: usize) -> String {
        if let Some(id) = self.id.as_deref().filter(|s| !s.is_empty()) {
            return id.to_string();
        }
        if let Some(url) = self.url.as_deref().filter(|s| !s.is_empty()) {
            return url.to_string();
        }
        index.to_string()
    }
}

/// Price interval in currency units. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Accept `null`, a missing field, or `{"lat": null, "lng": null}` as "no
/// location": the language-understanding collaborator emits the latter.
fn deserialize_geo_point<'de, D>(deserializer: D) -> std::result::Result<Option<GeoPoint>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct RawPoint {
        #[serde(default)]
        lat: Option<f64>,
        #[serde(default)]
        lng: Option<f64>,
    }

    let raw = Option::<RawPoint>::deserialize(deserializer)?;
    Ok(raw.and_then(|p| match (p.lat, p.lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    }))
}

/// Structured intent produced by the language-understanding collaborator.
///
/// Read-only for every ranking stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub cuisine: Vec<String>,
    #[serde(default)]
    pub price_range: PriceRange,
    #[serde(default)]
    pub distance_limit_km: Option<f64>,
    #[serde(default)]
    pub rating_min: Option<f64>,
    #[serde(default)]
    pub special_requirements: Vec<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub eating_time: Option<String>,
    #[serde(
        default,
        alias = "user_location",
        deserialize_with = "deserialize_geo_point"
    )]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub raw_input: String,
}

impl Query {
    /// Reject inputs the pipeline cannot recover from locally.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(loc) = &self.location {
            if !loc.lat.is_finite() || !loc.lng.is_finite() {
                return Err("user coordinates must be finite".to_string());
            }
            if loc.lat.abs() > 90.0 || loc.lng.abs() > 180.0 {
                return Err(format!(
                    "user coordinates out of range: ({}, {})",
                    loc.lat, loc.lng
                ));
            }
        }
        if let Some(limit) = self.distance_limit_km {
            if !limit.is_finite() || limit < 0.0 {
                return Err(format!("distance limit must be non-negative: {limit}"));
            }
        }
        if let Some(min) = self.rating_min {
            if !min.is_finite() {
                return Err("minimum rating must be finite".to_string());
            }
        }
        Ok(())
    }
}

/// What the user did with a shown candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Impression,
    View,
    Click,
    Like,
    Dislike,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Impression => "impression",
            ActionKind::View => "view",
            ActionKind::Click => "click",
            ActionKind::Like => "like",
            ActionKind::Dislike => "dislike",
        }
    }

    /// Reward assigned when the caller supplied none (or an explicit zero).
    pub fn default_reward(&self) -> f64 {
        match self {
            ActionKind::Impression => 0.0,
            ActionKind::View => 0.0,
            ActionKind::Click => 0.1,
            ActionKind::Like => 1.0,
            ActionKind::Dislike => -0.5,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "impression" => Some(ActionKind::Impression),
            "view" => Some(ActionKind::View),
            "click" => Some(ActionKind::Click),
            "like" => Some(ActionKind::Like),
            "dislike" => Some(ActionKind::Dislike),
            _ => None,
        }
    }
}

/// Contextual snapshot persisted alongside each interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionContext {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub cuisine: Vec<String>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
}

/// One append-only record of the interaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    /// Always a finite number. An absent, zero, or non-finite caller-supplied
    /// reward is replaced by the action's default at construction time.
    pub reward: f64,
    #[serde(default)]
    pub context: InteractionContext,
}

impl InteractionEvent {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        action: ActionKind,
        reward: Option<f64>,
        context: InteractionContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            item_id: item_id.into(),
            timestamp: Utc::now(),
            action,
            reward: resolve_reward(action, reward),
            context,
        }
    }

    pub fn is_positive(&self) -> bool {
        self.reward > 0.0
    }
}

/// An explicit non-zero finite reward wins; anything else falls back to the
/// per-action default table.
pub fn resolve_reward(action: ActionKind, supplied: Option<f64>) -> f64 {
    match supplied {
        Some(r) if r.is_finite() && r != 0.0 => r,
        _ => action.default_reward(),
    }
}
