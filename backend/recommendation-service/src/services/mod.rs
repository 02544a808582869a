//! Candidate ranking components.
//!
//! Leaf scorers (`filter`, `cf_offline`, `cf_online`, `bandit`) are
//! independent; `pipeline` composes them per request.

pub mod bandit;
pub mod cf_offline;
pub mod cf_online;
pub mod filter;
pub mod pipeline;

pub use bandit::LinUcb;
pub use cf_offline::{FactorModel, ModelArtifact, ModelMetadata};
pub use cf_online::OnlineCf;
pub use filter::CandidateFilter;
pub use pipeline::RecommendationPipeline;
