pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod services;
pub mod storage;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{CandidateFilter, FactorModel, LinUcb, OnlineCf, RecommendationPipeline};
