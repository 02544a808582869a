use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub retrain: RetrainConfig,
    pub bandit: BanditConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Absent URL means the in-memory interaction log (local development).
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub artifact_path: String,
    pub meta_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrainConfig {
    pub threshold: u64,
    pub factors: usize,
    pub iterations: usize,
    pub learning_rate: f64,
    pub regularization: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    pub alpha: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub default_top_k: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenv::dotenv().ok();

        Ok(Config {
            service: ServiceConfig {
                http_port: env::var("HTTP_PORT")
                    .unwrap_or_else(|_| "8012".to_string())
                    .parse()
                    .expect("HTTP_PORT must be a valid u16"),
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "recommendation-service".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("DATABASE_MAX_CONNECTIONS must be a valid u32"),
            },
            model: ModelConfig {
                artifact_path: env::var("CF_MODEL_PATH")
                    .unwrap_or_else(|_| "data/cf_model.bin".to_string()),
                meta_path: env::var("CF_MODEL_META_PATH")
                    .unwrap_or_else(|_| "data/cf_model_meta.json".to_string()),
            },
            retrain: RetrainConfig {
                threshold: env::var("RETRAIN_THRESHOLD")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("RETRAIN_THRESHOLD must be a valid u64"),
                factors: env::var("CF_FACTORS")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()
                    .expect("CF_FACTORS must be a valid usize"),
                iterations: env::var("CF_ITERATIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("CF_ITERATIONS must be a valid usize"),
                learning_rate: env::var("CF_LEARNING_RATE")
                    .unwrap_or_else(|_| "0.05".to_string())
                    .parse()
                    .expect("CF_LEARNING_RATE must be a valid f64"),
                regularization: env::var("CF_REGULARIZATION")
                    .unwrap_or_else(|_| "0.08".to_string())
                    .parse()
                    .expect("CF_REGULARIZATION must be a valid f64"),
            },
            bandit: BanditConfig {
                alpha: env::var("BANDIT_ALPHA")
                    .unwrap_or_else(|_| "1.0".to_string())
                    .parse()
                    .expect("BANDIT_ALPHA must be a valid f64"),
            },
            pipeline: PipelineConfig {
                default_top_k: env::var("DEFAULT_TOP_K")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("DEFAULT_TOP_K must be a valid usize"),
            },
        })
    }
}
