//! Background jobs: model retraining and its scheduler.

pub mod retrain;
pub mod trainer;

pub use retrain::{RetrainScheduler, TrainMeta, TrainingState};
pub use trainer::{CfTrainer, SgdMfConfig, SgdMfTrainer};
