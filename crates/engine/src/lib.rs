pub mod algorithms;
pub mod bundle;
pub mod calibration;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod scoring;
pub mod training;

pub use bundle::{ArtifactBundle, ModelArtifact, ModelMetadata, TrainingSummary};
pub use calibration::{calibrate, Calibration, ScoreStats};
pub use ensemble::{EnsembleConfig, EnsembleSettings, Normalization, Strategy};
pub use error::{EngineError, Result};
pub use evaluation::{evaluate, EvaluationReport};
pub use models::{anomaly_flag, Algorithm, ModelParams, OutlierModel, TrainedModel};
pub use pipeline::{FeaturePipeline, FeatureSpec};
pub use registry::{ArtifactRegistry, BundleInfo, BundleWatcher, LoadedBundle};
pub use scoring::{BatchScores, ModelSelector, RejectedRecord, ScoreResult, ScoringEngine};
pub use training::{train_bundle, ModelConfig, TrainingConfig};
