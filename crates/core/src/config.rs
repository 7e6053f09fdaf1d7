use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub artifacts: ArtifactConfig,
    pub training: TrainingPaths,
    pub scoring: ScoringConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CXGUARD_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("CXGUARD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            artifacts: ArtifactConfig::from_env_profiled(p),
            training: TrainingPaths::from_env_profiled(p),
            scoring: ScoringConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  artifacts:   bundle={}", self.artifacts.bundle_path.display());
        tracing::info!(
            "  training:    config={}, output_dir={}",
            self.training.config_path.display(),
            self.training.output_dir.display()
        );
        tracing::info!("  scoring:     default_model={}", self.scoring.default_model);
    }
}

// ── Artifacts ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Bundle file served by the registry.
    pub bundle_path: PathBuf,
}

impl ArtifactConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bundle_path: PathBuf::from(profiled_env_or(p, "CXGUARD_BUNDLE_PATH", "artifacts/bundle.cxb")),
        }
    }
}

// ── Training ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPaths {
    /// YAML training configuration (features, models, ensemble).
    pub config_path: PathBuf,
    /// Where batch scoring writes result files.
    pub output_dir: PathBuf,
}

impl TrainingPaths {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            config_path: PathBuf::from(profiled_env_or(p, "CXGUARD_TRAINING_CONFIG", "configs/training.yaml")),
            output_dir: PathBuf::from(profiled_env_or(p, "CXGUARD_OUTPUT_DIR", "outputs")),
        }
    }
}

// ── Scoring ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Model selector used when a caller does not name one.
    pub default_model: String,
}

impl ScoringConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            default_model: profiled_env_or(p, "CXGUARD_DEFAULT_MODEL", "all"),
        }
    }
}
