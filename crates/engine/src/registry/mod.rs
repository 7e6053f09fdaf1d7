//! Artifact registry: holds the active bundle and swaps it atomically.
//!
//! Readers clone an `Arc` to the current bundle and drop the lock straight
//! away, so a scoring call always finishes on the bundle it started with and
//! a swap never waits for in-flight work.

mod watcher;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bundle::{ArtifactBundle, ModelMetadata};
use crate::ensemble::{EnsembleConfig, Strategy};
use crate::error::{EngineError, Result};

pub use self::watcher::BundleWatcher;

/// An installed bundle together with its compiled ensemble config.
#[derive(Debug)]
pub struct LoadedBundle {
    pub bundle: ArtifactBundle,
    pub ensemble: EnsembleConfig,
    /// Monotonic install counter, starting at 1.
    pub generation: u64,
    pub source: Option<PathBuf>,
    pub installed_at: DateTime<Utc>,
}

impl LoadedBundle {
    /// Model ids in sorted order.
    pub fn model_ids(&self) -> Vec<&str> {
        self.bundle.models.keys().map(String::as_str).collect()
    }

    /// Ensemble decision threshold for this bundle's strategy.
    pub fn decision_threshold(&self) -> f64 {
        self.ensemble.decision_threshold(self.bundle.ensemble_threshold)
    }
}

/// Introspection view of the active bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    pub bundle_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub installed_at: DateTime<Utc>,
    pub generation: u64,
    pub source: Option<PathBuf>,
    pub strategy: Strategy,
    pub ensemble_threshold: f64,
    pub feature_names: Vec<String>,
    pub models: Vec<ModelMetadata>,
}

pub struct ArtifactRegistry {
    active: RwLock<Option<Arc<LoadedBundle>>>,
    generation: AtomicU64,
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactRegistry {
    /// An empty registry; scoring fails with `NotLoaded` until a bundle is installed.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Registry with the bundle at `path` already installed.
    pub fn open(path: &Path) -> Result<Self> {
        let registry = Self::new();
        registry.reload(path)?;
        Ok(registry)
    }

    /// Read and validate a bundle file without installing it.
    pub fn load(path: &Path) -> Result<ArtifactBundle> {
        ArtifactBundle::load(path).map(|(bundle, _)| bundle)
    }

    /// Validate `bundle` and make it the active one. Returns the new generation.
    pub fn swap(&self, bundle: ArtifactBundle) -> Result<u64> {
        let ensemble = bundle.validate()?;
        Ok(self.install(bundle, ensemble, None))
    }

    /// Load `path` and swap it in. On failure the active bundle stays in
    /// service and the error is returned.
    pub fn reload(&self, path: &Path) -> Result<u64> {
        match ArtifactBundle::load(path) {
            Ok((bundle, ensemble)) => Ok(self.install(bundle, ensemble, Some(path.to_path_buf()))),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    generation = self.generation(),
                    "bundle reload failed, keeping active bundle"
                );
                Err(e)
            }
        }
    }

    fn install(&self, bundle: ArtifactBundle, ensemble: EnsembleConfig, source: Option<PathBuf>) -> u64 {
        let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let models = bundle.models.len();
        let bundle_id = bundle.bundle_id;
        *slot = Some(Arc::new(LoadedBundle {
            bundle,
            ensemble,
            generation,
            source,
            installed_at: Utc::now(),
        }));
        drop(slot);

        info!(bundle_id = %bundle_id, generation, models, "artifact bundle installed");
        generation
    }

    /// Snapshot of the active bundle.
    pub fn current(&self) -> Result<Arc<LoadedBundle>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.active.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Generation of the most recent install (0 when nothing was installed).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn current_metadata(&self) -> Result<BundleInfo> {
        let loaded = self.current()?;
        Ok(BundleInfo {
            bundle_id: loaded.bundle.bundle_id,
            created_at: loaded.bundle.created_at,
            installed_at: loaded.installed_at,
            generation: loaded.generation,
            source: loaded.source.clone(),
            strategy: loaded.ensemble.strategy,
            ensemble_threshold: loaded.bundle.ensemble_threshold,
            feature_names: loaded.bundle.pipeline.feature_names(),
            models: collect_models(&loaded),
        })
    }

    /// Metadata of every model in the active bundle, sorted by model id.
    pub fn list_models(&self) -> Result<Vec<ModelMetadata>> {
        let loaded = self.current()?;
        Ok(collect_models(&loaded))
    }
}

fn collect_models(loaded: &LoadedBundle) -> Vec<ModelMetadata> {
    loaded
        .bundle
        .models
        .values()
        .map(|a| a.metadata.clone())
        .collect()
}
