//! Filesystem watcher that reloads the bundle when its file changes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::ArtifactRegistry;
use crate::error::{EngineError, Result};

/// Keeps the underlying notify watcher alive. Dropping it stops watching.
pub struct BundleWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl BundleWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArtifactRegistry {
    /// Watch `path` and reload the registry whenever it is replaced or
    /// rewritten. A failed reload keeps the previous bundle.
    ///
    /// The parent directory is watched rather than the file itself, since an
    /// atomic save replaces the file's inode.
    pub fn watch(self: &Arc<Self>, path: &Path) -> Result<BundleWatcher> {
        let file_name = path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| EngineError::config(format!("bundle path {} has no file name", path.display())))?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let registry = Arc::clone(self);
        let target = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => handle_fs_event(&event, &registry, &target, &file_name),
                Err(e) => warn!(error = %e, "bundle watcher error"),
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %path.display(), "watching artifact bundle for changes");
        Ok(BundleWatcher {
            path: path.to_path_buf(),
            _watcher: watcher,
        })
    }
}

fn handle_fs_event(event: &Event, registry: &ArtifactRegistry, target: &Path, file_name: &OsString) {
    let relevant = matches!(
        event.kind,
        EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    );
    if !relevant {
        return;
    }
    // Temp files written during an atomic save have a different name.
    if !event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
        return;
    }

    debug!(kind = ?event.kind, path = %target.display(), "bundle file changed");
    // On failure reload() has already logged and kept the active bundle.
    if let Ok(generation) = registry.reload(target) {
        info!(path = %target.display(), generation, "hot-reloaded artifact bundle");
    }
}
