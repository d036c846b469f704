//! Monitor facade tying the registry, verifier and scheduler together.
//!
//! This is the surface a shell (CLI, GUI, embedder) talks to. Resources are
//! only ever created or deleted here, by explicit register/remove calls;
//! the engine and scheduler never change the resource set.

use crate::cancel::CancelToken;
use crate::models::{Classification, Resource, ResourceKind};
use crate::registry::Registry;
use crate::scheduler::{MonitorEvent, Scheduler, StartStatus};
use crate::verify::Verifier;
use crate::{MonitorError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Integrity monitor over one resource registry
pub struct Monitor {
    registry: Arc<Registry>,
    verifier: Arc<Verifier>,
    scheduler: Scheduler,
}

impl Monitor {
    /// Open or create a monitor backed by the database at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::with_registry(Registry::open(db_path)?))
    }

    /// Monitor over an in-memory registry (test fixture)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::with_registry(Registry::open_in_memory()?))
    }

    fn with_registry(registry: Registry) -> Self {
        let registry = Arc::new(registry);
        let verifier = Arc::new(Verifier::new(registry.clone()));
        let scheduler = Scheduler::new(verifier.clone());
        Self { registry, verifier, scheduler }
    }

    /// Register a file or directory for monitoring.
    ///
    /// The path is canonicalized and must exist; its kind and display name
    /// are fixed here and never re-derived. An already-registered path is
    /// declined with [`MonitorError::DuplicatePath`].
    pub fn add_resource(&self, path: &Path) -> Result<Resource> {
        let canonical = path
            .canonicalize()
            .map_err(|_| MonitorError::ResourceNotFound(path.display().to_string()))?;

        let metadata = std::fs::metadata(&canonical)
            .map_err(|_| MonitorError::ResourceNotFound(canonical.display().to_string()))?;
        let kind = if metadata.is_file() {
            ResourceKind::File
        } else if metadata.is_dir() {
            ResourceKind::Directory
        } else {
            return Err(MonitorError::UnsupportedResource(canonical.display().to_string()));
        };

        let path_str = canonical.to_string_lossy().to_string();
        if self.registry.find_by_path(&path_str)?.is_some() {
            return Err(MonitorError::DuplicatePath(path_str));
        }

        let resource = Resource {
            name: canonical
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path_str.clone()),
            path: path_str,
            kind,
            added_at: Utc::now(),
            baseline_hash: None,
            baseline_checked_at: None,
        };
        self.registry.insert(&resource)?;

        info!(path = %resource.path, kind = resource.kind.as_str(), "resource registered");
        Ok(resource)
    }

    /// Remove a resource from monitoring. Returns whether it was registered.
    ///
    /// Works for resources that have vanished from disk: the stored path is
    /// used as-is when the given one no longer canonicalizes.
    pub fn remove_resource(&self, path: &Path) -> Result<bool> {
        let key = path
            .canonicalize()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string_lossy().to_string());

        let removed = self.registry.delete_by_path(&key)?;
        if removed {
            info!(path = %key, "resource removed");
        } else {
            warn!(path = %key, "resource not registered");
        }
        Ok(removed)
    }

    /// All registered resources in registration order
    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        self.registry.list_all()
    }

    /// Recompute and store baselines; see [`Verifier::update_baselines`]
    pub fn update_baselines(&self, cancel: &CancelToken) -> Result<usize> {
        self.verifier.update_baselines(cancel)
    }

    /// Verify all resources against their baselines; see
    /// [`Verifier::check_integrity`]
    pub fn check_integrity(&self, cancel: &CancelToken) -> Result<HashMap<String, Classification>> {
        self.verifier.check_integrity(cancel)
    }

    /// Start the background check cycle. Must be called from within a tokio
    /// runtime.
    pub fn start_background_check(
        &self,
        interval: Duration,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Result<StartStatus> {
        self.scheduler.start(interval, events)
    }

    /// Stop the background check cycle. Idempotent.
    pub fn stop_background_check(&self) {
        self.scheduler.stop();
    }

    /// Whether the background cycle is currently live
    pub fn background_check_running(&self) -> bool {
        self.scheduler.is_running()
    }
}
