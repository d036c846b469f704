//! Batch verification of registered resources against stored baselines.
//!
//! Both operations fetch the resource set once, walk it in registration
//! order and poll the cancellation token between resources. Neither ever
//! adds or removes a resource.

use crate::cancel::CancelToken;
use crate::fingerprint::fingerprint;
use crate::models::{Classification, Resource};
use crate::registry::{BaselineUpdate, Registry};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Verification engine over the resource registry
pub struct Verifier {
    registry: Arc<Registry>,
}

impl Verifier {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Recompute and persist baselines for all registered resources.
    ///
    /// Resources that cannot be fingerprinted keep their existing baseline.
    /// All successful updates are committed in one transaction when the
    /// batch ends, so a cancelled run commits exactly the prefix processed
    /// so far and a store failure commits nothing. Returns the number of
    /// resources whose baseline was updated.
    pub fn update_baselines(&self, cancel: &CancelToken) -> Result<usize> {
        let resources = self.registry.list_all()?;
        if resources.is_empty() {
            debug!("no resources registered, nothing to update");
            return Ok(0);
        }

        let mut updates: Vec<BaselineUpdate> = Vec::with_capacity(resources.len());
        for resource in &resources {
            if cancel.is_cancelled() {
                info!(processed = updates.len(), total = resources.len(), "baseline update cancelled");
                break;
            }
            match fingerprint(Path::new(&resource.path)) {
                Some(hash) => updates.push(BaselineUpdate {
                    path: resource.path.clone(),
                    hash,
                    checked_at: Utc::now(),
                }),
                None => {
                    warn!(path = %resource.path, "resource unavailable, keeping existing baseline");
                }
            }
        }

        let applied = self.registry.update_baselines(&updates)?;
        info!(updated = applied, total = resources.len(), "baselines updated");
        Ok(applied)
    }

    /// Classify every registered resource against its stored baseline.
    ///
    /// Read-only with respect to the registry. On cancellation the map
    /// built so far is returned as a normal result.
    pub fn check_integrity(&self, cancel: &CancelToken) -> Result<HashMap<String, Classification>> {
        let resources = self.registry.list_all()?;
        let mut results = HashMap::with_capacity(resources.len());

        for resource in &resources {
            if cancel.is_cancelled() {
                info!(checked = results.len(), total = resources.len(), "integrity check cancelled");
                break;
            }
            let classification = classify(resource);
            debug!(path = %resource.path, classification = classification.as_str(), "resource checked");
            results.insert(resource.path.clone(), classification);
        }

        Ok(results)
    }
}

fn classify(resource: &Resource) -> Classification {
    match fingerprint(Path::new(&resource.path)) {
        None => Classification::Unavailable,
        Some(current) => match &resource.baseline_hash {
            None => Classification::NoHash,
            Some(baseline) if *baseline == current => Classification::Passed,
            Some(_) => Classification::Failed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Arc<Registry>, Verifier) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::open_in_memory().unwrap());
        let verifier = Verifier::new(registry.clone());
        (dir, registry, verifier)
    }

    fn register_file(registry: &Registry, dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        let path = path.to_string_lossy().to_string();
        registry
            .insert(&Resource {
                path: path.clone(),
                name: name.to_string(),
                kind: ResourceKind::File,
                added_at: Utc::now(),
                baseline_hash: None,
                baseline_checked_at: None,
            })
            .unwrap();
        path
    }

    #[test]
    fn empty_registry_yields_empty_results() {
        let (_dir, _registry, verifier) = fixture();
        let cancel = CancelToken::new();

        assert_eq!(verifier.update_baselines(&cancel).unwrap(), 0);
        assert!(verifier.check_integrity(&cancel).unwrap().is_empty());
    }

    #[test]
    fn resource_without_baseline_classifies_as_no_hash() {
        let (dir, registry, verifier) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");

        let results = verifier.check_integrity(&CancelToken::new()).unwrap();
        assert_eq!(results[&path], Classification::NoHash);
    }

    #[test]
    fn update_then_check_passes_and_is_idempotent() {
        let (dir, registry, verifier) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");
        let cancel = CancelToken::new();

        assert_eq!(verifier.update_baselines(&cancel).unwrap(), 1);
        let first = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;

        assert_eq!(verifier.update_baselines(&cancel).unwrap(), 1);
        let second = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;
        assert_eq!(first, second);

        let results = verifier.check_integrity(&cancel).unwrap();
        assert_eq!(results[&path], Classification::Passed);
    }

    #[test]
    fn modified_resource_fails_without_touching_the_baseline() {
        let (dir, registry, verifier) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");
        let cancel = CancelToken::new();

        verifier.update_baselines(&cancel).unwrap();
        let baseline = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;

        fs::write(&path, "tampered").unwrap();
        let results = verifier.check_integrity(&cancel).unwrap();
        assert_eq!(results[&path], Classification::Failed);

        let after = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;
        assert_eq!(baseline, after);
    }

    #[test]
    fn vanished_resource_is_unavailable_and_keeps_its_baseline() {
        let (dir, registry, verifier) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");
        let cancel = CancelToken::new();

        verifier.update_baselines(&cancel).unwrap();
        let baseline = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;
        assert!(baseline.is_some());

        fs::remove_file(&path).unwrap();

        // The update skips it, the check reports it unavailable.
        assert_eq!(verifier.update_baselines(&cancel).unwrap(), 0);
        let results = verifier.check_integrity(&cancel).unwrap();
        assert_eq!(results[&path], Classification::Unavailable);

        let after = registry.find_by_path(&path).unwrap().unwrap().baseline_hash;
        assert_eq!(baseline, after);
    }

    #[test]
    fn cancelled_batch_returns_the_empty_prefix() {
        let (dir, registry, verifier) = fixture();
        let path = register_file(&registry, &dir, "a.txt", "aaa");

        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(verifier.update_baselines(&cancel).unwrap(), 0);
        assert!(verifier.check_integrity(&cancel).unwrap().is_empty());
        assert!(registry.find_by_path(&path).unwrap().unwrap().baseline_hash.is_none());
    }
}
