//! Version lists per branch
//!
//! Version 0 is the auto-updating "latest" pointer. It is always offered,
//! always first, and every branch switch lands on it.

use super::catalog::InstanceCatalog;
use crate::backend::ExecutionBackend;
use hylaunch_core::{Branch, VersionStatus, LATEST_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Put 0 first exactly once and drop repeated versions, keeping backend order otherwise
pub fn normalize_versions(raw: Vec<u32>) -> Vec<u32> {
    let mut seen = HashSet::with_capacity(raw.len() + 1);
    seen.insert(LATEST_VERSION);

    let mut result = Vec::with_capacity(raw.len() + 1);
    result.push(LATEST_VERSION);
    for version in raw {
        if seen.insert(version) {
            result.push(version);
        }
    }
    result
}

/// Currently selected branch + version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Selection {
    pub branch: Branch,
    pub version: u32,
}

impl Selection {
    pub fn new(branch: Branch) -> Self {
        Self {
            branch,
            version: LATEST_VERSION,
        }
    }

    /// Смена ветки всегда сбрасывает версию на "latest"
    pub fn switch_branch(&mut self, branch: Branch) -> bool {
        let changed = self.branch != branch || self.version != LATEST_VERSION;
        self.branch = branch;
        self.version = LATEST_VERSION;
        changed
    }

    pub fn switch_version(&mut self, version: u32) -> bool {
        let changed = self.version != version;
        self.version = version;
        changed
    }

    pub fn is_latest(&self) -> bool {
        self.version == LATEST_VERSION
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_latest() {
            write!(f, "{} latest", self.branch)
        } else {
            write!(f, "{} v{}", self.branch, self.version)
        }
    }
}

#[derive(Debug, Default)]
pub struct VersionResolver {
    catalog: InstanceCatalog,
}

impl VersionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &InstanceCatalog {
        &self.catalog
    }

    pub async fn refresh_catalog(&mut self, backend: &dyn ExecutionBackend) -> usize {
        self.catalog.refresh(backend).await
    }

    /// Versions offered for `branch`. Never fails: a backend error gives `[0]`.
    pub async fn resolve_versions(&self, backend: &dyn ExecutionBackend, branch: Branch) -> Vec<u32> {
        match backend.resolve_versions(branch).await {
            Ok(raw) => normalize_versions(raw),
            Err(e) => {
                log::warn!("Failed to resolve versions for {}: {:#}", branch, e);
                vec![LATEST_VERSION]
            }
        }
    }

    /// Installed versions for `branch`, newest first, 0 prefixed when the latest
    /// pointer is installed. Refreshes the catalog; a backend error gives `[]`.
    pub async fn installed_versions(
        &mut self,
        backend: &dyn ExecutionBackend,
        branch: Branch,
    ) -> Vec<u32> {
        self.catalog.refresh(backend).await;
        self.installed_from_catalog(branch)
    }

    pub fn installed_from_catalog(&self, branch: Branch) -> Vec<u32> {
        let mut concrete: Vec<u32> = self
            .catalog
            .for_branch(branch)
            .filter(|i| i.validation_status.is_installed() && !i.is_latest())
            .map(|i| i.version)
            .collect();
        concrete.sort_unstable_by(|a, b| b.cmp(a));
        concrete.dedup();

        if self.catalog.is_installed(branch, LATEST_VERSION) {
            concrete.insert(0, LATEST_VERSION);
        }
        concrete
    }

    /// Best-effort: `unknown` when the backend cannot answer
    pub async fn version_status(&self, backend: &dyn ExecutionBackend, branch: Branch) -> VersionStatus {
        match backend.get_version_status(branch).await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("Failed to get version status for {}: {:#}", branch, e);
                VersionStatus::unknown()
            }
        }
    }

    /// Is the selection installed? Asks the backend, falls back to the catalog.
    pub async fn is_installed(&self, backend: &dyn ExecutionBackend, selection: Selection) -> bool {
        match backend
            .is_instance_installed(selection.branch, selection.version)
            .await
        {
            Ok(installed) => installed,
            Err(e) => {
                log::debug!(
                    "is_instance_installed({}) failed, using catalog: {:#}",
                    selection,
                    e
                );
                self.catalog.is_installed(selection.branch, selection.version)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use hylaunch_core::VersionState;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_normalize_versions() {
        assert_eq!(normalize_versions(vec![5, 4, 3]), vec![0, 5, 4, 3]);
        assert_eq!(normalize_versions(vec![5, 0, 4, 0]), vec![0, 5, 4]);
        assert_eq!(normalize_versions(vec![3, 5, 3]), vec![0, 3, 5]);
        assert_eq!(normalize_versions(vec![]), vec![0]);
    }

    #[test]
    fn test_selection_switch() {
        let mut selection = Selection::new(Branch::Release);
        assert!(selection.switch_version(4));
        assert!(!selection.switch_version(4));
        assert_eq!(selection.to_string(), "release v4");

        assert!(selection.switch_branch(Branch::PreRelease));
        assert_eq!(selection.version, 0);

        // Same branch, but pinned version: still resets to latest
        selection.switch_version(7);
        assert!(selection.switch_branch(Branch::PreRelease));
        assert!(selection.is_latest());
        assert!(!selection.switch_branch(Branch::PreRelease));
    }

    #[tokio::test]
    async fn test_resolve_versions() {
        let backend = MockBackend::new().with_versions(Branch::Release, vec![5, 4, 3]);
        let resolver = VersionResolver::new();

        assert_eq!(
            resolver.resolve_versions(&backend, Branch::Release).await,
            vec![0, 5, 4, 3]
        );
        assert_eq!(
            resolver.resolve_versions(&backend, Branch::PreRelease).await,
            vec![0]
        );

        backend.fail_queries.store(true, Ordering::SeqCst);
        assert_eq!(
            resolver.resolve_versions(&backend, Branch::Release).await,
            vec![0]
        );
    }

    #[tokio::test]
    async fn test_installed_versions() {
        let backend = MockBackend::new()
            .with_installed(Branch::Release, 3)
            .with_installed(Branch::Release, 5)
            .with_installed(Branch::Release, 0)
            .with_installed(Branch::PreRelease, 9);
        let mut resolver = VersionResolver::new();

        assert_eq!(
            resolver.installed_versions(&backend, Branch::Release).await,
            vec![0, 5, 3]
        );
        assert_eq!(
            resolver.installed_versions(&backend, Branch::PreRelease).await,
            vec![9]
        );

        backend.fail_queries.store(true, Ordering::SeqCst);
        assert!(resolver
            .installed_versions(&backend, Branch::Release)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_version_status_best_effort() {
        let backend =
            MockBackend::new().with_version_state(Branch::Release, VersionState::UpdateAvailable);
        let resolver = VersionResolver::new();

        assert!(resolver
            .version_status(&backend, Branch::Release)
            .await
            .needs_update());

        backend.fail_queries.store(true, Ordering::SeqCst);
        assert_eq!(
            resolver.version_status(&backend, Branch::Release).await,
            VersionStatus::unknown()
        );
    }
}
