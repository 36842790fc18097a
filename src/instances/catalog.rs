//! Installed instances as last reported by the backend
//!
//! The catalog is a read-only cache: records are owned by the backend and
//! replaced wholesale on every refresh.

use crate::backend::ExecutionBackend;
use hylaunch_core::{Branch, Instance, ValidationStatus};

#[derive(Debug, Clone, Default)]
pub struct InstanceCatalog {
    instances: Vec<Instance>,
}

impl InstanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instances(instances: Vec<Instance>) -> Self {
        Self { instances }
    }

    /// Reload from the backend. On failure the catalog becomes empty
    /// and the error is only logged.
    pub async fn refresh(&mut self, backend: &dyn ExecutionBackend) -> usize {
        match backend.list_installed_instances().await {
            Ok(instances) => {
                log::debug!("Instance catalog refreshed: {} entries", instances.len());
                self.instances = instances;
                for instance in self.corrupted() {
                    log::warn!(
                        "Instance {} v{} is marked corrupted",
                        instance.branch,
                        instance.version
                    );
                }
            }
            Err(e) => {
                log::warn!("Failed to list installed instances: {:#}", e);
                self.instances.clear();
            }
        }
        self.instances.len()
    }

    pub fn for_branch(&self, branch: Branch) -> impl Iterator<Item = &Instance> {
        self.instances.iter().filter(move |i| i.branch == branch)
    }

    pub fn find(&self, branch: Branch, version: u32) -> Option<&Instance> {
        self.for_branch(branch).find(|i| i.version == version)
    }

    pub fn is_installed(&self, branch: Branch, version: u32) -> bool {
        self.validation_status(branch, version).is_installed()
    }

    pub fn validation_status(&self, branch: Branch, version: u32) -> ValidationStatus {
        self.find(branch, version)
            .map(|i| i.validation_status)
            .unwrap_or(ValidationStatus::NotInstalled)
    }

    /// Экземпляры, которые валидатор пометил как повреждённые
    pub fn corrupted(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| i.validation_status == ValidationStatus::Corrupted)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
