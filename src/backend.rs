//! Execution backend surface
//!
//! The native side that actually downloads, installs and spawns the game.
//! The engine only talks to it through this trait: queries, "start"-style
//! commands that return as soon as the request is accepted, and a stream of
//! [`BackendEvent`]s delivered by the host.

use async_trait::async_trait;
use hylaunch_core::{
    Branch, Instance, InstalledMod, LaunchOptions, LauncherError, PendingUpdateInfo, Result,
    VersionStatus,
};
use std::path::Path;

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    // Queries

    async fn list_installed_instances(&self) -> anyhow::Result<Vec<Instance>>;

    async fn resolve_versions(&self, branch: Branch) -> anyhow::Result<Vec<u32>>;

    async fn is_instance_installed(&self, branch: Branch, version: u32) -> anyhow::Result<bool>;

    async fn get_version_status(&self, branch: Branch) -> anyhow::Result<VersionStatus>;

    /// `None` when playing "latest" would not move it forward
    async fn get_pending_update_info(
        &self,
        branch: Branch,
    ) -> anyhow::Result<Option<PendingUpdateInfo>>;

    async fn is_process_running(&self) -> anyhow::Result<bool>;

    async fn get_recent_logs(&self, lines: usize) -> anyhow::Result<Vec<String>>;

    async fn list_installed_mods(
        &self,
        branch: Branch,
        version: u32,
    ) -> anyhow::Result<Vec<InstalledMod>>;

    // Commands. `Ok(false)` means the backend refused the request.

    async fn start_download_and_launch(&self, opts: &LaunchOptions) -> anyhow::Result<bool>;

    async fn start_download_only(&self, opts: &LaunchOptions) -> anyhow::Result<bool>;

    async fn start_launch_only(&self, opts: &LaunchOptions) -> anyhow::Result<bool>;

    async fn cancel_download(&self) -> anyhow::Result<bool>;

    async fn stop_process(&self) -> anyhow::Result<bool>;

    async fn copy_user_data(
        &self,
        branch: Branch,
        from_version: u32,
        to_version: u32,
    ) -> anyhow::Result<bool>;

    async fn install_mod_file(
        &self,
        mod_id: &str,
        file_id: u64,
        branch: Branch,
        version: u32,
    ) -> anyhow::Result<bool>;

    async fn install_local_mod_file(
        &self,
        path: &Path,
        branch: Branch,
        version: u32,
    ) -> anyhow::Result<bool>;

    async fn delete_instance(&self, branch: Branch, version: u32) -> anyhow::Result<bool>;

    async fn install_launcher_update(&self) -> anyhow::Result<bool>;

    async fn set_install_directory(&self, path: &Path) -> anyhow::Result<bool>;
}

/// Treat an explicit `false` from a command like a thrown error
pub fn accepted(result: anyhow::Result<bool>, operation: &'static str) -> Result<()> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => {
            log::warn!("Backend refused '{}'", operation);
            Err(LauncherError::BackendRefused { operation })
        }
        Err(e) => Err(e.into()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted() {
        assert!(accepted(Ok(true), "start_launch_only").is_ok());
        assert!(matches!(
            accepted(Ok(false), "start_launch_only"),
            Err(LauncherError::BackendRefused {
                operation: "start_launch_only"
            })
        ));
        assert!(matches!(
            accepted(Err(anyhow::anyhow!("pipe closed")), "stop_process"),
            Err(LauncherError::Backend(_))
        ));
    }
}
