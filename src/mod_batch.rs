//! Batch mod installer
//!
//! Installs the selected mods one after another on a background task, each
//! with bounded retry. Progress is published as a [`BatchSnapshot`].

use crate::backend::{accepted, ExecutionBackend};
use crate::instances::Selection;
use crate::retry::RetryPolicy;
use chrono::Utc;
use hylaunch_core::{
    DownloadJob, InstalledMod, JobStatus, LauncherError, ModListing, ModQueueItem, Result,
};
use hylaunch_db::{ModInstallRecord, SessionHistory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Batch state as seen by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub download_jobs: Vec<DownloadJob>,
    /// Items that reached a terminal status
    pub current: usize,
    pub total: usize,
    pub selected: Vec<String>,
    pub installed_mods: Vec<InstalledMod>,
    pub running: bool,
}

/// Итог пакетной установки
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Selected items without a downloadable file
    pub skipped: usize,
}

#[derive(Debug, Default)]
struct BatchState {
    listings: Vec<ModListing>,
    selected: BTreeSet<String>,
    jobs: Vec<DownloadJob>,
    current: usize,
    installed_mods: Vec<InstalledMod>,
    running: bool,
}

impl BatchState {
    fn snapshot(&self) -> BatchSnapshot {
        BatchSnapshot {
            download_jobs: self.jobs.clone(),
            current: self.current,
            total: self.jobs.len(),
            selected: self.selected.iter().cloned().collect(),
            installed_mods: self.installed_mods.clone(),
            running: self.running,
        }
    }

    fn job_mut(&mut self, index: usize) -> Option<&mut DownloadJob> {
        self.jobs.get_mut(index)
    }
}

#[derive(Clone)]
pub struct ModBatchInstaller {
    state: Arc<RwLock<BatchState>>,
    tx: Arc<watch::Sender<BatchSnapshot>>,
    policy: RetryPolicy,
    history: Option<Arc<SessionHistory>>,
}

impl ModBatchInstaller {
    pub fn new(policy: RetryPolicy) -> Self {
        let (tx, _rx) = watch::channel(BatchSnapshot::default());
        Self {
            state: Arc::new(RwLock::new(BatchState::default())),
            tx: Arc::new(tx),
            policy,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<SessionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchSnapshot> {
        self.tx.subscribe()
    }

    pub async fn snapshot(&self) -> BatchSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    async fn publish(&self) {
        let snapshot = self.state.read().await.snapshot();
        self.tx.send_replace(snapshot);
    }

    /// Replace the browsable listings. Selection of vanished mods is dropped.
    pub async fn set_listings(&self, listings: Vec<ModListing>) {
        {
            let mut state = self.state.write().await;
            let ids: BTreeSet<String> = listings.iter().map(|l| l.id.clone()).collect();
            state.selected.retain(|id| ids.contains(id));
            state.listings = listings;
        }
        self.publish().await;
    }

    /// Toggle one mod in the selection. Returns the new selected state.
    pub async fn toggle_selected(&self, id: &str) -> bool {
        let selected = {
            let mut state = self.state.write().await;
            if state.selected.remove(id) {
                false
            } else {
                state.selected.insert(id.to_string());
                true
            }
        };
        self.publish().await;
        selected
    }

    pub async fn clear_selection(&self) {
        self.state.write().await.selected.clear();
        self.publish().await;
    }

    /// Start installing `ids` (or the current selection when empty) into `target`.
    ///
    /// Rejected while another batch runs. Items without a file (unknown ids
    /// included) are skipped; if nothing is left the call fails with
    /// `NoDownloadableFiles`.
    pub async fn download_selected(
        &self,
        backend: Arc<dyn ExecutionBackend>,
        target: Selection,
        ids: &[String],
    ) -> Result<JoinHandle<BatchReport>> {
        let (items, skipped) = {
            let mut state = self.state.write().await;
            if state.running {
                return Err(LauncherError::BatchAlreadyRunning);
            }

            let wanted: BTreeSet<&str> = if ids.is_empty() {
                state.selected.iter().map(String::as_str).collect()
            } else {
                ids.iter().map(String::as_str).collect()
            };
            let chosen: Vec<ModQueueItem> = state
                .listings
                .iter()
                .filter(|l| wanted.contains(l.id.as_str()))
                .map(ModQueueItem::from)
                .collect();

            // Неизвестные id файла тоже не дадут
            let unknown: Vec<&str> = wanted
                .iter()
                .copied()
                .filter(|id| !chosen.iter().any(|item| item.id == *id))
                .collect();
            let (items, without_file): (Vec<_>, Vec<_>) =
                chosen.into_iter().partition(|item| item.file_id.is_some());
            let skipped_names: Vec<&str> = without_file
                .iter()
                .map(|i| i.name.as_str())
                .chain(unknown.iter().copied())
                .collect();

            if items.is_empty() {
                log::warn!(
                    "No downloadable files among {} selected mods: {}",
                    wanted.len(),
                    skipped_names.join(", ")
                );
                return Err(LauncherError::NoDownloadableFiles);
            }
            if !skipped_names.is_empty() {
                log::warn!(
                    "{} selected mods have no downloadable files and were skipped: {}",
                    skipped_names.len(),
                    skipped_names.join(", ")
                );
            }
            let skipped = skipped_names.len();

            state.jobs = items
                .iter()
                .map(|item| DownloadJob::pending(&item.id, &item.name))
                .collect();
            state.current = 0;
            state.running = true;
            (items, skipped)
        };
        self.publish().await;

        log::info!(
            "Starting mod batch: {} items into {}",
            items.len(),
            target
        );

        let installer = self.clone();
        Ok(tokio::spawn(async move {
            installer.run_queue(backend, target, items, skipped).await
        }))
    }

    async fn run_queue(
        &self,
        backend: Arc<dyn ExecutionBackend>,
        target: Selection,
        items: Vec<ModQueueItem>,
        skipped: usize,
    ) -> BatchReport {
        let mut report = BatchReport {
            total: items.len(),
            skipped,
            ..Default::default()
        };

        for (index, item) in items.iter().enumerate() {
            let outcome = self.install_item(backend.as_ref(), target, index, item).await;

            let job = {
                let mut state = self.state.write().await;
                if let Some(job) = state.job_mut(index) {
                    match &outcome {
                        Ok(()) => {
                            job.status = JobStatus::Success;
                            job.error = None;
                        }
                        Err(e) => {
                            job.status = JobStatus::Error;
                            job.error = Some(e.to_string());
                        }
                    }
                }
                state.current += 1;
                state.job_mut(index).cloned()
            };
            self.publish().await;

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(_) => report.failed += 1,
            }
            if let Some(job) = job {
                self.record_history(item, target, &job);
            }
        }

        self.finish(backend.as_ref(), target).await;
        log::info!(
            "Mod batch finished: {} ok, {} failed, {} skipped",
            report.succeeded,
            report.failed,
            report.skipped
        );
        report
    }

    async fn install_item(
        &self,
        backend: &dyn ExecutionBackend,
        target: Selection,
        index: usize,
        item: &ModQueueItem,
    ) -> Result<()> {
        let Some(file_id) = item.file_id else {
            return Err(LauncherError::NoDownloadableFiles);
        };

        let label = format!("Install mod '{}'", item.name);
        self.policy
            .run(&label, move |attempt| async move {
                self.set_job(index, |job| {
                    job.status = JobStatus::Running;
                    job.attempts = attempt;
                })
                .await;

                let result = accepted(
                    backend
                        .install_mod_file(&item.id, file_id, target.branch, target.version)
                        .await,
                    "install_mod_file",
                );

                if let Err(e) = &result {
                    let reason = e.to_string();
                    self.set_job(index, |job| {
                        job.status = JobStatus::Pending;
                        job.error = Some(reason);
                    })
                    .await;
                }
                result
            })
            .await
            .map_err(|e| LauncherError::ModInstallFailed {
                name: item.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn set_job(&self, index: usize, update: impl FnOnce(&mut DownloadJob)) {
        {
            let mut state = self.state.write().await;
            if let Some(job) = state.job_mut(index) {
                update(job);
            }
        }
        self.publish().await;
    }

    async fn finish(&self, backend: &dyn ExecutionBackend, target: Selection) {
        {
            let mut state = self.state.write().await;
            state.selected.clear();
            state.running = false;
        }
        self.refresh_installed(backend, target).await;
    }

    /// Install a mod file from disk with the same retry policy
    pub async fn install_local_file(
        &self,
        backend: &dyn ExecutionBackend,
        target: Selection,
        path: &Path,
    ) -> Result<()> {
        let label = format!("Install local mod {:?}", path.file_name().unwrap_or_default());
        let result = self
            .policy
            .run(&label, move |_| async move {
                accepted(
                    backend
                        .install_local_mod_file(path, target.branch, target.version)
                        .await,
                    "install_local_mod_file",
                )
            })
            .await;

        self.refresh_installed(backend, target).await;
        result
    }

    /// Reload the installed mod list for `target`. Best-effort.
    pub async fn refresh_installed(&self, backend: &dyn ExecutionBackend, target: Selection) {
        match backend.list_installed_mods(target.branch, target.version).await {
            Ok(mods) => {
                log::debug!("{} mods installed in {}", mods.len(), target);
                self.state.write().await.installed_mods = mods;
            }
            Err(e) => log::warn!("Failed to list installed mods for {}: {:#}", target, e),
        }
        self.publish().await;
    }

    fn record_history(&self, item: &ModQueueItem, target: Selection, job: &DownloadJob) {
        let Some(history) = &self.history else {
            return;
        };
        let record = ModInstallRecord {
            mod_id: item.id.clone(),
            name: item.name.clone(),
            file_id: item.file_id,
            branch: target.branch,
            version: target.version,
            status: job.status,
            attempts: job.attempts,
            error: job.error.clone(),
            finished_at: Utc::now().to_rfc3339(),
        };
        if let Err(e) = history.record_mod_install(&record) {
            log::warn!("Failed to record mod install history: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use hylaunch_core::Branch;

    fn listing(id: &str, file: Option<u64>) -> ModListing {
        ModListing {
            id: id.to_string(),
            name: format!("Mod {}", id),
            latest_file_id: file,
        }
    }

    fn target() -> Selection {
        Selection::new(Branch::Release)
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_items_succeed() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_mod("b", 2);
        let installer = ModBatchInstaller::new(RetryPolicy::default());
        installer
            .set_listings(vec![
                listing("a", Some(1)),
                listing("b", Some(2)),
                listing("c", Some(3)),
            ])
            .await;

        let handle = installer
            .download_selected(backend.clone(), target(), &ids(&["a", "b", "c"]))
            .await
            .unwrap();
        let report = handle.await.unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);

        let snapshot = installer.snapshot().await;
        assert_eq!(snapshot.current, 3);
        assert_eq!(snapshot.total, 3);
        assert!(snapshot
            .download_jobs
            .iter()
            .all(|j| j.status == JobStatus::Success));
        assert_eq!(snapshot.download_jobs[1].attempts, 3);
        assert!(!snapshot.running);

        // Strictly sequential
        let installs: Vec<String> = backend
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("install_mod_file"))
            .collect();
        assert_eq!(
            installs,
            vec![
                "install_mod_file:a:1",
                "install_mod_file:b:2",
                "install_mod_file:b:2",
                "install_mod_file:b:2",
                "install_mod_file:c:3",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_item() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_mod("bad", u32::MAX);
        let installer = ModBatchInstaller::new(RetryPolicy::default());
        installer
            .set_listings(vec![listing("bad", Some(7)), listing("good", Some(8))])
            .await;

        let report = installer
            .download_selected(backend.clone(), target(), &ids(&["bad", "good"]))
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.count_calls("install_mod_file:bad"), 3);

        let snapshot = installer.snapshot().await;
        let bad = &snapshot.download_jobs[0];
        assert_eq!(bad.status, JobStatus::Error);
        assert_eq!(bad.attempts, 3);
        assert!(bad.error.as_deref().unwrap().contains("CDN timeout"));
        assert_eq!(snapshot.current, 2);
    }

    #[tokio::test]
    async fn test_items_without_files() {
        let backend = Arc::new(MockBackend::new());
        let installer = ModBatchInstaller::new(RetryPolicy::once());
        installer
            .set_listings(vec![listing("x", None), listing("y", Some(4))])
            .await;

        assert!(matches!(
            installer
                .download_selected(backend.clone(), target(), &ids(&["x"]))
                .await,
            Err(LauncherError::NoDownloadableFiles)
        ));

        let report = installer
            .download_selected(backend.clone(), target(), &ids(&["x", "y"]))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(installer.snapshot().await.download_jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_skipped() {
        let backend = Arc::new(MockBackend::new());
        let installer = ModBatchInstaller::new(RetryPolicy::once());
        installer
            .set_listings(vec![listing("x", None), listing("y", Some(4))])
            .await;

        assert!(matches!(
            installer
                .download_selected(backend.clone(), target(), &ids(&["gone"]))
                .await,
            Err(LauncherError::NoDownloadableFiles)
        ));

        let report = installer
            .download_selected(backend.clone(), target(), &ids(&["x", "y", "gone"]))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_selection_cleared_and_installed_refreshed() {
        let backend = Arc::new(MockBackend::new());
        backend.installed_mods.lock().unwrap().push(InstalledMod {
            file_name: "a.jar".into(),
            name: "Mod a".into(),
            mod_id: Some("a".into()),
            enabled: true,
        });
        let installer = ModBatchInstaller::new(RetryPolicy::once());
        installer.set_listings(vec![listing("a", Some(1))]).await;
        assert!(installer.toggle_selected("a").await);

        // Empty id list = current selection
        installer
            .download_selected(backend.clone(), target(), &[])
            .await
            .unwrap()
            .await
            .unwrap();

        let snapshot = installer.snapshot().await;
        assert!(snapshot.selected.is_empty());
        assert_eq!(snapshot.installed_mods.len(), 1);
        assert_eq!(backend.count_calls("list_installed_mods:release:0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_batch_rejected() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_mod("slow", 1);
        let installer = ModBatchInstaller::new(RetryPolicy::default());
        installer.set_listings(vec![listing("slow", Some(1))]).await;

        let handle = installer
            .download_selected(backend.clone(), target(), &ids(&["slow"]))
            .await
            .unwrap();
        assert!(installer.is_running().await);
        assert!(matches!(
            installer
                .download_selected(backend.clone(), target(), &ids(&["slow"]))
                .await,
            Err(LauncherError::BatchAlreadyRunning)
        ));

        handle.await.unwrap();
        assert!(!installer.is_running().await);
    }

    #[tokio::test]
    async fn test_history_recorded() {
        let backend = Arc::new(MockBackend::new());
        let history = Arc::new(SessionHistory::open_in_memory().unwrap());
        let installer =
            ModBatchInstaller::new(RetryPolicy::once()).with_history(history.clone());
        installer.set_listings(vec![listing("a", Some(1))]).await;

        installer
            .download_selected(backend, target(), &ids(&["a"]))
            .await
            .unwrap()
            .await
            .unwrap();

        let records = history.mod_install_history(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_local_file_install() {
        let backend = MockBackend::new();
        let installer = ModBatchInstaller::new(RetryPolicy::once());
        installer
            .install_local_file(&backend, target(), Path::new("/tmp/cool.jar"))
            .await
            .unwrap();
        assert_eq!(backend.count_calls("install_local_mod_file:/tmp/cool.jar"), 1);

        backend
            .refuse_commands
            .store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            installer
                .install_local_file(&backend, target(), Path::new("/tmp/cool.jar"))
                .await,
            Err(LauncherError::BackendRefused { .. })
        ));
    }
}
