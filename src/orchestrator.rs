//! Orchestrator
//!
//! The single owner of the selection, the active download session, the
//! running-game state and the pending update request. Every mutation goes
//! through `&mut self`; the host drives it with [`Orchestrator::run`] or by
//! calling the command methods directly.

use crate::backend::{accepted, ExecutionBackend};
use crate::config::EngineConfig;
use crate::instances::{Selection, VersionResolver};
use crate::launch::{
    DownloadBucket, DownloadController, GateDecision, LaunchSupervisor, PendingUpdateChoice,
    PendingUpdateGate, PollOutcome, StopOutcome, Transition,
};
use crate::mod_batch::{BatchReport, BatchSnapshot, ModBatchInstaller};
use hylaunch_core::{
    BackendErrorEvent, BackendEvent, Branch, DownloadProgressEvent, ErrorKind, GameState,
    GameStateEvent, LaunchOptions, LauncherError, LauncherUpdateInfo, ModListing,
    PendingUpdateRequest, Result, SessionKind, UserError, VersionStatus,
};
use hylaunch_db::{SessionHistory, SessionOutcome};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Everything the UI renders, published on every change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub selection: Selection,
    pub selected_installed: bool,
    pub is_downloading: bool,
    pub download_bucket: DownloadBucket,
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub message_key: Option<String>,
    pub message_args: Vec<String>,
    pub is_game_running: bool,
    pub version_status: VersionStatus,
    pub available_versions: Vec<u32>,
    pub installed_versions: Vec<u32>,
    pub pending_update: Option<PendingUpdateRequest>,
    pub launcher_update: Option<LauncherUpdateInfo>,
    pub last_error: Option<UserError>,
}

/// Result of `play` / `confirm_pending_update`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PlayOutcome {
    Started { kind: SessionKind },
    /// Waiting for the user to answer the pending update request
    PendingUpdate { request: PendingUpdateRequest },
    Cancelled,
}

/// Commands accepted by [`Orchestrator::run`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EngineCommand {
    Play,
    DownloadOnly,
    CancelDownload,
    StopGame,
    SwitchBranch { branch: Branch },
    SwitchVersion { version: u32 },
    ConfirmPendingUpdate { choice: PendingUpdateChoice },
    SetModListings { listings: Vec<ModListing> },
    ToggleModSelected { id: String },
    DownloadModsSelected { ids: Vec<String> },
    InstallLocalMod { path: PathBuf },
    SetNickname { nickname: String },
    DeleteInstance { branch: Branch, version: u32 },
    ApplyLauncherUpdate,
    SetInstallDirectory { path: PathBuf },
    Refresh,
}

/// Open history row and the selection it was started for
#[derive(Debug, Clone)]
struct SessionRecordRef {
    id: String,
    selection: Selection,
}

pub struct Orchestrator {
    backend: Arc<dyn ExecutionBackend>,
    config: EngineConfig,
    history: Option<Arc<SessionHistory>>,

    selection: Selection,
    nickname: Option<String>,
    selected_installed: bool,
    version_status: VersionStatus,
    available_versions: Vec<u32>,
    installed_versions: Vec<u32>,
    launcher_update: Option<LauncherUpdateInfo>,
    last_error: Option<UserError>,
    /// History rows: the game session and a download-only session can overlap
    launch_record: Option<SessionRecordRef>,
    download_record: Option<SessionRecordRef>,

    resolver: VersionResolver,
    controller: DownloadController,
    supervisor: LaunchSupervisor,
    gate: PendingUpdateGate,
    mods: ModBatchInstaller,

    state_tx: watch::Sender<EngineSnapshot>,
}

impl Orchestrator {
    /// Build the engine. History is opened from `config.history_db` when set;
    /// failing to open it only disables history.
    pub fn new(backend: Arc<dyn ExecutionBackend>, config: EngineConfig) -> Self {
        let history = config.history_db.as_deref().and_then(|path| {
            SessionHistory::open(path)
                .map(Arc::new)
                .map_err(|e| log::warn!("Session history disabled: {}", e))
                .ok()
        });
        Self::with_history(backend, config, history)
    }

    pub fn with_history(
        backend: Arc<dyn ExecutionBackend>,
        config: EngineConfig,
        history: Option<Arc<SessionHistory>>,
    ) -> Self {
        let mut mods = ModBatchInstaller::new(config.mod_retry);
        if let Some(history) = &history {
            mods = mods.with_history(history.clone());
        }
        let (state_tx, _rx) = watch::channel(EngineSnapshot::default());

        Self {
            backend,
            supervisor: LaunchSupervisor::new(config.recent_log_lines),
            config,
            history,
            selection: Selection::default(),
            nickname: None,
            selected_installed: false,
            version_status: VersionStatus::unknown(),
            available_versions: vec![hylaunch_core::LATEST_VERSION],
            installed_versions: Vec::new(),
            launcher_update: None,
            last_error: None,
            launch_record: None,
            download_record: None,
            resolver: VersionResolver::new(),
            controller: DownloadController::new(),
            gate: PendingUpdateGate::new(),
            mods,
            state_tx,
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_mods(&self) -> watch::Receiver<BatchSnapshot> {
        self.mods.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let fields = self.controller.fields();
        EngineSnapshot {
            selection: self.selection,
            selected_installed: self.selected_installed,
            is_downloading: self.controller.is_active(),
            download_bucket: self.controller.bucket(),
            progress: fields.progress,
            downloaded_bytes: fields.downloaded_bytes,
            total_bytes: fields.total_bytes,
            message_key: fields.message_key.clone(),
            message_args: fields.message_args.clone(),
            is_game_running: self.supervisor.is_running(),
            version_status: self.version_status.clone(),
            available_versions: self.available_versions.clone(),
            installed_versions: self.installed_versions.clone(),
            pending_update: self.gate.pending().cloned(),
            launcher_update: self.launcher_update.clone(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn history(&self) -> Option<&Arc<SessionHistory>> {
        self.history.as_ref()
    }

    pub fn mods(&self) -> &ModBatchInstaller {
        &self.mods
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot());
    }

    /// Log, store as `last_error`, publish and hand the error back
    fn surface(&mut self, err: LauncherError) -> LauncherError {
        log::error!("{}", err);
        self.last_error = Some(err.localized_user_error(self.config.language));
        self.publish();
        err
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Reload catalog, version lists and status for the current selection
    pub async fn refresh(&mut self) {
        let branch = self.selection.branch;
        self.available_versions = self
            .resolver
            .resolve_versions(self.backend.as_ref(), branch)
            .await;
        self.installed_versions = self
            .resolver
            .installed_versions(self.backend.as_ref(), branch)
            .await;
        self.refresh_selection_state().await;
        self.mods
            .refresh_installed(self.backend.as_ref(), self.selection)
            .await;
        self.publish();
    }

    async fn refresh_selection_state(&mut self) {
        self.selected_installed = self
            .resolver
            .is_installed(self.backend.as_ref(), self.selection)
            .await;
        self.version_status = if self.selection.is_latest() {
            self.resolver
                .version_status(self.backend.as_ref(), self.selection.branch)
                .await
        } else {
            VersionStatus::unknown()
        };
    }

    pub async fn switch_branch(&mut self, branch: Branch) {
        self.selection.switch_branch(branch);
        self.gate.discard_unless(branch, true);
        log::info!("Selected {}", self.selection);
        self.refresh().await;
    }

    pub async fn switch_version(&mut self, version: u32) {
        if !self.selection.switch_version(version) {
            return;
        }
        self.gate
            .discard_unless(self.selection.branch, self.selection.is_latest());
        log::info!("Selected {}", self.selection);
        self.refresh_selection_state().await;
        self.publish();
    }

    pub fn set_nickname(&mut self, nickname: &str) -> Result<()> {
        let nickname = nickname.trim();
        let length = nickname.chars().count();
        let (min, max) = (self.config.nickname_min_len, self.config.nickname_max_len);
        if length < min || length > max {
            return Err(self.surface(LauncherError::InvalidNickname { length, min, max }));
        }
        self.nickname = Some(nickname.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Download / launch
    // ------------------------------------------------------------------

    /// Play the selection: install or update when needed, then launch.
    pub async fn play(&mut self) -> Result<PlayOutcome> {
        if let Some(request) = self.gate.pending() {
            log::debug!("play() while an update confirmation is pending");
            return Ok(PlayOutcome::PendingUpdate {
                request: request.clone(),
            });
        }
        self.ensure_can_start(true)?;

        match self.gate.check(self.backend.as_ref(), self.selection).await {
            GateDecision::Suspend(request) => {
                self.publish();
                Ok(PlayOutcome::PendingUpdate { request })
            }
            GateDecision::Proceed => self.start_play().await,
        }
    }

    pub async fn confirm_pending_update(
        &mut self,
        choice: PendingUpdateChoice,
    ) -> Result<PlayOutcome> {
        // Проверяем до resolve, иначе запрос пропадёт вместе с ошибкой
        if choice != PendingUpdateChoice::Cancel && self.gate.pending().is_some() {
            self.ensure_can_start(true)?;
        }
        let resolved = self.gate.resolve(self.backend.as_ref(), choice).await;
        self.publish();

        match resolved {
            Ok(Some(_)) => self.start_play().await,
            Ok(None) => Ok(PlayOutcome::Cancelled),
            Err(e) => Err(self.surface(e)),
        }
    }

    pub async fn download_only(&mut self) -> Result<PlayOutcome> {
        self.ensure_can_start(false)?;
        self.start_session(SessionKind::DownloadOnly).await?;
        Ok(PlayOutcome::Started {
            kind: SessionKind::DownloadOnly,
        })
    }

    fn ensure_can_start(&mut self, launches: bool) -> Result<()> {
        if launches && self.supervisor.is_running() {
            return Err(self.surface(LauncherError::InstanceAlreadyRunning));
        }
        if self.controller.is_active() {
            return Err(self.surface(LauncherError::DownloadInProgress));
        }
        Ok(())
    }

    async fn start_play(&mut self) -> Result<PlayOutcome> {
        self.refresh_selection_state().await;
        let kind = if self.selected_installed && !self.version_status.needs_update() {
            SessionKind::LaunchOnly
        } else {
            SessionKind::DownloadAndLaunch
        };
        self.start_session(kind).await?;
        Ok(PlayOutcome::Started { kind })
    }

    async fn start_session(&mut self, kind: SessionKind) -> Result<()> {
        let selection = self.selection;
        if let Err(e) = self.controller.begin(kind, selection) {
            return Err(self.surface(e));
        }
        if kind.launches() {
            self.supervisor.begin_session();
        }
        self.last_error = None;
        self.publish();

        let opts = LaunchOptions {
            branch: selection.branch,
            version: selection.version,
            player_name: self.nickname.clone(),
        };
        let result = match kind {
            SessionKind::DownloadAndLaunch => accepted(
                self.backend.start_download_and_launch(&opts).await,
                "start_download_and_launch",
            ),
            SessionKind::DownloadOnly => accepted(
                self.backend.start_download_only(&opts).await,
                "start_download_only",
            ),
            SessionKind::LaunchOnly => accepted(
                self.backend.start_launch_only(&opts).await,
                "start_launch_only",
            ),
        };

        match result {
            Ok(()) => {
                let record = self
                    .history_start(kind, selection)
                    .map(|id| SessionRecordRef { id, selection });
                *self.record_slot(kind) = record;
                Ok(())
            }
            Err(e) => {
                self.controller.fail();
                Err(self.surface(e))
            }
        }
    }

    /// Idle at once. The backend is told inline so that a following start
    /// reaches it after the cancel; its answer is only logged.
    pub async fn cancel_download(&mut self) {
        if let Some(session) = self.controller.cancel() {
            log::info!("Download for {} cancelled", session.selection);
            self.history_finish(session.kind, SessionOutcome::Cancelled, None);
        }
        self.publish();

        if let Err(e) = accepted(self.backend.cancel_download().await, "cancel_download") {
            log::warn!("Backend cancel failed: {}", e);
        }
    }

    pub async fn stop_game(&mut self) -> Result<()> {
        match self.supervisor.request_stop(self.backend.as_ref()).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.surface(e)),
        }
    }

    // ------------------------------------------------------------------
    // Backend events
    // ------------------------------------------------------------------

    pub async fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Progress(progress) => self.on_progress(progress).await,
            BackendEvent::GameState(state) => self.on_game_state(state).await,
            BackendEvent::UpdateAvailable(info) => {
                log::info!("Launcher update available: {}", info.version);
                self.launcher_update = Some(info);
            }
            BackendEvent::Error(error) => self.on_backend_error(error),
        }
        self.publish();
    }

    async fn on_progress(&mut self, event: DownloadProgressEvent) {
        match self.controller.apply(&event) {
            Transition::Ignored | Transition::Updated => {}
            Transition::Installed {
                selection,
                finished,
            } => {
                log::info!("{} installed", selection);
                self.installed_versions = self
                    .resolver
                    .installed_versions(self.backend.as_ref(), self.selection.branch)
                    .await;
                if selection == self.selection {
                    self.selected_installed = true;
                    if selection.is_latest() {
                        self.version_status = self
                            .resolver
                            .version_status(self.backend.as_ref(), selection.branch)
                            .await;
                    }
                }
                if finished {
                    self.history_finish(SessionKind::DownloadOnly, SessionOutcome::Completed, None);
                }
            }
            Transition::LaunchAssumed { selection } => {
                log::info!("Game launching for {}", selection);
                self.supervisor.assume_running();
            }
            Transition::Cancelled { session } => {
                self.history_finish(session.kind, SessionOutcome::Cancelled, None);
            }
        }
    }

    async fn on_game_state(&mut self, event: GameStateEvent) {
        match event.state {
            GameState::Started => {
                self.controller.on_game_started();
                self.supervisor.on_started();
            }
            GameState::Stopped => {
                let outcome = self
                    .supervisor
                    .on_stopped(self.backend.as_ref(), event.exit_code)
                    .await;
                self.after_stop(outcome);
            }
        }
    }

    fn after_stop(&mut self, outcome: StopOutcome) {
        self.controller.reset_after_stop();

        match outcome.crash {
            Some(crash) => {
                self.history_crash(crash.exit_code, &crash.log_excerpt);
                self.history_finish(
                    SessionKind::LaunchOnly,
                    SessionOutcome::Crashed,
                    Some(crash.exit_code),
                );
                self.surface(LauncherError::LaunchFailed {
                    exit_code: crash.exit_code,
                    log_excerpt: crash.log_excerpt,
                });
            }
            None => self.history_finish(
                SessionKind::LaunchOnly,
                SessionOutcome::Completed,
                outcome.exit_code,
            ),
        }
    }

    fn on_backend_error(&mut self, event: BackendErrorEvent) {
        log::error!("Backend error: {}", event.message);
        if let Some(session) = self.controller.fail() {
            log::warn!("Active session reset by backend error");
            self.history_finish(session.kind, SessionOutcome::Failed, None);
        }
        let mut error = UserError::new(ErrorKind::BackendError, event.message);
        if let Some(technical) = event.technical {
            error = error.with_technical(technical);
        }
        self.last_error = Some(error);
    }

    /// One fallback poll of the game process
    pub async fn poll_tick(&mut self) {
        if !self.supervisor.should_poll() {
            return;
        }
        let outcome = self
            .supervisor
            .poll(self.backend.as_ref(), self.config.poll_interval())
            .await;
        if outcome == PollOutcome::Stopped {
            self.after_stop(StopOutcome {
                was_running: true,
                exit_code: None,
                crash: None,
            });
            self.publish();
        }
    }

    // ------------------------------------------------------------------
    // Content and maintenance
    // ------------------------------------------------------------------

    pub async fn set_mod_listings(&mut self, listings: Vec<ModListing>) {
        self.mods.set_listings(listings).await;
    }

    pub async fn toggle_mod_selected(&mut self, id: &str) -> bool {
        self.mods.toggle_selected(id).await
    }

    /// Start a batch install into the current selection on its own task
    pub async fn download_mods_selected(
        &mut self,
        ids: &[String],
    ) -> Result<JoinHandle<BatchReport>> {
        match self
            .mods
            .download_selected(self.backend.clone(), self.selection, ids)
            .await
        {
            Ok(handle) => Ok(handle),
            Err(e) => Err(self.surface(e)),
        }
    }

    pub async fn install_local_mod(&mut self, path: &Path) -> Result<()> {
        match self
            .mods
            .install_local_file(self.backend.as_ref(), self.selection, path)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.surface(e)),
        }
    }

    pub async fn delete_instance(&mut self, branch: Branch, version: u32) -> Result<()> {
        if self.supervisor.is_running() {
            return Err(self.surface(LauncherError::InstanceAlreadyRunning));
        }
        if self.controller.is_active() {
            return Err(self.surface(LauncherError::DownloadInProgress));
        }
        self.resolver.refresh_catalog(self.backend.as_ref()).await;
        if self.resolver.catalog().find(branch, version).is_none() {
            let id = Selection { branch, version }.to_string();
            return Err(self.surface(LauncherError::InstanceNotFound(id)));
        }

        if let Err(e) = accepted(
            self.backend.delete_instance(branch, version).await,
            "delete_instance",
        ) {
            return Err(self.surface(e));
        }
        log::info!("Deleted instance {} v{}", branch, version);
        self.refresh().await;
        Ok(())
    }

    pub async fn apply_launcher_update(&mut self) -> Result<()> {
        if let Err(e) = accepted(
            self.backend.install_launcher_update().await,
            "install_launcher_update",
        ) {
            return Err(self.surface(LauncherError::UpdateFailed(e.to_string())));
        }
        self.launcher_update = None;
        self.publish();
        Ok(())
    }

    pub async fn set_install_directory(&mut self, path: &Path) -> Result<()> {
        if let Err(e) = accepted(
            self.backend.set_install_directory(path).await,
            "set_install_directory",
        ) {
            return Err(self.surface(LauncherError::SettingsFailed(e.to_string())));
        }
        log::info!("Install directory changed to {:?}", path);
        self.refresh().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Host loop
    // ------------------------------------------------------------------

    pub async fn execute(&mut self, command: EngineCommand) -> Result<()> {
        log::debug!("Command: {:?}", command);
        match command {
            EngineCommand::Play => self.play().await.map(|_| ()),
            EngineCommand::DownloadOnly => self.download_only().await.map(|_| ()),
            EngineCommand::CancelDownload => {
                self.cancel_download().await;
                Ok(())
            }
            EngineCommand::StopGame => self.stop_game().await,
            EngineCommand::SwitchBranch { branch } => {
                self.switch_branch(branch).await;
                Ok(())
            }
            EngineCommand::SwitchVersion { version } => {
                self.switch_version(version).await;
                Ok(())
            }
            EngineCommand::ConfirmPendingUpdate { choice } => {
                self.confirm_pending_update(choice).await.map(|_| ())
            }
            EngineCommand::SetModListings { listings } => {
                self.set_mod_listings(listings).await;
                Ok(())
            }
            EngineCommand::ToggleModSelected { id } => {
                self.toggle_mod_selected(&id).await;
                Ok(())
            }
            EngineCommand::DownloadModsSelected { ids } => {
                self.download_mods_selected(&ids).await.map(|_| ())
            }
            EngineCommand::InstallLocalMod { path } => self.install_local_mod(&path).await,
            EngineCommand::SetNickname { nickname } => self.set_nickname(&nickname),
            EngineCommand::DeleteInstance { branch, version } => {
                self.delete_instance(branch, version).await
            }
            EngineCommand::ApplyLauncherUpdate => self.apply_launcher_update().await,
            EngineCommand::SetInstallDirectory { path } => self.set_install_directory(&path).await,
            EngineCommand::Refresh => {
                self.refresh().await;
                Ok(())
            }
        }
    }

    /// Drive the engine until `shutdown` fires or a channel closes
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<BackendEvent>,
        mut commands: mpsc::Receiver<EngineCommand>,
        shutdown: CancellationToken,
    ) {
        log::info!("Orchestrator started");
        self.refresh().await;

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Queued backend events go before the next command
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Orchestrator shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        log::warn!("Backend event channel closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    // Errors are already surfaced in the snapshot
                    Some(command) => { let _ = self.execute(command).await; }
                    None => {
                        log::info!("Command channel closed");
                        break;
                    }
                },
                _ = poll.tick() => self.poll_tick().await,
            }
        }
    }

    // ------------------------------------------------------------------
    // History (best-effort)
    // ------------------------------------------------------------------

    fn history_start(&self, kind: SessionKind, selection: Selection) -> Option<String> {
        let history = self.history.as_ref()?;
        history
            .start_session(
                selection.branch,
                selection.version,
                kind,
                self.nickname.as_deref(),
            )
            .map_err(|e| log::warn!("Failed to record session start: {}", e))
            .ok()
    }

    fn record_slot(&mut self, kind: SessionKind) -> &mut Option<SessionRecordRef> {
        if kind.launches() {
            &mut self.launch_record
        } else {
            &mut self.download_record
        }
    }

    /// Close the open row of the session of `kind`, if any
    fn history_finish(&mut self, kind: SessionKind, outcome: SessionOutcome, exit_code: Option<i32>) {
        let Some(record) = self.record_slot(kind).take() else {
            return;
        };
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.finish_session(&record.id, outcome, exit_code) {
            log::warn!("Failed to record session outcome: {}", e);
        }
    }

    /// Crash of the game session. Without an open row the current selection is used.
    fn history_crash(&self, exit_code: i32, log_excerpt: &[String]) {
        let Some(history) = &self.history else {
            return;
        };
        let (session_id, selection) = match &self.launch_record {
            Some(record) => (Some(record.id.as_str()), record.selection),
            None => (None, self.selection),
        };
        if let Err(e) = history.record_crash(
            session_id,
            selection.branch,
            selection.version,
            exit_code,
            log_excerpt,
        ) {
            log::warn!("Failed to record crash: {}", e);
        }
    }
}
