use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Version number of the auto-updating "latest" slot of a branch
pub const LATEST_VERSION: u32 = 0;

// ============================================================================
// Instance Types
// ============================================================================

/// Content channel of the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Branch {
    #[default]
    Release,
    PreRelease,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::PreRelease => "pre-release",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "release" => Some(Self::Release),
            "pre-release" | "prerelease" | "pre_release" => Some(Self::PreRelease),
            _ => None,
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromSql for Branch {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_str()?;
        Branch::parse(raw).ok_or_else(|| {
            FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown Branch: {}", raw),
            )))
        })
    }
}

impl ToSql for Branch {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Результат проверки целостности установленного экземпляра
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ValidationStatus {
    Valid,
    NotInstalled,
    Corrupted,
    #[default]
    Unknown,
}

impl ValidationStatus {
    /// Files exist on disk (even if the validator flagged them)
    pub fn is_installed(&self) -> bool {
        !matches!(self, Self::NotInstalled)
    }
}

/// One installed or installable branch+version combination.
/// Records come from the backend; the engine only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub branch: Branch,
    /// 0 = "latest" pointer
    pub version: u32,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub custom_name: Option<String>,
}

impl Instance {
    pub fn is_latest(&self) -> bool {
        self.version == LATEST_VERSION
    }

    pub fn display_name(&self) -> String {
        match (&self.custom_name, self.is_latest()) {
            (Some(name), _) => name.clone(),
            (None, true) => format!("{} (latest)", self.branch),
            (None, false) => format!("{} v{}", self.branch, self.version),
        }
    }
}

// ============================================================================
// Version Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Installed,
    UpdateAvailable,
    NotInstalled,
    #[default]
    Unknown,
}

/// Состояние указателя "latest" для ветки
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatus {
    pub status: VersionState,
    #[serde(default)]
    pub installed_version: Option<u32>,
    #[serde(default)]
    pub latest_version: Option<u32>,
}

impl VersionStatus {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn needs_update(&self) -> bool {
        self.status == VersionState::UpdateAvailable
    }
}

// ============================================================================
// Backend Event Types
// ============================================================================

/// Raw `state` of a progress push event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Download,
    Update,
    Install,
    Complete,
    Launch,
    Launching,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressEvent {
    pub state: ProgressState,
    /// 0-100
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default)]
    pub message_key: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl DownloadProgressEvent {
    pub fn new(state: ProgressState, progress: f64) -> Self {
        Self {
            state,
            progress,
            downloaded_bytes: 0,
            total_bytes: 0,
            message_key: None,
            args: Vec::new(),
        }
    }

    pub fn with_bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded_bytes = downloaded;
        self.total_bytes = total;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateEvent {
    pub state: GameState,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl GameStateEvent {
    pub fn started() -> Self {
        Self {
            state: GameState::Started,
            exit_code: None,
        }
    }

    pub fn stopped(exit_code: Option<i32>) -> Self {
        Self {
            state: GameState::Stopped,
            exit_code,
        }
    }
}

/// Доступное обновление самого лаунчера
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherUpdateInfo {
    pub version: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendErrorEvent {
    pub message: String,
    #[serde(default)]
    pub technical: Option<String>,
}

/// Push events of the execution backend.
///
/// Wire form is `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum BackendEvent {
    #[serde(rename = "progress-update")]
    Progress(DownloadProgressEvent),

    #[serde(rename = "game-state")]
    GameState(GameStateEvent),

    #[serde(rename = "update:available")]
    UpdateAvailable(LauncherUpdateInfo),

    #[serde(rename = "error")]
    Error(BackendErrorEvent),
}

// ============================================================================
// Launch Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub branch: Branch,
    pub version: u32,
    #[serde(default)]
    pub player_name: Option<String>,
}

/// What a download/launch session was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    DownloadAndLaunch,
    DownloadOnly,
    LaunchOnly,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DownloadAndLaunch => "download_and_launch",
            Self::DownloadOnly => "download_only",
            Self::LaunchOnly => "launch_only",
        }
    }

    /// Session ends with the game process running
    pub fn launches(&self) -> bool {
        !matches!(self, Self::DownloadOnly)
    }
}

impl FromSql for SessionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "download_and_launch" => Ok(SessionKind::DownloadAndLaunch),
            "download_only" => Ok(SessionKind::DownloadOnly),
            "launch_only" => Ok(SessionKind::LaunchOnly),
            other => Err(FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown SessionKind: {}", other),
            )))),
        }
    }
}

impl ToSql for SessionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Backend answer for `get_pending_update_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdateInfo {
    pub old_version: u32,
    pub new_version: u32,
    pub has_old_user_data: bool,
    pub branch: Branch,
}

/// Запрос подтверждения: обновление "latest" перезапишет пользовательские данные
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdateRequest {
    pub old_version: u32,
    pub new_version: u32,
    pub has_old_user_data: bool,
    pub branch: Branch,
}

impl From<PendingUpdateInfo> for PendingUpdateRequest {
    fn from(info: PendingUpdateInfo) -> Self {
        Self {
            old_version: info.old_version,
            new_version: info.new_version,
            has_old_user_data: info.has_old_user_data,
            branch: info.branch,
        }
    }
}

// ============================================================================
// Mod Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            other => Err(FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown JobStatus: {}", other),
            )))),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// Состояние одного элемента пакетной установки модов
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl DownloadJob {
    pub fn pending(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: JobStatus::Pending,
            attempts: 0,
            error: None,
        }
    }
}

/// Mod as shown in the content browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModListing {
    pub id: String,
    pub name: String,
    /// Latest downloadable file, if the mod has one
    #[serde(default)]
    pub latest_file_id: Option<u64>,
}

/// Item handed to the batch installer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModQueueItem {
    pub id: String,
    pub name: String,
    pub file_id: Option<u64>,
}

impl From<&ModListing> for ModQueueItem {
    fn from(listing: &ModListing) -> Self {
        Self {
            id: listing.id.clone(),
            name: listing.name.clone(),
            file_id: listing.latest_file_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledMod {
    pub file_name: String,
    pub name: String,
    #[serde(default)]
    pub mod_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_parse_and_display() {
        assert_eq!(Branch::parse("release"), Some(Branch::Release));
        assert_eq!(Branch::parse("Pre-Release"), Some(Branch::PreRelease));
        assert_eq!(Branch::parse("nightly"), None);
        assert_eq!(Branch::PreRelease.to_string(), "pre-release");
        assert_eq!(
            serde_json::to_string(&Branch::PreRelease).unwrap(),
            "\"pre-release\""
        );
    }

    #[test]
    fn test_backend_event_wire_format() {
        let raw = r#"{"event":"progress-update","payload":{"state":"download","progress":42.5,"downloadedBytes":10,"totalBytes":100,"messageKey":"progress.download","args":["a"]}}"#;
        let event: BackendEvent = serde_json::from_str(raw).unwrap();
        match event {
            BackendEvent::Progress(p) => {
                assert_eq!(p.state, ProgressState::Download);
                assert_eq!(p.progress, 42.5);
                assert_eq!(p.total_bytes, 100);
                assert_eq!(p.message_key.as_deref(), Some("progress.download"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let raw = r#"{"event":"game-state","payload":{"state":"stopped","exitCode":137}}"#;
        let event: BackendEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            BackendEvent::GameState(GameStateEvent::stopped(Some(137)))
        );

        let raw = r#"{"event":"update:available","payload":{"version":"1.2.0"}}"#;
        assert!(matches!(
            serde_json::from_str::<BackendEvent>(raw).unwrap(),
            BackendEvent::UpdateAvailable(_)
        ));
    }

    #[test]
    fn test_unknown_progress_state() {
        let raw = r#"{"state":"verifying","progress":5}"#;
        let event: DownloadProgressEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.state, ProgressState::Unknown);
        assert!(event.args.is_empty());
    }

    #[test]
    fn test_validation_status_installed() {
        assert!(ValidationStatus::Valid.is_installed());
        assert!(ValidationStatus::Corrupted.is_installed());
        assert!(ValidationStatus::Unknown.is_installed());
        assert!(!ValidationStatus::NotInstalled.is_installed());
    }

    #[test]
    fn test_instance_display_name() {
        let mut instance = Instance {
            id: "release-0".into(),
            branch: Branch::Release,
            version: 0,
            validation_status: ValidationStatus::Valid,
            size_bytes: None,
            custom_name: None,
        };
        assert_eq!(instance.display_name(), "release (latest)");
        instance.version = 7;
        assert_eq!(instance.display_name(), "release v7");
        instance.custom_name = Some("Survival".into());
        assert_eq!(instance.display_name(), "Survival");
    }
}
