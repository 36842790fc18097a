use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::i18n::Language;

/// Категория ошибки, которую видит интерфейс
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Некорректный ввод пользователя (ник вне 1-16 символов)
    Validation,
    /// Игра завершилась с ненулевым кодом
    LaunchFailed,
    /// Самообновление лаунчера не удалось
    UpdateError,
    /// Не удалось сменить настройки (например, папку установки)
    SettingsError,
    /// Бэкенд явно вернул `false`
    BackendRefused,
    /// Бэкенд вернул ошибку
    BackendError,
    /// Операция уже выполняется
    Busy,
    NoDownloadableFiles,
    NotFound,
    Internal,
}

/// Структурированная ошибка для интерфейса
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// Человекочитаемое сообщение
    pub message: String,
    /// Технические детали (для логов и кнопки "подробнее")
    pub technical: Option<String>,
    /// Подсказка для исправления
    pub recovery_hint: Option<String>,
    /// RFC 3339
    pub timestamp: String,
}

impl UserError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            technical: None,
            recovery_hint: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_technical(mut self, technical: impl Into<String>) -> Self {
        self.technical = Some(technical.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }
}

/// Fixed message for a command the backend answered with `false`
pub const BACKEND_REFUSED_MESSAGE: &str = "Backend refused the request";

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend refused the request ({operation})")]
    BackendRefused { operation: &'static str },

    #[error("Nickname must be {min}-{max} characters, got {length}")]
    InvalidNickname { length: usize, min: usize, max: usize },

    #[error("Game exited with code {exit_code}")]
    LaunchFailed {
        exit_code: i32,
        log_excerpt: Vec<String>,
    },

    #[error("Launcher update failed: {0}")]
    UpdateFailed(String),

    #[error("Failed to change settings: {0}")]
    SettingsFailed(String),

    #[error("A download is already in progress")]
    DownloadInProgress,

    #[error("Game is already running")]
    InstanceAlreadyRunning,

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("No pending update to confirm")]
    NoPendingUpdate,

    #[error("A mod batch install is already running")]
    BatchAlreadyRunning,

    #[error("No downloadable files for the selected mods")]
    NoDownloadableFiles,

    #[error("Failed to install mod '{name}': {reason}")]
    ModInstallFailed { name: String, reason: String },
}

impl LauncherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LauncherError::InvalidNickname { .. } => ErrorKind::Validation,
            LauncherError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            LauncherError::UpdateFailed(_) => ErrorKind::UpdateError,
            LauncherError::SettingsFailed(_) | LauncherError::Config(_) => ErrorKind::SettingsError,
            LauncherError::BackendRefused { .. } => ErrorKind::BackendRefused,
            LauncherError::Backend(_) | LauncherError::ModInstallFailed { .. } => {
                ErrorKind::BackendError
            }
            LauncherError::DownloadInProgress
            | LauncherError::InstanceAlreadyRunning
            | LauncherError::BatchAlreadyRunning => ErrorKind::Busy,
            LauncherError::NoDownloadableFiles => ErrorKind::NoDownloadableFiles,
            LauncherError::InstanceNotFound(_) | LauncherError::NoPendingUpdate => {
                ErrorKind::NotFound
            }
            LauncherError::Database(_) | LauncherError::Io(_) | LauncherError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Ошибка для интерфейса (русский язык по умолчанию)
    pub fn to_user_error(&self) -> UserError {
        self.localized_user_error(Language::Russian)
    }

    /// Локализованная ошибка для интерфейса
    pub fn localized_user_error(&self, lang: Language) -> UserError {
        let kind = self.kind();
        match self {
            LauncherError::Database(e) => UserError::new(
                kind,
                lang.pick("Ошибка базы данных истории", "History database error"),
            )
            .with_technical(e.to_string()),
            LauncherError::Io(e) => UserError::new(
                kind,
                match lang {
                    Language::Russian => format!("Ошибка файловой системы: {}", e.kind()),
                    Language::English => format!("Filesystem error: {}", e.kind()),
                },
            )
            .with_technical(e.to_string()),
            LauncherError::Json(e) => UserError::new(
                kind,
                lang.pick("Ошибка обработки данных", "Data processing error"),
            )
            .with_technical(e.to_string()),
            LauncherError::Config(msg) => UserError::new(
                kind,
                lang.pick("Некорректная конфигурация", "Invalid configuration"),
            )
            .with_hint(lang.pick(
                "Проверьте файл конфигурации лаунчера",
                "Check the launcher configuration file",
            ))
            .with_technical(msg.clone()),
            LauncherError::Backend(msg) => UserError::new(
                kind,
                lang.pick("Ошибка выполнения операции", "Operation failed"),
            )
            .with_hint(lang.pick(
                "Попробуйте ещё раз. Если ошибка повторяется, проверьте логи",
                "Try again. If the error persists, check the logs",
            ))
            .with_technical(msg.clone()),
            LauncherError::BackendRefused { operation } => {
                UserError::new(kind, BACKEND_REFUSED_MESSAGE).with_technical(*operation)
            }
            LauncherError::InvalidNickname { length, min, max } => UserError::new(
                kind,
                match lang {
                    Language::Russian => {
                        format!("Ник должен содержать от {} до {} символов", min, max)
                    }
                    Language::English => {
                        format!("Nickname must be between {} and {} characters", min, max)
                    }
                },
            )
            .with_technical(format!("length = {}", length)),
            LauncherError::LaunchFailed {
                exit_code,
                log_excerpt,
            } => UserError::new(
                kind,
                match lang {
                    Language::Russian => format!("Игра завершилась с ошибкой (код {})", exit_code),
                    Language::English => format!("The game crashed (exit code {})", exit_code),
                },
            )
            .with_hint(lang.pick(
                "Проверьте последние строки лога или переустановите версию",
                "Check the recent log lines or reinstall the version",
            ))
            .with_technical(log_excerpt.join("\n")),
            LauncherError::UpdateFailed(msg) => UserError::new(
                kind,
                lang.pick("Не удалось обновить лаунчер", "Failed to update the launcher"),
            )
            .with_hint(lang.pick(
                "Проверьте подключение к интернету и попробуйте снова",
                "Check your internet connection and try again",
            ))
            .with_technical(msg.clone()),
            LauncherError::SettingsFailed(msg) => UserError::new(
                kind,
                lang.pick("Не удалось изменить настройки", "Failed to change settings"),
            )
            .with_hint(lang.pick(
                "Проверьте права доступа к выбранной папке",
                "Check access permissions for the selected folder",
            ))
            .with_technical(msg.clone()),
            LauncherError::DownloadInProgress => UserError::new(
                kind,
                lang.pick("Загрузка уже выполняется", "A download is already in progress"),
            )
            .with_hint(lang.pick(
                "Дождитесь завершения или отмените текущую загрузку",
                "Wait for it to finish or cancel the current download",
            )),
            LauncherError::InstanceAlreadyRunning => UserError::new(
                kind,
                lang.pick("Игра уже запущена", "The game is already running"),
            )
            .with_hint(lang.pick(
                "Закройте игру перед повторным запуском",
                "Close the game before starting it again",
            )),
            LauncherError::InstanceNotFound(id) => UserError::new(
                kind,
                match lang {
                    Language::Russian => format!("Экземпляр '{}' не найден", id),
                    Language::English => format!("Instance '{}' not found", id),
                },
            ),
            LauncherError::NoPendingUpdate => UserError::new(
                kind,
                lang.pick("Нет обновления для подтверждения", "No pending update to confirm"),
            ),
            LauncherError::BatchAlreadyRunning => UserError::new(
                kind,
                lang.pick("Установка модов уже выполняется", "Mods are already being installed"),
            ),
            LauncherError::NoDownloadableFiles => UserError::new(
                kind,
                lang.pick(
                    "У выбранных модов нет файлов для загрузки",
                    "The selected mods have no downloadable files",
                ),
            ),
            LauncherError::ModInstallFailed { name, reason } => UserError::new(
                kind,
                match lang {
                    Language::Russian => format!("Не удалось установить мод '{}'", name),
                    Language::English => format!("Failed to install mod '{}'", name),
                },
            )
            .with_technical(reason.clone()),
        }
    }
}

impl From<anyhow::Error> for LauncherError {
    fn from(err: anyhow::Error) -> Self {
        LauncherError::Backend(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, LauncherError>;

impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_user_error().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LauncherError::InvalidNickname {
                length: 0,
                min: 1,
                max: 16
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LauncherError::BackendRefused { operation: "stop" }.kind(),
            ErrorKind::BackendRefused
        );
        assert_eq!(
            LauncherError::SettingsFailed("denied".into()).kind(),
            ErrorKind::SettingsError
        );
        assert_eq!(LauncherError::DownloadInProgress.kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_launch_failed_carries_log_excerpt() {
        let err = LauncherError::LaunchFailed {
            exit_code: 137,
            log_excerpt: vec!["line 1".into(), "line 2".into()],
        };
        let user = err.localized_user_error(Language::English);
        assert_eq!(user.kind, ErrorKind::LaunchFailed);
        assert!(user.message.contains("137"));
        assert_eq!(user.technical.as_deref(), Some("line 1\nline 2"));
    }

    #[test]
    fn test_backend_refused_has_fixed_message() {
        let user = LauncherError::BackendRefused {
            operation: "start_launch_only",
        }
        .localized_user_error(Language::Russian);
        assert_eq!(user.message, BACKEND_REFUSED_MESSAGE);
    }

    #[test]
    fn test_user_error_serialization() {
        let json = serde_json::to_value(LauncherError::NoDownloadableFiles).unwrap();
        assert_eq!(json["type"], "NO_DOWNLOADABLE_FILES");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: LauncherError = anyhow::anyhow!("socket closed").into();
        assert!(matches!(err, LauncherError::Backend(ref m) if m.contains("socket closed")));
    }
}
