use chrono::Local;
use hylaunch_core::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const LOG_PREFIX: &str = "launcher_";
const LOG_SUFFIX: &str = ".log";

/// Setup logging with one file per session: `<logs_dir>/launcher_<unix>.log`.
/// Returns the path of the session log file.
pub fn setup_logging(logs_dir: &Path, level: log::LevelFilter) -> Result<PathBuf> {
    std::fs::create_dir_all(logs_dir)?;

    let session_id = Local::now().timestamp();
    let log_file = logs_dir.join(format!("{}{}{}", LOG_PREFIX, session_id, LOG_SUFFIX));

    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("rusqlite", log::LevelFilter::Warn);

    // Нет доступа к файлу - пишем в никуда, но не падаем
    let file_output: fern::Output = match fern::log_file(&log_file) {
        Ok(file) => file.into(),
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_file, e);
            fern::Output::writer(Box::new(std::io::sink()), "\n")
        }
    };

    #[cfg(debug_assertions)]
    let logger = dispatch.chain(std::io::stdout()).chain(file_output);

    #[cfg(not(debug_assertions))]
    let logger = dispatch.chain(file_output);

    if let Err(e) = logger.apply() {
        // Логгер уже установлен (например, хостом)
        eprintln!("Failed to initialize logger: {}", e);
    }

    log::info!("=== hylaunch engine started ===");
    log::info!("Session ID: {}", session_id);
    log::info!("Log file: {:?}", log_file);

    Ok(log_file)
}

/// Delete `launcher_*.log` files older than `keep_days`. Returns how many were removed.
pub fn cleanup_old_logs(logs_dir: &Path, keep_days: u64) -> Result<usize> {
    if !logs_dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let cutoff = Duration::from_secs(keep_days * 24 * 60 * 60);
    let mut deleted = 0;

    for entry in std::fs::read_dir(logs_dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.starts_with(LOG_PREFIX) || !name.ends_with(LOG_SUFFIX) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if matches!(age, Some(age) if age > cutoff) && std::fs::remove_file(&path).is_ok() {
            log::debug!("Deleted old log file: {}", name);
            deleted += 1;
        }
    }

    if deleted > 0 {
        log::info!("Cleaned up {} old log files", deleted);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hylaunch-logs-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_cleanup_missing_dir() {
        let dir = std::env::temp_dir().join(format!("hylaunch-none-{}", uuid::Uuid::new_v4()));
        assert_eq!(cleanup_old_logs(&dir, 7).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_only_touches_launcher_logs() {
        let dir = temp_dir();
        std::fs::write(dir.join("launcher_1.log"), "old").unwrap();
        std::fs::write(dir.join("notes.txt"), "keep").unwrap();

        // keep_days = 0: всё, что старше "сейчас", удаляется
        std::thread::sleep(Duration::from_millis(20));
        let deleted = cleanup_old_logs(&dir, 0).unwrap();

        assert_eq!(deleted, 1);
        assert!(!dir.join("launcher_1.log").exists());
        assert!(dir.join("notes.txt").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
