use rusqlite::Connection;
use std::path::Path;

use crate::migrations;

/// Базовая схема. Всё, что добавлено позже, живёт в миграциях.
const BASE_SCHEMA: &str = r#"
    -- Сессии загрузки/запуска
    CREATE TABLE IF NOT EXISTS launch_sessions (
        id TEXT PRIMARY KEY,
        branch TEXT NOT NULL,               -- release/pre-release
        version INTEGER NOT NULL,           -- 0 = latest
        kind TEXT NOT NULL,                 -- download_and_launch/download_only/launch_only
        started_at TEXT NOT NULL,
        ended_at TEXT,
        outcome TEXT NOT NULL DEFAULT 'active',
        exit_code INTEGER
    );
"#;

/// Создать схему и прогнать миграции на открытом соединении
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // Включаем foreign key constraints
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute_batch(BASE_SCHEMA)?;

    // Run versioned migrations
    migrations::run_migrations(conn)?;

    Ok(())
}

pub fn open_db(path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create history db directory {:?}: {}", parent, e);
            }
        }
    }
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_db(&conn)?;
    Ok(conn)
}
