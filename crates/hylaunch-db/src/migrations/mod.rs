//! History schema migrations
//!
//! Applied versions are tracked in `schema_migrations`. New migrations go
//! at the end of [`MIGRATIONS`].

use rusqlite::{params, Connection};

pub struct Migration {
    /// Sequential, starting at 1
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
    /// `(table, column)`: skip the SQL when the column is already there.
    /// `ALTER TABLE ... ADD COLUMN` cannot be made idempotent in SQLite itself.
    pub unless_column: Option<(&'static str, &'static str)>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create crash_reports table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS crash_reports (
                id TEXT PRIMARY KEY,
                session_id TEXT,
                branch TEXT NOT NULL,
                version INTEGER NOT NULL,
                exit_code INTEGER NOT NULL,
                log_excerpt TEXT NOT NULL,      -- JSON array of lines
                crashed_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES launch_sessions(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_crash_reports_time ON crash_reports(crashed_at);
        "#,
        unless_column: None,
    },
    Migration {
        version: 2,
        description: "Create mod_installs table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mod_installs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mod_id TEXT NOT NULL,
                name TEXT NOT NULL,
                file_id INTEGER,
                branch TEXT NOT NULL,
                version INTEGER NOT NULL,
                status TEXT NOT NULL,           -- success/error
                attempts INTEGER NOT NULL,
                error TEXT,
                finished_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mod_installs_mod ON mod_installs(mod_id);
        "#,
        unless_column: None,
    },
    Migration {
        version: 3,
        description: "Add player_name to launch_sessions",
        sql: "ALTER TABLE launch_sessions ADD COLUMN player_name TEXT;",
        unless_column: Some(("launch_sessions", "player_name")),
    },
];

pub fn current_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.try_fold(false, |found, name| Ok(found || name? == column))
}

/// Apply pending migrations, each in its own transaction. Returns how many ran.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let from = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        let tx = conn.unchecked_transaction()?;

        let already_there = match migration.unless_column {
            Some((table, column)) => column_exists(&tx, table, column)?,
            None => false,
        };
        if already_there {
            log::debug!("Migration v{} already reflected in schema", migration.version);
        } else {
            tx.execute_batch(migration.sql)?;
        }

        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            params![migration.version, migration.description],
        )?;
        tx.commit()?;

        log::info!("History migration v{}: {}", migration.version, migration.description);
        applied += 1;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_sequential() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as i32 + 1, "{}", m.description);
        }
    }

    #[test]
    fn test_apply_once() {
        let conn = crate::db::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);

        assert_eq!(current_version(&conn).unwrap(), MIGRATIONS.len() as i32);
        assert!(column_exists(&conn, "launch_sessions", "player_name").unwrap());
        assert!(column_exists(&conn, "mod_installs", "attempts").unwrap());
        assert!(!column_exists(&conn, "mod_installs", "nope").unwrap());
    }

    #[test]
    fn test_half_applied_column_is_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE launch_sessions (id TEXT PRIMARY KEY, player_name TEXT);",
        )
        .unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());
    }
}
