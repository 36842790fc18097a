//! Session history
//!
//! Keeps a local record of launch sessions, crashes and mod installs so the
//! UI can show "what happened last time". Every write here is best-effort
//! from the engine's point of view.

use chrono::{DateTime, Utc};
use hylaunch_core::{Branch, JobStatus, Result, SessionKind};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Чем закончилась сессия
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Active,
    Completed,
    Cancelled,
    Crashed,
    Failed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
        }
    }
}

impl FromSql for SessionOutcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "active" => Ok(SessionOutcome::Active),
            "completed" => Ok(SessionOutcome::Completed),
            "cancelled" => Ok(SessionOutcome::Cancelled),
            "crashed" => Ok(SessionOutcome::Crashed),
            "failed" => Ok(SessionOutcome::Failed),
            other => Err(FromSqlError::Other(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown SessionOutcome: {}", other),
            )))),
        }
    }
}

impl ToSql for SessionOutcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub branch: Branch,
    pub version: u32,
    pub kind: SessionKind,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub outcome: SessionOutcome,
    pub exit_code: Option<i32>,
    pub player_name: Option<String>,
}

/// A single crash in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRecord {
    pub id: String,
    pub session_id: Option<String>,
    pub branch: Branch,
    pub version: u32,
    pub exit_code: i32,
    /// Последние строки лога на момент краша
    pub log_excerpt: Vec<String>,
    pub crashed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModInstallRecord {
    pub mod_id: String,
    pub name: String,
    pub file_id: Option<u64>,
    pub branch: Branch,
    pub version: u32,
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub finished_at: String,
}

pub struct SessionHistory {
    conn: Mutex<Connection>,
}

impl SessionHistory {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = crate::db::open_db(path)?;
        log::info!("Session history opened at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(crate::db::open_in_memory()?),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }

    /// Записать начало сессии, вернуть её ID
    pub fn start_session(
        &self,
        branch: Branch,
        version: u32,
        kind: SessionKind,
        player_name: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO launch_sessions (id, branch, version, kind, started_at, outcome, player_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    branch,
                    version,
                    kind,
                    Utc::now().to_rfc3339(),
                    SessionOutcome::Active,
                    player_name
                ],
            )?;
            Ok(())
        })?;
        log::debug!("Session {} started ({} v{}, {})", id, branch, version, kind.as_str());
        Ok(id)
    }

    /// Закрыть сессию. Повторное закрытие уже закрытой сессии ничего не меняет.
    pub fn finish_session(
        &self,
        id: &str,
        outcome: SessionOutcome,
        exit_code: Option<i32>,
    ) -> Result<bool> {
        let updated = self.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE launch_sessions SET outcome = ?1, exit_code = ?2, ended_at = ?3
                 WHERE id = ?4 AND ended_at IS NULL",
                params![outcome, exit_code, Utc::now().to_rfc3339(), id],
            )?)
        })?;
        Ok(updated > 0)
    }

    pub fn record_crash(
        &self,
        session_id: Option<&str>,
        branch: Branch,
        version: u32,
        exit_code: i32,
        log_excerpt: &[String],
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let excerpt_json = serde_json::to_string(log_excerpt)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO crash_reports (id, session_id, branch, version, exit_code, log_excerpt, crashed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    session_id,
                    branch,
                    version,
                    exit_code,
                    excerpt_json,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    pub fn record_mod_install(&self, record: &ModInstallRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mod_installs (mod_id, name, file_id, branch, version, status, attempts, error, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.mod_id,
                    record.name,
                    record.file_id.map(|id| id as i64),
                    record.branch,
                    record.version,
                    record.status,
                    record.attempts,
                    record.error,
                    record.finished_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, branch, version, kind, started_at, ended_at, outcome, exit_code, player_name
                     FROM launch_sessions WHERE id = ?1",
                    params![id],
                    session_from_row,
                )
                .optional()?)
        })
    }

    /// Последние сессии, от новых к старым
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, branch, version, kind, started_at, ended_at, outcome, exit_code, player_name
                 FROM launch_sessions ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], session_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn recent_crashes(&self, limit: usize) -> Result<Vec<CrashRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, branch, version, exit_code, log_excerpt, crashed_at
                 FROM crash_reports ORDER BY crashed_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    let excerpt: String = row.get(5)?;
                    Ok(CrashRecord {
                        id: row.get(0)?,
                        session_id: row.get(1)?,
                        branch: row.get(2)?,
                        version: row.get(3)?,
                        exit_code: row.get(4)?,
                        log_excerpt: serde_json::from_str(&excerpt).unwrap_or_default(),
                        crashed_at: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn crash_count_since(&self, since: DateTime<Utc>) -> Result<u32> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM crash_reports WHERE crashed_at >= ?1",
                params![since.to_rfc3339()],
                |row| row.get(0),
            )?)
        })
    }

    pub fn mod_install_history(&self, limit: usize) -> Result<Vec<ModInstallRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT mod_id, name, file_id, branch, version, status, attempts, error, finished_at
                 FROM mod_installs ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(ModInstallRecord {
                        mod_id: row.get(0)?,
                        name: row.get(1)?,
                        file_id: row.get::<_, Option<i64>>(2)?.map(|id| id as u64),
                        branch: row.get(3)?,
                        version: row.get(4)?,
                        status: row.get(5)?,
                        attempts: row.get(6)?,
                        error: row.get(7)?,
                        finished_at: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        branch: row.get(1)?,
        version: row.get(2)?,
        kind: row.get(3)?,
        started_at: row.get(4)?,
        ended_at: row.get(5)?,
        outcome: row.get(6)?,
        exit_code: row.get(7)?,
        player_name: row.get(8)?,
    })
}
