//! SQLite persistence layer.
//!
//! Stores the user directory consulted by the connection gate and the
//! durable notification trail. Uses WAL mode for concurrent reads during
//! writes. Durable records exist independently of delivery success: a write
//! happens whether or not anyone was online to receive the push.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, Result as SqlResult, params};
use serde::Serialize;

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Connection,
}

/// A row in the user directory.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub created_at: u64,
}

/// A persisted notification.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: String,
    pub from_user_id: Option<String>,
    pub kind: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: u64,
}

/// Fields for a new durable notification.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub from_user_id: Option<&'a str>,
    pub kind: &'a str,
    pub message: &'a str,
    pub metadata: &'a serde_json::Value,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id         TEXT PRIMARY KEY,
                username   TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id       TEXT NOT NULL,
                from_user_id  TEXT,
                kind          TEXT NOT NULL,
                message       TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                is_read       INTEGER NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user_created
                ON notifications(user_id, created_at DESC);
            ",
        )?;
        Ok(())
    }

    // ── User directory ─────────────────────────────────────────────────

    pub fn insert_user(&self, id: &str, username: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username=excluded.username",
            params![id, username, now_secs() as i64],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> SqlResult<Option<UserRow>> {
        self.conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()
    }

    // ── Durable notifications ──────────────────────────────────────────

    /// Persist a notification and return the stored row.
    pub fn create_notification(&self, new: &NewNotification<'_>) -> SqlResult<NotificationRow> {
        let metadata_json =
            serde_json::to_string(new.metadata).unwrap_or_else(|_| "{}".to_string());
        let created_at = now_secs();
        self.conn.execute(
            "INSERT INTO notifications (user_id, from_user_id, kind, message, metadata_json, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                new.user_id,
                new.from_user_id,
                new.kind,
                new.message,
                metadata_json,
                created_at as i64
            ],
        )?;
        Ok(NotificationRow {
            id: self.conn.last_insert_rowid(),
            user_id: new.user_id.to_string(),
            from_user_id: new.from_user_id.map(|s| s.to_string()),
            kind: new.kind.to_string(),
            message: new.message.to_string(),
            metadata: new.metadata.clone(),
            is_read: false,
            created_at,
        })
    }

    /// List a user's notifications, newest first.
    pub fn list_notifications(&self, user_id: &str, limit: usize) -> SqlResult<Vec<NotificationRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, from_user_id, kind, message, metadata_json, is_read, created_at
             FROM notifications
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let metadata_json: String = row.get(5)?;
            Ok(NotificationRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                from_user_id: row.get(2)?,
                kind: row.get(3)?,
                message: row.get(4)?,
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::Value::Null),
                is_read: row.get::<_, i64>(6)? != 0,
                created_at: row.get::<_, i64>(7)? as u64,
            })
        })?;
        rows.collect()
    }

    /// Mark one of the user's notifications read. Returns whether a row
    /// changed (false for an unknown id or someone else's notification).
    pub fn mark_notification_read(&self, user_id: &str, id: i64) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn unread_count(&self, user_id: &str) -> SqlResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}
