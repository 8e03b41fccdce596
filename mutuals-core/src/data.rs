use crate::model::{CrawlProgress, Graph};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Result, Transaction, TransactionBehavior, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DATABASE_FILE: &str = "mutuals.db";

/// Keys of the shared key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Connections,
    ScanProgress,
    HideNames,
    ScanControl,
}

impl StoreKey {
    pub const ALL: [StoreKey; 4] = [
        StoreKey::Connections,
        StoreKey::ScanProgress,
        StoreKey::HideNames,
        StoreKey::ScanControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Connections => "connections",
            StoreKey::ScanProgress => "scanProgress",
            StoreKey::HideNames => "graphHideNames",
            StoreKey::ScanControl => "scanControl",
        }
    }
}

/// Cancellation request left in the store by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanControl {
    /// Stop and keep what was scanned so far.
    Stop,
    /// Stop and persist nothing; issued when data is cleared.
    Discard,
}

/// One write to the store. `None` values remove the key.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEntry {
    Connections(Graph),
    ScanProgress(Option<CrawlProgress>),
    HideNames(bool),
    ScanControl(Option<ScanControl>),
}

impl StoreEntry {
    pub fn key(&self) -> StoreKey {
        match self {
            StoreEntry::Connections(_) => StoreKey::Connections,
            StoreEntry::ScanProgress(_) => StoreKey::ScanProgress,
            StoreEntry::HideNames(_) => StoreKey::HideNames,
            StoreEntry::ScanControl(_) => StoreKey::ScanControl,
        }
    }

    fn encode(&self) -> Result<Option<String>> {
        match self {
            StoreEntry::Connections(graph) => to_json(graph).map(Some),
            StoreEntry::ScanProgress(progress) => progress.as_ref().map(to_json).transpose(),
            StoreEntry::HideNames(hide) => to_json(hide).map(Some),
            StoreEntry::ScanControl(control) => control.as_ref().map(to_json).transpose(),
        }
    }
}

/// Partial view of the store; only requested keys that exist are filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreRecord {
    pub connections: Option<Graph>,
    pub scan_progress: Option<CrawlProgress>,
    pub hide_names: Option<bool>,
    pub scan_control: Option<ScanControl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanSession {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: SessionStatus,
    pub scanned: usize,
    pub total: usize,
    pub error: Option<String>,
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

fn write_entries(tx: &Transaction<'_>, entries: &[StoreEntry]) -> Result<()> {
    let timestamp = current_timestamp();
    for entry in entries {
        let key = entry.key().as_str();
        match entry.encode()? {
            Some(value) => {
                tx.execute(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, timestamp],
                )?;
            }
            None => {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            }
        }
    }
    Ok(())
}

/// Durable key-value store shared by the scanner and any observer process.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn drop(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Scanner and observers may be separate processes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let db = Database {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,       -- JSON
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scan_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'cancelled', 'failed')),
    scanned INTEGER NOT NULL DEFAULT 0,
    total INTEGER NOT NULL DEFAULT 0,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_scan_sessions_start ON scan_sessions(start_time);
            ",
        )?;
        Ok(())
    }

    fn get_raw(&self, key: StoreKey) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()
    }

    fn get_value<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>> {
        self.get_raw(key)?.map(|raw| from_json(&raw)).transpose()
    }

    /// Reads the requested keys. Missing keys stay `None`.
    pub fn get(&self, keys: &[StoreKey]) -> Result<StoreRecord> {
        let mut record = StoreRecord::default();
        for key in keys {
            match key {
                StoreKey::Connections => record.connections = self.get_value(*key)?,
                StoreKey::ScanProgress => record.scan_progress = self.get_value(*key)?,
                StoreKey::HideNames => record.hide_names = self.get_value(*key)?,
                StoreKey::ScanControl => record.scan_control = self.get_value(*key)?,
            }
        }
        Ok(record)
    }

    /// Writes all entries atomically.
    pub fn set(&mut self, entries: &[StoreEntry]) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_entries(&tx, entries)?;
        tx.commit()
    }

    /// Like [`set`](Self::set), but writes nothing and returns `false` when a
    /// discard is pending. The check and the write share one write lock, so a
    /// concurrent clear can't be undone by a late scan write.
    pub fn set_guarded(&mut self, entries: &[StoreEntry]) -> Result<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let control: Option<String> = tx
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![StoreKey::ScanControl.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let control: Option<ScanControl> = control.map(|raw| from_json(&raw)).transpose()?;
        if control == Some(ScanControl::Discard) {
            return Ok(false);
        }

        write_entries(&tx, entries)?;
        tx.commit()?;
        Ok(true)
    }

    /// Removes every stored key and the scan history.
    pub fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM kv", [])?;
        tx.execute("DELETE FROM scan_sessions", [])?;
        tx.commit()
    }

    /// Clears everything and leaves a discard request for any scan still
    /// running, in one transaction.
    pub fn clear_and_discard(&mut self) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM kv", [])?;
        tx.execute("DELETE FROM scan_sessions", [])?;
        write_entries(&tx, &[StoreEntry::ScanControl(Some(ScanControl::Discard))])?;
        tx.commit()
    }

    pub fn load_connections(&self) -> Result<Option<Graph>> {
        self.get_value(StoreKey::Connections)
    }

    pub fn scan_progress(&self) -> Result<Option<CrawlProgress>> {
        self.get_value(StoreKey::ScanProgress)
    }

    pub fn hide_names(&self) -> Result<bool> {
        Ok(self.get_value(StoreKey::HideNames)?.unwrap_or(false))
    }

    pub fn set_hide_names(&mut self, hide: bool) -> Result<()> {
        self.set(&[StoreEntry::HideNames(hide)])
    }

    pub fn scan_control(&self) -> Result<Option<ScanControl>> {
        self.get_value(StoreKey::ScanControl)
    }

    // Scan session history
    pub fn create_session(&self) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO scan_sessions (id, start_time, status) VALUES (?1, ?2, ?3)",
            params![&session_id, timestamp, SessionStatus::Running.as_str()],
        )?;

        Ok(session_id)
    }

    pub fn finish_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        scanned: usize,
        total: usize,
        error: Option<&str>,
    ) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE scan_sessions SET status = ?1, end_time = ?2, scanned = ?3, total = ?4, error = ?5 WHERE id = ?6",
            params![
                status.as_str(),
                timestamp,
                scanned as i64,
                total as i64,
                error,
                session_id
            ],
        )?;
        Ok(())
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<ScanSession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time, status, scanned, total, error
             FROM scan_sessions ORDER BY start_time DESC, rowid DESC LIMIT ?1",
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], |row| {
                let status: String = row.get(3)?;
                Ok(ScanSession {
                    id: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    status: SessionStatus::from_str(&status).unwrap_or(SessionStatus::Failed),
                    scanned: row.get::<_, i64>(4)? as usize,
                    total: row.get::<_, i64>(5)? as usize,
                    error: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(sessions)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}
