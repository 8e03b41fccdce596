// Tests for the key-value store and scan history

use mutuals_core::data::{
    Database, ScanControl, SessionStatus, StoreEntry, StoreKey, StoreRecord,
};
use mutuals_core::model::{CrawlProgress, Entity, Graph};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn sample_graph() -> Graph {
    vec![
        Entity::new("2", "bob").with_neighbors(["1"]),
        Entity::new("1", "alice").with_neighbors(["2", "99"]),
    ]
    .into()
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));

    let _db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));
}

#[test]
fn test_database_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path).unwrap();
    drop(db);
    assert!(Database::exists(&db_path));

    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_wal_mode_enabled() {
    let (_temp_dir, db) = create_test_db();
    let mode: String = db
        .get_connection()
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

// ============================================================================
// Key-Value Tests
// ============================================================================

#[test]
fn test_empty_store_returns_absent_keys() {
    let (_temp_dir, db) = create_test_db();
    let record = db.get(&StoreKey::ALL).unwrap();
    assert_eq!(record, StoreRecord::default());
    assert!(!db.hide_names().unwrap());
}

#[test]
fn test_set_and_get_connections_keeps_order() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[StoreEntry::Connections(sample_graph())]).unwrap();

    let graph = db.load_connections().unwrap().unwrap();
    let ids: Vec<&str> = graph.ids().collect();
    assert_eq!(ids, vec!["2", "1"]);
    assert_eq!(graph.get("1").unwrap().neighbor_ids, vec!["2", "99"]);
}

#[test]
fn test_get_only_fills_requested_keys() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[
        StoreEntry::Connections(sample_graph()),
        StoreEntry::ScanProgress(Some(CrawlProgress::new(1, 2))),
        StoreEntry::HideNames(true),
    ])
    .unwrap();

    let record = db.get(&[StoreKey::ScanProgress]).unwrap();
    assert_eq!(record.scan_progress, Some(CrawlProgress::new(1, 2)));
    assert!(record.connections.is_none());
    assert!(record.hide_names.is_none());
}

#[test]
fn test_none_removes_key() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(3, 5)))])
        .unwrap();
    db.set(&[StoreEntry::ScanProgress(None)]).unwrap();
    assert!(db.scan_progress().unwrap().is_none());
}

#[test]
fn test_overwrite_is_last_write_wins() {
    let (_temp_dir, mut db) = create_test_db();
    for i in 1..=3 {
        db.set(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(i, 3)))])
            .unwrap();
    }
    assert_eq!(db.scan_progress().unwrap(), Some(CrawlProgress::new(3, 3)));
}

#[test]
fn test_hide_names_roundtrip() {
    let (_temp_dir, mut db) = create_test_db();
    db.set_hide_names(true).unwrap();
    assert!(db.hide_names().unwrap());

    let raw: String = db
        .get_connection()
        .query_row(
            "SELECT value FROM kv WHERE key = 'graphHideNames'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(raw, "true");
}

#[test]
fn test_values_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    {
        let mut db = Database::new(&db_path).unwrap();
        db.set(&[StoreEntry::Connections(sample_graph())]).unwrap();
    }

    let db = Database::new(&db_path).unwrap();
    assert_eq!(db.load_connections().unwrap().unwrap().len(), 2);
}

#[test]
fn test_corrupt_value_is_an_error() {
    let (_temp_dir, db) = create_test_db();
    db.get_connection()
        .execute(
            "INSERT INTO kv (key, value, updated_at) VALUES ('scanProgress', 'nope', 0)",
            [],
        )
        .unwrap();
    assert!(db.scan_progress().is_err());
}

// ============================================================================
// Clear and Scan Control Tests
// ============================================================================

#[test]
fn test_clear_removes_everything() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[
        StoreEntry::Connections(sample_graph()),
        StoreEntry::HideNames(true),
    ])
    .unwrap();
    db.create_session().unwrap();

    db.clear().unwrap();
    assert_eq!(db.get(&StoreKey::ALL).unwrap(), StoreRecord::default());
    assert!(db.recent_sessions(10).unwrap().is_empty());
}

#[test]
fn test_guarded_write_refused_after_clear_and_discard() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[StoreEntry::Connections(sample_graph())]).unwrap();

    db.clear_and_discard().unwrap();
    assert_eq!(db.scan_control().unwrap(), Some(ScanControl::Discard));
    assert!(db.load_connections().unwrap().is_none());

    let written = db
        .set_guarded(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(1, 2)))])
        .unwrap();
    assert!(!written);
    assert!(db.scan_progress().unwrap().is_none());
}

#[test]
fn test_guarded_write_allowed_on_stop() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[StoreEntry::ScanControl(Some(ScanControl::Stop))])
        .unwrap();

    let written = db
        .set_guarded(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(1, 2)))])
        .unwrap();
    assert!(written);
    assert_eq!(db.scan_progress().unwrap(), Some(CrawlProgress::new(1, 2)));
}

#[test]
fn test_scan_control_serialized_lowercase() {
    let (_temp_dir, mut db) = create_test_db();
    db.set(&[StoreEntry::ScanControl(Some(ScanControl::Stop))])
        .unwrap();
    let raw: String = db
        .get_connection()
        .query_row("SELECT value FROM kv WHERE key = 'scanControl'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(raw, "\"stop\"");
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_create_session() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session().unwrap();
    assert!(!session_id.is_empty());

    let sessions = db.recent_sessions(10).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Running);
    assert!(sessions[0].end_time.is_none());
}

#[test]
fn test_finish_session() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session().unwrap();
    db.finish_session(&session_id, SessionStatus::Failed, 0, 12, Some("API 401"))
        .unwrap();

    let session = &db.recent_sessions(1).unwrap()[0];
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.total, 12);
    assert_eq!(session.error.as_deref(), Some("API 401"));
    assert!(session.end_time.is_some());
}

#[test]
fn test_recent_sessions_newest_first_and_limited() {
    let (_temp_dir, db) = create_test_db();
    let first = db.create_session().unwrap();
    let second = db.create_session().unwrap();
    let third = db.create_session().unwrap();

    let sessions = db.recent_sessions(2).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, third);
    assert_eq!(sessions[1].id, second);
    assert_ne!(sessions[1].id, first);
}

#[test]
fn test_session_status_strings() {
    for status in [
        SessionStatus::Running,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::Failed,
    ] {
        assert_eq!(SessionStatus::from_str(status.as_str()), Some(status));
    }
    assert_eq!(SessionStatus::from_str("bogus"), None);
}
