use mutuals::commands::command_argument_builder;
use mutuals::handlers::*;
use mutuals_core::controller::SharedDatabase;
use mutuals_core::data::{Database, ScanControl, ScanSession, SessionStatus, StoreEntry};
use mutuals_core::model::CrawlProgress;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn matches_for(args: &[&str]) -> clap::ArgMatches {
    command_argument_builder()
        .try_get_matches_from(args)
        .expect("arguments should parse")
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_scan_config_defaults() {
    let matches = matches_for(&["mutuals", "scan"]);
    let (_, scan) = matches.subcommand().unwrap();
    let config = scan_config(scan);

    assert_eq!(config.data_dir, expand_path(DEFAULT_DATA_DIR));
    assert_eq!(config.api_base.as_str(), "https://discord.com/api/v9");
    assert_eq!(config.request_delay, Duration::from_secs(1));
    assert_eq!(config.timeout_secs, 10);
    assert_eq!(config.limit, None);
    assert!(!config.with_servers);
    assert!(config.token.is_none());
}

#[test]
fn test_scan_config_reads_global_flags_after_subcommand() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().to_string_lossy().to_string();
    let matches = matches_for(&[
        "mutuals",
        "scan",
        "--data-dir",
        &data_dir,
        "--delay-ms",
        "1500",
        "--timeout",
        "3",
        "--limit",
        "20",
        "--with-servers",
        "--api-base",
        "http://127.0.0.1:9999/api",
    ]);
    let (_, scan) = matches.subcommand().unwrap();
    let config = scan_config(scan);

    assert_eq!(config.data_dir, temp_dir.path());
    assert_eq!(config.database_path(), temp_dir.path().join("mutuals.db"));
    assert_eq!(config.request_delay, Duration::from_millis(1500));
    assert_eq!(config.timeout_secs, 3);
    assert_eq!(config.limit, Some(20));
    assert!(config.with_servers);
    assert_eq!(config.api_base.as_str(), "http://127.0.0.1:9999/api");
}

#[test]
fn test_scan_config_reads_global_flags_before_subcommand() {
    let matches = matches_for(&["mutuals", "--token", "abc", "count", "--json"]);
    let (name, count) = matches.subcommand().unwrap();
    assert_eq!(name, "count");
    assert!(count.get_flag("json"));

    let config = scan_config(count);
    assert_eq!(config.token.as_deref(), Some("abc"));
}

#[test]
fn test_invalid_api_base_rejected() {
    let result = command_argument_builder().try_get_matches_from([
        "mutuals",
        "scan",
        "--api-base",
        "not a url",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_request_delay_below_one_second_rejected() {
    for delay in ["0", "999"] {
        let result =
            command_argument_builder().try_get_matches_from(["mutuals", "scan", "--delay-ms", delay]);
        assert!(result.is_err(), "delay {delay} should be rejected");
    }

    let matches = matches_for(&["mutuals", "scan", "--delay-ms", "1000"]);
    let (_, scan) = matches.subcommand().unwrap();
    assert_eq!(scan_config(scan).request_delay, Duration::from_secs(1));
}

#[test]
fn test_zero_timeout_rejected() {
    let result =
        command_argument_builder().try_get_matches_from(["mutuals", "scan", "--timeout", "0"]);
    assert!(result.is_err());

    let matches = matches_for(&["mutuals", "scan", "--timeout", "1"]);
    let (_, scan) = matches.subcommand().unwrap();
    assert_eq!(scan_config(scan).timeout_secs, 1);
}

#[test]
fn test_search_results_bounded() {
    for count in ["0", "31"] {
        let result =
            command_argument_builder().try_get_matches_from(["mutuals", "search", "jo", "-n", count]);
        assert!(result.is_err(), "{count} results should be rejected");
    }

    let matches = matches_for(&["mutuals", "search", "jo", "-n", "30"]);
    let (_, search) = matches.subcommand().unwrap();
    assert_eq!(search.get_one::<usize>("results"), Some(&30));
}

#[test]
fn test_unknown_export_format_rejected() {
    let result =
        command_argument_builder().try_get_matches_from(["mutuals", "export", "-f", "xml"]);
    assert!(result.is_err());
}

#[test]
fn test_search_query_words_collected() {
    let matches = matches_for(&["mutuals", "search", "cool", "cat", "-n", "5"]);
    let (_, search) = matches.subcommand().unwrap();
    let words: Vec<&String> = search.get_many::<String>("QUERY").unwrap().collect();
    assert_eq!(words, ["cool", "cat"]);
    assert_eq!(search.get_one::<usize>("results"), Some(&5));
}

#[test]
fn test_expand_path_tilde() {
    let expanded = expand_path("~/mutuals");
    assert!(!expanded.to_string_lossy().starts_with('~'));
    assert!(expanded.ends_with("mutuals"));

    assert_eq!(expand_path("/tmp/mutuals"), PathBuf::from("/tmp/mutuals"));
}

#[test]
fn test_token_source_priority() {
    let matches = matches_for(&[
        "mutuals",
        "config",
        "--token",
        "abc",
        "--token-file",
        "/tmp/token",
    ]);
    let (_, args) = matches.subcommand().unwrap();
    let mut config = scan_config(args);

    assert_eq!(token_source(&config, true), "--token");

    config.token = None;
    assert_eq!(token_source(&config, true), "--token-file /tmp/token");

    config.token_file = None;
    assert_eq!(token_source(&config, true), "MUTUALS_TOKEN");
    assert_eq!(token_source(&config, false), "not set");
}

// ============================================================================
// Stop Request Tests
// ============================================================================

fn memory_store() -> SharedDatabase {
    Arc::new(Mutex::new(Database::in_memory().unwrap()))
}

#[test]
fn test_stop_reaches_scan_still_fetching_friend_list() {
    let store = memory_store();
    store.lock().unwrap().create_session().unwrap();

    assert_eq!(request_stop(&store).unwrap(), StopTarget::Seeding);
    let db = store.lock().unwrap();
    assert_eq!(db.scan_control().unwrap(), Some(ScanControl::Stop));
    assert!(db.scan_progress().unwrap().is_none());
}

#[test]
fn test_stop_during_crawl_reports_progress() {
    let store = memory_store();
    {
        let mut db = store.lock().unwrap();
        db.create_session().unwrap();
        db.set(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(4, 10)))])
            .unwrap();
    }

    assert_eq!(
        request_stop(&store).unwrap(),
        StopTarget::Crawling(CrawlProgress::new(4, 10))
    );
    assert_eq!(
        store.lock().unwrap().scan_control().unwrap(),
        Some(ScanControl::Stop)
    );
}

#[test]
fn test_stop_with_nothing_running() {
    let store = memory_store();
    assert_eq!(request_stop(&store).unwrap(), StopTarget::Idle);
}

// ============================================================================
// Formatting Tests
// ============================================================================

#[test]
fn test_format_timestamp() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
}

#[test]
fn test_format_duration() {
    assert_eq!(format_duration(0), "0s");
    assert_eq!(format_duration(59), "59s");
    assert_eq!(format_duration(65), "1m 05s");
    assert_eq!(format_duration(-3), "0s");
}

#[test]
fn test_format_progress() {
    assert_eq!(format_progress(&CrawlProgress::new(3, 12)), "3/12 (25%)");
    assert_eq!(format_progress(&CrawlProgress::new(0, 0)), "0/0 (0%)");
}

#[test]
fn test_format_limit() {
    assert_eq!(format_limit(None), "all friends");
    assert_eq!(format_limit(Some(0)), "all friends");
    assert_eq!(format_limit(Some(25)), "25");
}

#[test]
fn test_format_session() {
    let finished = ScanSession {
        id: "s1".to_string(),
        start_time: 0,
        end_time: Some(90),
        status: SessionStatus::Completed,
        scanned: 12,
        total: 12,
        error: None,
    };
    assert_eq!(
        format_session(&finished),
        "1970-01-01 00:00:00 UTC  completed  12/12  in 1m 30s"
    );

    let failed = ScanSession {
        id: "s2".to_string(),
        start_time: 0,
        end_time: None,
        status: SessionStatus::Failed,
        scanned: 0,
        total: 0,
        error: Some("API 401".to_string()),
    };
    let line = format_session(&failed);
    assert!(line.contains("failed"));
    assert!(line.ends_with("(API 401)"));
    assert!(!line.contains(" in "));
}
