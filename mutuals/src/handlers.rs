use clap::ArgMatches;
use colored::Colorize;
use mutuals_core::control::{Command, ControlSurface, Response};
use mutuals_core::controller::{
    CrawlError, CrawlOutcome, SharedDatabase, create_event_channel,
};
use mutuals_core::crawl::{
    ScanConfig, ScanOptions, database_exists, execute_scan, generate_scan_report,
};
use mutuals_core::data::{Database, ScanControl, ScanSession, SessionStatus, StoreEntry};
use mutuals_core::index::GraphIndexBuilder;
use mutuals_core::model::{CrawlProgress, Graph};
use mutuals_core::report::{self, ExportFormat};
use mutuals_core::search::DEFAULT_LIMIT;
use mutuals_core::view::{GraphView, SearchResultView};
use mutuals_scanner::credential::TOKEN_ENV_VAR;
use mutuals_tui::{Explorer, ScanMonitor, create_monitor_channel, run_explorer, run_monitor};
use std::fmt::Display;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_DATA_DIR: &str = "~/.config/mutuals/";

// Helper functions for configuration

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Build a [`ScanConfig`] from the global command line options.
pub fn scan_config(args: &ArgMatches) -> ScanConfig {
    let data_dir = args
        .get_one::<String>("data-dir")
        .map(String::as_str)
        .unwrap_or(DEFAULT_DATA_DIR);

    let mut config = ScanConfig::new(expand_path(data_dir));
    config.token = args.get_one::<String>("token").cloned();
    config.token_file = args
        .get_one::<String>("token-file")
        .map(|path| expand_path(path));
    if let Some(api_base) = args.get_one::<Url>("api-base") {
        config.api_base = api_base.clone();
    }
    if let Some(delay) = args.get_one::<u64>("delay-ms") {
        config.request_delay = Duration::from_millis(*delay);
    }
    if let Some(timeout) = args.get_one::<u64>("timeout") {
        config.timeout_secs = *timeout;
    }
    config.limit = args.get_one::<usize>("limit").copied();
    config.with_servers = args.get_flag("with-servers");
    config
}

/// Where the token will come from, without revealing it.
pub fn token_source(config: &ScanConfig, env_present: bool) -> String {
    if config.token.is_some() {
        "--token".to_string()
    } else if let Some(ref path) = config.token_file {
        format!("--token-file {}", path.display())
    } else if env_present {
        TOKEN_ENV_VAR.to_string()
    } else {
        "not set".to_string()
    }
}

// Formatting helpers

pub fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn format_progress(progress: &CrawlProgress) -> String {
    format!(
        "{}/{} ({}%)",
        progress.current,
        progress.total,
        progress.percent()
    )
}

/// One line of scan history
pub fn format_session(session: &ScanSession) -> String {
    let mut line = format!(
        "{}  {:<9}  {}/{}",
        format_timestamp(session.start_time),
        session.status.as_str(),
        session.scanned,
        session.total
    );
    if let Some(end) = session.end_time {
        line.push_str(&format!("  in {}", format_duration(end - session.start_time)));
    }
    if let Some(ref error) = session.error {
        line.push_str(&format!("  ({})", error));
    }
    line
}

pub fn format_limit(limit: Option<usize>) -> String {
    match limit {
        Some(limit) if limit > 0 => limit.to_string(),
        _ => "all friends".to_string(),
    }
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_heading(title: &str) {
    print_divider();
    println!("{}", format!("  {}", title).bright_white().bold());
    print_divider();
    println!();
}

fn print_prompt(msg: &str) -> String {
    print!("{} ", msg.bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut response = String::new();
    if io::stdin().read_line(&mut response).is_err() {
        return String::new();
    }
    response.trim().to_lowercase()
}

fn confirmed(response: &str) -> bool {
    response == "y" || response == "yes"
}

fn exit_with_error(message: impl Display) -> ! {
    eprintln!("{} {}", "✗".red().bold(), message.to_string().red());
    std::process::exit(1);
}

fn print_json(response: &Response) {
    match response.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => exit_with_error(e),
    }
    if response.is_error() {
        std::process::exit(1);
    }
}

// Store helpers

/// Opens the database, creating the data directory if needed.
fn open_or_create_store(config: &ScanConfig) -> SharedDatabase {
    if let Err(e) = fs::create_dir_all(&config.data_dir) {
        exit_with_error(format!(
            "Could not create {}: {}",
            config.data_dir.display(),
            e
        ));
    }
    config.open_store().unwrap_or_else(|e| exit_with_error(e))
}

/// Opens an existing database; there is nothing to read otherwise.
fn open_existing_store(config: &ScanConfig) -> SharedDatabase {
    if !database_exists(&config.data_dir) {
        exit_with_error(format!(
            "No database at {}. Run `mutuals init` or `mutuals scan` first.",
            config.database_path().display()
        ));
    }
    config.open_store().unwrap_or_else(|e| exit_with_error(e))
}

/// Stored graph and hide-names preference; exits when nothing was scanned yet.
fn load_graph(store: &SharedDatabase) -> (Graph, bool) {
    let db = store.lock().unwrap_or_else(PoisonError::into_inner);
    let loaded = db
        .load_connections()
        .and_then(|graph| Ok((graph, db.hide_names()?)));
    match loaded {
        Ok((Some(graph), hide_names)) => (graph, hide_names),
        Ok((None, _)) => exit_with_error("No scan stored yet. Run `mutuals scan` first."),
        Err(e) => exit_with_error(format!("Could not read stored graph: {}", e)),
    }
}

/// What a stop request found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Crawling(CrawlProgress),
    /// Running but no friend finished yet.
    Seeding,
    Idle,
}

/// Leaves a stop request for the scanning process to pick up. The request
/// is written even with no progress stored, since a scan still fetching its
/// friend list has none; `start` resets it for the next scan.
pub fn request_stop(store: &SharedDatabase) -> Result<StopTarget, CrawlError> {
    let mut db = store.lock().unwrap_or_else(PoisonError::into_inner);
    db.set(&[StoreEntry::ScanControl(Some(ScanControl::Stop))])?;

    if let Some(progress) = db.scan_progress()? {
        return Ok(StopTarget::Crawling(progress));
    }
    let running = db
        .recent_sessions(1)?
        .first()
        .is_some_and(|session| session.status == SessionStatus::Running);
    Ok(if running {
        StopTarget::Seeding
    } else {
        StopTarget::Idle
    })
}

fn write_export(graph: &Graph, format: ExportFormat, hide_names: bool, path: &Path) {
    let content = report::export(graph, format, hide_names)
        .unwrap_or_else(|e| exit_with_error(format!("Could not render export: {}", e)));
    if let Err(e) = report::save_report(&content, path) {
        exit_with_error(format!("Could not write {}: {}", path.display(), e));
    }
    println!(
        "{} Exported {} friends to {}",
        "✓".green().bold(),
        graph.len().to_string().cyan(),
        path.display().to_string().bright_white()
    );
}

// Handlers

pub fn handle_init(args: &ArgMatches) {
    print_heading("MUTUALS INITIALIZATION");

    let config = scan_config(args);
    let force = args.get_flag("force");
    let db_path = config.database_path();

    println!("{} Parsed arguments", "✓".green().bold());
    println!(
        "{} Target: {}",
        "→".blue(),
        config.data_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();
            println!(
                "{}",
                "Overwriting deletes the stored graph and scan history.".yellow()
            );

            let response = print_prompt("Do you want to continue? [y/N]:");
            println!();

            if !confirmed(&response) {
                println!("{} Initialization cancelled.", "✗".red().bold());
                return;
            }
        }
        if let Err(e) = Database::drop(&db_path) {
            exit_with_error(format!("Could not remove existing database: {}", e));
        }
        println!("{} Existing database removed", "✓".green().bold());
        println!();
    }

    println!("{} Creating directory structure...", "→".blue());
    if let Err(e) = fs::create_dir_all(&config.data_dir) {
        exit_with_error(format!(
            "Could not create {}: {}",
            config.data_dir.display(),
            e
        ));
    }

    println!("{} Creating database...", "→".blue());
    if let Err(e) = Database::new(&db_path) {
        exit_with_error(format!("Could not create database: {}", e));
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!(
        "{} Token: {}",
        "ℹ".blue(),
        token_source(&config, std::env::var_os(TOKEN_ENV_VAR).is_some()).bright_white()
    );
    println!();
}

pub async fn handle_count(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_or_create_store(&config);
    let controller = config
        .build_controller(store, None)
        .unwrap_or_else(|e| exit_with_error(e));
    let surface = ControlSurface::new(Arc::new(controller));

    let response = surface.handle(Command::Count).await;
    if args.get_flag("json") {
        print_json(&response);
        return;
    }

    match response {
        Response::Count { count } => println!(
            "{} {} friends to scan",
            "✓".green().bold(),
            count.to_string().cyan()
        ),
        Response::Error { error } => exit_with_error(error),
        other => debug!("Unexpected count response: {:?}", other),
    }
}

fn print_scan_header(config: &ScanConfig) {
    println!("{} Scanning friends", "→".blue().bold());
    println!("Limit: {}", format_limit(config.limit));
    println!("Delay: {}ms", config.request_delay.as_millis());
    println!(
        "Mutual servers: {}\n",
        if config.with_servers { "yes" } else { "no" }
    );
}

pub async fn handle_scan(args: &ArgMatches) {
    let config = scan_config(args);
    let json = args.get_flag("json");
    let quiet = args.get_flag("quiet");

    // Created up front so a fresh install can scan without `init`
    drop(open_or_create_store(&config));

    if !json && !quiet {
        print_scan_header(&config);
    }

    let result = if args.get_flag("tui") {
        scan_with_monitor(&config).await
    } else {
        let options = ScanOptions {
            config: config.clone(),
            show_progress_bars: !json && !quiet,
        };
        execute_scan(options, None).await
    };

    if let (Ok(CrawlOutcome::Completed(graph)), Some(path)) =
        (&result, args.get_one::<PathBuf>("output"))
    {
        let format = args
            .get_one::<String>("format")
            .and_then(|f| ExportFormat::from_str(f))
            .unwrap_or(ExportFormat::Text);
        write_export(graph, format, false, path);
    }

    if json {
        print_json(&Response::from(result));
        return;
    }

    match result {
        Ok(CrawlOutcome::Completed(graph)) => {
            println!("\n{} Scan complete!\n", "✓".green().bold());
            print!("{}", generate_scan_report(&graph));
        }
        Ok(CrawlOutcome::Cancelled { partial }) => println!(
            "{} Scan stopped. {} friends kept",
            "→".yellow().bold(),
            partial.to_string().cyan()
        ),
        Err(e) => exit_with_error(format!("Scan failed: {}", e)),
    }
}

/// Runs the scan with the terminal monitor on a blocking thread. Leaving the
/// monitor early stops the scan and keeps what was scanned.
async fn scan_with_monitor(config: &ScanConfig) -> Result<CrawlOutcome, CrawlError> {
    let store = config.open_store()?;
    let (callback, rx) = create_event_channel();
    let controller = Arc::new(config.build_controller(store, Some(callback))?);
    let monitor = ScanMonitor::new(rx);
    let should_exit = Arc::new(AtomicBool::new(false));

    let ui = {
        let controller = Arc::clone(&controller);
        let should_exit = Arc::clone(&should_exit);
        tokio::task::spawn_blocking(move || {
            let result = run_monitor(monitor, should_exit, || controller.stop());
            if controller.is_running() {
                controller.stop();
            }
            result
        })
    };

    let result = controller.start(config.limit).await;
    if result.is_err() {
        // nothing left to watch
        should_exit.store(true, Ordering::Relaxed);
    }

    match ui.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Scan monitor failed: {}", e),
        Err(e) => warn!("Scan monitor did not shut down cleanly: {}", e),
    }
    result
}

pub fn handle_status(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);

    if args.get_flag("watch") {
        watch_scan(store);
        return;
    }

    let history = *args.get_one::<usize>("history").unwrap_or(&5);
    let db = store.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = print_status(&db, history) {
        exit_with_error(format!("Could not read status: {}", e));
    }
}

fn print_status(db: &Database, history: usize) -> Result<(), CrawlError> {
    print_heading("SCAN STATUS");

    match db.scan_progress()? {
        Some(progress) => {
            println!(
                "{} Scan running: {}",
                "→".blue().bold(),
                format_progress(&progress).cyan()
            );
            if db.scan_control()?.is_some() {
                println!("{} Stop requested", "⚠".yellow().bold());
            }
        }
        None => println!("{} No scan running", "•".dimmed()),
    }

    match db.load_connections()? {
        Some(graph) => {
            let edges = GraphIndexBuilder::build_edges(&graph);
            println!(
                "{} Stored graph: {} friends, {} connections",
                "✓".green().bold(),
                graph.len().to_string().cyan(),
                edges.len().to_string().cyan()
            );
        }
        None => println!("{} No graph stored yet", "•".dimmed()),
    }
    println!(
        "{} Names hidden: {}",
        "ℹ".blue(),
        if db.hide_names()? { "yes" } else { "no" }
    );

    let sessions = db.recent_sessions(history)?;
    if !sessions.is_empty() {
        println!("\n{}", "RECENT SCANS".bright_blue().bold());
        for session in &sessions {
            println!("  {}", format_session(session));
        }
    }
    println!();
    Ok(())
}

/// Monitors a scan running in another process through the store.
fn watch_scan(store: SharedDatabase) {
    let (_events, rx) = create_monitor_channel();
    let monitor = ScanMonitor::new(rx).with_store(Arc::clone(&store));
    let on_stop = move || {
        if let Err(e) = request_stop(&store) {
            warn!("Could not request stop: {}", e);
        }
    };
    if let Err(e) = run_monitor(monitor, Arc::new(AtomicBool::new(false)), on_stop) {
        exit_with_error(format!("Monitor failed: {}", e));
    }
}

pub fn handle_stop(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);

    let target = request_stop(&store)
        .unwrap_or_else(|e| exit_with_error(format!("Could not request stop: {}", e)));
    match target {
        StopTarget::Crawling(progress) => println!(
            "{} Stop requested at {}. Friends scanned so far are kept.",
            "✓".green().bold(),
            format_progress(&progress).cyan()
        ),
        StopTarget::Seeding => println!(
            "{} Stop requested. The scan is still fetching the friend list and will keep nothing new.",
            "✓".green().bold()
        ),
        StopTarget::Idle => println!("{} No scan running", "•".dimmed()),
    }
}

pub fn handle_clear(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);

    if !args.get_flag("yes") {
        println!(
            "{}",
            "This deletes the stored graph and scan history, and cancels any running scan."
                .yellow()
        );
        let response = print_prompt("Do you want to continue? [y/N]:");
        if !confirmed(&response) {
            println!("{} Clear cancelled.", "✗".red().bold());
            return;
        }
    }

    let result = store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear_and_discard();
    match result {
        Ok(()) => println!("{} Stored data cleared", "✓".green().bold()),
        Err(e) => exit_with_error(format!("Could not clear stored data: {}", e)),
    }
}

fn print_search_result(view: &GraphView, result: &SearchResultView) {
    let connections = view.graph().connection_count(&result.id);
    println!(
        "{} {}",
        result.name.bright_white().bold(),
        report::format_connection_count(connections).dimmed()
    );
    println!("    {}", result.meta.dimmed());
    if !view.hide_names()
        && let Some(entity) = view.graph().get(&result.id)
    {
        println!("    {}", entity.profile_url().blue());
    }
}

pub fn handle_search(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);
    let query = args
        .get_many::<String>("QUERY")
        .map(|words| words.map(String::as_str).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let max_results = *args.get_one::<usize>("results").unwrap_or(&DEFAULT_LIMIT);

    let (graph, hide_names) = load_graph(&store);
    let mut view = GraphView::load(graph, hide_names);
    view.open_search();
    view.set_query(&query);

    let results = view.search_results();
    if results.is_empty() {
        println!("{} No friends match '{}'", "•".dimmed(), query);
        return;
    }
    for result in results.iter().take(max_results) {
        print_search_result(&view, result);
    }
}

pub fn handle_export(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);
    let format = args
        .get_one::<String>("format")
        .and_then(|f| ExportFormat::from_str(f))
        .unwrap_or(ExportFormat::Json);

    let (graph, stored_hide_names) = load_graph(&store);
    let hide_names = args.get_flag("hide-names") || stored_hide_names;

    match args.get_one::<PathBuf>("output") {
        Some(path) => write_export(&graph, format, hide_names, path),
        None => {
            let content = report::export(&graph, format, hide_names)
                .unwrap_or_else(|e| exit_with_error(format!("Could not render export: {}", e)));
            println!("{}", content.trim_end());
        }
    }
}

pub fn handle_explore(args: &ArgMatches) {
    let config = scan_config(args);
    let store = open_existing_store(&config);

    let explorer = Explorer::from_store(store)
        .unwrap_or_else(|e| exit_with_error(format!("Could not load stored graph: {}", e)));
    let Some(mut explorer) = explorer else {
        println!(
            "{} No scan stored yet. Run `mutuals scan` first.",
            "•".dimmed()
        );
        return;
    };

    if let Err(e) = run_explorer(&mut explorer) {
        exit_with_error(format!("Explorer failed: {}", e));
    }
}

pub fn handle_config(args: &ArgMatches) {
    let config = scan_config(args);
    let db_path = config.database_path();

    print_heading("CONFIGURATION");
    println!(
        "{} Data directory: {}",
        "•".blue(),
        config.data_dir.display().to_string().bright_white()
    );
    println!(
        "{} Database: {} {}",
        "•".blue(),
        db_path.display().to_string().bright_white(),
        if Database::exists(&db_path) {
            "(exists)".green()
        } else {
            "(not created)".yellow()
        }
    );
    println!(
        "{} API base: {}",
        "•".blue(),
        config.api_base.as_str().bright_white()
    );
    println!(
        "{} Token: {}",
        "•".blue(),
        token_source(&config, std::env::var_os(TOKEN_ENV_VAR).is_some()).bright_white()
    );
    println!(
        "{} Request delay: {}ms",
        "•".blue(),
        config.request_delay.as_millis()
    );
    println!("{} Timeout: {}s", "•".blue(), config.timeout_secs);
    println!("{} Limit: {}", "•".blue(), format_limit(config.limit));
    println!(
        "{} Mutual servers: {}",
        "•".blue(),
        if config.with_servers { "yes" } else { "no" }
    );
    println!();
}
