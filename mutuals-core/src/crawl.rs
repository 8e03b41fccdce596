use crate::controller::{
    CrawlController, CrawlError, CrawlEvent, CrawlEventCallback, CrawlOutcome, SharedDatabase,
    DEFAULT_REQUEST_DELAY,
};
use crate::data::{DATABASE_FILE, Database};
use crate::model::Graph;
use indicatif::{ProgressBar, ProgressStyle};
use mutuals_scanner::{
    ChainedProvider, DEFAULT_API_BASE, EnvToken, RelationshipClient, StaticToken, TokenFile,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Everything needed to build a scanner against the real API.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub data_dir: PathBuf,
    pub api_base: Url,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    pub request_delay: Duration,
    pub timeout_secs: u64,
    pub limit: Option<usize>,
    pub with_servers: bool,
}

impl ScanConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            api_base: Url::parse(DEFAULT_API_BASE).expect("default API base is a valid URL"),
            token: None,
            token_file: None,
            request_delay: DEFAULT_REQUEST_DELAY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            limit: None,
            with_servers: false,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Explicit token first, then the token file, then the environment.
    pub fn credential_provider(&self) -> ChainedProvider {
        let mut chain = ChainedProvider::new();
        if let Some(ref token) = self.token {
            chain = chain.with(StaticToken::new(token.clone()));
        }
        if let Some(ref path) = self.token_file {
            chain = chain.with(TokenFile::new(path.clone()));
        }
        chain.with(EnvToken::default())
    }

    pub fn open_store(&self) -> Result<SharedDatabase, CrawlError> {
        Ok(Arc::new(Mutex::new(Database::new(&self.database_path())?)))
    }

    pub fn build_client(&self) -> Result<RelationshipClient, CrawlError> {
        Ok(RelationshipClient::with_timeout(
            self.api_base.clone(),
            self.timeout_secs,
        )?)
    }

    pub fn build_controller(
        &self,
        store: SharedDatabase,
        callback: Option<CrawlEventCallback>,
    ) -> Result<CrawlController<RelationshipClient>, CrawlError> {
        let mut controller =
            CrawlController::new(self.build_client()?, self.credential_provider(), store)
                .with_request_delay(self.request_delay)
                .with_mutual_servers(self.with_servers);
        if let Some(callback) = callback {
            controller = controller.with_progress_callback(callback);
        }
        Ok(controller)
    }
}

/// Options for a scan started from the command line
pub struct ScanOptions {
    pub config: ScanConfig,
    pub show_progress_bars: bool,
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_message("Fetching friend list...");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Wraps `callback` so every event also moves the progress bar.
fn progress_callback(pb: ProgressBar, callback: Option<CrawlEventCallback>) -> CrawlEventCallback {
    Arc::new(move |event: CrawlEvent| {
        match &event {
            CrawlEvent::Started { scanning, total } => {
                pb.set_length(*scanning as u64);
                pb.set_message(format!("{} friends total", total));
            }
            CrawlEvent::EntityScanned { progress, name, .. } => {
                pb.set_position(progress.current as u64);
                pb.set_message(name.clone());
            }
            CrawlEvent::EntityFailed { name, error, .. } => {
                pb.println(format!("[!] Could not fetch mutuals for {}: {}", name, error));
            }
            CrawlEvent::Finished { .. } => {}
        }
        if let Some(ref callback) = callback {
            callback(event);
        }
    })
}

/// Runs one scan to completion, stopping early on Ctrl-C.
pub async fn execute_scan(
    options: ScanOptions,
    event_callback: Option<CrawlEventCallback>,
) -> Result<CrawlOutcome, CrawlError> {
    let ScanOptions {
        config,
        show_progress_bars,
    } = options;

    let store = config.open_store()?;
    let bar = show_progress_bars.then(progress_bar);
    let callback = match bar {
        Some(ref pb) => Some(progress_callback(pb.clone(), event_callback)),
        None => event_callback,
    };
    let controller = Arc::new(config.build_controller(store, callback)?);

    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping after the current friend");
                controller.stop();
            }
        })
    };

    let result = controller.start(config.limit).await;
    interrupt.abort();

    if let Some(pb) = bar {
        match &result {
            Ok(CrawlOutcome::Completed(graph)) => {
                pb.finish_with_message(format!("Scan complete! {} friends scanned", graph.len()))
            }
            Ok(CrawlOutcome::Cancelled { partial }) => {
                pb.abandon_with_message(format!("Scan stopped. {} friends kept", partial))
            }
            Err(_) => pb.abandon_with_message("Scan failed"),
        }
    }

    result
}

/// Short summary printed after a scan
pub fn generate_scan_report(graph: &Graph) -> String {
    let edges = crate::index::GraphIndexBuilder::build_edges(graph);
    let failed = graph.iter().filter(|e| e.neighbor_ids.is_empty()).count();

    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Friends scanned: {}\n", graph.len()));
    report.push_str(&format!("  Connections between friends: {}\n", edges.len()));
    report.push_str(&format!("  Friends without mutuals: {}\n", failed));

    let servers: usize = graph.iter().map(|e| e.mutual_servers.len()).sum();
    if servers > 0 {
        report.push_str(&format!("  Mutual server memberships: {}\n", servers));
    }
    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    report
}

pub fn database_exists(data_dir: &Path) -> bool {
    Database::exists(&data_dir.join(DATABASE_FILE))
}
