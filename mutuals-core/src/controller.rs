//! Friend-graph scan controller.
//!
//! A scan fetches the authenticated user's relationship list, keeps the
//! friends, then walks them one at a time fetching each friend's mutual
//! friends. Requests are strictly sequential and paced by a fixed delay
//! because the API rate limits per token. Progress is written to the store
//! after every friend so another process can watch it.

use crate::data::{Database, ScanControl, SessionStatus, StoreEntry};
use crate::model::{CrawlProgress, Entity, Graph, MutualServer, ServerNickname};
use mutuals_scanner::{
    Credential, CredentialProvider, MutualGuild, Relationship, RelationshipSource, ScanError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One request per second.
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

pub type SharedDatabase = Arc<Mutex<Database>>;

/// Push-style progress sink, for callers that don't want to poll the store.
pub type CrawlEventCallback = Arc<dyn Fn(CrawlEvent) + Send + Sync>;

const CANCEL_NONE: u8 = 0;
const CANCEL_STOP: u8 = 1;
const CANCEL_DISCARD: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Seeding,
    Crawling,
    Completed,
    Cancelled,
    Failed,
}

impl CrawlState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlState::Completed | CrawlState::Cancelled | CrawlState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    Started {
        scanning: usize,
        total: usize,
    },
    EntityScanned {
        progress: CrawlProgress,
        id: String,
        name: String,
        neighbors: usize,
    },
    EntityFailed {
        id: String,
        name: String,
        error: String,
    },
    Finished {
        state: CrawlState,
        scanned: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlOutcome {
    Completed(Graph),
    /// `partial` is the number of friends that were kept.
    Cancelled { partial: usize },
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Could not extract token. Make sure you are logged into Discord.")]
    NoCredential,

    #[error("{0}")]
    Transport(#[from] ScanError),

    #[error("Storage error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A scan is already running")]
    AlreadyRunning,
}

/// Credential and friend list kept by [`CrawlController::count`] for the next scan.
struct SeedCache {
    credential: Credential,
    friends: Vec<Relationship>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CrawlController<S: RelationshipSource> {
    source: S,
    provider: Box<dyn CredentialProvider>,
    store: SharedDatabase,
    request_delay: Duration,
    mutual_servers: bool,
    progress_callback: Option<CrawlEventCallback>,
    cancel: AtomicU8,
    running: AtomicBool,
    state: Mutex<CrawlState>,
    seed_cache: Mutex<Option<SeedCache>>,
}

impl<S: RelationshipSource> CrawlController<S> {
    pub fn new(
        source: S,
        provider: impl CredentialProvider + 'static,
        store: SharedDatabase,
    ) -> Self {
        Self {
            source,
            provider: Box::new(provider),
            store,
            request_delay: DEFAULT_REQUEST_DELAY,
            mutual_servers: false,
            progress_callback: None,
            cancel: AtomicU8::new(CANCEL_NONE),
            running: AtomicBool::new(false),
            state: Mutex::new(CrawlState::Idle),
            seed_cache: Mutex::new(None),
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Also fetch each friend's profile for shared servers and nicknames.
    /// Adds one paced request per friend.
    pub fn with_mutual_servers(mut self, enabled: bool) -> Self {
        self.mutual_servers = enabled;
        self
    }

    pub fn with_progress_callback(mut self, callback: CrawlEventCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &SharedDatabase {
        &self.store
    }

    pub fn state(&self) -> CrawlState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn has_cached_seed(&self) -> bool {
        self.seed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Asks a running scan to stop after the current friend. Keeps partial results.
    pub fn stop(&self) {
        let _ = self.cancel.compare_exchange(
            CANCEL_NONE,
            CANCEL_STOP,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Like [`stop`](Self::stop) but the scan persists nothing more.
    pub fn discard(&self) {
        self.cancel.store(CANCEL_DISCARD, Ordering::SeqCst);
    }

    /// Fetches the friend list only and caches it, with the credential, for
    /// the next [`start`](Self::start).
    pub async fn count(&self) -> Result<usize, CrawlError> {
        let credential = self.provider.extract().ok_or(CrawlError::NoCredential)?;
        let friends = self.fetch_friends(&credential).await?;
        let count = friends.len();

        *self
            .seed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SeedCache {
            credential,
            friends,
        });
        Ok(count)
    }

    /// Runs a full scan. `limit` caps how many friends are walked; `Some(0)`
    /// means no cap.
    pub async fn start(&self, limit: Option<usize>) -> Result<CrawlOutcome, CrawlError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CrawlError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        self.cancel.store(CANCEL_NONE, Ordering::SeqCst);
        self.set_state(CrawlState::Seeding);

        let session_id = match self.open_session() {
            Ok(id) => id,
            Err(e) => return Err(self.fail(None, 0, e)),
        };

        let (credential, friends) = match self.seed().await {
            Ok(seed) => seed,
            Err(e) => return Err(self.fail(Some(&session_id), 0, e)),
        };

        let total = friends.len();
        let scanning = match limit {
            Some(limit) if limit > 0 && limit < total => &friends[..limit],
            _ => &friends[..],
        };
        info!("Scanning {} of {} friends", scanning.len(), total);
        self.emit(CrawlEvent::Started {
            scanning: scanning.len(),
            total,
        });
        self.set_state(CrawlState::Crawling);

        self.crawl(&credential, scanning, &session_id, total)
            .await
            .map_err(|e| self.fail(Some(&session_id), total, e))
    }

    fn open_session(&self) -> Result<String, CrawlError> {
        let mut store = self.lock_store();
        store.set(&[StoreEntry::ScanControl(None)])?;
        Ok(store.create_session()?)
    }

    /// Every failed scan ends here. Leaves no progress behind.
    fn fail(&self, session_id: Option<&str>, total: usize, error: CrawlError) -> CrawlError {
        warn!("Scan failed: {}", error);
        let cleared = self
            .lock_store()
            .set_guarded(&[StoreEntry::ScanProgress(None)]);
        if let Err(e) = cleared {
            warn!("Could not clear progress: {}", e);
        }
        self.set_state(CrawlState::Failed);
        if let Some(session_id) = session_id {
            let message = error.to_string();
            self.record_session(session_id, SessionStatus::Failed, 0, total, Some(&message));
        }
        self.emit(CrawlEvent::Finished {
            state: CrawlState::Failed,
            scanned: 0,
        });
        error
    }

    async fn seed(&self) -> Result<(Credential, Vec<Relationship>), CrawlError> {
        let cached = self
            .seed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cache) = cached {
            debug!("Using cached friend list ({} friends)", cache.friends.len());
            return Ok((cache.credential, cache.friends));
        }

        let credential = self.provider.extract().ok_or(CrawlError::NoCredential)?;
        let friends = self.fetch_friends(&credential).await?;
        Ok((credential, friends))
    }

    async fn fetch_friends(&self, credential: &Credential) -> Result<Vec<Relationship>, CrawlError> {
        let relationships = self.source.fetch_seed_relationships(credential).await?;
        let fetched = relationships.len();
        let friends: Vec<Relationship> = relationships
            .into_iter()
            .filter(Relationship::is_friend)
            .collect();
        debug!("{} relationships, {} friends", fetched, friends.len());
        Ok(friends)
    }

    async fn crawl(
        &self,
        credential: &Credential,
        friends: &[Relationship],
        session_id: &str,
        total: usize,
    ) -> Result<CrawlOutcome, CrawlError> {
        let count = friends.len();
        let guild_names = if self.mutual_servers {
            let names = self.fetch_guild_names(credential).await;
            self.pause().await;
            names
        } else {
            HashMap::new()
        };

        let mut graph = Graph::new();

        for (i, friend) in friends.iter().enumerate() {
            if let Some(control) = self.cancellation() {
                info!("Scan cancelled at {} / {}", i, count);
                return self.finish_cancelled(control, graph, session_id, total);
            }

            let mut entity = Entity::from_profile(&friend.user);
            match self.source.fetch_neighbors(credential, &entity.id).await {
                Ok(neighbors) => {
                    entity.neighbor_ids = neighbors.into_iter().map(|n| n.id).collect();
                }
                Err(e) => {
                    warn!("Mutuals failed for {}: {}", entity.handle, e);
                    self.emit(CrawlEvent::EntityFailed {
                        id: entity.id.clone(),
                        name: entity.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }

            if self.mutual_servers {
                self.pause().await;
                match self.source.fetch_mutual_guilds(credential, &entity.id).await {
                    Ok(guilds) => apply_mutual_guilds(&mut entity, guilds, &guild_names),
                    Err(e) => debug!("Mutual servers failed for {}: {}", entity.handle, e),
                }
            }

            let event = CrawlEvent::EntityScanned {
                progress: CrawlProgress::new(i + 1, count),
                id: entity.id.clone(),
                name: entity.name().to_string(),
                neighbors: entity.neighbor_ids.len(),
            };
            graph.insert(entity);
            self.persist_progress(CrawlProgress::new(i + 1, count));
            self.emit(event);

            if i + 1 < count {
                self.pause().await;
            }
        }

        let written = if self.is_discarding() {
            false
        } else {
            self.lock_store().set_guarded(&[
                StoreEntry::Connections(graph.clone()),
                StoreEntry::ScanProgress(None),
                StoreEntry::ScanControl(None),
            ])?
        };
        if !written {
            info!("Scan results discarded");
            return self.finish_cancelled(ScanControl::Discard, graph, session_id, total);
        }

        info!("Scan complete. {} friends scanned", graph.len());
        self.set_state(CrawlState::Completed);
        self.record_session(session_id, SessionStatus::Completed, graph.len(), total, None);
        self.emit(CrawlEvent::Finished {
            state: CrawlState::Completed,
            scanned: graph.len(),
        });
        Ok(CrawlOutcome::Completed(graph))
    }

    fn finish_cancelled(
        &self,
        control: ScanControl,
        graph: Graph,
        session_id: &str,
        total: usize,
    ) -> Result<CrawlOutcome, CrawlError> {
        let partial = match control {
            ScanControl::Stop => {
                let partial = graph.len();
                let mut entries = Vec::with_capacity(3);
                if !graph.is_empty() {
                    entries.push(StoreEntry::Connections(graph));
                }
                entries.push(StoreEntry::ScanProgress(None));
                entries.push(StoreEntry::ScanControl(None));
                if self.lock_store().set_guarded(&entries)? {
                    partial
                } else {
                    0
                }
            }
            ScanControl::Discard => 0,
        };

        self.set_state(CrawlState::Cancelled);
        self.record_session(session_id, SessionStatus::Cancelled, partial, total, None);
        self.emit(CrawlEvent::Finished {
            state: CrawlState::Cancelled,
            scanned: partial,
        });
        Ok(CrawlOutcome::Cancelled { partial })
    }

    async fn fetch_guild_names(&self, credential: &Credential) -> HashMap<String, String> {
        match self.source.fetch_guilds(credential).await {
            Ok(guilds) => guilds
                .into_iter()
                .map(|g| (g.id, g.name.trim().to_string()))
                .collect(),
            Err(e) => {
                warn!("Could not fetch server list: {}", e);
                HashMap::new()
            }
        }
    }

    /// In-process flag first, then a request left in the store by another process.
    fn cancellation(&self) -> Option<ScanControl> {
        let local = match self.cancel.load(Ordering::SeqCst) {
            CANCEL_STOP => Some(ScanControl::Stop),
            CANCEL_DISCARD => Some(ScanControl::Discard),
            _ => None,
        };
        if local == Some(ScanControl::Discard) {
            return local;
        }

        let stored = match self.lock_store().scan_control() {
            Ok(control) => control,
            Err(e) => {
                warn!("Could not read scan control: {}", e);
                None
            }
        };
        match (local, stored) {
            (_, Some(ScanControl::Discard)) => Some(ScanControl::Discard),
            (Some(control), _) | (None, Some(control)) => Some(control),
            (None, None) => None,
        }
    }

    fn is_discarding(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) == CANCEL_DISCARD
    }

    fn persist_progress(&self, progress: CrawlProgress) {
        if self.is_discarding() {
            return;
        }
        let result = self
            .lock_store()
            .set_guarded(&[StoreEntry::ScanProgress(Some(progress))]);
        if let Err(e) = result {
            warn!("Could not persist progress: {}", e);
        }
    }

    fn record_session(
        &self,
        session_id: &str,
        status: SessionStatus,
        scanned: usize,
        total: usize,
        error: Option<&str>,
    ) {
        let result = self
            .lock_store()
            .finish_session(session_id, status, scanned, total, error);
        if let Err(e) = result {
            warn!("Could not record scan session: {}", e);
        }
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    fn set_state(&self, state: CrawlState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn lock_store(&self) -> MutexGuard<'_, Database> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(event);
        }
    }
}

fn apply_mutual_guilds(
    entity: &mut Entity,
    guilds: Vec<MutualGuild>,
    guild_names: &HashMap<String, String>,
) {
    for guild in guilds {
        let nick = guild
            .nick
            .map(|nick| nick.trim().to_string())
            .unwrap_or_default();
        if !nick.is_empty() {
            entity.server_nicknames.push(ServerNickname {
                guild_id: guild.id.clone(),
                nick: nick.clone(),
            });
        }
        entity.mutual_servers.push(MutualServer {
            name: guild_names.get(&guild.id).cloned().unwrap_or_default(),
            guild_id: guild.id,
            nick,
        });
    }
}

/// Channel pair for consuming [`CrawlEvent`]s as a stream.
pub fn create_event_channel() -> (CrawlEventCallback, mpsc::UnboundedReceiver<CrawlEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: CrawlEventCallback = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (callback, rx)
}
