use mutuals_scanner::UserProfile;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const AVATAR_CDN: &str = "https://cdn.discordapp.com";

/// Number of built-in default avatars.
pub const DEFAULT_AVATAR_COUNT: u64 = 6;

pub const DEFAULT_AVATAR_URL: &str = "https://cdn.discordapp.com/embed/avatars/0.png";

/// Avatar URL for a user. Users without an uploaded avatar get one of the
/// default avatars, picked from the id so the same user always gets the same one.
pub fn avatar_url_for(user_id: &str, avatar_hash: Option<&str>) -> String {
    match avatar_hash.filter(|hash| !hash.is_empty()) {
        Some(hash) => format!("{}/avatars/{}/{}.png", AVATAR_CDN, user_id, hash),
        None => {
            let numeric = user_id.parse::<u64>().unwrap_or(0);
            format!(
                "{}/embed/avatars/{}.png",
                AVATAR_CDN,
                (numeric >> 22) % DEFAULT_AVATAR_COUNT
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNickname {
    pub guild_id: String,
    pub nick: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutualServer {
    pub guild_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nick: String,
}

/// A scanned friend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub display_name: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    pub avatar_url: String,
    #[serde(default)]
    pub server_nicknames: Vec<ServerNickname>,
    #[serde(default)]
    pub mutual_servers: Vec<MutualServer>,
    /// Directed, as returned by the mutual-friends fetch. May reference ids
    /// that were never scanned.
    #[serde(default)]
    pub neighbor_ids: Vec<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, handle: impl Into<String>) -> Self {
        let id = id.into();
        let handle = handle.into();
        Self {
            avatar_url: avatar_url_for(&id, None),
            display_name: handle.clone(),
            id,
            handle,
            global_name: None,
            discriminator: None,
            server_nicknames: Vec::new(),
            mutual_servers: Vec::new(),
            neighbor_ids: Vec::new(),
        }
    }

    pub fn from_profile(user: &UserProfile) -> Self {
        let global_name = user.global_name.clone().filter(|name| !name.is_empty());
        Self {
            id: user.id.clone(),
            display_name: global_name.clone().unwrap_or_else(|| user.username.clone()),
            handle: user.username.clone(),
            global_name,
            discriminator: user.discriminator.clone(),
            avatar_url: avatar_url_for(&user.id, user.avatar.as_deref()),
            server_nicknames: Vec::new(),
            mutual_servers: Vec::new(),
            neighbor_ids: Vec::new(),
        }
    }

    pub fn with_neighbors<I, S>(mut self, neighbors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.neighbor_ids = neighbors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_global_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = name.clone();
        self.global_name = Some(name);
        self
    }

    /// Name shown on cards and labels.
    pub fn name(&self) -> &str {
        [
            self.global_name.as_deref(),
            Some(self.display_name.as_str()),
            Some(self.handle.as_str()),
        ]
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
        .unwrap_or("Unknown User")
    }

    /// `name#1234` for legacy accounts, `@name` otherwise.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(disc) if !disc.is_empty() && disc != "0" => format!("{}#{}", self.handle, disc),
            _ if self.handle.is_empty() => String::new(),
            _ => format!("@{}", self.handle),
        }
    }

    pub fn profile_url(&self) -> String {
        format!("https://discord.com/users/{}", self.id)
    }

    /// Distinct trimmed nicknames in first-seen order.
    pub fn unique_nicknames(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.server_nicknames
            .iter()
            .map(|entry| entry.nick.trim())
            .filter(|nick| !nick.is_empty())
            .filter(|nick| seen.insert(*nick))
            .collect()
    }
}

/// Scanned friends keyed by id, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Entity>", into = "Vec<Entity>")]
pub struct Graph {
    entities: Vec<Entity>,
    positions: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entity. An existing id is replaced in place and keeps its position.
    pub fn insert(&mut self, entity: Entity) {
        match self.positions.get(&entity.id) {
            Some(&pos) => self.entities[pos] = entity,
            None => {
                self.positions.insert(entity.id.clone(), self.entities.len());
                self.entities.push(entity);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.positions.get(id).map(|&pos| &self.entities[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.id.as_str())
    }

    /// Position of `id` in discovery order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Neighbors of `id` that are themselves in the graph, excluding `id`.
    pub fn filtered_neighbors(&self, id: &str) -> HashSet<&str> {
        self.get(id)
            .map(|entity| {
                entity
                    .neighbor_ids
                    .iter()
                    .map(String::as_str)
                    .filter(|n| *n != id && self.contains(n))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connection_count(&self, id: &str) -> usize {
        self.filtered_neighbors(id).len()
    }

    pub fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}

impl From<Vec<Entity>> for Graph {
    fn from(entities: Vec<Entity>) -> Self {
        let mut graph = Graph::new();
        for entity in entities {
            graph.insert(entity);
        }
        graph
    }
}

impl From<Graph> for Vec<Entity> {
    fn from(graph: Graph) -> Self {
        graph.entities
    }
}

impl FromIterator<Entity> for Graph {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        Graph::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// In-flight scan progress. Absent once a scan finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlProgress {
    pub current: usize,
    pub total: usize,
}

impl CrawlProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current: current.min(total),
            total,
        }
    }

    pub fn percent(&self) -> u16 {
        if self.total == 0 {
            return 0;
        }
        ((self.current as f64 / self.total as f64) * 100.0).round() as u16
    }
}
