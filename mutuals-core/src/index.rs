//! Search records and the undirected edge set derived from a scanned graph.

use crate::model::{Entity, Graph};
use serde::Serialize;
use std::collections::HashSet;

/// How many nicknames the result list previews.
pub const NICK_PREVIEW_LIMIT: usize = 3;

/// One searchable row per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRecord {
    pub id: String,
    pub name: String,
    pub handle: String,
    pub nick_preview: String,
    pub avatar_url: String,
    /// Lowercased, space-joined text the query is matched against.
    pub search_blob: String,
}

impl SearchRecord {
    pub fn from_entity(entity: &Entity) -> Self {
        let nicknames = entity.unique_nicknames();

        let mut parts: Vec<&str> = Vec::with_capacity(3 + nicknames.len());
        parts.push(&entity.handle);
        if let Some(ref global_name) = entity.global_name {
            parts.push(global_name);
        }
        parts.push(&entity.display_name);
        parts.extend(nicknames.iter().copied());
        parts.extend(
            entity
                .mutual_servers
                .iter()
                .map(|server| server.name.trim())
                .filter(|name| !name.is_empty()),
        );
        let search_blob = parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        Self {
            id: entity.id.clone(),
            name: entity.name().to_string(),
            handle: entity.handle.clone(),
            nick_preview: nicknames
                .into_iter()
                .take(NICK_PREVIEW_LIMIT)
                .collect::<Vec<_>>()
                .join(", "),
            avatar_url: entity.avatar_url.clone(),
            search_blob,
        }
    }
}

/// Unordered id pair. `a <= b` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub a: String,
    pub b: String,
}

impl Edge {
    /// Returns `None` for self pairs.
    pub fn new(x: &str, y: &str) -> Option<Self> {
        match x.cmp(y) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(Self {
                a: x.to_string(),
                b: y.to_string(),
            }),
            std::cmp::Ordering::Greater => Some(Self {
                a: y.to_string(),
                b: x.to_string(),
            }),
        }
    }

    pub fn key(&self) -> String {
        format!("{}-{}", self.a, self.b)
    }

    pub fn touches(&self, id: &str) -> bool {
        self.a == id || self.b == id
    }
}

/// Deduplicated edges in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeSet {
    edges: Vec<Edge>,
    keys: HashSet<String>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair was already present or is a self pair.
    pub fn insert(&mut self, x: &str, y: &str) -> bool {
        let Some(edge) = Edge::new(x, y) else {
            return false;
        };
        if !self.keys.insert(edge.key()) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn contains(&self, x: &str, y: &str) -> bool {
        Edge::new(x, y).is_some_and(|edge| self.keys.contains(&edge.key()))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphIndex {
    pub records: Vec<SearchRecord>,
    pub edges: EdgeSet,
}

pub struct GraphIndexBuilder;

impl GraphIndexBuilder {
    /// Linear in the total length of all neighbor lists.
    pub fn build(graph: &Graph) -> GraphIndex {
        let records = graph.iter().map(SearchRecord::from_entity).collect();
        GraphIndex {
            records,
            edges: Self::build_edges(graph),
        }
    }

    pub fn build_edges(graph: &Graph) -> EdgeSet {
        let mut edges = EdgeSet::new();
        for entity in graph.iter() {
            for neighbor in &entity.neighbor_ids {
                if graph.contains(neighbor) {
                    edges.insert(&entity.id, neighbor);
                }
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MutualServer, ServerNickname};

    fn nick(guild: &str, nick: &str) -> ServerNickname {
        ServerNickname {
            guild_id: guild.to_string(),
            nick: nick.to_string(),
        }
    }

    #[test]
    fn test_search_blob_contents() {
        let mut entity = Entity::new("1", "jdoe").with_global_name("John Doe");
        entity.server_nicknames = vec![nick("g1", "Johnny"), nick("g2", "Johnny")];
        entity.mutual_servers = vec![
            MutualServer {
                guild_id: "g1".to_string(),
                name: "Rustaceans".to_string(),
                nick: "Johnny".to_string(),
            },
            MutualServer {
                guild_id: "g3".to_string(),
                name: String::new(),
                nick: String::new(),
            },
        ];

        let record = SearchRecord::from_entity(&entity);
        assert_eq!(record.name, "John Doe");
        assert_eq!(record.search_blob, "jdoe john doe john doe johnny rustaceans");
        assert_eq!(record.nick_preview, "Johnny");
    }

    #[test]
    fn test_nick_preview_caps_at_three() {
        let mut entity = Entity::new("1", "a");
        entity.server_nicknames = ["n1", "n2", "n2", "n3", "n4"]
            .iter()
            .map(|n| nick("g", n))
            .collect();
        assert_eq!(SearchRecord::from_entity(&entity).nick_preview, "n1, n2, n3");
    }

    #[test]
    fn test_edges_are_canonical_and_deduplicated() {
        let graph: Graph = vec![
            Entity::new("b", "b").with_neighbors(["a", "c"]),
            Entity::new("a", "a").with_neighbors(["b", "a", "outside"]),
            Entity::new("c", "c"),
        ]
        .into();

        let edges = GraphIndexBuilder::build_edges(&graph);
        assert_eq!(edges.len(), 2);
        assert!(edges.contains("a", "b"));
        assert!(edges.contains("c", "b"));
        assert!(!edges.contains("a", "a"));
        assert!(!edges.contains("a", "outside"));

        let keys: Vec<String> = edges.iter().map(Edge::key).collect();
        assert_eq!(keys, vec!["a-b", "b-c"]);
    }

    #[test]
    fn test_edge_set_rejects_self_pairs() {
        let mut edges = EdgeSet::new();
        assert!(!edges.insert("x", "x"));
        assert!(edges.insert("y", "x"));
        assert!(!edges.insert("x", "y"));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let mut alice = Entity::new("a", "alice")
            .with_global_name("Alice")
            .with_neighbors(["c", "b", "stranger"]);
        alice.server_nicknames = vec![nick("g1", "Al"), nick("g2", "Ali")];
        alice.mutual_servers = vec![MutualServer {
            guild_id: "g1".to_string(),
            name: "Rustaceans".to_string(),
            nick: "Al".to_string(),
        }];
        let graph: Graph = vec![
            alice,
            Entity::new("c", "carol").with_neighbors(["a", "b"]),
            Entity::new("b", "bob").with_neighbors(["a", "ghost"]),
        ]
        .into();

        let first = GraphIndexBuilder::build(&graph);
        let second = GraphIndexBuilder::build(&graph);
        assert_eq!(first, second);

        let ids: Vec<&str> = first.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "b"]);
        let keys: Vec<String> = first.edges.iter().map(Edge::key).collect();
        assert_eq!(keys, vec!["a-c", "a-b", "b-c"]);
    }
}
