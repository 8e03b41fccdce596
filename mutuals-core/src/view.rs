//! Event-driven explorer state for one loaded graph.
//!
//! The renderer reports clicks and hovers, the keyboard drives search and
//! Escape, and [`GraphView`] answers with [`ViewAction`]s describing what
//! the renderer should change. Nothing here draws.

use crate::index::{GraphIndex, GraphIndexBuilder, SearchRecord};
use crate::model::{Entity, Graph, MutualServer};
use crate::report::{RenderNode, RenderPayload, format_connection_count, node_label, node_title};
use crate::search::{self, DEFAULT_LIMIT};
use crate::selection::{OverlayDiff, SelectionHighlightEngine};

pub const MASKED_NAME: &str = "Hidden User";
pub const MASKED_META: &str = "Names hidden";
pub const MASKED_SERVER: &str = "Mutual server";

/// Mutual servers listed per card before collapsing into "+N more".
pub const SERVER_PREVIEW_LIMIT: usize = 6;
const NICKNAME_PREVIEW_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    NodeClick(String),
    NodeDoubleClick(String),
    EmptyClick,
    HoverEnter(String),
    HoverLeave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Default,
    Pointer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewAction {
    Highlight(OverlayDiff),
    Focus(String),
    OpenProfile(String),
    SetCursor(Cursor),
    Relabel(Vec<RenderNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultView {
    pub id: String,
    pub name: String,
    pub meta: String,
    pub avatar_url: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCard {
    pub id: String,
    pub name: String,
    pub tag: String,
    pub avatar_url: String,
    pub stats: String,
    pub servers_title: Option<String>,
    pub servers: Vec<String>,
    pub servers_more: Option<String>,
    pub profile_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoCard {
    pub title: String,
    pub profiles: Vec<ProfileCard>,
}

#[derive(Debug, Clone, Default)]
struct SearchState {
    open: bool,
    query: String,
    /// Indices into the index records.
    results: Vec<usize>,
    active: usize,
}

pub struct GraphView {
    graph: Graph,
    index: GraphIndex,
    highlight: SelectionHighlightEngine,
    search: SearchState,
    hide_names: bool,
}

impl GraphView {
    pub fn load(graph: Graph, hide_names: bool) -> Self {
        let index = GraphIndexBuilder::build(&graph);
        let mut view = Self {
            graph,
            index,
            highlight: SelectionHighlightEngine::new(),
            search: SearchState::default(),
            hide_names,
        };
        view.highlight.refresh(&view.graph, &view.index.edges);
        view
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub fn hide_names(&self) -> bool {
        self.hide_names
    }

    pub fn selected(&self) -> &[String] {
        self.highlight.selection().ids()
    }

    /// Initial node and edge lists for the renderer.
    pub fn payload(&self) -> RenderPayload {
        RenderPayload::build(&self.graph, &self.index.edges, self.hide_names)
    }

    pub fn handle(&mut self, event: ViewEvent) -> Vec<ViewAction> {
        match event {
            ViewEvent::NodeClick(id) => self.select(&id, false, true),
            ViewEvent::EmptyClick => self.clear_selection(),
            ViewEvent::NodeDoubleClick(id) => match self.graph.get(&id) {
                Some(entity) => vec![ViewAction::OpenProfile(entity.profile_url())],
                None => Vec::new(),
            },
            ViewEvent::HoverEnter(_) => vec![ViewAction::SetCursor(Cursor::Pointer)],
            ViewEvent::HoverLeave => vec![ViewAction::SetCursor(Cursor::Default)],
        }
    }

    fn select(&mut self, id: &str, focus: bool, toggle: bool) -> Vec<ViewAction> {
        if !self.graph.contains(id) {
            return Vec::new();
        }
        self.highlight.add(id, toggle, &self.graph);
        let mut actions = self.rehighlight();
        if focus && self.highlight.selection().contains(id) {
            actions.push(ViewAction::Focus(id.to_string()));
        }
        actions
    }

    pub fn clear_selection(&mut self) -> Vec<ViewAction> {
        self.highlight.clear();
        self.rehighlight()
    }

    /// Escape: closes search if open, else drops the most recent selection,
    /// else clears whatever is left on screen.
    pub fn escape(&mut self) -> Vec<ViewAction> {
        if self.search.open {
            self.close_search();
            return Vec::new();
        }
        if self.highlight.remove_last() {
            return self.rehighlight();
        }
        self.clear_selection()
    }

    fn rehighlight(&mut self) -> Vec<ViewAction> {
        let diff = self.highlight.refresh(&self.graph, &self.index.edges);
        if diff.is_empty() {
            Vec::new()
        } else {
            vec![ViewAction::Highlight(diff)]
        }
    }

    pub fn open_search(&mut self) {
        self.search.open = true;
        self.search.active = 0;
        self.refresh_results();
    }

    pub fn close_search(&mut self) {
        self.search.open = false;
    }

    pub fn is_search_open(&self) -> bool {
        self.search.open
    }

    pub fn query(&self) -> &str {
        &self.search.query
    }

    pub fn set_query(&mut self, query: &str) {
        self.search.query = query.to_string();
        self.search.active = 0;
        self.refresh_results();
    }

    fn refresh_results(&mut self) {
        self.search.results = search::search(&self.index.records, &self.search.query, DEFAULT_LIMIT)
            .into_iter()
            .map(|hit| hit.index)
            .collect();
        if self.search.active >= self.search.results.len() {
            self.search.active = 0;
        }
    }

    /// Moves the highlighted result, wrapping at either end.
    pub fn move_active(&mut self, delta: isize) {
        let len = self.search.results.len();
        if len == 0 {
            return;
        }
        let len = len as isize;
        self.search.active = ((self.search.active as isize + delta).rem_euclid(len)) as usize;
    }

    pub fn active_index(&self) -> usize {
        self.search.active
    }

    /// Selects the highlighted result without toggling and focuses it.
    pub fn pick_active(&mut self) -> Vec<ViewAction> {
        let Some(&index) = self.search.results.get(self.search.active) else {
            return Vec::new();
        };
        let id = self.index.records[index].id.clone();
        self.pick(&id)
    }

    pub fn pick(&mut self, id: &str) -> Vec<ViewAction> {
        self.close_search();
        self.select(id, true, false)
    }

    pub fn search_results(&self) -> Vec<SearchResultView> {
        self.search
            .results
            .iter()
            .enumerate()
            .map(|(pos, &index)| {
                let record = &self.index.records[index];
                SearchResultView {
                    id: record.id.clone(),
                    name: self.masked(&record.name, MASKED_NAME),
                    meta: self.result_meta(record),
                    avatar_url: record.avatar_url.clone(),
                    active: pos == self.search.active,
                }
            })
            .collect()
    }

    fn result_meta(&self, record: &SearchRecord) -> String {
        if self.hide_names {
            MASKED_META.to_string()
        } else if !record.nick_preview.is_empty() {
            record.nick_preview.clone()
        } else if !record.handle.is_empty() {
            record.handle.clone()
        } else {
            "No nickname data".to_string()
        }
    }

    fn masked(&self, value: &str, mask: &str) -> String {
        if self.hide_names {
            mask.to_string()
        } else {
            value.to_string()
        }
    }

    /// Switches name masking and returns relabelled nodes.
    pub fn set_hide_names(&mut self, hide: bool) -> Vec<ViewAction> {
        self.hide_names = hide;
        let nodes = self.payload().nodes;
        vec![ViewAction::Relabel(nodes)]
    }

    pub fn tooltip(&self, id: &str) -> Option<String> {
        let entity = self.graph.get(id)?;
        Some(node_title(
            entity,
            self.graph.connection_count(id),
            self.hide_names,
        ))
    }

    pub fn label(&self, id: &str) -> Option<String> {
        self.graph.get(id).map(|entity| node_label(entity, self.hide_names))
    }

    /// Card for the current selection; `None` when nothing is selected.
    pub fn info_card(&self) -> Option<InfoCard> {
        let profiles: Vec<ProfileCard> = self
            .selected()
            .iter()
            .filter_map(|id| self.graph.get(id))
            .map(|entity| self.profile_card(entity))
            .collect();
        if profiles.is_empty() {
            return None;
        }
        Some(InfoCard {
            title: format!("{} selected", profiles.len()),
            profiles,
        })
    }

    fn profile_card(&self, entity: &Entity) -> ProfileCard {
        let connections = format_connection_count(self.graph.connection_count(&entity.id));
        let stats = match server_nickname_line(entity) {
            Some(line) if !self.hide_names => format!("{} | {}", connections, line),
            _ => connections,
        };

        let servers = mutual_servers(entity);
        let labels = servers
            .iter()
            .take(SERVER_PREVIEW_LIMIT)
            .map(|server| {
                if self.hide_names {
                    MASKED_SERVER.to_string()
                } else {
                    server_label(server)
                }
            })
            .collect();

        ProfileCard {
            id: entity.id.clone(),
            name: self.masked(entity.name(), MASKED_NAME),
            tag: if self.hide_names {
                String::new()
            } else {
                entity.tag()
            },
            avatar_url: entity.avatar_url.clone(),
            stats,
            servers_title: (!servers.is_empty())
                .then(|| format!("Mutual servers ({})", servers.len())),
            servers: labels,
            servers_more: (servers.len() > SERVER_PREVIEW_LIMIT)
                .then(|| format!("+{} more", servers.len() - SERVER_PREVIEW_LIMIT)),
            profile_url: entity.profile_url(),
        }
    }
}

fn server_nickname_line(entity: &Entity) -> Option<String> {
    let nicknames = entity.unique_nicknames();
    if nicknames.is_empty() {
        return None;
    }
    let preview = nicknames
        .iter()
        .take(NICKNAME_PREVIEW_LIMIT)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let extra = nicknames.len().saturating_sub(NICKNAME_PREVIEW_LIMIT);
    Some(if extra > 0 {
        format!("Server nicknames: {} +{} more", preview, extra)
    } else {
        format!("Server nicknames: {}", preview)
    })
}

/// Mutual servers, or nickname entries when no server list was fetched.
fn mutual_servers(entity: &Entity) -> Vec<MutualServer> {
    let servers: Vec<MutualServer> = if entity.mutual_servers.is_empty() {
        entity
            .server_nicknames
            .iter()
            .map(|entry| MutualServer {
                guild_id: entry.guild_id.clone(),
                name: String::new(),
                nick: entry.nick.clone(),
            })
            .collect()
    } else {
        entity.mutual_servers.clone()
    };

    servers
        .into_iter()
        .filter(|server| !server.guild_id.is_empty())
        .map(|server| MutualServer {
            name: server.name.trim().to_string(),
            nick: server.nick.trim().to_string(),
            guild_id: server.guild_id,
        })
        .collect()
}

fn server_label(server: &MutualServer) -> String {
    match (server.name.is_empty(), server.nick.is_empty()) {
        (false, false) => format!("{} ({})", server.name, server.nick),
        (false, true) => server.name.clone(),
        (true, false) => server.nick.clone(),
        (true, true) => "Unknown server".to_string(),
    }
}
