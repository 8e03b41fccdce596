pub mod crawl_monitor;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use mutuals_core::controller::SharedDatabase;
use mutuals_core::selection::{EMPHASIZED_EDGE, EdgeStyle, FULL_OPACITY};
use mutuals_core::view::{GraphView, InfoCard, ViewAction, ViewEvent};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use std::collections::HashMap;
use std::io;
use std::sync::PoisonError;
use tracing::warn;

pub use crawl_monitor::{ScanMonitor, create_monitor_channel, run_monitor};

const PAGE: usize = 10;

/// Terminal front end for a [`GraphView`]: a friend list standing in for the
/// rendered graph, the info card, and the search overlay.
pub struct Explorer {
    view: GraphView,
    store: Option<SharedDatabase>,
    cursor: usize,
    labels: HashMap<String, String>,
    opacity: HashMap<String, f32>,
    edge_styles: HashMap<String, EdgeStyle>,
    status: String,
    should_quit: bool,
}

impl Explorer {
    pub fn new(view: GraphView) -> Self {
        let labels = view
            .payload()
            .nodes
            .into_iter()
            .map(|node| (node.id, node.label))
            .collect();
        Self {
            view,
            store: None,
            cursor: 0,
            labels,
            opacity: HashMap::new(),
            edge_styles: HashMap::new(),
            status: String::new(),
            should_quit: false,
        }
    }

    /// Loads the last scan and the hide-names preference. `None` when no
    /// scan has been stored yet.
    pub fn from_store(store: SharedDatabase) -> Result<Option<Self>> {
        let (graph, hide_names) = {
            let db = store.lock().unwrap_or_else(PoisonError::into_inner);
            (db.load_connections()?, db.hide_names()?)
        };
        Ok(graph.map(|graph| Self::new(GraphView::load(graph, hide_names)).with_store(store)))
    }

    /// Persist the hide-names toggle to `store`.
    pub fn with_store(mut self, store: SharedDatabase) -> Self {
        self.store = Some(store);
        self
    }

    pub fn view(&self) -> &GraphView {
        &self.view
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn opacity(&self, id: &str) -> f32 {
        self.opacity.get(id).copied().unwrap_or(FULL_OPACITY)
    }

    pub fn emphasized_edges(&self) -> usize {
        self.edge_styles
            .values()
            .filter(|style| **style == EMPHASIZED_EDGE)
            .count()
    }

    fn cursor_id(&self) -> Option<String> {
        self.view
            .graph()
            .iter()
            .nth(self.cursor)
            .map(|entity| entity.id.clone())
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.view.graph().len();
        if len == 0 {
            return;
        }
        let next = (self.cursor as isize + delta).clamp(0, len as isize - 1);
        self.cursor = next as usize;
    }

    fn apply(&mut self, actions: Vec<ViewAction>) {
        for action in actions {
            match action {
                ViewAction::Highlight(diff) => {
                    for node in diff.nodes {
                        self.opacity.insert(node.id, node.opacity);
                    }
                    for edge in diff.edges {
                        self.edge_styles.insert(edge.key, edge.style);
                    }
                }
                ViewAction::Focus(id) => {
                    if let Some(position) = self.view.graph().position(&id) {
                        self.cursor = position;
                    }
                }
                ViewAction::OpenProfile(url) => {
                    self.status = format!("Profile: {}", url);
                }
                ViewAction::Relabel(nodes) => {
                    self.labels = nodes.into_iter().map(|node| (node.id, node.label)).collect();
                }
                ViewAction::SetCursor(_) => {}
            }
        }
    }

    fn toggle_hide_names(&mut self) {
        let hide = !self.view.hide_names();
        let actions = self.view.set_hide_names(hide);
        self.apply(actions);

        if let Some(ref store) = self.store {
            let result = store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_hide_names(hide);
            if let Err(e) = result {
                warn!("Could not save name preference: {}", e);
                self.status = format!("Could not save name preference: {}", e);
                return;
            }
        }
        self.status = if hide {
            "Names hidden".to_string()
        } else {
            "Names shown".to_string()
        };
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        if self.view.is_search_open() {
            self.handle_search_key(key);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::PageUp => self.move_cursor(-(PAGE as isize)),
            KeyCode::PageDown => self.move_cursor(PAGE as isize),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.move_cursor(isize::MAX / 2),
            KeyCode::Enter | KeyCode::Char(' ') => {
                if let Some(id) = self.cursor_id() {
                    let actions = self.view.handle(ViewEvent::NodeClick(id));
                    self.apply(actions);
                }
            }
            KeyCode::Char('o') => {
                if let Some(id) = self.cursor_id() {
                    let actions = self.view.handle(ViewEvent::NodeDoubleClick(id));
                    self.apply(actions);
                }
            }
            KeyCode::Char('c') => {
                let actions = self.view.handle(ViewEvent::EmptyClick);
                self.apply(actions);
            }
            KeyCode::Char('/') => self.view.open_search(),
            KeyCode::Char('h') => self.toggle_hide_names(),
            KeyCode::Esc => {
                let actions = self.view.escape();
                self.apply(actions);
            }
            _ => {}
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                let actions = self.view.escape();
                self.apply(actions);
            }
            KeyCode::Enter => {
                let actions = self.view.pick_active();
                self.apply(actions);
            }
            KeyCode::Up => self.view.move_active(-1),
            KeyCode::Down | KeyCode::Tab => self.view.move_active(1),
            KeyCode::Backspace => {
                let mut query = self.view.query().to_string();
                query.pop();
                self.view.set_query(&query);
            }
            KeyCode::Char(c) => {
                let query = format!("{}{}", self.view.query(), c);
                self.view.set_query(&query);
            }
            _ => {}
        }
    }

    fn render_graph(&self, f: &mut Frame, area: Rect) {
        let graph = self.view.graph();
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" Friends ({}) ", graph.len()))
            .border_style(Style::default().fg(Color::Cyan));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let offset = (self.cursor + 1).saturating_sub(height);
        let selected = self.view.selected();

        let items: Vec<ListItem> = graph
            .iter()
            .enumerate()
            .skip(offset)
            .take(height)
            .map(|(idx, entity)| {
                let label = self
                    .labels
                    .get(&entity.id)
                    .filter(|label| !label.is_empty())
                    .map(String::as_str)
                    .unwrap_or("•");
                let title = self.view.tooltip(&entity.id).unwrap_or_default();

                let mut style = if selected.contains(&entity.id) {
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
                } else if self.opacity(&entity.id) < FULL_OPACITY {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default().fg(Color::White)
                };
                if idx == self.cursor {
                    style = style.bg(Color::DarkGray);
                }
                ListItem::new(format!("{:<28} {}", label, title)).style(style)
            })
            .collect();

        f.render_widget(List::new(items), inner);
    }

    fn render_info(&self, f: &mut Frame, area: Rect) {
        let card = self.view.info_card();
        let title = card
            .as_ref()
            .map(|card| format!(" {} ", card.title))
            .unwrap_or_else(|| " Info ".to_string());
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let lines = match card {
            Some(card) => info_lines(&card),
            None => vec![Line::from(Span::styled(
                "Nothing selected. Enter selects, / searches.",
                Style::default().fg(Color::DarkGray),
            ))],
        };
        f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
    }

    fn render_search(&self, f: &mut Frame, area: Rect) {
        let popup = centered(area, 60, 60);
        f.render_widget(Clear, popup);

        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Search ")
            .border_style(Style::default().fg(Color::Yellow));
        let inner = block.inner(popup);
        f.render_widget(block, popup);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(1)])
            .split(inner);

        let prompt = "> ";
        f.render_widget(
            Paragraph::new(format!("{}{}", prompt, self.view.query()))
                .style(Style::default().fg(Color::Yellow)),
            chunks[0],
        );
        f.set_cursor_position((
            chunks[0].x + (prompt.len() + self.view.query().chars().count()) as u16,
            chunks[0].y,
        ));
        f.render_widget(
            Paragraph::new("─".repeat(chunks[1].width as usize))
                .style(Style::default().fg(Color::DarkGray)),
            chunks[1],
        );

        let results = self.view.search_results();
        if results.is_empty() {
            f.render_widget(
                Paragraph::new("No matches").style(Style::default().fg(Color::DarkGray)),
                chunks[2],
            );
            return;
        }

        let height = chunks[2].height as usize;
        let offset = (self.view.active_index() + 1).saturating_sub(height);
        let items: Vec<ListItem> = results
            .iter()
            .skip(offset)
            .take(height)
            .map(|result| {
                let style = if result.active {
                    Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{:<28}", result.name), Style::default().fg(Color::White)),
                    Span::styled(result.meta.clone(), Style::default().fg(Color::DarkGray)),
                ]))
                .style(style)
            })
            .collect();
        f.render_widget(List::new(items), chunks[2]);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let mut spans = if self.view.is_search_open() {
            vec![
                Span::styled(" ↑/↓ ", key),
                Span::raw(" Move  "),
                Span::styled(" Enter ", key),
                Span::raw(" Pick  "),
                Span::styled(" ESC ", key),
                Span::raw(" Close  "),
            ]
        } else {
            vec![
                Span::styled(" Enter ", key),
                Span::raw(" Select  "),
                Span::styled(" / ", key),
                Span::raw(" Search  "),
                Span::styled(" ESC ", key),
                Span::raw(" Back  "),
                Span::styled(" c ", key),
                Span::raw(" Clear  "),
                Span::styled(" o ", key),
                Span::raw(" Profile  "),
                Span::styled(" h ", key),
                Span::raw(" Names  "),
                Span::styled(" q ", key),
                Span::raw(" Quit  "),
            ]
        };
        if !self.status.is_empty() {
            spans.push(Span::styled(
                self.status.clone(),
                Style::default().fg(Color::Yellow),
            ));
        }
        f.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black).fg(Color::Gray)),
            area,
        );
    }

    fn draw(&self, f: &mut Frame) {
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(5), Constraint::Length(1)])
            .split(f.area());
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(vertical[0]);

        self.render_graph(f, main[0]);
        self.render_info(f, main[1]);
        self.render_hints(f, vertical[1]);
        if self.view.is_search_open() {
            self.render_search(f, vertical[0]);
        }
    }
}

fn info_lines(card: &InfoCard) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for profile in &card.profiles {
        lines.push(Line::from(vec![
            Span::styled(
                profile.name.clone(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(profile.tag.clone(), Style::default().fg(Color::DarkGray)),
        ]));
        lines.push(Line::from(profile.stats.clone()));
        if let Some(ref title) = profile.servers_title {
            lines.push(Line::from(Span::styled(
                title.clone(),
                Style::default().fg(Color::Yellow),
            )));
            for server in &profile.servers {
                lines.push(Line::from(format!("  {}", server)));
            }
            if let Some(ref more) = profile.servers_more {
                lines.push(Line::from(Span::styled(
                    format!("  {}", more),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }
        lines.push(Line::from(Span::styled(
            profile.profile_url.clone(),
            Style::default().fg(Color::Blue),
        )));
        lines.push(Line::from(""));
    }
    lines
}

fn centered(area: Rect, percent_x: u16, percent_y: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

/// Runs the graph explorer until the user quits.
pub fn run_explorer(explorer: &mut Explorer) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, explorer);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    explorer: &mut Explorer,
) -> Result<()> {
    loop {
        terminal.draw(|f| explorer.draw(f))?;

        if let Event::Key(key) = event::read()? {
            explorer.handle_key(key);
        }
        if explorer.should_quit() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use mutuals_core::data::Database;
    use mutuals_core::model::{Entity, Graph};
    use std::sync::{Arc, Mutex};

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn type_text(explorer: &mut Explorer, text: &str) {
        for c in text.chars() {
            explorer.handle_key(press(KeyCode::Char(c)));
        }
    }

    fn sample_graph() -> Graph {
        vec![
            Entity::new("1", "alice").with_neighbors(["2", "3"]),
            Entity::new("2", "bob").with_neighbors(["1", "3"]),
            Entity::new("3", "carol").with_neighbors(["1", "2"]),
            Entity::new("4", "dave"),
        ]
        .into()
    }

    fn explorer() -> Explorer {
        Explorer::new(GraphView::load(sample_graph(), false))
    }

    #[test]
    fn test_enter_toggles_selection_and_dims_others() {
        let mut explorer = explorer();
        explorer.handle_key(press(KeyCode::Enter));

        assert_eq!(explorer.view().selected(), ["1".to_string()]);
        assert_eq!(explorer.opacity("2"), FULL_OPACITY);
        assert!(explorer.opacity("4") < FULL_OPACITY);
        assert_eq!(explorer.emphasized_edges(), 3);

        explorer.handle_key(press(KeyCode::Enter));
        assert!(explorer.view().selected().is_empty());
        assert_eq!(explorer.opacity("4"), FULL_OPACITY);
        assert_eq!(explorer.emphasized_edges(), 0);
    }

    #[test]
    fn test_search_pick_focuses_result() {
        let mut explorer = explorer();
        explorer.handle_key(press(KeyCode::Char('/')));
        assert!(explorer.view().is_search_open());

        type_text(&mut explorer, "carol");
        explorer.handle_key(press(KeyCode::Enter));

        assert!(!explorer.view().is_search_open());
        assert_eq!(explorer.view().selected(), ["3".to_string()]);
        assert_eq!(explorer.cursor(), 2);
    }

    #[test]
    fn test_search_keys_do_not_leak_into_list() {
        let mut explorer = explorer();
        explorer.handle_key(press(KeyCode::Char('/')));
        type_text(&mut explorer, "q");
        assert!(!explorer.should_quit());
        assert_eq!(explorer.view().query(), "q");

        explorer.handle_key(press(KeyCode::Backspace));
        assert_eq!(explorer.view().query(), "");

        explorer.handle_key(press(KeyCode::Esc));
        assert!(!explorer.view().is_search_open());
    }

    #[test]
    fn test_escape_unwinds_selection() {
        let mut explorer = explorer();
        explorer.handle_key(press(KeyCode::Enter));
        explorer.handle_key(press(KeyCode::Down));
        explorer.handle_key(press(KeyCode::Enter));
        assert_eq!(explorer.view().selected().len(), 2);

        explorer.handle_key(press(KeyCode::Esc));
        assert_eq!(explorer.view().selected(), ["1".to_string()]);
        explorer.handle_key(press(KeyCode::Esc));
        assert!(explorer.view().selected().is_empty());
    }

    #[test]
    fn test_open_profile_sets_status() {
        let mut explorer = explorer();
        explorer.handle_key(press(KeyCode::End));
        explorer.handle_key(press(KeyCode::Char('o')));
        assert_eq!(explorer.cursor(), 3);
        assert_eq!(explorer.status(), "Profile: https://discord.com/users/4");
    }

    #[test]
    fn test_hide_names_is_persisted() {
        let store = Arc::new(Mutex::new(Database::in_memory().unwrap()));
        store
            .lock()
            .unwrap()
            .set(&[mutuals_core::data::StoreEntry::Connections(sample_graph())])
            .unwrap();

        let mut explorer = Explorer::from_store(Arc::clone(&store)).unwrap().unwrap();
        assert!(!explorer.view().hide_names());

        explorer.handle_key(press(KeyCode::Char('h')));
        assert!(explorer.view().hide_names());
        assert!(explorer.labels.values().all(String::is_empty));
        assert!(store.lock().unwrap().hide_names().unwrap());

        let reloaded = Explorer::from_store(store).unwrap().unwrap();
        assert!(reloaded.view().hide_names());
    }

    #[test]
    fn test_from_empty_store() {
        let store = Arc::new(Mutex::new(Database::in_memory().unwrap()));
        assert!(Explorer::from_store(store).unwrap().is_none());
    }
}
