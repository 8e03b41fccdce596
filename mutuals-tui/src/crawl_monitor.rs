use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use mutuals_core::controller::{CrawlEvent, CrawlState, SharedDatabase};
use mutuals_core::model::CrawlProgress;
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};
use std::io;
use std::sync::{
    Arc, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// How often the store is re-read for progress written by the scanner.
pub const STORE_POLL_INTERVAL: Duration = Duration::from_millis(500);

const MAX_ROWS: usize = 1000;
const MAX_LOGS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorStatus {
    Waiting,
    Running,
    Stopping,
    Finished(String),
}

/// What the event loop should do after a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorCommand {
    None,
    Stop,
    Exit,
}

struct ScannedRow {
    name: String,
    neighbors: usize,
    failed: bool,
}

/// TUI state for watching a scan
pub struct ScanMonitor {
    rows: Vec<ScannedRow>,
    selected: Option<usize>,
    logs: Vec<(LogLevel, String)>,
    progress: Option<CrawlProgress>,
    total_friends: Option<usize>,
    status: MonitorStatus,
    rx: mpsc::UnboundedReceiver<CrawlEvent>,
    store: Option<SharedDatabase>,
    last_poll: Option<Instant>,
    pending_failure: Option<String>,
}

impl ScanMonitor {
    pub fn new(rx: mpsc::UnboundedReceiver<CrawlEvent>) -> Self {
        Self {
            rows: Vec::new(),
            selected: None,
            logs: Vec::new(),
            progress: None,
            total_friends: None,
            status: MonitorStatus::Waiting,
            rx,
            store: None,
            last_poll: None,
            pending_failure: None,
        }
    }

    /// Also read progress from `store`, for scans running in another process.
    pub fn with_store(mut self, store: SharedDatabase) -> Self {
        self.store = Some(store);
        self
    }

    pub fn status(&self) -> &MonitorStatus {
        &self.status
    }

    pub fn progress(&self) -> Option<CrawlProgress> {
        self.progress
    }

    pub fn scanned(&self) -> usize {
        self.rows.len()
    }

    pub fn logs(&self) -> impl Iterator<Item = &(LogLevel, String)> {
        self.logs.iter()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, MonitorStatus::Finished(_))
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push((level, message.into()));
        if self.logs.len() > MAX_LOGS {
            self.logs.drain(0..self.logs.len() - MAX_LOGS);
        }
    }

    /// Drains pending events without blocking.
    pub fn process_events(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: CrawlEvent) {
        match event {
            CrawlEvent::Started { scanning, total } => {
                self.total_friends = Some(total);
                self.progress = Some(CrawlProgress::new(0, scanning));
                if self.status == MonitorStatus::Waiting {
                    self.status = MonitorStatus::Running;
                }
                self.log(
                    LogLevel::Info,
                    format!("Scanning {} of {} friends", scanning, total),
                );
            }
            CrawlEvent::EntityScanned {
                progress,
                id,
                name,
                neighbors,
            } => {
                self.progress = Some(progress);
                let failed = self.pending_failure.take().is_some_and(|failed| failed == id);
                self.rows.push(ScannedRow {
                    name,
                    neighbors,
                    failed,
                });
                if self.rows.len() > MAX_ROWS {
                    let overflow = self.rows.len() - MAX_ROWS;
                    self.rows.drain(0..overflow);
                    self.selected = self.selected.map(|s| s.saturating_sub(overflow));
                }
            }
            CrawlEvent::EntityFailed { id, name, error } => {
                self.log(
                    LogLevel::Warn,
                    format!("Could not fetch mutuals for {}: {}", name, error),
                );
                // the scanned event for this friend follows
                self.pending_failure = Some(id);
            }
            CrawlEvent::Finished { state, scanned } => {
                let message = match state {
                    CrawlState::Completed => format!("Scan complete! {} friends scanned", scanned),
                    CrawlState::Cancelled => format!("Scan stopped. {} friends kept", scanned),
                    _ => "Scan failed".to_string(),
                };
                let level = if state == CrawlState::Failed {
                    LogLevel::Error
                } else {
                    LogLevel::Info
                };
                self.log(level, message.clone());
                self.progress = None;
                self.status = MonitorStatus::Finished(message);
            }
        }
    }

    /// Re-reads progress from the store once per [`STORE_POLL_INTERVAL`].
    pub fn poll_store(&mut self, now: Instant) {
        let Some(ref store) = self.store else {
            return;
        };
        if let Some(last) = self.last_poll
            && now.duration_since(last) < STORE_POLL_INTERVAL
        {
            return;
        }
        self.last_poll = Some(now);

        let stored = store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scan_progress();
        match stored {
            Ok(Some(progress)) => {
                self.progress = Some(progress);
                if self.status == MonitorStatus::Waiting {
                    self.status = MonitorStatus::Running;
                }
            }
            Ok(None) => {
                if self.progress.is_some() && !self.is_finished() {
                    self.progress = None;
                    self.status = MonitorStatus::Finished("Scan no longer running".to_string());
                }
            }
            Err(e) => self.log(LogLevel::Error, format!("Could not read progress: {}", e)),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> MonitorCommand {
        if key.kind != KeyEventKind::Press {
            return MonitorCommand::None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if self.is_finished() {
                    MonitorCommand::Exit
                } else {
                    self.request_stop()
                }
            }
            KeyCode::Char('s') => {
                if self.is_finished() {
                    MonitorCommand::None
                } else {
                    self.request_stop()
                }
            }
            KeyCode::Char('q') | KeyCode::Esc => MonitorCommand::Exit,
            KeyCode::Up => {
                if !self.rows.is_empty() {
                    self.selected = Some(match self.selected {
                        Some(selected) => selected.saturating_sub(1),
                        None => self.rows.len() - 1,
                    });
                }
                MonitorCommand::None
            }
            KeyCode::Down => {
                if !self.rows.is_empty() {
                    self.selected = Some(match self.selected {
                        Some(selected) => (selected + 1).min(self.rows.len() - 1),
                        None => 0,
                    });
                }
                MonitorCommand::None
            }
            KeyCode::Home => {
                if !self.rows.is_empty() {
                    self.selected = Some(0);
                }
                MonitorCommand::None
            }
            KeyCode::End => {
                self.selected = None;
                MonitorCommand::None
            }
            _ => MonitorCommand::None,
        }
    }

    fn request_stop(&mut self) -> MonitorCommand {
        if self.status == MonitorStatus::Stopping {
            return MonitorCommand::None;
        }
        self.status = MonitorStatus::Stopping;
        self.log(LogLevel::Warn, "Stopping after the current friend...");
        MonitorCommand::Stop
    }

    fn render_scanned(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!(" Scanned ({}) ", self.rows.len()))
            .border_style(Style::default().fg(Color::Cyan));
        let inner = block.inner(area);
        f.render_widget(block, area);

        if self.rows.is_empty() {
            let empty = Paragraph::new("Waiting for the first friend...")
                .style(Style::default().fg(Color::DarkGray))
                .wrap(Wrap { trim: true });
            f.render_widget(empty, inner);
            return;
        }

        let height = inner.height as usize;
        // Follow the tail unless a row is selected
        let offset = match self.selected {
            Some(selected) if selected >= height => selected + 1 - height,
            Some(_) => 0,
            None => self.rows.len().saturating_sub(height),
        };

        let items: Vec<ListItem> = self
            .rows
            .iter()
            .enumerate()
            .skip(offset)
            .take(height)
            .map(|(idx, row)| {
                let (icon, color) = if row.failed {
                    ("✗", Color::Red)
                } else if row.neighbors == 0 {
                    ("·", Color::DarkGray)
                } else {
                    ("✓", Color::Green)
                };
                let mut style = Style::default().fg(color);
                if Some(idx) == self.selected {
                    style = style.bg(Color::DarkGray).add_modifier(Modifier::BOLD);
                }
                ListItem::new(format!("{} {:<32} {} mutuals", icon, row.name, row.neighbors))
                    .style(style)
            })
            .collect();

        f.render_widget(List::new(items), inner);
    }

    fn render_progress(&self, f: &mut Frame, area: Rect) {
        let (title, color) = match self.status {
            MonitorStatus::Finished(_) => (" Complete ", Color::Green),
            MonitorStatus::Stopping => (" Stopping ", Color::Red),
            _ => (" Progress ", Color::Yellow),
        };
        let block = Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(Style::default().fg(color));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Length(1), Constraint::Min(1)])
            .split(inner);

        let (percent, label) = match self.progress {
            Some(progress) => (
                progress.percent().min(100),
                format!("{} / {}", progress.current, progress.total),
            ),
            None if self.is_finished() => (100, "done".to_string()),
            None => (0, "fetching friend list".to_string()),
        };
        let gauge = Gauge::default()
            .gauge_style(Style::default().fg(Color::Cyan).bg(Color::Black))
            .percent(percent)
            .label(label);
        f.render_widget(gauge, chunks[0]);

        let mut text = Vec::new();
        if let Some(total) = self.total_friends {
            text.push(Line::from(vec![
                Span::styled("Friends: ", Style::default().fg(Color::DarkGray)),
                Span::styled(total.to_string(), Style::default().fg(Color::Cyan)),
            ]));
        }
        if let MonitorStatus::Finished(ref message) = self.status {
            text.push(Line::from(Span::styled(
                message.clone(),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            )));
        }
        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), chunks[2]);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .title(" Logs ")
            .border_style(Style::default().fg(Color::Magenta));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let height = inner.height as usize;
        let items: Vec<ListItem> = self
            .logs
            .iter()
            .skip(self.logs.len().saturating_sub(height))
            .map(|(level, message)| {
                let (prefix, style) = match level {
                    LogLevel::Info => ("INFO ", Style::default().fg(Color::Blue)),
                    LogLevel::Warn => ("WARN ", Style::default().fg(Color::Yellow)),
                    LogLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(format!("[{}] {}", prefix, message)).style(style)
            })
            .collect();
        f.render_widget(List::new(items), inner);
    }

    fn render_hints(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Black).bg(Color::Gray);
        let mut spans = Vec::new();
        if !self.is_finished() {
            spans.push(Span::styled(" s/Ctrl+C ", key));
            spans.push(Span::raw(" Stop  "));
        }
        spans.extend([
            Span::styled(" q/ESC ", key),
            Span::raw(" Exit  "),
            Span::styled(" ↑/↓ ", key),
            Span::raw(" Select  "),
            Span::styled(" End ", key),
            Span::raw(" Follow"),
        ]);
        let paragraph =
            Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black).fg(Color::Gray));
        f.render_widget(paragraph, area);
    }

    fn draw(&self, f: &mut Frame) {
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(10), Constraint::Length(1)])
            .split(f.area());
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(vertical[0]);
        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(6)])
            .split(main[1]);

        self.render_scanned(f, main[0]);
        self.render_progress(f, right[0]);
        self.render_logs(f, right[1]);
        self.render_hints(f, vertical[1]);
    }
}

/// Runs the scan monitor until the user exits or `should_exit` is set.
/// Blocking; run it on its own thread. `on_stop` is called at most once.
pub fn run_monitor(
    monitor: ScanMonitor,
    should_exit: Arc<AtomicBool>,
    on_stop: impl Fn(),
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = monitor_loop(&mut terminal, monitor, &should_exit, &on_stop);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn monitor_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    mut monitor: ScanMonitor,
    should_exit: &AtomicBool,
    on_stop: &dyn Fn(),
) -> Result<()> {
    loop {
        monitor.process_events();
        monitor.poll_store(Instant::now());
        terminal.draw(|f| monitor.draw(f))?;

        if should_exit.load(Ordering::Relaxed) {
            break;
        }

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
        {
            match monitor.handle_key(key) {
                MonitorCommand::Stop => on_stop(),
                MonitorCommand::Exit => break,
                MonitorCommand::None => {}
            }
        }
    }
    Ok(())
}

/// Channel pair for feeding [`CrawlEvent`]s into a monitor
pub fn create_monitor_channel() -> (
    mpsc::UnboundedSender<CrawlEvent>,
    mpsc::UnboundedReceiver<CrawlEvent>,
) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;
    use mutuals_core::data::{Database, StoreEntry};
    use std::sync::Mutex;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn scanned(current: usize, total: usize, name: &str, neighbors: usize) -> CrawlEvent {
        CrawlEvent::EntityScanned {
            progress: CrawlProgress::new(current, total),
            id: current.to_string(),
            name: name.to_string(),
            neighbors,
        }
    }

    #[test]
    fn test_events_update_progress_and_rows() {
        let (tx, rx) = create_monitor_channel();
        let mut monitor = ScanMonitor::new(rx);

        tx.send(CrawlEvent::Started {
            scanning: 2,
            total: 5,
        })
        .unwrap();
        tx.send(scanned(1, 2, "alice", 3)).unwrap();
        monitor.process_events();

        assert_eq!(monitor.status(), &MonitorStatus::Running);
        assert_eq!(monitor.progress(), Some(CrawlProgress::new(1, 2)));
        assert_eq!(monitor.scanned(), 1);

        tx.send(scanned(2, 2, "bob", 0)).unwrap();
        tx.send(CrawlEvent::Finished {
            state: CrawlState::Completed,
            scanned: 2,
        })
        .unwrap();
        monitor.process_events();

        assert!(monitor.is_finished());
        assert!(monitor.progress().is_none());
        assert_eq!(monitor.scanned(), 2);
    }

    #[test]
    fn test_failed_friend_is_one_row() {
        let (tx, rx) = create_monitor_channel();
        let mut monitor = ScanMonitor::new(rx);

        tx.send(CrawlEvent::EntityFailed {
            id: "1".to_string(),
            name: "alice".to_string(),
            error: "API 429".to_string(),
        })
        .unwrap();
        tx.send(scanned(1, 1, "alice", 0)).unwrap();
        monitor.process_events();

        assert_eq!(monitor.scanned(), 1);
        assert!(monitor.rows[0].failed);
        assert!(
            monitor
                .logs()
                .any(|(level, msg)| *level == LogLevel::Warn && msg.contains("API 429"))
        );
    }

    #[test]
    fn test_stop_is_requested_once() {
        let (_tx, rx) = create_monitor_channel();
        let mut monitor = ScanMonitor::new(rx);

        assert_eq!(monitor.handle_key(press(KeyCode::Char('s'))), MonitorCommand::Stop);
        assert_eq!(monitor.handle_key(press(KeyCode::Char('s'))), MonitorCommand::None);
        assert_eq!(monitor.status(), &MonitorStatus::Stopping);
        assert_eq!(monitor.handle_key(press(KeyCode::Esc)), MonitorCommand::Exit);
    }

    #[test]
    fn test_ctrl_c_exits_after_finish() {
        let (tx, rx) = create_monitor_channel();
        let mut monitor = ScanMonitor::new(rx);
        tx.send(CrawlEvent::Finished {
            state: CrawlState::Cancelled,
            scanned: 0,
        })
        .unwrap();
        monitor.process_events();

        let ctrl_c = KeyEvent {
            modifiers: KeyModifiers::CONTROL,
            ..press(KeyCode::Char('c'))
        };
        assert_eq!(monitor.handle_key(ctrl_c), MonitorCommand::Exit);
    }

    #[test]
    fn test_store_polling_is_throttled() {
        let store = Arc::new(Mutex::new(Database::in_memory().unwrap()));
        let (_tx, rx) = create_monitor_channel();
        let mut monitor = ScanMonitor::new(rx).with_store(Arc::clone(&store));

        let start = Instant::now();
        store
            .lock()
            .unwrap()
            .set(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(2, 9)))])
            .unwrap();
        monitor.poll_store(start);
        assert_eq!(monitor.progress(), Some(CrawlProgress::new(2, 9)));

        store
            .lock()
            .unwrap()
            .set(&[StoreEntry::ScanProgress(Some(CrawlProgress::new(3, 9)))])
            .unwrap();
        monitor.poll_store(start + Duration::from_millis(100));
        assert_eq!(monitor.progress(), Some(CrawlProgress::new(2, 9)));

        monitor.poll_store(start + STORE_POLL_INTERVAL);
        assert_eq!(monitor.progress(), Some(CrawlProgress::new(3, 9)));

        store
            .lock()
            .unwrap()
            .set(&[StoreEntry::ScanProgress(None)])
            .unwrap();
        monitor.poll_store(start + STORE_POLL_INTERVAL * 2);
        assert!(monitor.is_finished());
    }
}
