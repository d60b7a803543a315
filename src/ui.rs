use anyhow::Result;
use crossterm::{
    event::{self, Event as TermEvent, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use regional_sync::{Event, RegionalUnit};
use std::io;

const PAGE_JUMP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Active,
    History,
    Events,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Active => Page::History,
            Page::History => Page::Events,
            Page::Events => Page::Active,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Active => Page::Events,
            Page::History => Page::Active,
            Page::Events => Page::History,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Active => "Active Units",
            Page::History => "Version History",
            Page::Events => "Audit Log",
        }
    }
}

pub struct App {
    /// Every stored version, ordered by external id then local id
    pub units: Vec<RegionalUnit>,
    pub events: Vec<Event>,
    pub current_page: Page,
    pub active_state: TableState,
    pub history_state: TableState,
    pub events_state: TableState,
    pub show_detail: bool,
}

impl App {
    pub fn new(mut units: Vec<RegionalUnit>, events: Vec<Event>) -> Self {
        units.sort_by_key(|u| (u.external_id, u.local_id));

        let mut app = Self {
            units,
            events,
            current_page: Page::Active,
            active_state: TableState::default(),
            history_state: TableState::default(),
            events_state: TableState::default(),
            show_detail: false,
        };

        if !app.active_units().is_empty() {
            app.active_state.select(Some(0));
        }
        if !app.units.is_empty() {
            app.history_state.select(Some(0));
        }
        if !app.events.is_empty() {
            app.events_state.select(Some(0));
        }

        app
    }

    pub fn active_units(&self) -> Vec<&RegionalUnit> {
        self.units.iter().filter(|u| u.active).collect()
    }

    pub fn retired_count(&self) -> usize {
        self.units.iter().filter(|u| !u.active).count()
    }

    fn row_count(&self) -> usize {
        match self.current_page {
            Page::Active => self.active_units().len(),
            Page::History => self.units.len(),
            Page::Events => self.events.len(),
        }
    }

    fn state_mut(&mut self) -> &mut TableState {
        match self.current_page {
            Page::Active => &mut self.active_state,
            Page::History => &mut self.history_state,
            Page::Events => &mut self.events_state,
        }
    }

    /// Unit under the cursor on the Active or History page
    pub fn selected_unit(&self) -> Option<&RegionalUnit> {
        match self.current_page {
            Page::Active => self
                .active_state
                .selected()
                .and_then(|i| self.active_units().get(i).copied()),
            Page::History => self.history_state.selected().and_then(|i| self.units.get(i)),
            Page::Events => None,
        }
    }

    pub fn selected_event(&self) -> Option<&Event> {
        if self.current_page != Page::Events {
            return None;
        }
        self.events_state.selected().and_then(|i| self.events.get(i))
    }

    /// All versions of one external id, oldest first
    pub fn version_chain(&self, external_id: i64) -> Vec<&RegionalUnit> {
        self.units
            .iter()
            .filter(|u| u.external_id == external_id)
            .collect()
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    pub fn next(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let state = self.state_mut();
        let i = match state.selected() {
            Some(i) if i >= len - 1 => 0,
            Some(i) => i + 1,
            None => 0,
        };
        state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let state = self.state_mut();
        let i = match state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.row_count();
        if len == 0 {
            return;
        }
        let state = self.state_mut();
        let i = state.selected().map(|i| (i + PAGE_JUMP).min(len - 1)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        if self.row_count() == 0 {
            return;
        }
        let state = self.state_mut();
        let i = state.selected().map(|i| i.saturating_sub(PAGE_JUMP)).unwrap_or(0);
        state.select(Some(i));
    }

    pub fn first(&mut self) {
        if self.row_count() > 0 {
            self.state_mut().select(Some(0));
        }
    }

    pub fn last(&mut self) {
        let len = self.row_count();
        if len > 0 {
            self.state_mut().select(Some(len - 1));
        }
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let TermEvent::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab => app.next_page(),
                KeyCode::BackTab => app.previous_page(),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    return Ok(())
                }
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.first(),
                KeyCode::End => app.last(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    let content = if app.show_detail {
        let content_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
            .split(chunks[1]);
        render_detail_panel(f, content_chunks[1], app);
        content_chunks[0]
    } else {
        chunks[1]
    };

    match app.current_page {
        Page::Active => render_active(f, content, app),
        Page::History => render_history(f, content, app),
        Page::Events => render_events(f, content, app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Active, Page::History, Page::Events];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title().to_string(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("● {} active", app.active_units().len()),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("○ {} retired", app.retired_count()),
        Style::default().fg(Color::DarkGray),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    Row::new(cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1)
}

fn unit_row(unit: &RegionalUnit) -> Row<'static> {
    let (status, color) = if unit.is_current() {
        ("active", Color::Green)
    } else {
        ("retired", Color::DarkGray)
    };

    Row::new(vec![
        Cell::from(unit.external_id.to_string()),
        Cell::from(truncate(&unit.name, 40)),
        Cell::from(status).style(Style::default().fg(color)),
        Cell::from(unit.local_id.to_string()),
        Cell::from(unit.created_at.format("%Y-%m-%d %H:%M").to_string()),
        Cell::from(
            unit.retired_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        ),
    ])
    .height(1)
}

fn unit_table(rows: Vec<Row<'static>>, title: &str) -> Table<'static> {
    Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Min(20),
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(17),
            Constraint::Length(17),
        ],
    )
    .header(header_row(&["External ID", "Name", "Status", "Local", "Created", "Retired"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" {title} ")),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ")
}

fn render_active(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app.active_units().into_iter().map(unit_row).collect();
    let table = unit_table(rows, Page::Active.title());
    f.render_stateful_widget(table, area, &mut app.active_state);
}

fn render_history(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app.units.iter().map(unit_row).collect();
    let table = unit_table(rows, Page::History.title());
    f.render_stateful_widget(table, area, &mut app.history_state);
}

fn render_events(f: &mut Frame, area: Rect, app: &mut App) {
    let rows: Vec<Row> = app
        .events
        .iter()
        .map(|event| {
            let color = match event.event_type.as_str() {
                "unit_inserted" => Color::Green,
                "unit_superseded" => Color::Yellow,
                "unit_retired" | "duplicate_retired" => Color::Red,
                _ => Color::Cyan,
            };
            Row::new(vec![
                Cell::from(event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                Cell::from(event.event_type.clone()).style(Style::default().fg(color)),
                Cell::from(event.entity_type.clone()),
                Cell::from(truncate(&event.entity_id, 36)),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(20),
            Constraint::Length(18),
            Constraint::Length(14),
            Constraint::Min(12),
        ],
    )
    .header(header_row(&["Timestamp", "Event", "Entity", "Entity ID"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(format!(" {} ", Page::Events.title())),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.events_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = match app.current_page {
        Page::Active => app.active_state.selected(),
        Page::History => app.history_state.selected(),
        Page::Events => app.events_state.selected(),
    }
    .map(|i| i + 1)
    .unwrap_or(0);

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let status_spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected, app.row_count()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        key("Enter"),
        Span::raw(" Details | "),
        key("Tab"),
        Span::raw(" Page | "),
        key("↑/↓"),
        Span::raw(" Nav | "),
        key("PgUp/PgDn"),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn label(text: &'static str) -> Span<'static> {
    Span::styled(
        text,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn section(text: &'static str) -> Line<'static> {
    Line::from(Span::styled(
        text,
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
    ))
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let mut content: Vec<Line> = vec![Line::from("")];

    if let Some(unit) = app.selected_unit() {
        content.push(Line::from(vec![
            label("  External ID: "),
            Span::raw(unit.external_id.to_string()),
        ]));
        content.push(Line::from(vec![label("  Name: "), Span::raw(unit.name.clone())]));
        content.push(Line::from(vec![
            label("  Local ID: "),
            Span::raw(unit.local_id.to_string()),
        ]));
        content.push(Line::from(""));
        content.push(Line::from("  ─────────────────────────────────────"));
        content.push(Line::from(""));
        content.push(section("  VERSION CHAIN"));
        content.push(Line::from(""));

        for version in app.version_chain(unit.external_id) {
            let marker = if version.local_id == unit.local_id { "▶" } else { " " };
            let style = if version.active {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            content.push(Line::from(vec![
                Span::raw(format!("  {marker} #{} ", version.local_id)),
                Span::styled(truncate(&version.name, 28), style),
            ]));
            let until = version
                .retired_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "now".to_string());
            content.push(Line::from(Span::styled(
                format!("      {} → {}", version.created_at.format("%Y-%m-%d"), until),
                Style::default().fg(Color::DarkGray),
            )));
        }
    } else if let Some(event) = app.selected_event() {
        content.push(Line::from(vec![
            label("  Event: "),
            Span::raw(event.event_type.clone()),
        ]));
        content.push(Line::from(vec![label("  Actor: "), Span::raw(event.actor.clone())]));
        content.push(Line::from(""));
        content.push(section("  DATA"));
        content.push(Line::from(""));
        let pretty = serde_json::to_string_pretty(&event.data).unwrap_or_default();
        for line in pretty.lines() {
            content.push(Line::from(format!("  {line}")));
        }
    } else {
        content.push(Line::from("  Nothing selected"));
    }

    content.push(Line::from(""));
    content.push(Line::from(Span::styled(
        "  Press Enter to close",
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    )));

    let detail_panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Details "),
    );

    f.render_widget(detail_panel, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn unit(local_id: i64, external_id: i64, name: &str, active: bool) -> RegionalUnit {
        RegionalUnit {
            local_id,
            external_id,
            name: name.to_string(),
            active,
            created_at: Utc::now(),
            retired_at: if active { None } else { Some(Utc::now()) },
            supersedes: None,
        }
    }

    fn app() -> App {
        App::new(
            vec![
                unit(1, 100, "North", false),
                unit(3, 100, "North Updated", true),
                unit(2, 200, "South", true),
            ],
            vec![],
        )
    }

    #[test]
    fn test_pages_cycle() {
        assert_eq!(Page::Active.next(), Page::History);
        assert_eq!(Page::Events.next(), Page::Active);
        assert_eq!(Page::Active.previous(), Page::Events);
    }

    #[test]
    fn test_navigation_wraps_per_page() {
        let mut app = app();
        assert_eq!(app.active_state.selected(), Some(0));

        app.next();
        app.next();
        assert_eq!(app.active_state.selected(), Some(0));

        app.next_page();
        app.last();
        assert_eq!(app.history_state.selected(), Some(2));
        assert_eq!(app.active_state.selected(), Some(0));
    }

    #[test]
    fn test_empty_pages_do_not_move() {
        let mut app = app();
        app.current_page = Page::Events;
        app.next();
        app.page_down();
        assert_eq!(app.events_state.selected(), None);
        assert!(app.selected_event().is_none());
    }

    #[test]
    fn test_version_chain_lists_all_versions_of_selected_unit() {
        let app = app();
        let selected = app.selected_unit().unwrap();
        assert_eq!(selected.name, "North Updated");

        let chain: Vec<i64> = app
            .version_chain(selected.external_id)
            .iter()
            .map(|u| u.local_id)
            .collect();
        assert_eq!(chain, vec![1, 3]);
        assert_eq!(app.retired_count(), 1);
    }

    #[test]
    fn test_units_sorted_by_external_then_local_id() {
        let app = App::new(
            vec![
                unit(4, 200, "South Updated", true),
                unit(3, 100, "North Updated", true),
                unit(2, 200, "South", false),
                unit(1, 100, "North", false),
            ],
            vec![],
        );

        let order: Vec<(i64, i64)> = app
            .units
            .iter()
            .map(|u| (u.external_id, u.local_id))
            .collect();
        assert_eq!(order, vec![(100, 1), (100, 3), (200, 2), (200, 4)]);
        assert_eq!(app.selected_unit().unwrap().name, "North Updated");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("São Paulo", 20), "São Paulo");
        assert_eq!(truncate("Região Metropolitana", 8), "Regiã...");
    }
}
