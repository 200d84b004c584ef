use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use member_registry::{CurrentCounts, MemberRecord, PeriodCount, PeriodKind, Registry};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{BarChart, Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use std::path::PathBuf;

/// Members shown on the Members page
const RECENT_MEMBERS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Overview,
    Members,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Overview => Page::Members,
            Page::Members => Page::Overview,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Overview => "Overview",
            Page::Members => "Recent Members",
        }
    }
}

pub struct App {
    pub total_members: usize,
    pub last_issued: u64,
    pub current: CurrentCounts,
    pub last_7_days: Vec<PeriodCount>,
    pub last_6_months: Vec<PeriodCount>,
    pub members: Vec<MemberRecord>,
    pub state: TableState,
    pub current_page: Page,
    /// `r` was pressed; waiting for `y` to confirm
    pub confirm_reset: bool,
    pub message: Option<String>,
    export_dir: PathBuf,
}

impl App {
    pub fn load(registry: &Registry, export_dir: PathBuf) -> Result<Self> {
        let mut app = Self {
            total_members: 0,
            last_issued: 0,
            current: CurrentCounts {
                today: 0,
                this_month: 0,
                this_year: 0,
            },
            last_7_days: Vec::new(),
            last_6_months: Vec::new(),
            members: Vec::new(),
            state: TableState::default(),
            current_page: Page::Overview,
            confirm_reset: false,
            message: None,
            export_dir,
        };
        app.refresh(registry)?;
        Ok(app)
    }

    /// Re-read every figure from the registry
    pub fn refresh(&mut self, registry: &Registry) -> Result<()> {
        let stats = registry.stats();

        self.total_members = registry.store().count()?;
        self.last_issued = registry.allocator().current()?;
        self.current = stats.current_counts()?;
        self.last_7_days = stats.recent_window(PeriodKind::Day, 7)?;
        self.last_6_months = stats.recent_window(PeriodKind::Month, 6)?;
        self.members = registry.store().recent_first(RECENT_MEMBERS)?;

        if self.members.is_empty() {
            self.state.select(None);
        } else if self.state.selected().map_or(true, |i| i >= self.members.len()) {
            self.state.select(Some(0));
        }

        Ok(())
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn next(&mut self) {
        let len = self.members.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.members.len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn export(&mut self, registry: &Registry) {
        self.message = Some(match registry.write_snapshot(&self.export_dir) {
            Ok(path) => format!("Exported to {}", path.display()),
            Err(e) => format!("Export failed: {:#}", e),
        });
    }

    pub fn reset(&mut self, registry: &Registry) -> Result<()> {
        self.confirm_reset = false;
        match registry.reset_statistics() {
            Ok(()) => {
                self.message = Some("Statistics reset".to_string());
                self.refresh(registry)
            }
            Err(e) => {
                self.message = Some(format!("Reset failed: {}", e.user_message()));
                Ok(())
            }
        }
    }

    /// Apply one key press; returns true when the dashboard should close
    pub fn handle_key(&mut self, registry: &Registry, code: KeyCode, modifiers: KeyModifiers) -> Result<bool> {
        if self.confirm_reset {
            match code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self.reset(registry)?,
                _ => {
                    self.confirm_reset = false;
                    self.message = Some("Reset cancelled".to_string());
                }
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return Ok(true),
            KeyCode::Tab | KeyCode::BackTab => self.next_page(),
            KeyCode::Char('e') => self.export(registry),
            KeyCode::Char('r') => {
                self.confirm_reset = true;
                self.message = Some("Reset all statistics and the member counter? (y/N)".to_string());
            }
            KeyCode::Char('g') => {
                self.refresh(registry)?;
                self.message = Some("Refreshed".to_string());
            }
            KeyCode::Down | KeyCode::Char('j') => self.next(),
            KeyCode::Up | KeyCode::Char('k') => self.previous(),
            KeyCode::Home if !self.members.is_empty() => self.state.select(Some(0)),
            KeyCode::End if !self.members.is_empty() => self.state.select(Some(self.members.len() - 1)),
            _ => {}
        }

        Ok(false)
    }
}

pub fn run_ui(app: &mut App, registry: &Registry) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app, registry);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    registry: &Registry,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if app.handle_key(registry, key.code, key.modifiers)? {
                return Ok(());
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

    match app.current_page {
        Page::Overview => render_overview(f, chunks[1], app),
        Page::Members => render_members(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut tab_spans = vec![];
    for (i, page) in [Page::Overview, Page::Members].iter().enumerate() {
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
        format!("Members: {}", app.total_members),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Today {}", app.current.today),
        Style::default().fg(Color::Green),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Month {}", app.current.this_month),
        Style::default().fg(Color::Cyan),
    ));
    tab_spans.push(Span::raw("  "));
    tab_spans.push(Span::styled(
        format!("Year {}", app.current.this_year),
        Style::default().fg(Color::Magenta),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn render_overview(f: &mut Frame, area: Rect, app: &App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(7), Constraint::Min(0)])
        .split(area);

    let summary = vec![
        Line::from(vec![
            Span::styled("Total members:    ", Style::default().fg(Color::Yellow)),
            Span::raw(app.total_members.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Last issued ID:   ", Style::default().fg(Color::Yellow)),
            Span::raw(app.last_issued.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Today:            ", Style::default().fg(Color::Yellow)),
            Span::raw(app.current.today.to_string()),
        ]),
        Line::from(vec![
            Span::styled("This month:       ", Style::default().fg(Color::Yellow)),
            Span::raw(app.current.this_month.to_string()),
        ]),
        Line::from(vec![
            Span::styled("This year:        ", Style::default().fg(Color::Yellow)),
            Span::raw(app.current.this_year.to_string()),
        ]),
    ];
    f.render_widget(
        Paragraph::new(summary).block(Block::default().borders(Borders::ALL).title(" Summary ")),
        rows[0],
    );

    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[1]);

    render_trend(f, charts[0], " Last 7 Days ", &app.last_7_days, Color::Green);
    render_trend(f, charts[1], " Last 6 Months ", &app.last_6_months, Color::Cyan);
}

fn render_trend(f: &mut Frame, area: Rect, title: &str, periods: &[PeriodCount], color: Color) {
    let bars: Vec<(&str, u64)> = periods
        .iter()
        .map(|p| (p.label.as_str(), p.count))
        .collect();

    let chart = BarChart::default()
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .data(bars.as_slice())
        .bar_width(11)
        .bar_gap(1)
        .bar_style(Style::default().fg(color))
        .value_style(Style::default().fg(Color::Black).bg(color));

    f.render_widget(chart, area);
}

fn render_members(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["ID", "Name", "Ministry", "Status", "Payment", "Registered"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.members.iter().map(|m| {
        Row::new(vec![
            Cell::from(m.id.to_string()),
            Cell::from(truncate(&m.name, 28)),
            Cell::from(truncate(&m.ministry, 20)),
            Cell::from(m.status.as_str()),
            Cell::from(m.payment_method.label()),
            Cell::from(m.registered_at.format("%Y-%m-%d %H:%M").to_string()),
        ])
        .height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(11),
            Constraint::Length(30),
            Constraint::Length(22),
            Constraint::Length(14),
            Constraint::Length(15),
            Constraint::Length(17),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Recent Members "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![];

    if let Some(message) = &app.message {
        let color = if app.confirm_reset { Color::Red } else { Color::Green };
        status_spans.push(Span::styled(format!(" {} ", message), Style::default().fg(color)));
        status_spans.push(Span::raw(" | "));
    }

    status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Page | "));
    status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Nav | "));
    status_spans.push(Span::styled("e", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Export | "));
    status_spans.push(Span::styled("r", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Reset | "));
    status_spans.push(Span::styled("g", Style::default().fg(Color::Yellow)));
    status_spans.push(Span::raw(" Refresh | "));
    status_spans.push(Span::styled("q", Style::default().fg(Color::Red)));
    status_spans.push(Span::raw(" Quit"));

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
