mod app;

use std::io;
use std::time::Duration;

use app::{
    format_change, format_large_number, format_price, truncate, AppState, ConnectionStatus,
    Direction, SortKey,
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction as LayoutDirection, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

/// The server refreshes every few minutes; polling faster only re-reads the same snapshot.
const POLL_INTERVAL: Duration = Duration::from_secs(30);

const COLUMNS: [&str; 7] = [
    "#",
    "Name",
    "Symbol",
    "Price",
    "24h %",
    "Volume (24h)",
    "Market Cap",
];

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut table_state = TableState::default();
    table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    table_state: &mut TableState,
) -> io::Result<()> {
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, table_state))?;

        let timeout = POLL_INTERVAL
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Char('1') => app.handle_sort(SortKey::Rank),
                        KeyCode::Char('2') => app.handle_sort(SortKey::Price),
                        KeyCode::Char('3') => app.handle_sort(SortKey::Volume24h),
                        KeyCode::Char('4') => app.handle_sort(SortKey::MarketCap),
                        KeyCode::Char('5') => app.handle_sort(SortKey::PercentChange24h),
                        KeyCode::Right | KeyCode::Char('l') => {
                            app.next_page();
                            table_state.select(None);
                        }
                        KeyCode::Left | KeyCode::Char('h') => {
                            app.prev_page();
                            table_state.select(None);
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.current_page_data().len().saturating_sub(1);
                            let next = table_state.selected().map_or(0, |i| (i + 1).min(max));
                            table_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = table_state.selected().map_or(0, |i| i.saturating_sub(1));
                            table_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= POLL_INTERVAL {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, table_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(LayoutDirection::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_table(f, app, table_state, chunks[1]);
    render_footer(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let updated = app
        .last_update
        .as_deref()
        .map_or("never".to_string(), |t| truncate(t, 19));
    let arrow = match app.sort.direction {
        Direction::Asc => "▲",
        Direction::Desc => "▼",
    };

    let title_spans = vec![
        Span::styled(
            " Crypto Listings  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format!("{} coins", app.cryptos.len()),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("updated {updated}"),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(
            format!("sort: {} {arrow}", app.sort.key.label()),
            Style::default().fg(Color::White),
        ),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );

    f.render_widget(paragraph, area);
}

fn render_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_style = Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD);
    let header_cells = COLUMNS.iter().map(|h| Cell::from(*h).style(header_style));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .current_page_data()
        .into_iter()
        .map(|c| {
            let q = c.quote.usd;
            let change_color = if q.percent_change_24h > 0.0 {
                Color::Green
            } else if q.percent_change_24h < 0.0 {
                Color::Red
            } else {
                Color::White
            };

            Row::new(vec![
                Cell::from(c.cmc_rank.to_string()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&c.name, 24)),
                Cell::from(c.symbol.clone()).style(Style::default().fg(Color::Cyan)),
                Cell::from(format_price(q.price)),
                Cell::from(format_change(q.percent_change_24h))
                    .style(Style::default().fg(change_color)),
                Cell::from(format_large_number(q.volume_24h)),
                Cell::from(format_large_number(q.market_cap)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(5),
            Constraint::Min(12),
            Constraint::Length(8),
            Constraint::Length(14),
            Constraint::Length(9),
            Constraint::Length(14),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                format!(" PAGE {}/{} ", app.page, app.total_pages()),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[1-5] ", Style::default().fg(Color::Yellow)),
        Span::raw("sort rank/price/vol/cap/24h  "),
        Span::styled("[←→ / h l] ", Style::default().fg(Color::Yellow)),
        Span::raw("page  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll  "),
        Span::styled(
            format!("auto-refresh: {}s", POLL_INTERVAL.as_secs()),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
