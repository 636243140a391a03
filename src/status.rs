use anyhow::{Context, Result};
use crossterm::{
    cursor::{Hide, Show},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::Constraint,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Row, Table},
    Terminal,
};
use std::{
    fmt,
    io::{self, Stdout},
    sync::Arc,
    time::Duration,
};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::config::PortSpec;
use crate::registry::Registry;
use crate::shutdown::Shutdown;

pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Offline,
    Active,
    Waiting,
}

impl DisplayState {
    pub fn label(self) -> &'static str {
        match self {
            DisplayState::Offline => "Offline",
            DisplayState::Active => "Active",
            DisplayState::Waiting => "Waiting",
        }
    }

    pub fn color(self) -> Color {
        match self {
            DisplayState::Offline => Color::Red,
            DisplayState::Active => Color::Green,
            DisplayState::Waiting => Color::Yellow,
        }
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    /// 1-based position in the configuration.
    pub index: usize,
    pub name: String,
    pub baud_rate: u32,
    pub state: DisplayState,
    pub bytes_per_second: f64,
}

pub trait StatusView: Send {
    fn render(&mut self, rows: &[StatusRow]) -> Result<()>;
}

pub fn title() -> String {
    format!("Serial Port Collector v{}", env!("CARGO_PKG_VERSION"))
}

pub fn status_table(rows: &[StatusRow]) -> Table<'static> {
    let header = Row::new(["No.", "Port", "Baud", "Status", "Speed(B/s)"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let body: Vec<Row> = rows
        .iter()
        .map(|row| {
            Row::new(vec![
                Cell::from(row.index.to_string()),
                Cell::from(row.name.clone()),
                Cell::from(row.baud_rate.to_string()),
                Cell::from(row.state.label()).style(Style::default().fg(row.state.color())),
                Cell::from(format!("{:.1}", row.bytes_per_second)),
            ])
        })
        .collect();
    let widths = [
        Constraint::Length(4),
        Constraint::Min(8),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(12),
    ];
    Table::new(body, widths)
        .header(header)
        .block(Block::default().title(title()).borders(Borders::ALL))
}

/// Full-screen table on the controlling terminal. The screen is restored on drop.
pub struct TerminalStatusView {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalStatusView {
    pub fn new() -> Result<Self> {
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, Hide).context("prepare terminal")?;
        let mut terminal =
            Terminal::new(CrosstermBackend::new(stdout)).context("create terminal backend")?;
        terminal.clear().context("clear terminal")?;
        Ok(Self { terminal })
    }
}

impl StatusView for TerminalStatusView {
    fn render(&mut self, rows: &[StatusRow]) -> Result<()> {
        self.terminal
            .draw(|frame| {
                let area = frame.size();
                frame.render_widget(status_table(rows), area);
            })
            .context("draw status table")?;
        Ok(())
    }
}

impl Drop for TerminalStatusView {
    fn drop(&mut self) {
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen, Show);
    }
}

/// Headless rendering: one log event per port per tick.
#[derive(Debug, Default)]
pub struct LogStatusView;

impl StatusView for LogStatusView {
    fn render(&mut self, rows: &[StatusRow]) -> Result<()> {
        for row in rows {
            tracing::info!(
                no = row.index,
                port = %row.name,
                baud = row.baud_rate,
                status = %row.state,
                bytes_per_second = %format!("{:.1}", row.bytes_per_second),
                "port status"
            );
        }
        Ok(())
    }
}

/// Snapshots the registry once per [`STATUS_INTERVAL`] and renders it until stopped.
pub async fn run_status(
    specs: Arc<Vec<PortSpec>>,
    registry: Arc<Registry>,
    mut view: Box<dyn StatusView>,
    mut shutdown: Shutdown,
) {
    let mut ticker = interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut render_failed = false;
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                // The registry lock is released before any rendering I/O.
                let rows = registry.snapshot(&specs, Instant::now());
                match view.render(&rows) {
                    Ok(()) => render_failed = false,
                    Err(err) => {
                        if !render_failed {
                            tracing::warn!(error = %err, "status render failed");
                        }
                        render_failed = true;
                    }
                }
            }
        }
    }
    tracing::debug!("status task stopped");
}
