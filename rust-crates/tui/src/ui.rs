use crate::{
    client::UserCommand,
    countdown::Urgency,
    store::{
        NoticeLevel,
        ViewState,
    },
    transactions::{
        TxKind,
        TxStatus,
    },
};
use alloy::primitives::Address;
use color_eyre::eyre::Result;
use crossterm::{
    event::{
        Event,
        EventStream,
        KeyCode,
        KeyEventKind,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use ratatui::{prelude::*, widgets::*};
use std::io::stdout;

pub enum UiEvent {
    Command(UserCommand),
    Redraw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tab {
    #[default]
    Game,
    Rules,
}

impl Tab {
    fn toggle(self) -> Self {
        match self {
            Tab::Game => Tab::Rules,
            Tab::Rules => Tab::Game,
        }
    }

    fn index(self) -> usize {
        match self {
            Tab::Game => 0,
            Tab::Rules => 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct UiState {
    tab: Tab,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // One persistent Terminal keeps the diffing buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

pub fn input_event_stream() -> EventStream {
    EventStream::new()
}

pub fn draw(state: &mut UiState, view: &ViewState) -> Result<()> {
    let tab = state.tab;
    if let Some(term) = state.terminal.as_mut() {
        term.draw(|f| render(f, tab, view))?;
    }
    Ok(())
}

/// Maps raw terminal input onto controller commands. Tab switching is purely
/// local and only asks for a redraw.
pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UiEvent> {
    match event {
        Event::Key(k) if k.kind == KeyEventKind::Press => match k.code {
            KeyCode::Enter | KeyCode::Char(' ') => {
                Some(UiEvent::Command(UserCommand::Activate))
            }
            KeyCode::Char('r') => Some(UiEvent::Command(UserCommand::Refresh)),
            KeyCode::Char('x') => Some(UiEvent::Command(UserCommand::Acknowledge)),
            KeyCode::Char('q') | KeyCode::Esc => Some(UiEvent::Command(UserCommand::Quit)),
            KeyCode::Tab | KeyCode::BackTab => {
                state.tab = state.tab.toggle();
                Some(UiEvent::Redraw)
            }
            _ => None,
        },
        Event::Resize(_, _) => Some(UiEvent::Redraw),
        _ => None,
    }
}

fn render(f: &mut Frame, tab: Tab, view: &ViewState) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(3), // tabs
            Constraint::Min(10),   // body
            Constraint::Length(3), // help
        ])
        .split(f.area());

    draw_header(f, chunks[0], view);
    draw_tabs(f, chunks[1], tab);
    match tab {
        Tab::Game => draw_game(f, chunks[2], view),
        Tab::Rules => draw_rules(f, chunks[2], view),
    }
    draw_help(f, chunks[3]);
    if view.celebrating {
        draw_celebration(f, view);
    }
}

fn draw_header(f: &mut Frame, area: Rect, view: &ViewState) {
    let mut text = format!(
        "Time Tomb | Network: {} | Chain ID: {}",
        view.network, view.chain_id
    );
    if view.refreshing {
        text.push_str(" | refreshing...");
    }
    let widget = Paragraph::new(text).block(Block::default().borders(Borders::ALL));
    f.render_widget(widget, area);
}

fn draw_tabs(f: &mut Frame, area: Rect, tab: Tab) {
    let tabs = Tabs::new(vec!["Game", "Rules"])
        .select(tab.index())
        .highlight_style(Style::default().fg(Color::Yellow).bold())
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(tabs, area);
}

fn draw_game(f: &mut Frame, area: Rect, view: &ViewState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // countdown
            Constraint::Length(3), // gauge
            Constraint::Length(4), // pot + leader
            Constraint::Length(3), // wallet
            Constraint::Length(3), // action
            Constraint::Min(3),    // transactions + notices
        ])
        .split(area);

    draw_countdown(f, rows[0], rows[1], view);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[2]);
    draw_pot(f, middle[0], view);
    draw_leader(f, middle[1], view);

    draw_wallet(f, rows[3], view);
    draw_action(f, rows[4], view);
    draw_activity(f, rows[5], view);
}

fn draw_countdown(f: &mut Frame, clock_area: Rect, gauge_area: Rect, view: &ViewState) {
    let cd = &view.countdown;
    let (status, status_color) = match (&view.snapshot, cd.is_open) {
        (None, _) => ("--", Color::DarkGray),
        (Some(_), true) => ("OPEN", Color::Green),
        (Some(_), false) => ("CLOSED", Color::Red),
    };
    let color = urgency_color(cd.urgency);
    let line = Line::from(vec![
        Span::styled(
            format!(
                "{:02}d {:02}h {:02}m {:02}s",
                cd.days, cd.hours, cd.minutes, cd.seconds
            ),
            Style::default().fg(color).bold(),
        ),
        Span::raw("  "),
        Span::styled(status, Style::default().fg(status_color)),
    ]);
    let clock = Paragraph::new(line)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Countdown"));
    f.render_widget(clock, clock_area);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio((cd.progress / 100.0).clamp(0.0, 1.0))
        .label(format!("{:.0}%", cd.progress));
    f.render_widget(gauge, gauge_area);
}

fn urgency_color(urgency: Urgency) -> Color {
    match urgency {
        Urgency::Critical => Color::Red,
        Urgency::Warning => Color::Yellow,
        Urgency::Calm => Color::Green,
    }
}

fn draw_pot(f: &mut Frame, area: Rect, view: &ViewState) {
    let symbol = &view.token_symbol;
    let lines = match &view.snapshot {
        Some(s) => vec![
            Line::from(format!("Total Deposited: {} {symbol}", s.total_deposited)),
            Line::from(format!("Contract Balance: {} {symbol}", s.contract_balance)),
        ],
        None => vec![Line::from("Loading...")],
    };
    let widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Pot"));
    f.render_widget(widget, area);
}

fn draw_leader(f: &mut Frame, area: Rect, view: &ViewState) {
    let line = match &view.snapshot {
        None => Line::from("Loading..."),
        Some(s) if !s.has_deposits() => Line::from("No deposits yet"),
        Some(_) if view.is_leader() => Line::styled(
            "You are the leader!",
            Style::default().fg(Color::Green).bold(),
        ),
        Some(s) => Line::from(truncate_address(&s.current_leader)),
    };
    let widget =
        Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Leader"));
    f.render_widget(widget, area);
}

fn draw_wallet(f: &mut Frame, area: Rect, view: &ViewState) {
    let symbol = &view.token_symbol;
    let text = match view.wallet.address {
        None => "Read-only: start with --wallet <name> to play".to_string(),
        Some(address) => {
            let amount = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
            let snapshot = view.snapshot.as_ref();
            format!(
                "{} | Balance: {} {symbol} | Allowance: {} {symbol}",
                truncate_address(&address),
                amount(snapshot.and_then(|s| s.user_balance).map(|b| b.to_string())),
                amount(snapshot.and_then(|s| s.user_allowance).map(|a| a.to_string())),
            )
        }
    };
    let widget =
        Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Wallet"));
    f.render_widget(widget, area);
}

fn draw_action(f: &mut Frame, area: Rect, view: &ViewState) {
    let (label, style) = match &view.action {
        None => ("Loading...".to_string(), Style::default().fg(Color::DarkGray)),
        Some(action) if action.in_progress => (
            action.label(&view.token_symbol),
            Style::default().fg(Color::Yellow),
        ),
        Some(action) if action.is_enabled() => (
            format!("[ {} ]", action.label(&view.token_symbol)),
            Style::default().fg(Color::Black).bg(Color::Rgb(255, 115, 0)).bold(),
        ),
        Some(action) => (
            action.label(&view.token_symbol),
            Style::default().fg(Color::DarkGray),
        ),
    };
    let widget = Paragraph::new(Line::styled(label, style))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Action"));
    f.render_widget(widget, area);
}

fn draw_activity(f: &mut Frame, area: Rect, view: &ViewState) {
    let mut lines: Vec<Line> = Vec::new();
    if let Some(notice) = &view.read_notice {
        lines.push(Line::styled(notice.clone(), Style::default().fg(Color::Yellow)));
    }
    for kind in TxKind::ALL {
        let record = view.transaction(kind);
        let hash = record
            .hash
            .map(|h| format!(" {}", truncate_hex(&h.to_string())))
            .unwrap_or_default();
        match record.status {
            TxStatus::Idle => {}
            TxStatus::Submitted => lines.push(Line::from(format!(
                "{kind}: waiting for wallet..."
            ))),
            TxStatus::Confirming => {
                lines.push(Line::from(format!("{kind}: confirming{hash}")))
            }
            TxStatus::Confirmed => lines.push(Line::styled(
                format!("{kind}: confirmed{hash}"),
                Style::default().fg(Color::Green),
            )),
            TxStatus::Failed => {
                let reason = record
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                lines.push(Line::styled(
                    format!("{kind} failed: {reason} (x to dismiss)"),
                    Style::default().fg(Color::Red),
                ));
            }
        }
    }
    for notice in &view.notifications {
        let color = match notice.level {
            NoticeLevel::Info => Color::Cyan,
            NoticeLevel::Success => Color::Green,
            NoticeLevel::Error => Color::Red,
        };
        lines.push(Line::styled(notice.message.clone(), Style::default().fg(color)));
    }
    if lines.is_empty() {
        lines.push(Line::from("Ready"));
    }
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(widget, area);
}

fn draw_rules(f: &mut Frame, area: Rect, view: &ViewState) {
    let symbol = &view.token_symbol;
    let lines = vec![
        Line::styled(
            "Time is Money: A Social Experiment",
            Style::default().fg(Color::Rgb(253, 157, 0)).bold(),
        ),
        Line::from(""),
        Line::from(format!(
            "1. Deposit 1 {symbol} into the time tomb and you become the leader."
        )),
        Line::from(
            "2. The first deposit starts the timer. Every later deposit extends it.",
        ),
        Line::from(
            "3. When the timer hits zero the final leader can withdraw everything in the tomb.",
        ),
        Line::from(""),
        Line::from(format!(
            "Depositing needs a one-time approval so the tomb may move your {symbol}."
        )),
    ];
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("The Time Tomb"));
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, area: Rect) {
    let help = Paragraph::new(
        "Enter/Space action | r refresh | Tab switch tab | x dismiss error | q/Esc quit",
    )
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_celebration(f: &mut Frame, view: &ViewState) {
    let area = centered_rect(40, 20, f.area());
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));
    let p = Paragraph::new(Line::styled(
        format!("1 {} Deposited!", view.token_symbol),
        Style::default().fg(Color::Green).bold(),
    ))
    .alignment(Alignment::Center)
    .block(block);
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    horizontal[1]
}

/// `0x1234...abcd`
pub fn truncate_address(address: &Address) -> String {
    truncate_hex(&address.to_string())
}

fn truncate_hex(hex: &str) -> String {
    if hex.len() <= 10 {
        return hex.to_string();
    }
    format!("{}...{}", &hex[..6], &hex[hex.len() - 4..])
}
