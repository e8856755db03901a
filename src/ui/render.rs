// Drawing for the console. Pure functions of a `View` snapshot so they can be
// rendered against a test backend.

use crate::status::NowPlaying;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
    Frame,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackStatus {
    Stopped,
    Connecting,
    Playing,
}

impl PlaybackStatus {
    fn label(self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "⏹ Stopped",
            PlaybackStatus::Connecting => "… Connecting",
            PlaybackStatus::Playing => "▶ Playing",
        }
    }
}

/// Everything one frame needs, copied out of the app.
#[derive(Debug, Clone)]
pub struct View {
    pub status: Option<NowPlaying>,
    pub now: i64, // unix seconds
    pub playback: PlaybackStatus,
    pub volume: f32,
    pub gain_db: Option<f32>,
    pub stream_url: String,
    pub message: String,
    pub show_help: bool,
    pub show_info: bool,
}

const HELP: &[(&str, &str)] = &[
    ("p", "play"),
    ("s", "stop"),
    ("space / t", "play or stop"),
    ("+ / -", "volume up / down"),
    ("0-9", "volume in tenths"),
    ("i", "stream info"),
    ("h / ?", "this help"),
    ("q / Esc", "quit"),
];

pub fn draw(f: &mut Frame, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // Now playing
            Constraint::Length(3), // Track progress
            Constraint::Length(3), // Player controls
            Constraint::Min(3),    // Messages
            Constraint::Length(1), // Key hints
        ])
        .split(f.area());

    render_now_playing(f, chunks[0], view.status.as_ref());
    render_progress(f, chunks[1], view.status.as_ref(), view.now);
    render_player_controls(f, chunks[2], view);

    let message = Paragraph::new(view.message.as_str())
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Messages"));
    f.render_widget(message, chunks[3]);

    let hints = Paragraph::new("space play/stop · +/- volume · i info · h help · q quit")
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(hints, chunks[4]);

    if view.show_info {
        render_popup(f, "Stream", info_lines(view));
    } else if view.show_help {
        let lines = HELP
            .iter()
            .map(|(keys, action)| {
                Line::from(vec![
                    Span::styled(format!("{:<10}", keys), Style::default().add_modifier(Modifier::BOLD)),
                    Span::raw(*action),
                ])
            })
            .collect();
        render_popup(f, "Keys", lines);
    }
}

fn render_now_playing(f: &mut Frame, area: Rect, status: Option<&NowPlaying>) {
    let lines = match status {
        Some(status) => {
            let track = if status.now_playing.is_empty() {
                "(unknown)"
            } else {
                status.now_playing.as_str()
            };
            vec![
                Line::from(Span::styled(
                    format!("♪ {}", track),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("{} | {}", status.dj_label(), status.listeners_label())),
            ]
        }
        None => vec![Line::from("♪ waiting for station status")],
    };

    let widget = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Now Playing"));
    f.render_widget(widget, area);
}

fn render_progress(f: &mut Frame, area: Rect, status: Option<&NowPlaying>, now: i64) {
    let block = Block::default().borders(Borders::ALL).title("Track");
    match status.and_then(|s| s.progress_at(now)) {
        Some(fraction) => {
            let gauge = Gauge::default()
                .block(block)
                .gauge_style(Style::default().fg(Color::Cyan))
                .ratio(fraction)
                .label(format!("{:.0}%", fraction * 100.0));
            f.render_widget(gauge, area);
        }
        None => f.render_widget(Paragraph::new("no timing from the station").block(block), area),
    }
}

fn render_player_controls(f: &mut Frame, area: Rect, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Status
            Constraint::Percentage(60), // Volume
        ])
        .split(area);

    let status_widget = Paragraph::new(view.playback.label())
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status_widget, chunks[0]);

    let volume_widget = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Volume"))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio(f64::from(view.volume.clamp(0.0, 1.0)))
        .label(format!("{:.0}%", view.volume * 100.0));
    f.render_widget(volume_widget, chunks[1]);
}

fn info_lines(view: &View) -> Vec<Line<'static>> {
    let gain = match view.gain_db {
        Some(db) => format!("{:.1} dB", db),
        None => "-".to_string(),
    };
    vec![
        Line::from(format!("URL:    {}", view.stream_url)),
        Line::from(format!("State:  {}", view.playback.label())),
        Line::from(format!("Volume: {:.0}%", view.volume * 100.0)),
        Line::from(format!("Gain:   {}", gain)),
    ]
}

fn render_popup(f: &mut Frame, title: &str, lines: Vec<Line<'static>>) {
    let area = centered(f.area(), 60, lines.len() as u16 + 2);
    f.render_widget(Clear, area);
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    f.render_widget(widget, area);
}

fn centered(area: Rect, percent_x: u16, height: u16) -> Rect {
    let width = area.width * percent_x / 100;
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}
