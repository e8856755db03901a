use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    // UI Events
    Quit,
    Render,
    ToggleHelp,
    ToggleInfo,

    // Playback Events
    Play,
    Stop,
    TogglePlayPause,

    // Volume Events
    VolumeUp,
    VolumeDown,
    SetVolume(f32), // 0.0..=1.0
}

pub fn key_to_app_event(key: KeyEvent) -> Option<AppEvent> {
    match key.code {
        // Quit; raw mode swallows the signal so ctrl-c comes through as a key
        KeyCode::Char('q') | KeyCode::Esc => Some(AppEvent::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(AppEvent::Quit),

        // Playback controls
        KeyCode::Char(' ') | KeyCode::Char('t') => Some(AppEvent::TogglePlayPause),
        KeyCode::Char('p') => Some(AppEvent::Play),
        KeyCode::Char('s') => Some(AppEvent::Stop),

        // Volume
        KeyCode::Char('+') | KeyCode::Char('=') | KeyCode::Up => Some(AppEvent::VolumeUp),
        KeyCode::Char('-') | KeyCode::Down => Some(AppEvent::VolumeDown),
        KeyCode::Char(digit @ '0'..='9') => {
            let tenths = digit.to_digit(10).unwrap_or(0);
            Some(AppEvent::SetVolume(tenths as f32 / 10.0))
        }

        // Panels
        KeyCode::Char('i') => Some(AppEvent::ToggleInfo),
        KeyCode::Char('h') | KeyCode::Char('?') => Some(AppEvent::ToggleHelp),

        _ => None,
    }
}

pub struct EventHandler {
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Self {
            event_sender,
            event_receiver,
        }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<AppEvent> {
        self.event_sender.clone()
    }

    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.event_receiver.recv().await
    }

    /// Poll the terminal on its own thread; it exits once the handler is dropped.
    pub fn spawn_terminal_reader(&self) -> std::io::Result<thread::JoinHandle<()>> {
        let sender = self.sender();
        thread::Builder::new()
            .name("terminal-events".into())
            .spawn(move || {
                while !sender.is_closed() {
                    match event::poll(Duration::from_millis(100)) {
                        Ok(false) => continue,
                        Ok(true) => {}
                        Err(e) => {
                            warn!(error = %e, "terminal event poll failed");
                            break;
                        }
                    }
                    let app_event = match event::read() {
                        Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key_to_app_event(key),
                        Ok(Event::Resize(_, _)) => Some(AppEvent::Render),
                        Ok(_) => None,
                        Err(e) => {
                            warn!(error = %e, "terminal event read failed");
                            break;
                        }
                    };
                    if let Some(app_event) = app_event {
                        let _ = sender.send(app_event);
                    }
                }
                debug!("terminal event reader stopped");
            })
    }
}

impl Default for EventHandler {
    fn default() -> Self {
        Self::new()
    }
}
