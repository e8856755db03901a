use super::render::{self, PlaybackStatus, View};
use super::{AppEvent, EventHandler, TerminalManager};
use crate::audio::{AudioConfig, PlayerEvent, StreamPlayer};
use crate::config::Config;
use crate::context::RadioContext;
use crate::status::{NowPlaying, StatusPoller};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const VOLUME_STEP: f32 = 0.1;

pub struct App {
    config: Config,
    event_handler: EventHandler,
    player: StreamPlayer,
    player_events: mpsc::UnboundedReceiver<PlayerEvent>,
    status: watch::Receiver<Option<NowPlaying>>,
    poller_cancel: CancellationToken,
    poller_task: Option<JoinHandle<()>>,

    // UI State
    pub message: String,
    pub show_help: bool,
    pub show_info: bool,
    pub should_quit: bool,
}

impl App {
    /// Build the player and start polling station status.
    pub fn new(config: Config, context: RadioContext) -> Self {
        let (event_sender, player_events) = mpsc::unbounded_channel();
        let mut player = StreamPlayer::new(context.clone(), AudioConfig::from(&config));
        player.set_event_sender(event_sender);

        let (poller, status) =
            StatusPoller::new(&context, config.status_url.clone(), config.poll_interval());
        let poller_cancel = CancellationToken::new();
        let poller_task = poller.spawn(context.runtime(), poller_cancel.clone());

        Self {
            config,
            event_handler: EventHandler::new(),
            player,
            player_events,
            status,
            poller_cancel,
            poller_task: Some(poller_task),
            message: "Press space to start the stream".to_string(),
            show_help: false,
            show_info: false,
            should_quit: false,
        }
    }

    pub fn player(&self) -> &StreamPlayer {
        &self.player
    }

    pub async fn run(&mut self, autoplay: bool) -> Result<()> {
        let mut terminal = TerminalManager::new()?;
        self.event_handler.spawn_terminal_reader()?;

        if autoplay {
            self.handle_event(AppEvent::Play);
        }

        // redraw at least this often so the track gauge moves
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.ui.refresh_secs.max(1)));
        let mut status_open = true;

        while !self.should_quit {
            let view = self.view();
            terminal.draw(|f| render::draw(f, &view))?;

            tokio::select! {
                Some(event) = self.event_handler.next_event() => self.handle_event(event),
                Some(event) = self.player_events.recv() => self.on_player_event(event),
                changed = self.status.changed(), if status_open => {
                    if changed.is_err() {
                        status_open = false;
                    }
                }
                _ = ticker.tick() => {}
            }
        }

        drop(terminal);
        self.shutdown().await;
        Ok(())
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        debug!(?event, "console event");
        match event {
            AppEvent::Quit => self.should_quit = true,
            AppEvent::Render => {}
            AppEvent::ToggleHelp => {
                self.show_help = !self.show_help;
                self.show_info = false;
            }
            AppEvent::ToggleInfo => {
                self.show_info = !self.show_info;
                self.show_help = false;
            }

            AppEvent::Play => self.play(),
            AppEvent::Stop => self.player.stop(),
            AppEvent::TogglePlayPause => {
                if self.player.is_running() {
                    self.player.stop();
                } else {
                    self.play();
                }
            }

            AppEvent::VolumeUp => self.player.set_volume(self.player.volume() + VOLUME_STEP),
            AppEvent::VolumeDown => self.player.set_volume(self.player.volume() - VOLUME_STEP),
            AppEvent::SetVolume(volume) => self.player.set_volume(volume),
        }
    }

    pub fn on_player_event(&mut self, event: PlayerEvent) {
        self.message = match event {
            PlayerEvent::Connecting(url) => format!("… connecting to {}", url),
            PlayerEvent::Playing(format) => format!("▶ playing ({})", format),
            PlayerEvent::VolumeChanged(volume) => format!("🔊 volume {:.0}%", volume * 100.0),
            PlayerEvent::Stopped => "⏹ stopped".to_string(),
            PlayerEvent::Error(message) => format!("✗ {}", message),
        };
    }

    fn play(&mut self) {
        if let Err(e) = self.player.start(&self.config.stream_url) {
            warn!(error = %e, "could not start stream");
            self.message = format!("✗ {}", e);
        }
    }

    /// Snapshot of everything the next frame shows.
    pub fn view(&self) -> View {
        let playback = if self.player.is_playing() {
            PlaybackStatus::Playing
        } else if self.player.is_running() {
            PlaybackStatus::Connecting
        } else {
            PlaybackStatus::Stopped
        };

        View {
            status: (*self.status.borrow()).clone(),
            now: chrono::Utc::now().timestamp(),
            playback,
            volume: self.player.volume(),
            gain_db: self.player.gain_db(),
            stream_url: self.config.stream_url.clone(),
            message: self.message.clone(),
            show_help: self.show_help,
            show_info: self.show_info,
        }
    }

    async fn shutdown(&mut self) {
        let timeout = Duration::from_millis(self.config.audio.unwind_timeout_ms);
        if !self.player.shutdown(timeout).await {
            warn!("player did not unwind cleanly");
        }

        self.poller_cancel.cancel();
        if let Some(task) = self.poller_task.take() {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("status poller did not stop in time");
            }
        }
        info!("console closed");
    }
}
