use super::decoder::StreamFormat;
use super::error::{PlaybackError, StartError};
use super::fetch::StreamReader;
use super::gain::{self, GainControl, GainHandle};
use super::AudioConfig;
use crate::context::RadioContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Connecting(String),
    Playing(StreamFormat),
    VolumeChanged(f32),
    Stopped,
    Error(String), // session failed; it is already torn down when this arrives
}

type EventSender = Option<mpsc::UnboundedSender<PlayerEvent>>;

fn emit(sender: &EventSender, event: PlayerEvent) {
    if let Some(sender) = sender {
        let _ = sender.send(event);
    }
}

#[derive(Debug)]
struct PlayerState {
    volume: f32, // desired volume, outlives sessions
    active: bool,
    session_id: u64,
    cancel: Option<CancellationToken>,
    gain: Option<GainHandle>,
}

impl PlayerState {
    fn in_flight(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| !token.is_cancelled())
    }
}

/// Owns at most one streaming session: fetch, decode, open the device, play.
///
/// All control methods are synchronous and cheap, so they can be called from
/// a UI thread while the session runs on the runtime held by the context.
/// `start` only launches the session; watch `is_playing` or the event channel
/// to learn whether it got anywhere.
pub struct StreamPlayer {
    context: RadioContext,
    config: AudioConfig,
    state: Arc<Mutex<PlayerState>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_sender: EventSender,
}

impl StreamPlayer {
    pub fn new(context: RadioContext, config: AudioConfig) -> Self {
        let state = PlayerState {
            volume: gain::clamp_volume(config.volume),
            active: false,
            session_id: 0,
            cancel: None,
            gain: None,
        };

        Self {
            context,
            config,
            state: Arc::new(Mutex::new(state)),
            tasks: Mutex::new(Vec::new()),
            event_sender: None,
        }
    }

    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<PlayerEvent>) {
        self.event_sender = Some(sender);
    }

    /// Launch a session for `url`. A no-op while another session is in flight,
    /// whatever `url` is; otherwise malformed and non-http(s) urls are rejected.
    pub fn start(&self, url: &str) -> Result<(), StartError> {
        let (parsed, id, cancel) = {
            let mut state = self.state.lock();
            if state.in_flight() {
                debug!(url, "start ignored, a session is already running");
                return Ok(());
            }
            let parsed = parse_stream_url(url)?;
            state.session_id += 1;
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            (parsed, state.session_id, cancel)
        };

        info!(session = id, url = %parsed, "starting stream session");
        emit(&self.event_sender, PlayerEvent::Connecting(parsed.to_string()));

        let session = Session {
            id,
            url: parsed.to_string(),
            cancel,
            context: self.context.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            events: self.event_sender.clone(),
        };
        let task = self.context.runtime().spawn(session.run());

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ok(())
    }

    /// Cancel the current session and release its stream. Safe to call at any time.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        let Some(cancel) = state.cancel.as_ref().filter(|token| !token.is_cancelled()) else {
            return;
        };
        cancel.cancel();

        // our source only reaches the device once the session is active
        if state.active {
            self.context.output().lock().clear();
        }
        if let Some(gain) = state.gain.take() {
            gain.close();
        }
        state.active = false;
        let id = state.session_id;
        drop(state);

        info!(session = id, "stream stopped");
        emit(&self.event_sender, PlayerEvent::Stopped);
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().active
    }

    /// True from `start` until the session is stopped or fails, including before it plays.
    pub fn is_running(&self) -> bool {
        self.state.lock().in_flight()
    }

    pub fn set_volume(&self, volume: f32) {
        let volume = gain::clamp_volume(volume);
        {
            let mut state = self.state.lock();
            state.volume = volume;
            if let Some(handle) = &state.gain {
                let _device = self.context.output().lock();
                handle.set_gain_db(gain::volume_to_gain_db(volume));
            }
        }

        debug!(volume, "volume set");
        emit(&self.event_sender, PlayerEvent::VolumeChanged(volume));
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    /// Gain on the live session's gain stage. `None` until a session is playing.
    pub fn gain_db(&self) -> Option<f32> {
        self.state.lock().gain.as_ref().map(GainHandle::gain_db)
    }

    /// Stop, then wait up to `timeout` for every session task to unwind.
    /// Stragglers are aborted. Returns whether everything finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();

        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(_) => {
                debug!("session tasks unwound");
                true
            }
            Err(_) => {
                warn!(?timeout, pending = aborts.len(), "session tasks did not unwind in time, aborting");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

fn parse_stream_url(url: &str) -> Result<reqwest::Url, StartError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| StartError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StartError::UnsupportedScheme(parsed.scheme().to_string()));
    }
    Ok(parsed)
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        if let Some(cancel) = &self.state.lock().cancel {
            cancel.cancel();
        }
    }
}

/// One background run of the fetch -> decode -> device -> play pipeline.
struct Session {
    id: u64,
    url: String,
    cancel: CancellationToken,
    context: RadioContext,
    config: AudioConfig,
    state: Arc<Mutex<PlayerState>>,
    events: EventSender,
}

impl Session {
    async fn run(self) {
        let outcome = self.drive().await;
        self.release();

        match outcome {
            Ok(()) => debug!(session = self.id, "session unwound"),
            Err(PlaybackError::Cancelled) => {
                debug!(session = self.id, "session cancelled before playback")
            }
            Err(err) => {
                error!(session = self.id, url = %self.url, %err, "playback session failed");
                emit(&self.events, PlayerEvent::Error(err.to_string()));
            }
        }
    }

    async fn drive(&self) -> Result<(), PlaybackError> {
        // fetch
        let body = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),
            body = self.context.fetcher().fetch(&self.url) => body?,
        };
        debug!(session = self.id, "stream connected");

        // decode
        let (reader, pump) = StreamReader::spawn(
            self.context.runtime(),
            body,
            self.config.buffer_chunks,
            self.cancel.clone(),
        );
        let decoder = Arc::clone(self.context.decoder());
        let mut decoding = tokio::task::spawn_blocking(move || decoder.decode(reader));
        let decoded = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            decoded = &mut decoding => Some(decoded),
        };
        let Some(decoded) = decoded else {
            // the pump is cancelled too, so the decoder hits end of stream shortly
            let _ = decoding.await;
            return Err(PlaybackError::Cancelled);
        };
        let (stream, format) = decoded??;
        debug!(session = self.id, %format, "stream decoded");

        // device
        if self.cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        let output = Arc::clone(self.context.output());
        let latency = self.config.latency;
        let init = tokio::task::spawn_blocking(move || output.lock().init(format, latency));
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PlaybackError::Cancelled),
            ready = init => ready??,
        }

        // play, atomically with respect to stop()
        {
            let mut state = self.state.lock();
            if self.cancel.is_cancelled() || state.session_id != self.id {
                return Err(PlaybackError::Cancelled);
            }
            let gain = GainHandle::new(gain::volume_to_gain_db(state.volume));
            let source = GainControl::new(stream, gain.clone());
            self.context.output().lock().play(Box::new(source))?;
            state.gain = Some(gain);
            state.active = true;

            info!(session = self.id, %format, "stream playing");
            emit(&self.events, PlayerEvent::Playing(format));
        }

        // woken once, by stop or by the player going away
        self.cancel.cancelled().await;
        let _ = pump.await;
        Ok(())
    }

    /// Leave the shared state as if this session never ran, unless a newer one owns it.
    fn release(&self) {
        let mut state = self.state.lock();
        self.cancel.cancel();
        if state.session_id == self.id {
            state.active = false;
            if let Some(gain) = state.gain.take() {
                gain.close();
            }
        }
    }
}
