// Error taxonomy for the playback core.
// Every session failure is terminal for that session and gets logged, never retried.

use thiserror::Error;

/// The stream could not be fetched, or the body broke off mid-transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("stream body failed: {0}")]
    Body(#[source] reqwest::Error),
}

/// The body was not a playable MP3 stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("could not probe stream: {0}")]
    Probe(#[source] symphonia::core::errors::Error),

    #[error("stream has no decodable audio track")]
    NoAudioTrack,

    #[error("unsupported codec: {0}")]
    Codec(#[source] symphonia::core::errors::Error),

    #[error("stream ended before any audio was decoded")]
    NoAudio,
}

/// The output device could not be opened or refused the source.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no default output device available")]
    NoDevice,

    #[error("failed to open output stream: {0}")]
    Stream(String),

    #[error("output device is not initialized")]
    NotInitialized,

    #[error("device sample format {0} is not supported")]
    UnsupportedFormat(String),
}

/// Why a playback session ended before or instead of playing.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("session cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Rejected synchronously by `StreamPlayer::start`, before any task is spawned.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid stream url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),
}
