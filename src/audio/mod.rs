pub mod decoder;
pub mod error;
pub mod fetch;
pub mod gain;
pub mod output;
pub mod player;

#[cfg(test)]
pub(crate) mod testing;

pub use decoder::{DecodedStream, Mp3Decoder, StreamDecoder, StreamFormat};
pub use error::{DecodeError, DeviceError, PlaybackError, StartError, TransportError};
pub use fetch::{ByteStream, HttpFetcher, StreamFetcher, StreamReader};
pub use gain::{volume_to_gain_db, GainControl, GainHandle, MUTE_FLOOR_DB};
pub use output::{AudioOutput, RodioOutput, SharedOutput};
pub use player::{PlayerEvent, StreamPlayer};

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub volume: f32, // 0.0 to 1.0, 0.5 is unity gain
    pub latency: Duration, // output buffering target handed to the device
    pub buffer_chunks: usize, // body chunks read ahead of the decoder
    pub unwind_timeout: Duration, // how long shutdown waits for session tasks
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 0.5,
            latency: Duration::from_millis(100),
            buffer_chunks: 64,
            unwind_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&crate::config::Config> for AudioConfig {
    fn from(config: &crate::config::Config) -> Self {
        let audio = &config.audio;
        Self {
            volume: gain::clamp_volume(audio.initial_volume),
            latency: Duration::from_millis(audio.latency_ms),
            buffer_chunks: audio.buffer_chunks.max(1),
            unwind_timeout: Duration::from_millis(audio.unwind_timeout_ms),
        }
    }
}
