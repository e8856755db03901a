// radiodesk library - internet radio playback and station status
// Playback core, status polling and the console front end live in separate modules

pub mod audio; // stream fetch, decode, gain and output
pub mod config; // settings file
pub mod context; // shared runtime handle, http client and device
pub mod status; // now-playing polling
pub mod ui; // console interface

pub use audio::{AudioConfig, PlayerEvent, StreamPlayer};
pub use config::Config;
pub use context::RadioContext;
pub use status::{NowPlaying, StatusPoller};
