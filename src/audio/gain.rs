// Volume -> gain mapping and the runtime-adjustable gain stage.
// 0.5 on the slider is unity, 1.0 is +20 dB, and 0.0 is a hard mute rather than -20 dB.

use parking_lot::Mutex;
use rodio::Source;
use std::sync::Arc;
use std::time::Duration;

/// Gain used for a volume of exactly zero. Anything at or below it is silence.
pub const MUTE_FLOOR_DB: f32 = -999.0;

/// Decibels of gain per unit of linear volume away from the midpoint.
const DB_PER_VOLUME: f32 = 40.0;

/// Samples pulled between re-reads of the shared gain.
const REFRESH_INTERVAL: usize = 256;

/// Clamp a UI volume into `[0, 1]`. NaN counts as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Linear slider position to gain in dB: `40 * (v - 0.5)`, with zero pinned to the mute floor.
pub fn volume_to_gain_db(volume: f32) -> f32 {
    let volume = clamp_volume(volume);
    if volume > 0.0 {
        DB_PER_VOLUME * (volume - 0.5)
    } else {
        MUTE_FLOOR_DB
    }
}

/// Amplitude factor applied to samples for a gain in dB.
pub fn gain_db_to_amplitude(gain_db: f32) -> f32 {
    if gain_db <= MUTE_FLOOR_DB {
        0.0
    } else {
        10f32.powf(gain_db / 20.0)
    }
}

#[derive(Debug)]
struct GainState {
    gain_db: f32,
    closed: bool,
}

/// Controller-side handle onto a live `GainControl`.
///
/// Cloning shares the same state. Closing it makes the adapter drop the
/// stream it wraps on the next pull, which releases the HTTP body behind it.
#[derive(Debug, Clone)]
pub struct GainHandle {
    state: Arc<Mutex<GainState>>,
}

impl GainHandle {
    pub fn new(gain_db: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(GainState {
                gain_db,
                closed: false,
            })),
        }
    }

    pub fn gain_db(&self) -> f32 {
        self.state.lock().gain_db
    }

    pub fn set_gain_db(&self, gain_db: f32) {
        self.state.lock().gain_db = gain_db;
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Source adapter scaling its input by the gain held in a `GainHandle`.
pub struct GainControl<S> {
    inner: Option<S>,
    handle: GainHandle,
    amplitude: f32,
    until_refresh: usize,
}

impl<S> GainControl<S>
where
    S: Source<Item = f32>,
{
    pub fn new(inner: S, handle: GainHandle) -> Self {
        let amplitude = gain_db_to_amplitude(handle.gain_db());
        Self {
            inner: Some(inner),
            handle,
            amplitude,
            until_refresh: REFRESH_INTERVAL,
        }
    }

    pub fn handle(&self) -> &GainHandle {
        &self.handle
    }

    fn refresh(&mut self) {
        let state = self.handle.state.lock();
        if state.closed {
            drop(state);
            self.inner = None;
            return;
        }
        self.amplitude = gain_db_to_amplitude(state.gain_db);
        self.until_refresh = REFRESH_INTERVAL;
    }
}

impl<S> Iterator for GainControl<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.until_refresh == 0 {
            self.refresh();
        }
        let sample = self.inner.as_mut()?.next()?;
        self.until_refresh -= 1;
        Some((sample * self.amplitude).clamp(-1.0, 1.0))
    }
}

impl<S> Source for GainControl<S>
where
    S: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.as_ref().and_then(|s| s.current_frame_len())
    }

    fn channels(&self) -> u16 {
        self.inner.as_ref().map_or(1, |s| s.channels())
    }

    fn sample_rate(&self) -> u32 {
        self.inner.as_ref().map_or(44_100, |s| s.sample_rate())
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
