// Test doubles for the fetch, decode and output seams.

use super::decoder::{DecodedStream, StreamDecoder, StreamFormat};
use super::error::{DecodeError, DeviceError, TransportError};
use super::fetch::{ByteStream, StreamFetcher, StreamReader};
use super::output::{AudioOutput, OutputSource, SharedOutput};
use crate::context::RadioContext;
use futures::future::{self, BoxFuture};
use futures::{stream, FutureExt, StreamExt};
use parking_lot::{Condvar, Mutex};
use rodio::Source;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub const TEST_FORMAT: StreamFormat = StreamFormat {
    sample_rate: 44_100,
    channels: 2,
};

/// Amplitude of every sample the fake decoder produces.
pub const TEST_SAMPLE: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub enum FetchBehavior {
    /// One chunk, then the body stays open like a live relay.
    Live,
    /// Transport error before any byte arrives.
    Fail,
    /// The request never completes.
    Stall,
}

pub struct FakeFetcher {
    behavior: FetchBehavior,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(behavior: FetchBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StreamFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> BoxFuture<'static, Result<ByteStream, TransportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = url.to_string();
        match self.behavior {
            FetchBehavior::Live => {
                let body = stream::once(future::ready(Ok(vec![0xFF, 0xFB, 0x90, 0x00])))
                    .chain(stream::pending())
                    .boxed();
                future::ready(Ok(body)).boxed()
            }
            FetchBehavior::Fail => {
                future::ready(Err(TransportError::Status { url, status: 503 })).boxed()
            }
            FetchBehavior::Stall => future::pending().boxed(),
        }
    }
}

/// Hands out constant-level streams and counts how many are still alive.
pub struct FakeDecoder {
    fail: bool,
    live: Arc<AtomicUsize>,
    created: AtomicUsize,
}

impl FakeDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            live: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            live: Arc::new(AtomicUsize::new(0)),
            created: AtomicUsize::new(0),
        })
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl StreamDecoder for FakeDecoder {
    fn decode(&self, reader: StreamReader) -> Result<(DecodedStream, StreamFormat), DecodeError> {
        if self.fail {
            return Err(DecodeError::NoAudio);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        let stream = TrackedStream {
            _reader: reader,
            live: Arc::clone(&self.live),
        };
        Ok((Box::new(stream), TEST_FORMAT))
    }
}

/// Endless constant signal that owns the body reader, like a real decoded stream.
struct TrackedStream {
    _reader: StreamReader,
    live: Arc<AtomicUsize>,
}

impl Iterator for TrackedStream {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(TEST_SAMPLE)
    }
}

impl Source for TrackedStream {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        TEST_FORMAT.channels
    }

    fn sample_rate(&self) -> u32 {
        TEST_FORMAT.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct OutputProbe {
    pub inits: usize,
    pub plays: usize,
    pub clears: usize,
    pub fail_init: bool,
    pub current: Option<OutputSource>,
}

/// Holds `init` until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// How many callers have reached the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }
}

/// Output device that records calls; tests pull samples out of it directly.
#[derive(Clone, Default)]
pub struct FakeOutput {
    probe: Arc<Mutex<OutputProbe>>,
    gate: Option<Arc<Gate>>,
}

impl FakeOutput {
    pub fn failing() -> Self {
        let output = Self::default();
        output.probe.lock().fail_init = true;
        output
    }

    /// `init` blocks until the returned gate is opened.
    pub fn gated() -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let output = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (output, gate)
    }

    pub fn inits(&self) -> usize {
        self.probe.lock().inits
    }

    pub fn plays(&self) -> usize {
        self.probe.lock().plays
    }

    pub fn clears(&self) -> usize {
        self.probe.lock().clears
    }

    pub fn has_source(&self) -> bool {
        self.probe.lock().current.is_some()
    }

    /// Pull up to `n` samples from whatever is playing.
    pub fn pull(&self, n: usize) -> Vec<f32> {
        let mut probe = self.probe.lock();
        match probe.current.as_mut() {
            Some(source) => source.take(n).collect(),
            None => Vec::new(),
        }
    }
}

impl AudioOutput for FakeOutput {
    fn init(&mut self, _format: StreamFormat, _latency: Duration) -> Result<(), DeviceError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        let mut probe = self.probe.lock();
        if probe.fail_init {
            return Err(DeviceError::NoDevice);
        }
        probe.inits += 1;
        Ok(())
    }

    fn play(&mut self, source: OutputSource) -> Result<(), DeviceError> {
        let mut probe = self.probe.lock();
        probe.plays += 1;
        probe.current = Some(source);
        Ok(())
    }

    fn clear(&mut self) {
        let mut probe = self.probe.lock();
        probe.clears += 1;
        probe.current = None;
    }
}

pub fn context(
    fetcher: Arc<FakeFetcher>,
    decoder: Arc<dyn StreamDecoder>,
    output: FakeOutput,
) -> RadioContext {
    let output: SharedOutput = super::output::shared(output);
    RadioContext::from_parts(
        Handle::current(),
        reqwest::Client::new(),
        output,
        fetcher,
        decoder,
    )
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
