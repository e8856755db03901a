// MP3 elementary stream decoding via symphonia, exposed to the output side as a rodio Source.

use super::error::DecodeError;
use super::fetch::StreamReader;
use rodio::Source;
use std::fmt;
use std::io;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Sample format of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}

/// A playable, closable decoded stream. Dropping it closes the transport behind it.
pub type DecodedStream = Box<dyn Source<Item = f32> + Send>;

/// Turns a stream body into decoded audio.
pub trait StreamDecoder: Send + Sync {
    /// Blocks until the first audio frame is decoded or decoding fails.
    fn decode(&self, reader: StreamReader) -> Result<(DecodedStream, StreamFormat), DecodeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Mp3Decoder;

impl StreamDecoder for Mp3Decoder {
    fn decode(&self, reader: StreamReader) -> Result<(DecodedStream, StreamFormat), DecodeError> {
        let source = Mp3Source::open(reader)?;
        let format = source.format();
        Ok((Box::new(source), format))
    }
}

/// Decoded samples from a live MP3 stream, interleaved `f32`.
pub struct Mp3Source {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    buffer: Option<SampleBuffer<f32>>,
    cursor: usize,
    sample_rate: u32,
    channels: u16,
    skipped_frames: u64,
}

impl Mp3Source {
    pub fn open(reader: StreamReader) -> Result<Self, DecodeError> {
        let stream = MediaSourceStream::new(Box::new(reader), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3").mime_type("audio/mpeg");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(DecodeError::Probe)?;
        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(DecodeError::Codec)?;

        let mut source = Self {
            reader,
            decoder,
            track_id,
            buffer: None,
            cursor: 0,
            sample_rate,
            channels,
            skipped_frames: 0,
        };

        // The format reported upward comes from a real decoded frame, not the headers.
        if !source.refill() {
            return Err(DecodeError::NoAudio);
        }
        debug!(format = %source.format(), "mp3 stream opened");
        Ok(source)
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }

    /// Decode the next packet of our track into the buffer. False at end of stream.
    fn refill(&mut self) -> bool {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(skipped = self.skipped_frames, "mp3 stream ended");
                    return false;
                }
                Err(err) => {
                    warn!(%err, "reading mp3 stream failed");
                    return false;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    let channels = spec.channels.count();
                    let frames = decoded.capacity();

                    let reusable = self.buffer.as_ref().map_or(false, |buf| {
                        buf.capacity() >= frames * channels
                            && self.sample_rate == spec.rate
                            && self.channels as usize == channels
                    });
                    if !reusable {
                        self.buffer = Some(SampleBuffer::new(frames as u64, spec));
                    }
                    if let Some(buffer) = self.buffer.as_mut() {
                        buffer.copy_interleaved_ref(decoded);
                    }

                    self.sample_rate = spec.rate;
                    self.channels = channels as u16;
                    self.cursor = 0;
                    return true;
                }
                Err(SymphoniaError::DecodeError(reason)) => {
                    // corrupt frame, common at the join of a live relay
                    self.skipped_frames += 1;
                    debug!(reason, "skipping undecodable mp3 frame");
                }
                Err(err) => {
                    warn!(%err, "mp3 decoder failed");
                    return false;
                }
            }
        }
    }
}

impl Iterator for Mp3Source {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let buffer = self.buffer.as_ref()?;
        let sample = *buffer.samples().get(self.cursor)?;
        let len = buffer.len();

        self.cursor += 1;
        // refill eagerly so the frame length we report is never zero mid-stream
        if self.cursor >= len && !self.refill() {
            self.buffer = None;
        }
        Some(sample)
    }
}

impl Source for Mp3Source {
    fn current_frame_len(&self) -> Option<usize> {
        match &self.buffer {
            Some(buffer) => Some(buffer.len().saturating_sub(self.cursor)),
            None => Some(0),
        }
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}
