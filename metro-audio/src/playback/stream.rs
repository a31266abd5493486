//! Streaming decode for long sounds
//!
//! Music is not decoded up front. A worker thread walks the compressed
//! resource, converts each decoded frame to the line format and queues it on
//! a bounded channel; the voice drains the channel from the mixer thread.
//! The bounded queue keeps the worker at most `stream_queue_chunks` ahead.

use crate::audio::resampler::StreamConverter;
use crate::audio::types::LINE_FORMAT;
use crate::codec::pcm::PcmSink;
use crate::codec::sync::FrameSync;
use crate::codec::MpegStream;
use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::playback::voice::{StopReason, VoiceControl, VoiceState};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use tracing::{debug, trace, warn};

enum StreamMessage {
    Chunk(Vec<i16>),
    End,
    Failed,
}

/// Result of one `StreamSource::read`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRead {
    pub samples: usize,
    /// Set when the stream has nothing more to deliver
    pub ended: Option<StopReason>,
}

/// Receiving side of a streaming decode.
pub struct StreamSource {
    rx: Receiver<StreamMessage>,
    current: Vec<i16>,
    cursor: usize,
    underruns: u64,
}

enum PassEnd {
    Completed { frames: usize },
    Abandoned,
}

impl StreamSource {
    /// Start decoding `data` on a worker thread.
    ///
    /// Fails if no MPEG frame can be found within the sync scan limit.
    pub fn spawn(data: Arc<[u8]>, codec: &CodecConfig, control: Arc<VoiceControl>) -> Result<Self> {
        let max_scan = codec.max_sync_scan_bytes;
        if FrameSync::new(&data, max_scan).next_frame()?.is_none() {
            return Err(Error::MalformedStream("no MPEG audio frame found".to_string()));
        }

        let (tx, rx) = bounded(codec.stream_queue_chunks.max(1));
        let voice_id = control.id();
        std::thread::Builder::new()
            .name(format!("stream-{}", voice_id))
            .spawn(move || run_worker(data, max_scan, control, tx))?;

        debug!("Started stream decoder for voice {}", voice_id);
        Ok(Self {
            rx,
            current: Vec::new(),
            cursor: 0,
            underruns: 0,
        })
    }

    /// Copy queued samples into `out`.
    ///
    /// An empty queue is an underrun: the read comes back short and the
    /// stream carries on.
    pub fn read(&mut self, out: &mut [i16]) -> StreamRead {
        let mut written = 0;
        while written < out.len() {
            if self.cursor >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(StreamMessage::Chunk(chunk)) => {
                        self.current = chunk;
                        self.cursor = 0;
                        continue;
                    }
                    Ok(StreamMessage::End) => {
                        return StreamRead {
                            samples: written,
                            ended: Some(StopReason::Finished),
                        }
                    }
                    Ok(StreamMessage::Failed) | Err(TryRecvError::Disconnected) => {
                        return StreamRead {
                            samples: written,
                            ended: Some(StopReason::Failed),
                        }
                    }
                    Err(TryRecvError::Empty) => {
                        self.underruns += 1;
                        trace!("Stream underrun ({} samples short)", out.len() - written);
                        break;
                    }
                }
            }

            let n = (out.len() - written).min(self.current.len() - self.cursor);
            out[written..written + n].copy_from_slice(&self.current[self.cursor..self.cursor + n]);
            written += n;
            self.cursor += n;
        }

        StreamRead {
            samples: written,
            ended: None,
        }
    }

    /// Reads that found the queue empty
    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

fn run_worker(data: Arc<[u8]>, max_scan: usize, control: Arc<VoiceControl>, tx: Sender<StreamMessage>) {
    let mut passes = 0u64;
    loop {
        match decode_pass(&data, max_scan, &control, &tx) {
            Ok(PassEnd::Completed { frames: 0 }) => {
                warn!("Stream for voice {} decoded no frames", control.id());
                let _ = tx.send(StreamMessage::Failed);
                return;
            }
            Ok(PassEnd::Completed { frames }) => {
                passes += 1;
                debug!("Voice {} stream pass {} done ({} frames)", control.id(), passes, frames);
            }
            Ok(PassEnd::Abandoned) => return,
            Err(e) => {
                warn!("Stream decode for voice {} failed: {}", control.id(), e);
                let _ = tx.send(StreamMessage::Failed);
                return;
            }
        }

        if !control.is_looping() || control.state() == VoiceState::Stopped {
            let _ = tx.send(StreamMessage::End);
            return;
        }
    }
}

/// Decode `data` once from the start. Abandoned when the voice goes away.
fn decode_pass(
    data: &[u8],
    max_scan: usize,
    control: &VoiceControl,
    tx: &Sender<StreamMessage>,
) -> Result<PassEnd> {
    let mut stream = MpegStream::new(data, max_scan);
    let mut sink = PcmSink::new();
    let mut converter: Option<StreamConverter> = None;

    while stream.decode_next(&mut sink)? {
        if control.state() == VoiceState::Stopped {
            return Ok(PassEnd::Abandoned);
        }

        let converter = match converter.as_mut() {
            Some(converter) => converter,
            None => {
                let format = stream
                    .format()
                    .ok_or_else(|| Error::Decode("frame decoded without a format".to_string()))?;
                converter.insert(StreamConverter::new(format, LINE_FORMAT)?)
            }
        };

        let pcm = converter.push(&sink.take())?;
        if !pcm.is_empty() && tx.send(StreamMessage::Chunk(pcm)).is_err() {
            return Ok(PassEnd::Abandoned);
        }
    }

    if let Some(converter) = converter.as_mut() {
        let tail = converter.flush()?;
        if !tail.is_empty() && tx.send(StreamMessage::Chunk(tail)).is_err() {
            return Ok(PassEnd::Abandoned);
        }
    }

    Ok(PassEnd::Completed {
        frames: stream.stats().frames_decoded,
    })
}
