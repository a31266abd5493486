//! PCM output line abstraction
//!
//! The mixer is the only writer of a line. `CpalLine` (see `output`) drives a
//! sound device; `CaptureLine` keeps what it is given in memory, for tests and
//! headless runs.

use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for interleaved 16-bit PCM in one fixed format.
pub trait OutputLine: Send {
    /// Acquire the line for `format`. Opening an open line is a no-op.
    fn open(&mut self, format: AudioFormat) -> Result<()>;

    /// Write interleaved samples, blocking while the line is full.
    ///
    /// Returns the number of samples accepted.
    fn write(&mut self, samples: &[i16]) -> Result<usize>;

    /// Wait up to `timeout` for queued samples to play out.
    fn drain(&mut self, timeout: Duration) -> Result<()>;

    /// Release the line. Closing a closed line is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Debug, Default)]
struct CaptureState {
    format: Option<AudioFormat>,
    open: bool,
    open_count: usize,
    frames_written: u64,
    retained: Vec<i16>,
    retain_frames: usize,
    retain_samples: usize,
    failing_writes: usize,
    refuse_open: bool,
    started: Option<Instant>,
}

/// In-memory line.
///
/// Keeps the first `retain_frames` frames it receives and counts the rest.
/// A paced line blocks in `write` so data is consumed at the real-time rate
/// of its format, like a device would.
pub struct CaptureLine {
    state: Arc<Mutex<CaptureState>>,
    paced: bool,
}

/// Observer handle onto a `CaptureLine` that has been handed to a mixer.
#[derive(Clone)]
pub struct CaptureProbe {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureLine {
    /// Default retention: ten seconds of line audio
    pub const DEFAULT_RETAIN_FRAMES: usize = 441_000;

    /// Unpaced line: writes return immediately.
    pub fn new() -> Self {
        Self::with_retention(Self::DEFAULT_RETAIN_FRAMES, false)
    }

    /// Line consuming samples at the real-time rate.
    pub fn paced() -> Self {
        Self::with_retention(Self::DEFAULT_RETAIN_FRAMES, true)
    }

    pub fn with_retention(retain_frames: usize, paced: bool) -> Self {
        let state = CaptureState {
            retain_frames,
            retain_samples: retain_frames * 2,
            ..CaptureState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            paced,
        }
    }

    pub fn probe(&self) -> CaptureProbe {
        CaptureProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for CaptureLine {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLine for CaptureLine {
    fn open(&mut self, format: AudioFormat) -> Result<()> {
        let mut state = self.state.lock();
        if state.refuse_open {
            return Err(Error::HardwareLineUnavailable("capture line refused to open".to_string()));
        }
        if state.open {
            return Ok(());
        }

        state.open = true;
        state.open_count += 1;
        state.format = Some(format);
        state.retain_samples = state.retain_frames * format.channels as usize;
        state.started = Some(Instant::now());
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let (deadline, written) = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(Error::AudioOutput("write to closed line".to_string()));
            }
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                return Err(Error::AudioOutput("injected write failure".to_string()));
            }

            let room = state.retain_samples.saturating_sub(state.retained.len());
            let keep = room.min(samples.len());
            state.retained.extend_from_slice(&samples[..keep]);

            let channels = state.format.map(|f| f.channels.max(1) as u64).unwrap_or(2);
            state.frames_written += samples.len() as u64 / channels;

            let deadline = match (self.paced, state.started, state.format) {
                (true, Some(started), Some(format)) => {
                    Some(started + format.frames_to_duration(state.frames_written as usize))
                }
                _ => None,
            };
            (deadline, samples.len())
        };

        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }

        Ok(written)
    }

    fn drain(&mut self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl CaptureProbe {
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Times the line has been opened
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn frames_written(&self) -> u64 {
        self.state.lock().frames_written
    }

    /// Copy of the retained samples
    pub fn samples(&self) -> Vec<i16> {
        self.state.lock().retained.clone()
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    /// Make `open` fail, as with a missing device
    pub fn refuse_open(&self, refuse: bool) {
        self.state.lock().refuse_open = refuse;
    }
}
