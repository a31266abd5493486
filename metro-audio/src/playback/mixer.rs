//! Mixer thread
//!
//! The mixer is the only writer of the output line. Callers reach it through
//! a FIFO of `MixCommand`s; the thread drains all pending commands, advances
//! running fades, reads every active voice into one block, applies category
//! and global gain, and writes the saturated block to the line.
//!
//! # Gain staging
//!
//! ```text
//! sample × voice volume (Q15, in the voice)
//!        × category gain × global gain (Q15, here)
//!        → summed in i32 → saturated to i16
//! ```
//!
//! # Shutdown
//!
//! `stop()` sends the poison pill and waits a bounded time for the thread.
//! The line is drained and closed afterwards whether or not the thread
//! answered, so the device is always released.

use crate::audio::atomic::{clamp_unit, AtomicF32};
use crate::audio::line::OutputLine;
use crate::audio::types::LINE_FORMAT;
use crate::config::{EngineConfig, MixerConfig};
use crate::error::{Error, Result};
use crate::playback::events::{EventBus, MixerEvent};
use crate::playback::voice::{
    q15_gain, PlaybackVoice, StopReason, VoiceCategory, VoiceControl, VoiceHandle, VoiceId, VoiceState,
};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use metro_common::FadeCurve;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Requests to the mixer thread, served in submission order
pub enum MixCommand {
    /// Make a voice active
    Play(PlaybackVoice),

    /// Ramp a voice's volume to `target` over `duration`
    Fade {
        voice: VoiceHandle,
        target: f32,
        duration: Duration,
        curve: FadeCurve,
        stop_at_end: bool,
    },

    /// Poison pill
    Shutdown,
}

/// Category and master gains, shared with the engine.
#[derive(Debug)]
pub struct MixerGains {
    global: AtomicF32,
    music: AtomicF32,
    sfx: AtomicF32,
}

impl MixerGains {
    pub fn new(global: f32, music: f32, sfx: f32) -> Self {
        Self {
            global: AtomicF32::new(clamp_unit(global)),
            music: AtomicF32::new(clamp_unit(music)),
            sfx: AtomicF32::new(clamp_unit(sfx)),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.global_volume, config.music_volume, config.sfx_volume)
    }

    pub fn global(&self) -> f32 {
        self.global.load(Ordering::Relaxed)
    }

    pub fn set_global(&self, volume: f32) {
        self.global.store(clamp_unit(volume), Ordering::Relaxed);
    }

    pub fn category(&self, category: VoiceCategory) -> f32 {
        match category {
            VoiceCategory::Music => self.music.load(Ordering::Relaxed),
            VoiceCategory::Sfx => self.sfx.load(Ordering::Relaxed),
        }
    }

    pub fn set_category(&self, category: VoiceCategory, volume: f32) {
        let volume = clamp_unit(volume);
        match category {
            VoiceCategory::Music => self.music.store(volume, Ordering::Relaxed),
            VoiceCategory::Sfx => self.sfx.store(volume, Ordering::Relaxed),
        }
    }

    /// Combined gain applied to a voice of `category`
    pub fn effective(&self, category: VoiceCategory) -> f32 {
        self.global() * self.category(category)
    }
}

impl Default for MixerGains {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

type SharedLine = Arc<Mutex<Box<dyn OutputLine>>>;

/// Owner of the mixer thread and the output line.
pub struct Mixer {
    config: MixerConfig,
    fade_tick: Duration,
    line: SharedLine,
    commands: Sender<MixCommand>,
    command_rx: Receiver<MixCommand>,
    running: Arc<AtomicBool>,
    active_voices: Arc<AtomicUsize>,
    thread: Mutex<Option<(JoinHandle<()>, Receiver<()>)>>,
    gains: Arc<MixerGains>,
    events: Arc<EventBus>,
}

impl Mixer {
    pub fn new(line: Box<dyn OutputLine>, config: MixerConfig, fade_tick: Duration, gains: Arc<MixerGains>) -> Self {
        let (commands, command_rx) = unbounded();
        Self {
            config,
            fade_tick: fade_tick.max(Duration::from_millis(1)),
            line: Arc::new(Mutex::new(line)),
            commands,
            command_rx,
            running: Arc::new(AtomicBool::new(false)),
            active_voices: Arc::new(AtomicUsize::new(0)),
            thread: Mutex::new(None),
            gains,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Open the line and spawn the mixer thread. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        self.line.lock().open(LINE_FORMAT).map_err(|e| match e {
            Error::HardwareLineUnavailable(_) => e,
            other => Error::HardwareLineUnavailable(other.to_string()),
        })?;

        self.running.store(true, Ordering::Release);
        let (done_tx, done_rx) = bounded(1);
        let mix_loop = MixLoop {
            commands: self.command_rx.clone(),
            line: Arc::clone(&self.line),
            running: Arc::clone(&self.running),
            active_voices: Arc::clone(&self.active_voices),
            gains: Arc::clone(&self.gains),
            events: Arc::clone(&self.events),
            block_samples: self.config.block_frames.max(1) * LINE_FORMAT.channels as usize,
            write_interval: self.config.write_interval(),
            idle_wait: self.config.idle_wait(),
            fade_tick: self.fade_tick,
            voices: Vec::new(),
            fades: Vec::new(),
        };

        let spawned = std::thread::Builder::new().name("mixer".to_string()).spawn(move || {
            mix_loop.run();
            let _ = done_tx.send(());
        });

        match spawned {
            Ok(handle) => {
                *thread = Some((handle, done_rx));
                info!("Mixer started ({} frames per block)", self.config.block_frames);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.line.lock().close();
                Err(e.into())
            }
        }
    }

    /// Stop the thread and release the line, each within the shutdown timeout.
    pub fn stop(&self) {
        let Some((handle, done_rx)) = self.thread.lock().take() else {
            return;
        };
        let timeout = self.config.shutdown_timeout();

        let _ = self.commands.send(MixCommand::Shutdown);
        match done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if handle.join().is_err() {
                    error!("Mixer thread panicked");
                }
            }
            Err(_) => warn!("Mixer thread did not exit within {:?}; detaching", timeout),
        }
        self.running.store(false, Ordering::Release);

        match self.line.try_lock_for(timeout) {
            Some(mut line) => {
                if let Err(e) = line.drain(timeout) {
                    warn!("Line drain failed: {}", e);
                }
                line.close();
            }
            None => error!("Could not acquire the output line within {:?}; leaving it open", timeout),
        }

        // Anything submitted after the poison pill never reached the thread
        while let Ok(command) = self.command_rx.try_recv() {
            if let MixCommand::Play(voice) = command {
                voice.handle().stop();
            }
        }

        info!("Mixer stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.thread.lock().is_some()
    }

    /// Hand a voice to the mixer. Picked up on the next cycle.
    pub fn submit(&self, voice: PlaybackVoice) -> VoiceHandle {
        let handle = voice.handle();
        if !self.running.load(Ordering::Acquire) {
            debug!("Voice {} queued while the mixer is not running", handle.id());
        }
        let _ = self.commands.send(MixCommand::Play(voice));
        handle
    }

    /// Ramp `voice` to `target` over `duration`, replacing any running fade.
    pub fn fade(&self, voice: &VoiceHandle, target: f32, duration: Duration, curve: FadeCurve, stop_at_end: bool) {
        let _ = self.commands.send(MixCommand::Fade {
            voice: voice.clone(),
            target: clamp_unit(target),
            duration,
            curve,
            stop_at_end,
        });
    }

    pub fn subscribe(&self) -> Receiver<MixerEvent> {
        self.events.subscribe()
    }

    pub fn gains(&self) -> &Arc<MixerGains> {
        &self.gains
    }

    /// Voices currently owned by the mixer thread
    pub fn active_voices(&self) -> usize {
        self.active_voices.load(Ordering::Relaxed)
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FadeRamp {
    id: VoiceId,
    control: Arc<VoiceControl>,
    from: f32,
    to: f32,
    curve: FadeCurve,
    ticks: u32,
    elapsed: u32,
    next_tick: Instant,
    stop_at_end: bool,
}

/// State owned by the mixer thread
struct MixLoop {
    commands: Receiver<MixCommand>,
    line: SharedLine,
    running: Arc<AtomicBool>,
    active_voices: Arc<AtomicUsize>,
    gains: Arc<MixerGains>,
    events: Arc<EventBus>,
    block_samples: usize,
    write_interval: Duration,
    idle_wait: Duration,
    fade_tick: Duration,
    voices: Vec<PlaybackVoice>,
    fades: Vec<FadeRamp>,
}

impl MixLoop {
    fn run(mut self) {
        let mut mix = vec![0i32; self.block_samples];
        let mut scratch = vec![0i16; self.block_samples];
        let mut block = vec![0i16; self.block_samples];

        'mixing: while self.running.load(Ordering::Acquire) {
            if self.voices.is_empty() {
                match self.commands.recv_timeout(self.idle_wait) {
                    Ok(command) => {
                        if !self.apply(command) {
                            break 'mixing;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            while let Ok(command) = self.commands.try_recv() {
                if !self.apply(command) {
                    break 'mixing;
                }
            }

            self.tick_fades(Instant::now());
            if self.voices.is_empty() {
                continue;
            }

            self.mix_block(&mut mix, &mut scratch, &mut block);

            if !self.write_interval.is_zero() {
                std::thread::sleep(self.write_interval);
            }
        }

        for mut voice in self.voices.drain(..) {
            voice.finish(StopReason::Shutdown);
            self.events.publish(MixerEvent::VoiceStopped {
                id: voice.id(),
                category: voice.category(),
                reason: StopReason::Shutdown,
            });
        }
        self.active_voices.store(0, Ordering::Relaxed);
        self.events.publish(MixerEvent::Stopped);
        info!("Mixer thread exiting");
    }

    /// Returns false on the poison pill.
    fn apply(&mut self, command: MixCommand) -> bool {
        match command {
            MixCommand::Play(voice) => {
                trace!("Voice {} active ({:?})", voice.id(), voice.category());
                self.voices.push(voice);
                self.active_voices.store(self.voices.len(), Ordering::Relaxed);
            }
            MixCommand::Fade {
                voice,
                target,
                duration,
                curve,
                stop_at_end,
            } => {
                let control = Arc::clone(voice.control());
                let ticks = (duration.as_secs_f64() / self.fade_tick.as_secs_f64()).ceil() as u32;
                debug!(
                    "Fade voice {} from {:.2} to {:.2} over {:?} ({} ticks)",
                    voice.id(),
                    control.volume(),
                    target,
                    duration,
                    ticks
                );
                self.fades.retain(|f| f.id != voice.id());
                self.fades.push(FadeRamp {
                    id: voice.id(),
                    from: control.volume(),
                    control,
                    to: target,
                    curve,
                    ticks,
                    elapsed: 0,
                    next_tick: Instant::now() + self.fade_tick,
                    stop_at_end,
                });
                // Zero-length fades land immediately
                self.tick_fades(Instant::now());
            }
            MixCommand::Shutdown => return false,
        }
        true
    }

    fn tick_fades(&mut self, now: Instant) {
        let fade_tick = self.fade_tick;
        self.fades.retain_mut(|fade| {
            if fade.control.state() == VoiceState::Stopped {
                return false;
            }

            while fade.elapsed < fade.ticks && now >= fade.next_tick {
                fade.elapsed += 1;
                fade.next_tick += fade_tick;
            }

            if fade.elapsed >= fade.ticks {
                fade.control.set_volume(fade.to);
                if fade.stop_at_end {
                    fade.control.set_state(VoiceState::Stopped);
                }
                return false;
            }

            let t = fade.elapsed as f32 / fade.ticks as f32;
            fade.control.set_volume(fade.curve.interpolate(fade.from, fade.to, t));
            true
        });
    }

    fn mix_block(&mut self, mix: &mut [i32], scratch: &mut [i16], block: &mut [i16]) {
        mix.fill(0);
        let mut produced = 0;
        let mut contributors: Vec<VoiceId> = Vec::new();

        for voice in self.voices.iter_mut() {
            let n = voice.read(scratch);
            if n == 0 {
                continue;
            }
            let gain = q15_gain(self.gains.effective(voice.category()));
            for (acc, sample) in mix[..n].iter_mut().zip(&scratch[..n]) {
                *acc += (*sample as i32 * gain) >> 15;
            }
            produced = produced.max(n);
            contributors.push(voice.id());
        }

        for (out, acc) in block.iter_mut().zip(mix.iter()) {
            *out = (*acc).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        }

        // Once the last voice has ended only the audible part is written
        let all_done = self.voices.iter().all(|v| v.state() == VoiceState::Stopped);
        let len = if all_done {
            let channels = LINE_FORMAT.channels as usize;
            produced.div_ceil(channels) * channels
        } else {
            block.len()
        };

        if len > 0 {
            let written = self.line.lock().write(&block[..len]);
            if let Err(e) = written {
                error!("Line write failed, stopping {} voice(s): {}", contributors.len(), e);
                for voice in self.voices.iter_mut().filter(|v| contributors.contains(&v.id())) {
                    voice.finish(StopReason::LineError);
                }
            }
        }

        self.retire_stopped();
    }

    fn retire_stopped(&mut self) {
        let events = &self.events;
        self.voices.retain(|voice| {
            if voice.state() != VoiceState::Stopped {
                return true;
            }
            let reason = voice.end_reason().unwrap_or(StopReason::Stopped);
            trace!("Voice {} retired ({:?})", voice.id(), reason);
            events.publish(MixerEvent::VoiceStopped {
                id: voice.id(),
                category: voice.category(),
                reason,
            });
            false
        });
        self.active_voices.store(self.voices.len(), Ordering::Relaxed);
    }
}
