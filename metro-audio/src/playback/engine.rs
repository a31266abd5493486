//! Sound engine façade
//!
//! `SoundEngine` is what application code talks to. It owns the mixer, a
//! cache of decoded effect clips keyed by name, the compressed bytes of
//! registered music, and the single music slot with its crossfade and
//! playlist behaviour.
//!
//! # Music slot
//!
//! At most one music voice is current. Starting new music stops the current
//! one, or with `fade_to_music` ramps it out while the new one ramps in.
//! Ramps run on the mixer thread at `engine.fade_tick_ms` resolution.
//!
//! # Playlist
//!
//! `enqueue_music` + `play_music_queue` play keys back to back. A watcher
//! thread subscribed to mixer events starts the next key whenever the
//! current music voice finishes on its own. Any manual music call
//! (`play_music`, `fade_to_music`, `stop_music`) halts the queue.

use crate::audio::line::OutputLine;
use crate::audio::output::CpalLine;
use crate::audio::resampler::convert_clip;
use crate::audio::types::{DecodedClip, LINE_FORMAT};
use crate::codec::sync::FrameSync;
use crate::codec::{decode_clip, SourceKind};
use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::playback::events::MixerEvent;
use crate::playback::mixer::{Mixer, MixerGains};
use crate::playback::queue::MusicQueue;
use crate::playback::voice::{PlaybackVoice, StopReason, VoiceCategory, VoiceHandle, VoiceId};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of resource bytes.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Loads resources from a folder on disk.
///
/// Relative paths resolve against the root; absolute paths are used as is.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceLoader for FsLoader {
    fn load(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.root.join(path);
        debug!("Loading resource {}", full.display());
        Ok(std::fs::read(full)?)
    }
}

#[derive(Default)]
struct Playlist {
    queue: MusicQueue,
    active: bool,
}

struct EngineShared {
    config: AudioConfig,
    loader: Box<dyn ResourceLoader>,
    clips: RwLock<HashMap<String, Arc<DecodedClip>>>,
    music: RwLock<HashMap<String, Arc<[u8]>>>,
    mixer: Mixer,
    music_slot: Mutex<Option<VoiceHandle>>,
    playlist: Mutex<Playlist>,
}

struct Watcher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Entry point for playing sounds and music.
pub struct SoundEngine {
    shared: Arc<EngineShared>,
    watcher: Mutex<Option<Watcher>>,
}

impl SoundEngine {
    /// Engine on the configured cpal device, loading from the sound root.
    pub fn new(config: AudioConfig) -> Result<Self> {
        let line = CpalLine::new(&config.output);
        Self::with_line(Box::new(line), config)
    }

    /// Engine on a caller-supplied line, loading from the sound root.
    pub fn with_line(line: Box<dyn OutputLine>, config: AudioConfig) -> Result<Self> {
        let loader = FsLoader::new(config.resolve_sound_root(None));
        Self::with_parts(line, Box::new(loader), config)
    }

    /// Engine from explicit parts. Starts the mixer.
    ///
    /// Fails with `Error::HardwareLineUnavailable` when the line cannot open.
    pub fn with_parts(line: Box<dyn OutputLine>, loader: Box<dyn ResourceLoader>, config: AudioConfig) -> Result<Self> {
        let gains = Arc::new(MixerGains::from_config(&config.engine));
        let mixer = Mixer::new(line, config.mixer.clone(), config.engine.fade_tick(), gains);
        mixer.start()?;

        info!(
            "Sound engine ready (fade tick {:?}, {} fades)",
            config.engine.fade_tick(),
            config.engine.fade_curve
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                loader,
                clips: RwLock::new(HashMap::new()),
                music: RwLock::new(HashMap::new()),
                mixer,
                music_slot: Mutex::new(None),
                playlist: Mutex::new(Playlist::default()),
            }),
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AudioConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.mixer.is_running()
    }

    /// Mixer lifecycle events
    pub fn subscribe(&self) -> Receiver<MixerEvent> {
        self.shared.mixer.subscribe()
    }

    // ========================================================================
    // Effects
    // ========================================================================

    /// Decode a resource completely and cache it under `key`.
    ///
    /// Loading an existing key replaces the cached clip; voices already
    /// playing keep the old one.
    pub fn load_sound(&self, path: impl AsRef<Path>, key: impl Into<String>) -> Result<()> {
        let bytes = self.shared.loader.load(path.as_ref())?;
        self.load_sound_bytes(&bytes, key)
    }

    pub fn load_sound_bytes(&self, bytes: &[u8], key: impl Into<String>) -> Result<()> {
        let key = key.into();
        let clip = decode_clip(bytes, &self.shared.config.codec)?;
        let source_format = clip.format();
        let clip = convert_clip(&clip, LINE_FORMAT)?;

        info!(
            "Loaded sound '{}' ({:.2}s, source {})",
            key,
            clip.duration().as_secs_f64(),
            source_format
        );
        self.shared.clips.write().insert(key, Arc::new(clip));
        Ok(())
    }

    pub fn has_sound(&self, key: &str) -> bool {
        self.shared.clips.read().contains_key(key)
    }

    /// Cached clip for `key`
    pub fn clip(&self, key: &str) -> Option<Arc<DecodedClip>> {
        self.shared.clips.read().get(key).cloned()
    }

    /// Start a new voice for a cached clip.
    pub fn play_sound(&self, key: &str, volume: f32, looping: bool) -> Result<VoiceHandle> {
        let clip = self.shared.cached_clip(key)?;
        let voice = PlaybackVoice::from_clip(clip, VoiceCategory::Sfx, volume, looping);
        Ok(self.shared.mixer.submit(voice))
    }

    /// Play a cached clip once at full volume.
    ///
    /// The clip is already in the line format, so the voice is handed
    /// straight to the mixer and starts within one block.
    pub fn play_ui_sound(&self, key: &str) -> Result<VoiceHandle> {
        let clip = self.shared.cached_clip(key)?;
        Ok(self
            .shared
            .mixer
            .submit(PlaybackVoice::from_clip(clip, VoiceCategory::Sfx, 1.0, false)))
    }

    // ========================================================================
    // Music
    // ========================================================================

    /// Keep a compressed resource for streamed music playback.
    pub fn register_music(&self, path: impl AsRef<Path>, key: impl Into<String>) -> Result<()> {
        let bytes = self.shared.loader.load(path.as_ref())?;
        self.register_music_bytes(bytes, key)
    }

    pub fn register_music_bytes(&self, bytes: Vec<u8>, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        if SourceKind::detect(&bytes) == SourceKind::Mpeg
            && FrameSync::new(&bytes, self.shared.config.codec.max_sync_scan_bytes)
                .next_frame()?
                .is_none()
        {
            return Err(Error::MalformedStream(format!("'{}' holds no MPEG audio frame", key)));
        }

        info!("Registered music '{}' ({} bytes)", key, bytes.len());
        self.shared.music.write().insert(key, Arc::from(bytes));
        Ok(())
    }

    /// Replace the current music with `key`.
    pub fn play_music(&self, key: &str, volume: f32, looping: bool) -> Result<VoiceHandle> {
        self.shared.halt_queue();
        self.shared.start_music(key, volume, looping)
    }

    /// Crossfade from the current music to `key` over `seconds`.
    ///
    /// The outgoing voice ramps to silence and stops; the new one starts at
    /// zero and ramps to `target`. The new track loops if the outgoing one
    /// did.
    pub fn fade_to_music(&self, key: &str, target: f32, seconds: f32) -> Result<VoiceHandle> {
        self.shared.halt_queue();

        let duration = if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f32(seconds)
        } else {
            Duration::ZERO
        };
        let looping = self
            .shared
            .music_slot
            .lock()
            .as_ref()
            .map(|h| h.is_looping())
            .unwrap_or(false);

        let voice = self.shared.music_voice(key, 0.0, looping)?;
        let handle = self.shared.mixer.submit(voice);
        let previous = self.shared.music_slot.lock().replace(handle.clone());

        let curve = self.shared.config.engine.fade_curve;
        if let Some(previous) = previous {
            debug!("Fading out music voice {} over {:?}", previous.id(), duration);
            self.shared.mixer.fade(&previous, 0.0, duration, curve, true);
        }
        self.shared.mixer.fade(&handle, target, duration, curve, false);

        info!("Crossfading to music '{}' over {:?}", key, duration);
        Ok(handle)
    }

    /// Append a key to the playlist.
    pub fn enqueue_music(&self, key: impl Into<String>) {
        let key = key.into();
        debug!("Enqueued music '{}'", key);
        self.shared.playlist.lock().queue.enqueue(key);
    }

    /// Start playing the playlist.
    ///
    /// Returns the handle of the track started now, or `None` when music is
    /// already playing (the queue picks up when it finishes) or the queue is
    /// empty.
    pub fn play_music_queue(&self, loop_queue: bool) -> Result<Option<VoiceHandle>> {
        {
            let mut playlist = self.shared.playlist.lock();
            playlist.queue.set_looping(loop_queue);
            playlist.active = true;
        }
        self.ensure_watcher()?;

        let playing = self
            .shared
            .music_slot
            .lock()
            .as_ref()
            .map(|h| !h.is_stopped())
            .unwrap_or(false);
        if playing {
            return Ok(None);
        }
        Ok(self.shared.advance_queue())
    }

    /// Keys left in the current pass of the playlist
    pub fn queued_music(&self) -> Vec<String> {
        self.shared.playlist.lock().queue.pending().map(str::to_string).collect()
    }

    pub fn pause_music(&self) {
        if let Some(handle) = self.shared.music_slot.lock().as_ref() {
            handle.pause();
        }
    }

    pub fn resume_music(&self) {
        if let Some(handle) = self.shared.music_slot.lock().as_ref() {
            handle.resume();
        }
    }

    /// Stop the current music and halt the playlist.
    pub fn stop_music(&self) {
        self.shared.halt_queue();
        if let Some(handle) = self.shared.music_slot.lock().take() {
            debug!("Stopping music voice {}", handle.id());
            handle.stop();
        }
    }

    /// Handle of the current music voice
    pub fn music_handle(&self) -> Option<VoiceHandle> {
        self.shared.music_slot.lock().clone()
    }

    // ========================================================================
    // Volume
    // ========================================================================

    pub fn set_global_volume(&self, volume: f32) {
        self.shared.mixer.gains().set_global(volume);
    }

    pub fn set_music_volume(&self, volume: f32) {
        self.shared.mixer.gains().set_category(VoiceCategory::Music, volume);
    }

    pub fn set_sfx_volume(&self, volume: f32) {
        self.shared.mixer.gains().set_category(VoiceCategory::Sfx, volume);
    }

    pub fn global_volume(&self) -> f32 {
        self.shared.mixer.gains().global()
    }

    pub fn music_volume(&self) -> f32 {
        self.shared.mixer.gains().category(VoiceCategory::Music)
    }

    pub fn sfx_volume(&self) -> f32 {
        self.shared.mixer.gains().category(VoiceCategory::Sfx)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop the playlist watcher and the mixer. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            let _ = watcher.stop.send(());
            if watcher.handle.join().is_err() {
                warn!("Music queue watcher panicked");
            }
        }
        self.shared.halt_queue();
        self.shared.mixer.stop();
    }

    fn ensure_watcher(&self) -> Result<()> {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return Ok(());
        }

        let events = self.shared.mixer.subscribe();
        let (stop_tx, stop_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("music-queue".to_string())
            .spawn(move || watch_music(shared, events, stop_rx))?;

        *watcher = Some(Watcher { stop: stop_tx, handle });
        Ok(())
    }
}

impl Drop for SoundEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EngineShared {
    fn cached_clip(&self, key: &str) -> Result<Arc<DecodedClip>> {
        self.clips
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownSoundKey(key.to_string()))
    }

    /// Music voice for `key`: streamed when registered as music, otherwise
    /// from the clip cache.
    fn music_voice(&self, key: &str, volume: f32, looping: bool) -> Result<PlaybackVoice> {
        let bytes = self.music.read().get(key).cloned();
        match bytes {
            Some(bytes) => PlaybackVoice::from_stream(bytes, &self.config.codec, VoiceCategory::Music, volume, looping),
            None => Ok(PlaybackVoice::from_clip(
                self.cached_clip(key)?,
                VoiceCategory::Music,
                volume,
                looping,
            )),
        }
    }

    fn start_music(&self, key: &str, volume: f32, looping: bool) -> Result<VoiceHandle> {
        let voice = self.music_voice(key, volume, looping)?;
        let handle = self.mixer.submit(voice);
        if let Some(previous) = self.music_slot.lock().replace(handle.clone()) {
            previous.stop();
        }
        info!("Playing music '{}' (voice {})", key, handle.id());
        Ok(handle)
    }

    fn halt_queue(&self) {
        self.playlist.lock().active = false;
    }

    /// Start the next playable key. Keys that fail to start are skipped.
    fn advance_queue(&self) -> Option<VoiceHandle> {
        let attempts = {
            let playlist = self.playlist.lock();
            playlist.queue.len() + playlist.queue.playlist_len() + 1
        };

        for _ in 0..attempts {
            let key = {
                let mut playlist = self.playlist.lock();
                if !playlist.active {
                    return None;
                }
                match playlist.queue.next_key() {
                    Some(key) => key,
                    None => {
                        info!("Music queue finished");
                        playlist.active = false;
                        return None;
                    }
                }
            };

            match self.start_music(&key, 1.0, false) {
                Ok(handle) => return Some(handle),
                Err(e) => warn!("Skipping queued music '{}': {}", key, e),
            }
        }

        warn!("No queued music could be started");
        self.halt_queue();
        None
    }

    fn on_music_ended(&self, id: VoiceId) {
        let current = self.music_slot.lock().as_ref().map(|h| h.id());
        if current != Some(id) {
            return;
        }
        if self.playlist.lock().active {
            self.advance_queue();
        }
    }
}

fn watch_music(shared: Arc<EngineShared>, events: Receiver<MixerEvent>, stop: Receiver<()>) {
    debug!("Music queue watcher started");
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(events) -> event => match event {
                Ok(MixerEvent::VoiceStopped {
                    id,
                    category: VoiceCategory::Music,
                    reason: StopReason::Finished | StopReason::Failed,
                }) => shared.on_music_ended(id),
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }
    debug!("Music queue watcher exiting");
}
