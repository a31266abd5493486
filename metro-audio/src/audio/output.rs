//! Audio output using cpal
//!
//! `CpalLine` feeds a sound device through a lock-free ring: the mixer
//! thread pushes interleaved 16-bit samples, the device callback pops them
//! and converts to whatever sample format the device wants. An empty ring
//! plays silence. A device that will not run at the line rate gets its
//! samples resampled on the writing side, before they enter the ring.
//!
//! cpal streams cannot cross threads on every platform, so the stream is
//! built and owned by a small dedicated thread for as long as the line is
//! open.

use crate::audio::line::OutputLine;
use crate::audio::resampler::StreamConverter;
use crate::audio::types::AudioFormat;
use crate::config::OutputConfig;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long `open` waits for the device thread to report
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// A write making no progress for this long fails
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// List available audio output devices.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// Name of the default output device, if there is one
pub fn default_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}

struct OpenStream {
    producer: HeapProd<i16>,
    close_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    channels: usize,
    /// Present when the device rate differs from the line rate
    converter: Option<StreamConverter>,
}

impl OpenStream {
    /// Push every sample into the ring, waiting for the device to make room.
    fn push_blocking(&mut self, samples: &[i16], error_flag: &AtomicBool, poll: Duration) -> Result<()> {
        let mut written = 0;
        let mut last_progress = Instant::now();
        while written < samples.len() {
            if error_flag.load(Ordering::SeqCst) {
                return Err(Error::AudioOutput("audio device reported a stream error".to_string()));
            }

            // Whole frames only, so channels never slip
            let vacant = self.producer.vacant_len();
            let room = vacant - vacant % self.channels;
            if room == 0 {
                if last_progress.elapsed() > STALL_TIMEOUT {
                    return Err(Error::AudioOutput("audio device stopped consuming samples".to_string()));
                }
                std::thread::sleep(poll);
                continue;
            }

            let end = (written + room).min(samples.len());
            written += self.producer.push_slice(&samples[written..end]);
            last_progress = Instant::now();
        }
        Ok(())
    }
}

/// Output line on a cpal device.
pub struct CpalLine {
    device_name: Option<String>,
    ring_frames: usize,
    write_poll: Duration,
    open: Option<OpenStream>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    /// Count of stream errors reported by the device
    error_count: Arc<AtomicU32>,
}

impl CpalLine {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            device_name: config.device.clone(),
            ring_frames: config.ring_frames.max(256),
            write_poll: Duration::from_millis(config.write_poll_ms.max(1)),
            open: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Stream errors the device has reported since the line was created
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl OutputLine for CpalLine {
    fn open(&mut self, format: AudioFormat) -> Result<()> {
        if self.open.is_some() {
            return Ok(());
        }

        info!("Opening audio line ({})", format);

        let channels = format.channels as usize;
        let ring = HeapRb::<i16>::new(self.ring_frames * channels);
        let (producer, consumer) = ring.split();

        let (ready_tx, ready_rx) = bounded::<Result<(String, u32)>>(1);
        let (close_tx, close_rx) = bounded::<()>(1);
        let device_name = self.device_name.clone();
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);
        self.error_flag.store(false, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let built = open_device(device_name.as_deref(), format)
                    .and_then(|(device, config, sample_format)| {
                        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                        let rate = config.sample_rate.0;
                        let stream = build_stream(
                            &device,
                            &config,
                            sample_format,
                            channels,
                            consumer,
                            error_flag,
                            error_count,
                        )?;
                        stream
                            .play()
                            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
                        Ok((stream, name, rate))
                    });

                match built {
                    Ok((stream, name, rate)) => {
                        let _ = ready_tx.send(Ok((name, rate)));
                        // Hold the stream until the line is closed
                        let _ = close_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| Error::HardwareLineUnavailable(format!("Failed to spawn output thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok((name, rate))) => {
                let converter = match device_converter(format, rate) {
                    Ok(converter) => converter,
                    Err(e) => {
                        let _ = close_tx.send(());
                        let _ = thread.join();
                        return Err(e);
                    }
                };
                info!("Audio line open on device: {}", name);
                self.open = Some(OpenStream {
                    producer,
                    close_tx,
                    thread: Some(thread),
                    channels,
                    converter,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(Error::HardwareLineUnavailable(e.to_string()))
            }
            Err(_) => {
                let _ = close_tx.send(());
                Err(Error::HardwareLineUnavailable(
                    "Timed out waiting for the audio device".to_string(),
                ))
            }
        }
    }

    fn write(&mut self, samples: &[i16]) -> Result<usize> {
        let stream = self
            .open
            .as_mut()
            .ok_or_else(|| Error::AudioOutput("write to closed line".to_string()))?;

        let converted;
        let device_samples = match stream.converter.as_mut() {
            Some(converter) => {
                converted = converter.push(samples)?;
                converted.as_slice()
            }
            None => samples,
        };
        stream.push_blocking(device_samples, &self.error_flag, self.write_poll)?;

        Ok(samples.len())
    }

    fn drain(&mut self, timeout: Duration) -> Result<()> {
        let Some(stream) = self.open.as_mut() else {
            return Ok(());
        };

        if let Some(converter) = stream.converter.as_mut() {
            let tail = converter.flush()?;
            stream.push_blocking(&tail, &self.error_flag, self.write_poll)?;
        }

        let deadline = Instant::now() + timeout;
        while stream.producer.occupied_len() > 0 {
            if Instant::now() >= deadline {
                warn!("Audio line drain timed out with {} samples queued", stream.producer.occupied_len());
                break;
            }
            if self.error_flag.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(self.write_poll);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut stream) = self.open.take() {
            let _ = stream.close_tx.send(());
            if let Some(thread) = stream.thread.take() {
                if thread.join().is_err() {
                    error!("Audio output thread panicked");
                }
            }
            info!("Audio line closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

impl Drop for CpalLine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Find the device and the best configuration for `format`.
///
/// Falls back to the default device when a named one is missing.
fn open_device(device_name: Option<&str>, format: AudioFormat) -> Result<(Device, StreamConfig, SampleFormat)> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

            match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                Some(dev) => dev,
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::AudioOutput(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
    };

    let (config, sample_format) = best_config(&device, format)?;
    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    Ok((device, config, sample_format))
}

/// Converter from the line format to a device running at `device_rate`.
fn device_converter(format: AudioFormat, device_rate: u32) -> Result<Option<StreamConverter>> {
    if device_rate == format.sample_rate {
        return Ok(None);
    }
    info!(
        "Device runs at {} Hz, resampling line audio from {} Hz",
        device_rate, format.sample_rate
    );
    StreamConverter::new(format, AudioFormat::new(device_rate, format.channels)).map(Some)
}

/// Prefer an exact rate and channel match in i16, then f32; otherwise the
/// device default.
fn best_config(device: &Device, format: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .collect();

    for wanted in [SampleFormat::I16, SampleFormat::F32] {
        let preferred = supported.iter().find(|config| {
            config.channels() == format.channels
                && config.min_sample_rate().0 <= format.sample_rate
                && config.max_sample_rate().0 >= format.sample_rate
                && config.sample_format() == wanted
        });
        if let Some(config) = preferred {
            let config = config.clone().with_sample_rate(cpal::SampleRate(format.sample_rate));
            return Ok((config.config(), wanted));
        }
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok((fallback.config(), fallback.sample_format()))
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    line_channels: usize,
    consumer: HeapCons<i16>,
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
) -> Result<Stream> {
    let device_channels = config.channels as usize;
    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {}", err);
        error_flag.store(true, Ordering::SeqCst);
        error_count.fetch_add(1, Ordering::SeqCst);
    };

    let stream = match sample_format {
        SampleFormat::I16 => {
            let mut feeder = Feeder::new(consumer, line_channels);
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    feeder.fill(data, device_channels, |s| s);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::F32 => {
            let mut feeder = Feeder::new(consumer, line_channels);
            device.build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    feeder.fill(data, device_channels, |s| s as f32 / 32768.0);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut feeder = Feeder::new(consumer, line_channels);
            device.build_output_stream(
                config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    feeder.fill(data, device_channels, |s| (s as i32 + 32768) as u16);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(Error::AudioOutput(format!("Unsupported sample format: {:?}", other)));
        }
    };

    stream.map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Callback side of the ring: maps line frames onto device frames.
struct Feeder {
    consumer: HeapCons<i16>,
    line_channels: usize,
    frame: [i16; 2],
}

impl Feeder {
    fn new(consumer: HeapCons<i16>, line_channels: usize) -> Self {
        Self {
            consumer,
            line_channels: line_channels.clamp(1, 2),
            frame: [0; 2],
        }
    }

    fn fill<T: Copy>(&mut self, data: &mut [T], device_channels: usize, convert: impl Fn(i16) -> T) {
        let silence = convert(0);
        for out in data.chunks_mut(device_channels.max(1)) {
            let line = &mut self.frame[..self.line_channels];
            if self.consumer.occupied_len() >= line.len() {
                self.consumer.pop_slice(line);
            } else {
                line.fill(0);
            }

            let (left, right) = if self.line_channels == 1 {
                (self.frame[0], self.frame[0])
            } else {
                (self.frame[0], self.frame[1])
            };

            match out.len() {
                1 => out[0] = convert(((left as i32 + right as i32) / 2) as i16),
                _ => {
                    out[0] = convert(left);
                    out[1] = convert(right);
                    for extra in out.iter_mut().skip(2) {
                        *extra = silence;
                    }
                }
            }
        }
    }
}
