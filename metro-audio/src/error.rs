//! Error types for metro-audio
//!
//! Codec errors are split by how far they propagate: `Decode` is recovered
//! per frame, `MalformedStream` abandons the stream, `CorruptVbrHeader` only
//! downgrades duration estimates.

use thiserror::Error;

/// Main error type for metro-audio
#[derive(Error, Debug)]
pub enum Error {
    /// Frame sync could not be established or re-established
    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    /// VBR side header present but unreadable
    #[error("Corrupt VBR header: {0}")]
    CorruptVbrHeader(String),

    /// A single frame failed to decode
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Sound key was never loaded into the clip cache
    #[error("Unknown sound key: {0}")]
    UnknownSoundKey(String),

    /// No usable audio output device
    #[error("Hardware line unavailable: {0}")]
    HardwareLineUnavailable(String),

    /// Audio output device errors after the line was opened
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Sample rate conversion failures
    #[error("Resample error: {0}")]
    Resample(String),

    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// WAV container errors
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from metro-common
    #[error(transparent)]
    Common(#[from] metro_common::Error),
}

impl Error {
    /// True for errors that only cost one frame of audio.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Error::Decode(_))
    }
}

/// Convenience Result type using metro-audio Error
pub type Result<T> = std::result::Result<T, Error>;
