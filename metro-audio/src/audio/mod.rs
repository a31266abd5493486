//! Audio data types, format conversion and output lines

pub mod atomic;
pub mod line;
pub mod output;
pub mod resampler;
pub mod types;

pub use line::{CaptureLine, CaptureProbe, OutputLine};
pub use output::CpalLine;
pub use types::{AudioFormat, DecodedClip, LINE_FORMAT};
