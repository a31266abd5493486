//! # Metro Common Library
//!
//! Shared code for the metro audio crates:
//! - Error type
//! - Configuration file and sound root resolution
//! - Fade curve definitions and calculations

pub mod config;
pub mod error;
pub mod fade_curves;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
