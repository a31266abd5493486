//! Atomic floating-point cell for audio parameters.
//!
//! Volumes are written by caller threads and read by the mixer thread. Each
//! one is an independent atomic: a stale read costs one block at the old
//! level, which is inaudible.

use std::sync::atomic::{AtomicU32, Ordering};

/// f32 stored as its bit pattern in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(val: f32) -> Self {
        Self {
            bits: AtomicU32::new(val.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.bits.load(ordering))
    }

    #[inline]
    pub fn store(&self, val: f32, ordering: Ordering) {
        self.bits.store(val.to_bits(), ordering);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Clamp a gain into `[0, 1]`; NaN becomes silence.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
