//! Fade curves for volume ramps
//!
//! A ramp moves a voice's volume from a start level to an end level over a
//! fixed duration. The curve decides how progress through the ramp maps onto
//! the volume change:
//!
//! - **Linear**: constant rate, `y = t`
//! - **Exponential**: slow start, fast finish, `y = t²`
//! - **Logarithmic**: fast start, slow finish, `y = 1 - (1 - t)²`
//! - **SCurve**: smooth acceleration and deceleration, `y = (1 - cos(πt)) / 2`
//! - **EqualPower**: constant perceived loudness across a crossfade, `y = sin(t·π/2)`
//!
//! Rising ramps use the curve directly; falling ramps use its mirror image so
//! that an exponential fade-in pairs with a logarithmic-sounding fade-out.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::str::FromStr;

/// Shape of a volume ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Constant rate of change
    #[default]
    Linear,

    /// Slow start, fast finish
    Exponential,

    /// Fast start, slow finish
    Logarithmic,

    /// Smooth S-shaped transition
    #[serde(alias = "cosine")]
    SCurve,

    /// Constant perceived loudness
    EqualPower,
}

impl FadeCurve {
    /// Curve value for a rising ramp at normalised progress `t` (0.0 to 1.0).
    pub fn rise(&self, t: f32) -> f32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

        match self {
            FadeCurve::Linear => t,
            FadeCurve::Exponential => t * t,
            FadeCurve::Logarithmic => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).sin(),
        }
    }

    /// Curve value for a falling ramp: 1.0 at `t = 0`, 0.0 at `t = 1`.
    pub fn fall(&self, t: f32) -> f32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::Exponential => {
                let inv = 1.0 - t;
                inv * inv
            }
            FadeCurve::Logarithmic => 1.0 - t * t,
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (t * FRAC_PI_2).cos(),
        }
    }

    /// Volume at progress `t` of a ramp running from `from` to `to`.
    pub fn interpolate(&self, from: f32, to: f32, t: f32) -> f32 {
        if to >= from {
            from + (to - from) * self.rise(t)
        } else {
            to + (from - to) * self.fall(t)
        }
    }

    /// Canonical configuration string
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "linear",
            FadeCurve::Exponential => "exponential",
            FadeCurve::Logarithmic => "logarithmic",
            FadeCurve::SCurve => "s_curve",
            FadeCurve::EqualPower => "equal_power",
        }
    }

    /// All curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[
            FadeCurve::Linear,
            FadeCurve::Exponential,
            FadeCurve::Logarithmic,
            FadeCurve::SCurve,
            FadeCurve::EqualPower,
        ]
    }
}

impl FromStr for FadeCurve {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(FadeCurve::Linear),
            "exponential" => Ok(FadeCurve::Exponential),
            "logarithmic" => Ok(FadeCurve::Logarithmic),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Ok(FadeCurve::SCurve),
            "equal_power" | "equalpower" | "equal-power" => Ok(FadeCurve::EqualPower),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown fade curve '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
