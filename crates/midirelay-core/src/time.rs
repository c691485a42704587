//! Conversions between transport seconds and sample frames.
//!
//! Client threads think in seconds, the real-time thread in frames. These are
//! pure functions, callable from either side.

/// Negative and NaN inputs clamp to frame 0; values past the `u32` range saturate.
#[inline]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u32 {
    let seconds = if seconds.is_nan() {
        0.0
    } else {
        seconds.max(0.0)
    };
    (seconds * sample_rate as f64) as u32
}

/// Returns 0.0 for a zero sample rate.
#[inline]
pub fn frames_to_seconds(frames: u32, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / sample_rate as f64
}
