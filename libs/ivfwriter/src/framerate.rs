use serde::{Deserialize, Serialize};

use crate::assembler::TimestampSpan;
use crate::error::{Error, Result};

/// Largest denominator tried when approximating a measured rate.
/// 1001 covers the NTSC family (24000/1001, 30000/1001, 60000/1001).
pub const MAX_DENOMINATOR: u32 = 1001;

/// Accepted relative error between the measured rate and its approximation.
pub const TOLERANCE: f64 = 0.0005;

/// Framerate as stored in the IVF header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// Approximates `rate` with the smallest denominator whose error stays within
/// [`TOLERANCE`], falling back to the closest ratio found up to [`MAX_DENOMINATOR`].
pub fn best_match(rate: f64) -> Option<FrameRate> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }

    let mut best: Option<(FrameRate, f64)> = None;
    for denominator in 1..=MAX_DENOMINATOR {
        let numerator = (rate * denominator as f64).round();
        if numerator < 1.0 {
            continue;
        }
        if numerator > u32::MAX as f64 {
            break;
        }

        let candidate = FrameRate::new(numerator as u32, denominator);
        let error = (candidate.as_f64() - rate).abs();
        if error <= rate * TOLERANCE {
            return Some(candidate);
        }
        if best.map_or(true, |(_, best_error)| error < best_error) {
            best = Some((candidate, error));
        }
    }

    best.map(|(candidate, _)| candidate)
}

/// Derives the stream framerate from the RTP clock and the span of completed frames.
pub fn estimate(
    clock_rate: u32,
    frame_count: u64,
    span: Option<TimestampSpan>,
) -> Result<FrameRate> {
    let span = span.ok_or(Error::RateUndefined)?;
    let elapsed = span.elapsed();
    if elapsed == 0 {
        return Err(Error::RateUndefined);
    }

    let rate = clock_rate as f64 * frame_count as f64 / elapsed as f64;
    best_match(rate).ok_or(Error::RateUndefined)
}
