//! Stream-derived features
//!
//! Computes aggregate metrics from raw per-second sample streams when the
//! provider's summary does not carry them.

use crate::units::round_to;

/// Mean and max of the valid samples of one stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamStats {
    pub mean: f64,
    pub max: f64,
    /// Number of valid (non-null, finite) samples
    pub samples: usize,
}

impl StreamStats {
    /// `None` when the stream has no valid sample
    pub fn from_samples(samples: &[Option<f64>]) -> Option<Self> {
        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;
        let mut count = 0usize;
        for value in samples.iter().flatten().filter(|v| v.is_finite()) {
            sum += value;
            max = max.max(*value);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        Some(Self {
            mean: round_to(sum / count as f64, 1),
            max,
            samples: count,
        })
    }
}

/// Mean over the samples where the device was actually recording (> 0).
///
/// Cadence and power streams pad pauses with zeros, which would drag the mean down.
pub fn active_mean(samples: &[Option<f64>]) -> Option<f64> {
    let active: Vec<Option<f64>> = samples
        .iter()
        .map(|s| s.filter(|v| *v > 0.0))
        .collect();
    StreamStats::from_samples(&active).map(|stats| stats.mean)
}
