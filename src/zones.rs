//! Zone bucketing
//!
//! Classifies per-second samples (heart rate, power) into five ordered bands, or
//! reads the provider's own pre-aggregated time-in-zone structure. A provider
//! aggregate is authoritative; bucketing raw samples is only the fallback.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;
use crate::schema::CandidateSpec;
use crate::types::ZoneBreakdown;
use crate::units;

/// Five ascending, closed upper bounds. Values above the fourth bound land in the
/// top band; the fifth bound is the nominal ceiling of the top band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneThresholds(pub [f64; 5]);

impl ZoneThresholds {
    pub fn validate(&self, name: &str) -> Result<(), SyncError> {
        let bounds = &self.0;
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(SyncError::Config(format!("{name} zone bounds must be finite")));
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SyncError::Config(format!(
                "{name} zone bounds must be strictly ascending: {bounds:?}"
            )));
        }
        Ok(())
    }

    /// Zero-based band index for a sample
    pub fn band(&self, value: f64) -> usize {
        self.0[..4]
            .iter()
            .position(|upper| value <= *upper)
            .unwrap_or(4)
    }
}

/// Default heart-rate bands (bpm)
pub const DEFAULT_HR_ZONES: ZoneThresholds = ZoneThresholds([120.0, 140.0, 155.0, 170.0, 200.0]);

/// Default power bands (watts)
pub const DEFAULT_POWER_ZONES: ZoneThresholds = ZoneThresholds([150.0, 200.0, 240.0, 280.0, 350.0]);

/// Bucket samples, one time unit each. Null and non-finite samples are skipped.
pub fn bucket(samples: &[Option<f64>], thresholds: &ZoneThresholds) -> ZoneBreakdown {
    let mut seconds = [0.0; 5];
    for sample in samples.iter().flatten().filter(|s| s.is_finite()) {
        seconds[thresholds.band(*sample)] += 1.0;
    }
    ZoneBreakdown(seconds)
}

/// Read a provider stream payload (array of numbers/nulls) as optional samples
pub fn samples_from_value(value: &Value) -> Vec<Option<f64>> {
    match value {
        Value::Array(items) => items.iter().map(units::as_f64).collect(),
        _ => Vec::new(),
    }
}

/// Parse a provider time-in-zone list such as
/// `[{"zoneNumber": 1, "secsInZone": 600.0}, ...]`.
///
/// Entries outside zones 1-5 are ignored; a list with no usable entry is absent.
pub fn from_provider(value: &Value) -> Option<ZoneBreakdown> {
    let zone_spec = CandidateSpec::number(&["zoneNumber", "zone", "zoneIndex"]);
    let secs_spec = CandidateSpec::number(&["secsInZone", "seconds", "secs", "timeInZone"]);
    let offset = FixedOffset::east_opt(0)?;

    let items = value.as_array()?;
    let mut seconds = [0.0; 5];
    let mut any = false;
    for item in items {
        let zone = zone_spec.extract_number(item, &offset);
        let secs = secs_spec.extract_number(item, &offset);
        if let (Some(zone), Some(secs)) = (zone, secs) {
            if (1.0..=5.0).contains(&zone) && zone.fract() == 0.0 && secs >= 0.0 {
                seconds[zone as usize - 1] += secs;
                any = true;
            }
        }
    }
    any.then_some(ZoneBreakdown(seconds))
}

/// Read flat per-zone fields such as `hrTimeInZone_1 .. hrTimeInZone_5`.
///
/// `field` maps a 1-based zone number to the candidate paths for that zone.
pub fn from_flat(
    record: &Value,
    field: impl Fn(usize) -> Vec<String>,
) -> Option<ZoneBreakdown> {
    let offset = FixedOffset::east_opt(0)?;
    let mut seconds = [0.0; 5];
    let mut any = false;
    for (idx, slot) in seconds.iter_mut().enumerate() {
        let paths = field(idx + 1);
        let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
        if let Some(secs) = CandidateSpec::number(&paths).extract_number(record, &offset) {
            *slot = secs.max(0.0);
            any = true;
        }
    }
    any.then_some(ZoneBreakdown(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_closed_upper_bounds() {
        let z = DEFAULT_HR_ZONES;
        assert_eq!(z.band(0.0), 0);
        assert_eq!(z.band(120.0), 0);
        assert_eq!(z.band(120.5), 1);
        assert_eq!(z.band(155.0), 2);
        assert_eq!(z.band(170.0), 3);
        assert_eq!(z.band(171.0), 4);
        // Above the nominal ceiling still counts in the top band
        assert_eq!(z.band(250.0), 4);
    }

    #[test]
    fn test_bucket_skips_nulls() {
        let samples = vec![Some(100.0), None, Some(130.0), Some(f64::NAN), Some(190.0), Some(260.0)];
        let zones = bucket(&samples, &DEFAULT_HR_ZONES);
        assert_eq!(zones, ZoneBreakdown([1.0, 1.0, 0.0, 0.0, 2.0]));
        assert_eq!(zones.total(), 4.0);
    }

    #[test]
    fn test_samples_from_value() {
        let samples = samples_from_value(&json!([100, null, "130", "x", 150.5]));
        assert_eq!(samples, vec![Some(100.0), None, Some(130.0), None, Some(150.5)]);
        assert!(samples_from_value(&json!({"not": "a stream"})).is_empty());
    }

    #[test]
    fn test_provider_aggregate() {
        let payload = json!([
            {"zoneNumber": 1, "secsInZone": 600.0, "zoneLowBoundary": 98},
            {"zoneNumber": 2, "secsInZone": 300.0},
            {"zoneNumber": 5, "seconds": 12},
            {"zoneNumber": 6, "secsInZone": 99.0},
            {"secsInZone": 10.0}
        ]);
        let zones = from_provider(&payload).unwrap();
        assert_eq!(zones, ZoneBreakdown([600.0, 300.0, 0.0, 0.0, 12.0]));
        assert!(from_provider(&json!([])).is_none());
        assert!(from_provider(&json!({"zoneNumber": 1})).is_none());
    }

    #[test]
    fn test_flat_fields() {
        let record = json!({"summary": {"hrTimeInZone_1": 60.0, "hrTimeInZone_3": 30.5}});
        let zones = from_flat(&record, |n| vec![format!("summary.hrTimeInZone_{n}")]).unwrap();
        assert_eq!(zones, ZoneBreakdown([60.0, 0.0, 30.5, 0.0, 0.0]));
        assert!(from_flat(&record, |n| vec![format!("summary.powerTimeInZone_{n}")]).is_none());
    }

    #[test]
    fn test_threshold_validation() {
        assert!(DEFAULT_HR_ZONES.validate("hr").is_ok());
        assert!(ZoneThresholds([1.0, 2.0, 2.0, 3.0, 4.0]).validate("hr").is_err());
        assert!(ZoneThresholds([1.0, 2.0, f64::NAN, 3.0, 4.0]).validate("hr").is_err());
    }

    proptest! {
        #[test]
        fn zone_conservation(samples in proptest::collection::vec(
            proptest::option::of(-50.0f64..400.0), 0..600
        )) {
            let zones = bucket(&samples, &DEFAULT_HR_ZONES);
            let valid = samples.iter().flatten().count() as f64;
            prop_assert_eq!(zones.total(), valid);
            prop_assert!(zones.0.iter().all(|s| *s >= 0.0));
        }
    }
}
