//! Unit and metric converters
//!
//! Pure numeric transforms used during normalization. Every converter takes and
//! returns `Option<f64>`: missing or non-numeric input yields `None`, never an error.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Values above this are assumed to be grams rather than kilograms.
///
/// Best-effort only: the provider reports body-composition masses in grams on some
/// accounts and in kilograms on others, with no unit field to tell them apart.
pub const MASS_GRAMS_THRESHOLD: f64 = 1000.0;

/// Epoch values above this are treated as milliseconds rather than seconds
const EPOCH_MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Read a JSON scalar as a finite number. Numeric strings are accepted.
pub fn as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Meters to kilometers, 3 decimal places
pub fn meters_to_km(meters: Option<f64>) -> Option<f64> {
    meters.filter(|m| m.is_finite()).map(|m| round_to(m / 1000.0, 3))
}

/// Seconds to minutes, 2 decimal places
pub fn seconds_to_minutes(seconds: Option<f64>) -> Option<f64> {
    seconds.filter(|s| s.is_finite()).map(|s| round_to(s / 60.0, 2))
}

/// Speed (m/s) to pace (min/km), 2 decimal places.
///
/// Absent for missing, zero or negative speeds.
pub fn speed_to_pace(speed_mps: Option<f64>) -> Option<f64> {
    let speed = speed_mps.filter(|s| s.is_finite() && *s > 0.0)?;
    Some(round_to((1000.0 / speed) / 60.0, 2))
}

/// Heuristic grams-or-kilograms rescaling to kilograms, 3 decimal places.
///
/// Magnitudes above [`MASS_GRAMS_THRESHOLD`] are divided by 1000. This guesses the
/// unit; small gram values (e.g. a 800 g change) are indistinguishable from kilograms.
pub fn normalize_mass_kg(mass: Option<f64>) -> Option<f64> {
    let mass = mass.filter(|m| m.is_finite())?;
    if mass.abs() > MASS_GRAMS_THRESHOLD {
        Some(round_to(mass / 1000.0, 3))
    } else {
        Some(round_to(mass, 3))
    }
}

/// Epoch seconds or milliseconds (guessed by magnitude) to local wall-clock time
pub fn epoch_to_local(epoch: Option<f64>, offset: &FixedOffset) -> Option<NaiveDateTime> {
    let epoch = epoch.filter(|e| e.is_finite() && *e >= 0.0)?;
    let millis = if epoch > EPOCH_MILLIS_THRESHOLD {
        epoch as i64
    } else {
        (epoch * 1000.0) as i64
    };
    let utc = DateTime::<Utc>::from_timestamp_millis(millis)?;
    Some(utc.with_timezone(offset).naive_local())
}

/// Epoch value that is already shifted to local time by the provider
pub fn epoch_as_local(epoch: Option<f64>) -> Option<NaiveDateTime> {
    epoch_to_local(epoch, &FixedOffset::east_opt(0)?)
}

/// Parse a provider timestamp string into local wall-clock time.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, ISO-8601 with or without fractional seconds,
/// RFC 3339 with an offset (converted to `offset`) and bare `YYYY-MM-DD` dates
/// (midnight).
pub fn parse_local_timestamp(raw: &str, offset: &FixedOffset) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(offset).naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_distance_and_duration() {
        assert_eq!(meters_to_km(Some(5000.0)), Some(5.0));
        assert_eq!(meters_to_km(Some(1234.5678)), Some(1.235));
        assert_eq!(seconds_to_minutes(Some(1500.0)), Some(25.0));
        assert_eq!(seconds_to_minutes(Some(100.0)), Some(1.67));
        assert_eq!(meters_to_km(None), None);
        assert_eq!(seconds_to_minutes(Some(f64::NAN)), None);
    }

    #[test]
    fn test_pace_guard() {
        assert_eq!(speed_to_pace(Some(0.0)), None);
        assert_eq!(speed_to_pace(Some(-5.0)), None);
        assert_eq!(speed_to_pace(None), None);
        let pace = speed_to_pace(Some(3.33)).unwrap();
        assert!((pace - 5.0).abs() < 0.02);
        assert!(pace.is_finite());
    }

    #[test]
    fn test_mass_threshold() {
        assert_eq!(normalize_mass_kg(Some(79200.0)), Some(79.2));
        assert_eq!(normalize_mass_kg(Some(79.2)), Some(79.2));
        assert_eq!(normalize_mass_kg(Some(1000.0)), Some(1000.0));
        assert_eq!(normalize_mass_kg(Some(1500.0)), Some(1.5));
        assert_eq!(normalize_mass_kg(Some(-1500.0)), Some(-1.5));
        assert_eq!(normalize_mass_kg(None), None);
    }

    #[test]
    fn test_as_f64_coercion() {
        assert_eq!(as_f64(&json!(3)), Some(3.0));
        assert_eq!(as_f64(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&json!(true)), None);
        assert_eq!(as_f64(&json!(null)), None);
        assert_eq!(as_f64(&json!({"v": 1})), None);
    }

    #[test]
    fn test_epoch_to_local() {
        // 2024-01-15T14:30:00Z
        let millis = 1_705_329_000_000.0;
        let local = epoch_to_local(Some(millis), &cst()).unwrap();
        assert_eq!(local.to_string(), "2024-01-15 22:30:00");
        let from_secs = epoch_to_local(Some(millis / 1000.0), &cst()).unwrap();
        assert_eq!(local, from_secs);
        assert_eq!(epoch_as_local(Some(millis)).unwrap().to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn test_parse_local_timestamp_formats() {
        let offset = cst();
        assert_eq!(
            parse_local_timestamp("2024-01-15 07:30:00", &offset).unwrap().to_string(),
            "2024-01-15 07:30:00"
        );
        assert_eq!(
            parse_local_timestamp("2024-01-15T07:30:00.0", &offset).unwrap().to_string(),
            "2024-01-15 07:30:00"
        );
        assert_eq!(
            parse_local_timestamp("2024-01-15T00:00:00Z", &offset).unwrap().to_string(),
            "2024-01-15 08:00:00"
        );
        assert_eq!(
            parse_local_timestamp("2024-01-15", &offset).unwrap().to_string(),
            "2024-01-15 00:00:00"
        );
        assert!(parse_local_timestamp("yesterday", &offset).is_none());
        assert!(parse_local_timestamp("", &offset).is_none());
    }
}
