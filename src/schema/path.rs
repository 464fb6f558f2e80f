//! Ordered-fallback field resolution over schema-inconsistent records
//!
//! A [`CandidateSpec`] lists equivalent field paths across provider schema
//! variants. Resolution returns the first path that fully resolves to a non-null
//! value. Missing keys and type mismatches along a path are absence, never errors.

use chrono::FixedOffset;
use serde_json::Value;
use std::fmt;

use crate::types::{MetricValue, UniqueKey};
use crate::units;

/// Dot-separated path into nested JSON (`dailySleepDTO.sleepScores.overall.value`).
///
/// Numeric segments index into arrays (`data.0.value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Descend key by key; `None` on any missing key, type mismatch, or null leaf
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        let mut current = record;
        for segment in &self.segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        (!current.is_null()).then_some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Unit or type coercion applied to a resolved value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Number,
    MetersToKm,
    SecondsToMinutes,
    SpeedToPace,
    MassKg,
    Text,
    Label,
    /// Integer or string id rendered as text
    Identifier,
    /// Timestamp string, or epoch seconds/millis in UTC
    LocalTimestamp,
    /// Local wall-clock time: a timestamp string, or an epoch value the provider
    /// already shifted to local time
    EpochLocal,
}

impl Coercion {
    pub fn apply(&self, value: &Value, offset: &FixedOffset) -> Option<MetricValue> {
        let number = || units::as_f64(value);
        match self {
            Coercion::Number => number().map(MetricValue::Number),
            Coercion::MetersToKm => units::meters_to_km(number()).map(MetricValue::Number),
            Coercion::SecondsToMinutes => {
                units::seconds_to_minutes(number()).map(MetricValue::Number)
            }
            Coercion::SpeedToPace => units::speed_to_pace(number()).map(MetricValue::Number),
            Coercion::MassKg => units::normalize_mass_kg(number()).map(MetricValue::Number),
            Coercion::Text => text(value).map(MetricValue::Text),
            Coercion::Label => match value {
                Value::String(s) if !s.trim().is_empty() => Some(MetricValue::Label(s.clone())),
                _ => None,
            },
            Coercion::Identifier => identifier(value).map(MetricValue::Text),
            Coercion::LocalTimestamp => match value {
                Value::String(s) => units::parse_local_timestamp(s, offset),
                Value::Number(_) => units::epoch_to_local(number(), offset),
                _ => None,
            }
            .map(MetricValue::DateTime),
            Coercion::EpochLocal => match value {
                Value::String(s) => units::parse_local_timestamp(s, offset),
                Value::Number(_) => units::epoch_as_local(number()),
                _ => None,
            }
            .map(MetricValue::DateTime),
        }
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => Some(i.to_string()),
            (_, Some(u), _) => Some(u.to_string()),
            (_, _, Some(f)) if f.fract() == 0.0 && f.is_finite() => Some(format!("{f:.0}")),
            _ => None,
        },
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Ordered equivalent field paths plus the coercion applied to the winner
#[derive(Debug, Clone)]
pub struct CandidateSpec {
    paths: Vec<FieldPath>,
    coercion: Coercion,
}

impl CandidateSpec {
    pub fn new(paths: &[&str], coercion: Coercion) -> Self {
        debug_assert!(!paths.is_empty(), "candidate spec needs at least one path");
        Self {
            paths: paths.iter().map(|p| FieldPath::parse(p)).collect(),
            coercion,
        }
    }

    pub fn number(paths: &[&str]) -> Self {
        Self::new(paths, Coercion::Number)
    }

    /// First fully-resolving path's raw value
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        resolve(record, self)
    }

    /// Resolve then coerce. A winning value that fails coercion is absent; later
    /// paths are not consulted.
    pub fn extract(&self, record: &Value, offset: &FixedOffset) -> Option<MetricValue> {
        self.coercion.apply(self.resolve(record)?, offset)
    }

    pub fn extract_number(&self, record: &Value, offset: &FixedOffset) -> Option<f64> {
        self.extract(record, offset).and_then(|v| v.as_number())
    }

    pub fn extract_key(&self, record: &Value, offset: &FixedOffset) -> Option<UniqueKey> {
        match self.extract(record, offset)? {
            MetricValue::Text(id) => Some(UniqueKey::Id(id)),
            MetricValue::DateTime(ts) => Some(UniqueKey::Date(ts.date())),
            _ => None,
        }
    }
}

/// Return the first candidate path's value that fully resolves to a non-null value
pub fn resolve<'a>(record: &'a Value, spec: &CandidateSpec) -> Option<&'a Value> {
    spec.paths.iter().find_map(|path| path.resolve(record))
}
