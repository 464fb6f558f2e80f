//! Core types for the Synheart Sync pipeline
//!
//! This module defines the data structures that flow through each stage of a sync
//! run: raw source records, canonical records, zone breakdowns, and run outcomes.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw, schema-inconsistent record as returned by the source provider.
///
/// Never mutated; normalization only reads from it.
pub type SourceRecord = serde_json::Value;

/// Kind of time-series entity being reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Activity,
    Sleep,
    Weight,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Activity, EntityKind::Sleep, EntityKind::Weight];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Activity => "activity",
            EntityKind::Sleep => "sleep",
            EntityKind::Weight => "weight",
        }
    }

    /// Daily aggregates are keyed and windowed by calendar date
    pub fn is_daily(&self) -> bool {
        matches!(self, EntityKind::Sleep | EntityKind::Weight)
    }

    /// Metrics derived as "change since the previous persisted record":
    /// `(source metric, delta metric)` pairs.
    pub fn delta_metrics(&self) -> &'static [(Metric, Metric)] {
        match self {
            EntityKind::Weight => &[(Metric::WeightKg, Metric::WeightChangeKg)],
            _ => &[],
        }
    }

    /// The closed canonical metric set for this kind
    pub fn metrics(&self) -> &'static [Metric] {
        use Metric::*;
        match self {
            EntityKind::Activity => &[
                ActivityName,
                ActivityType,
                SourceUrl,
                DistanceKm,
                DurationMin,
                Calories,
                AvgHr,
                MaxHr,
                AvgPaceMinPerKm,
                BestPaceMinPerKm,
                AvgPower,
                MaxPower,
                AerobicTe,
                AnaerobicTe,
                AvgCadence,
                HrZone1,
                HrZone2,
                HrZone3,
                HrZone4,
                HrZone5,
                PowerZone1,
                PowerZone2,
                PowerZone3,
                PowerZone4,
                PowerZone5,
                ParentActivity,
            ],
            EntityKind::Sleep => &[
                SleepScore,
                TotalSleepMin,
                DeepSleepMin,
                LightSleepMin,
                RemSleepMin,
                AwakeMin,
                Bedtime,
                WakeTime,
                RestingHr,
                HrvMs,
                AvgRespiration,
            ],
            EntityKind::Weight => &[
                WeightKg,
                WeightChangeKg,
                BodyFatPct,
                BodyFatKg,
                MuscleMassKg,
                BoneMassKg,
                BodyWaterPct,
                Bmi,
            ],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier used to find an entity's destination record.
///
/// Always derived from the source record, never generated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueKey {
    /// Provider entity id
    Id(String),
    /// Calendar date of a daily aggregate
    Date(NaiveDate),
}

impl UniqueKey {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            UniqueKey::Date(date) => Some(*date),
            UniqueKey::Id(_) => None,
        }
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueKey::Id(id) => f.write_str(id),
            UniqueKey::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Destination property kinds a metric can be projected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Number,
    Select,
    Date,
    Text,
    Title,
    Url,
    Relation,
}

/// Closed set of canonical metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    // Activity
    ActivityName,
    ActivityType,
    SourceUrl,
    DistanceKm,
    DurationMin,
    Calories,
    AvgHr,
    MaxHr,
    AvgPaceMinPerKm,
    BestPaceMinPerKm,
    AvgPower,
    MaxPower,
    AerobicTe,
    AnaerobicTe,
    AvgCadence,
    #[serde(rename = "hr_zone_1")]
    HrZone1,
    #[serde(rename = "hr_zone_2")]
    HrZone2,
    #[serde(rename = "hr_zone_3")]
    HrZone3,
    #[serde(rename = "hr_zone_4")]
    HrZone4,
    #[serde(rename = "hr_zone_5")]
    HrZone5,
    #[serde(rename = "power_zone_1")]
    PowerZone1,
    #[serde(rename = "power_zone_2")]
    PowerZone2,
    #[serde(rename = "power_zone_3")]
    PowerZone3,
    #[serde(rename = "power_zone_4")]
    PowerZone4,
    #[serde(rename = "power_zone_5")]
    PowerZone5,
    ParentActivity,
    // Sleep
    SleepScore,
    TotalSleepMin,
    DeepSleepMin,
    LightSleepMin,
    RemSleepMin,
    AwakeMin,
    Bedtime,
    WakeTime,
    RestingHr,
    HrvMs,
    AvgRespiration,
    // Weight
    WeightKg,
    WeightChangeKg,
    BodyFatPct,
    BodyFatKg,
    MuscleMassKg,
    BoneMassKg,
    BodyWaterPct,
    Bmi,
}

impl Metric {
    pub const HR_ZONES: [Metric; 5] = [
        Metric::HrZone1,
        Metric::HrZone2,
        Metric::HrZone3,
        Metric::HrZone4,
        Metric::HrZone5,
    ];

    pub const POWER_ZONES: [Metric; 5] = [
        Metric::PowerZone1,
        Metric::PowerZone2,
        Metric::PowerZone3,
        Metric::PowerZone4,
        Metric::PowerZone5,
    ];

    /// Configuration name of the metric
    pub fn as_str(&self) -> &'static str {
        use Metric::*;
        match self {
            ActivityName => "activity_name",
            ActivityType => "activity_type",
            SourceUrl => "source_url",
            DistanceKm => "distance_km",
            DurationMin => "duration_min",
            Calories => "calories",
            AvgHr => "avg_hr",
            MaxHr => "max_hr",
            AvgPaceMinPerKm => "avg_pace_min_per_km",
            BestPaceMinPerKm => "best_pace_min_per_km",
            AvgPower => "avg_power",
            MaxPower => "max_power",
            AerobicTe => "aerobic_te",
            AnaerobicTe => "anaerobic_te",
            AvgCadence => "avg_cadence",
            HrZone1 => "hr_zone_1",
            HrZone2 => "hr_zone_2",
            HrZone3 => "hr_zone_3",
            HrZone4 => "hr_zone_4",
            HrZone5 => "hr_zone_5",
            PowerZone1 => "power_zone_1",
            PowerZone2 => "power_zone_2",
            PowerZone3 => "power_zone_3",
            PowerZone4 => "power_zone_4",
            PowerZone5 => "power_zone_5",
            ParentActivity => "parent_activity",
            SleepScore => "sleep_score",
            TotalSleepMin => "total_sleep_min",
            DeepSleepMin => "deep_sleep_min",
            LightSleepMin => "light_sleep_min",
            RemSleepMin => "rem_sleep_min",
            AwakeMin => "awake_min",
            Bedtime => "bedtime",
            WakeTime => "wake_time",
            RestingHr => "resting_hr",
            HrvMs => "hrv_ms",
            AvgRespiration => "avg_respiration",
            WeightKg => "weight_kg",
            WeightChangeKg => "weight_change_kg",
            BodyFatPct => "body_fat_pct",
            BodyFatKg => "body_fat_kg",
            MuscleMassKg => "muscle_mass_kg",
            BoneMassKg => "bone_mass_kg",
            BodyWaterPct => "body_water_pct",
            Bmi => "bmi",
        }
    }

    /// Destination property name used when configuration does not override it
    pub fn default_property(&self) -> &'static str {
        use Metric::*;
        match self {
            ActivityName => "Activity Name",
            ActivityType => "Type",
            SourceUrl => "Link",
            DistanceKm => "Distance (km)",
            DurationMin => "Duration (min)",
            Calories => "Calories",
            AvgHr => "Avg HR",
            MaxHr => "Max HR",
            AvgPaceMinPerKm => "Avg Pace (min/km)",
            BestPaceMinPerKm => "Best Pace (min/km)",
            AvgPower => "Avg Power",
            MaxPower => "Max Power",
            AerobicTe => "Aerobic TE",
            AnaerobicTe => "Anaerobic TE",
            AvgCadence => "Avg Cadence",
            HrZone1 => "Z1 (min)",
            HrZone2 => "Z2 (min)",
            HrZone3 => "Z3 (min)",
            HrZone4 => "Z4 (min)",
            HrZone5 => "Z5 (min)",
            PowerZone1 => "Power Z1 (min)",
            PowerZone2 => "Power Z2 (min)",
            PowerZone3 => "Power Z3 (min)",
            PowerZone4 => "Power Z4 (min)",
            PowerZone5 => "Power Z5 (min)",
            ParentActivity => "Parent Activity",
            SleepScore => "Sleep Score",
            TotalSleepMin => "Total Sleep (min)",
            DeepSleepMin => "Deep (min)",
            LightSleepMin => "Light (min)",
            RemSleepMin => "REM (min)",
            AwakeMin => "Awake (min)",
            Bedtime => "Bedtime",
            WakeTime => "Wake Time",
            RestingHr => "Resting HR",
            HrvMs => "HRV (ms)",
            AvgRespiration => "Avg Respiration",
            WeightKg => "Weight",
            WeightChangeKg => "Change",
            BodyFatPct => "Body Fat %",
            BodyFatKg => "Body Fat (kg)",
            MuscleMassKg => "Skeletal Muscle",
            BoneMassKg => "Bone Mass",
            BodyWaterPct => "Body Water %",
            Bmi => "BMI",
        }
    }

    pub fn property_kind(&self) -> PropertyKind {
        use Metric::*;
        match self {
            ActivityName => PropertyKind::Title,
            ActivityType => PropertyKind::Select,
            SourceUrl => PropertyKind::Url,
            ParentActivity => PropertyKind::Relation,
            Bedtime | WakeTime => PropertyKind::Date,
            _ => PropertyKind::Number,
        }
    }

    /// Zone metrics hold seconds in the canonical record
    pub fn is_zone(&self) -> bool {
        Self::HR_ZONES.contains(self) || Self::POWER_ZONES.contains(self)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved canonical metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum MetricValue {
    Number(f64),
    Label(String),
    Text(String),
    DateTime(NaiveDateTime),
    Url(String),
    /// Reference to another entity's destination record, resolved at upsert time
    Relation(UniqueKey),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Seconds spent in each of five ordered severity bands
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZoneBreakdown(pub [f64; 5]);

impl ZoneBreakdown {
    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|secs| *secs <= 0.0)
    }
}

/// Normalized output of one source entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub kind: EntityKind,
    pub key: UniqueKey,
    /// Local time of the entity (midnight for daily aggregates)
    pub timestamp: NaiveDateTime,
    /// Resolved metrics; unresolvable metrics are simply absent
    pub metrics: BTreeMap<Metric, MetricValue>,
}

impl CanonicalRecord {
    pub fn new(kind: EntityKind, key: UniqueKey, timestamp: NaiveDateTime) -> Self {
        Self {
            kind,
            key,
            timestamp,
            metrics: BTreeMap::new(),
        }
    }

    pub fn number(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(&metric).and_then(MetricValue::as_number)
    }

    /// Insert a value only when one was resolved
    pub fn set(&mut self, metric: Metric, value: Option<MetricValue>) {
        if let Some(value) = value {
            self.metrics.insert(metric, value);
        }
    }

    pub fn set_number(&mut self, metric: Metric, value: Option<f64>) {
        self.set(metric, value.filter(|v| v.is_finite()).map(MetricValue::Number));
    }

    /// Calendar date of the record; a date key wins over the timestamp
    pub fn date(&self) -> NaiveDate {
        self.key.date().unwrap_or_else(|| self.timestamp.date())
    }
}

/// Why an entity was skipped rather than synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No stable identifier could be resolved
    MissingKey,
    /// Timestamp missing or unparseable
    BadTimestamp,
    /// Older than the run cutoff
    OutsideWindow,
    /// Another entity in this run already claimed the key
    DuplicateKey,
    /// Provider returned nothing for the entity (e.g. no sleep recorded that day)
    NoData,
}

/// Per-entity result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum EntityOutcome {
    Created { key: UniqueKey, record_id: String },
    Updated { key: UniqueKey, record_id: String },
    Skipped { key: Option<UniqueKey>, reason: SkipReason },
    Failed { key: UniqueKey, error: String },
}

/// Counts and outcomes of one run over one entity kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub kind: EntityKind,
    pub cutoff: NaiveDateTime,
    pub candidates: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<EntityOutcome>,
}

impl RunSummary {
    pub fn new(run_id: String, kind: EntityKind, cutoff: NaiveDateTime) -> Self {
        Self {
            run_id,
            kind,
            cutoff,
            candidates: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: EntityOutcome) {
        match &outcome {
            EntityOutcome::Created { .. } => self.created += 1,
            EntityOutcome::Updated { .. } => self.updated += 1,
            EntityOutcome::Skipped { .. } => self.skipped += 1,
            EntityOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}
