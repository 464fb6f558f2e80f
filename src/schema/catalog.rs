//! Where each metric lives in a combined source record
//!
//! A combined record nests the raw payloads under the name of the call that
//! produced them: `summary` (the feed entry), `detail`, `sleep` and `hrv`. A
//! detail call that failed simply leaves its key absent, so every path below
//! degrades to the next candidate.

use super::path::{CandidateSpec, Coercion};
use crate::types::{EntityKind, Metric};

/// Candidate paths for one metric. A metric may have several specs when its
/// alternatives need different coercions; the first that yields a value wins.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub metric: Metric,
    pub spec: CandidateSpec,
}

impl MetricSpec {
    fn new(metric: Metric, paths: &[&str], coercion: Coercion) -> Self {
        Self {
            metric,
            spec: CandidateSpec::new(paths, coercion),
        }
    }

    fn number(metric: Metric, paths: &[&str]) -> Self {
        Self::new(metric, paths, Coercion::Number)
    }
}

/// Field catalog of one entity kind
#[derive(Debug, Clone)]
pub struct EntityCatalog {
    pub kind: EntityKind,
    pub key: CandidateSpec,
    pub timestamp: CandidateSpec,
    pub metrics: Vec<MetricSpec>,
    /// Change value reported by the source itself, used when no prior
    /// destination record exists
    pub source_delta: Option<CandidateSpec>,
}

impl EntityCatalog {
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Activity => activity_catalog(),
            EntityKind::Sleep => sleep_catalog(),
            EntityKind::Weight => weight_catalog(),
        }
    }

    /// Specs for one metric, in priority order
    pub fn specs_for(&self, metric: Metric) -> impl Iterator<Item = &CandidateSpec> {
        self.metrics
            .iter()
            .filter(move |m| m.metric == metric)
            .map(|m| &m.spec)
    }
}

/// Flat per-zone summary fields, e.g. `summary.hrTimeInZone_3`
pub fn flat_zone_paths(field: &str, zone: usize) -> Vec<String> {
    vec![
        format!("summary.{field}_{zone}"),
        format!("detail.summaryDTO.{field}_{zone}"),
    ]
}

fn activity_catalog() -> EntityCatalog {
    use Metric::*;
    EntityCatalog {
        kind: EntityKind::Activity,
        key: CandidateSpec::new(&["summary.activityId", "detail.activityId"], Coercion::Identifier),
        timestamp: CandidateSpec::new(
            &[
                "summary.startTimeLocal",
                "detail.summaryDTO.startTimeLocal",
                "summary.beginTimestamp",
            ],
            Coercion::LocalTimestamp,
        ),
        metrics: vec![
            MetricSpec::new(
                ActivityName,
                &["summary.activityName", "detail.activityName"],
                Coercion::Text,
            ),
            MetricSpec::new(
                ActivityType,
                &[
                    "summary.activityType.typeKey",
                    "detail.activityTypeDTO.typeKey",
                ],
                Coercion::Label,
            ),
            MetricSpec::new(
                DistanceKm,
                &["summary.distance", "detail.summaryDTO.distance"],
                Coercion::MetersToKm,
            ),
            MetricSpec::new(
                DurationMin,
                &[
                    "summary.duration",
                    "detail.summaryDTO.duration",
                    "summary.elapsedDuration",
                ],
                Coercion::SecondsToMinutes,
            ),
            MetricSpec::number(Calories, &["summary.calories", "detail.summaryDTO.calories"]),
            MetricSpec::number(AvgHr, &["summary.averageHR", "detail.summaryDTO.averageHR"]),
            MetricSpec::number(MaxHr, &["summary.maxHR", "detail.summaryDTO.maxHR"]),
            MetricSpec::new(
                AvgPaceMinPerKm,
                &["summary.averageSpeed", "detail.summaryDTO.averageSpeed"],
                Coercion::SpeedToPace,
            ),
            MetricSpec::new(
                BestPaceMinPerKm,
                &["summary.maxSpeed", "detail.summaryDTO.maxSpeed"],
                Coercion::SpeedToPace,
            ),
            MetricSpec::number(
                AvgPower,
                &["detail.summaryDTO.averagePower", "detail.averagePower", "summary.avgPower"],
            ),
            MetricSpec::number(
                MaxPower,
                &["detail.summaryDTO.maxPower", "detail.maxPower", "summary.maxPower"],
            ),
            MetricSpec::number(
                AerobicTe,
                &[
                    "detail.summaryDTO.trainingEffect",
                    "detail.aerobicTrainingEffect",
                    "summary.aerobicTrainingEffect",
                ],
            ),
            MetricSpec::number(
                AnaerobicTe,
                &[
                    "detail.summaryDTO.anaerobicTrainingEffect",
                    "detail.anaerobicTrainingEffect",
                    "summary.anaerobicTrainingEffect",
                ],
            ),
            MetricSpec::number(
                AvgCadence,
                &[
                    "detail.summaryDTO.averageRunCadence",
                    "detail.summaryDTO.averageBikeCadence",
                    "detail.averageRunCadence",
                    "summary.averageRunningCadenceInStepsPerMinute",
                    "summary.averageBikingCadenceInRevPerMinute",
                ],
            ),
            MetricSpec::new(
                ParentActivity,
                &["summary.parentId", "detail.metadataDTO.parentId"],
                Coercion::Identifier,
            ),
        ],
        source_delta: None,
    }
}

fn sleep_catalog() -> EntityCatalog {
    use Metric::*;
    let date = || {
        CandidateSpec::new(
            &["summary.calendarDate", "sleep.dailySleepDTO.calendarDate"],
            Coercion::LocalTimestamp,
        )
    };
    let seconds = |metric: Metric, field: &str| {
        let nested = format!("sleep.dailySleepDTO.{field}");
        let flat = format!("sleep.{field}");
        MetricSpec::new(metric, &[nested.as_str(), flat.as_str()], Coercion::SecondsToMinutes)
    };
    EntityCatalog {
        kind: EntityKind::Sleep,
        key: date(),
        timestamp: date(),
        metrics: vec![
            MetricSpec::number(
                SleepScore,
                &[
                    "sleep.dailySleepDTO.sleepScores.overall.value",
                    "sleep.sleepScores.overall.value",
                    "sleep.dailySleepDTO.sleepScore",
                    "sleep.sleepScore",
                ],
            ),
            seconds(TotalSleepMin, "sleepTimeSeconds"),
            seconds(DeepSleepMin, "deepSleepSeconds"),
            seconds(LightSleepMin, "lightSleepSeconds"),
            seconds(RemSleepMin, "remSleepSeconds"),
            seconds(AwakeMin, "awakeSleepSeconds"),
            MetricSpec::new(
                Bedtime,
                &[
                    "sleep.dailySleepDTO.sleepStartTimestampGMT",
                    "sleep.sleepStartTimestampGMT",
                ],
                Coercion::LocalTimestamp,
            ),
            MetricSpec::new(
                Bedtime,
                &[
                    "sleep.dailySleepDTO.sleepStartTimestampLocal",
                    "sleep.sleepStartTimestampLocal",
                ],
                Coercion::EpochLocal,
            ),
            MetricSpec::new(
                WakeTime,
                &[
                    "sleep.dailySleepDTO.sleepEndTimestampGMT",
                    "sleep.sleepEndTimestampGMT",
                ],
                Coercion::LocalTimestamp,
            ),
            MetricSpec::new(
                WakeTime,
                &[
                    "sleep.dailySleepDTO.sleepEndTimestampLocal",
                    "sleep.sleepEndTimestampLocal",
                ],
                Coercion::EpochLocal,
            ),
            MetricSpec::number(
                RestingHr,
                &[
                    "sleep.restingHeartRate",
                    "sleep.dailySleepDTO.restingHeartRate",
                ],
            ),
            MetricSpec::number(
                HrvMs,
                &[
                    "hrv.hrvSummary.lastNightAvg",
                    "sleep.avgOvernightHrv",
                    "hrv.hrvValue",
                    "hrv.value",
                    "hrv.data.0.value",
                ],
            ),
            MetricSpec::number(
                AvgRespiration,
                &[
                    "sleep.dailySleepDTO.averageRespirationValue",
                    "sleep.averageRespirationValue",
                ],
            ),
        ],
        source_delta: None,
    }
}

fn weight_catalog() -> EntityCatalog {
    use Metric::*;
    EntityCatalog {
        kind: EntityKind::Weight,
        // `date` is already local; `timestampGMT` would need the account's real zone
        key: CandidateSpec::new(&["summary.calendarDate", "summary.date"], Coercion::EpochLocal),
        timestamp: CandidateSpec::new(
            &["summary.date", "summary.calendarDate", "summary.startTimeInSeconds"],
            Coercion::EpochLocal,
        ),
        metrics: vec![
            MetricSpec::new(WeightKg, &["summary.weight", "summary.weightInKg"], Coercion::MassKg),
            MetricSpec::number(
                BodyFatPct,
                &["summary.bodyFat", "summary.bodyFatPct", "summary.bodyFatPercentage"],
            ),
            MetricSpec::new(BodyFatKg, &["summary.fatMass", "summary.bodyFatMass"], Coercion::MassKg),
            MetricSpec::new(
                MuscleMassKg,
                &["summary.muscleMass", "summary.skeletalMuscleMass", "summary.muscleMassInKg"],
                Coercion::MassKg,
            ),
            MetricSpec::new(BoneMassKg, &["summary.boneMass", "summary.boneMassInKg"], Coercion::MassKg),
            MetricSpec::number(
                BodyWaterPct,
                &["summary.bodyWater", "summary.bodyWaterPct", "summary.bodyWaterPercentage"],
            ),
            MetricSpec::number(Bmi, &["summary.bmi"]),
        ],
        source_delta: Some(CandidateSpec::new(
            &["summary.delta", "summary.change", "summary.weightDelta"],
            Coercion::MassKg,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MetricValue, UniqueKey};
    use chrono::{FixedOffset, NaiveDate};
    use serde_json::json;

    fn utc8() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_catalog_only_names_kind_metrics() {
        for kind in EntityKind::ALL {
            let catalog = EntityCatalog::for_kind(kind);
            for spec in &catalog.metrics {
                assert!(
                    kind.metrics().contains(&spec.metric),
                    "{} is not a {kind} metric",
                    spec.metric
                );
            }
        }
    }

    #[test]
    fn test_activity_detail_fallback() {
        let catalog = EntityCatalog::for_kind(EntityKind::Activity);
        let record = json!({
            "summary": {"activityId": 123, "startTimeLocal": "2024-01-08 07:00:00"},
            "detail": {"summaryDTO": {"distance": 5000.0, "averagePower": 210.0}}
        });
        assert_eq!(
            catalog.key.extract_key(&record, &utc8()),
            Some(UniqueKey::Id("123".into()))
        );
        let distance = catalog.specs_for(Metric::DistanceKm).next().unwrap();
        assert_eq!(distance.extract_number(&record, &utc8()), Some(5.0));
        let power = catalog.specs_for(Metric::AvgPower).next().unwrap();
        assert_eq!(power.extract_number(&record, &utc8()), Some(210.0));
    }

    #[test]
    fn test_sleep_times_have_two_specs() {
        let catalog = EntityCatalog::for_kind(EntityKind::Sleep);
        assert_eq!(catalog.specs_for(Metric::Bedtime).count(), 2);
        let record = json!({
            "summary": {"calendarDate": "2024-01-08"},
            "sleep": {"dailySleepDTO": {"sleepStartTimestampLocal": 1704668400000i64}}
        });
        let bedtime = catalog
            .specs_for(Metric::Bedtime)
            .find_map(|spec| spec.extract(&record, &utc8()));
        let expected = NaiveDate::from_ymd_opt(2024, 1, 7)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        assert_eq!(bedtime, Some(MetricValue::DateTime(expected)));
        assert_eq!(
            catalog.key.extract_key(&record, &utc8()),
            Some(UniqueKey::Date(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()))
        );
    }

    #[test]
    fn test_weight_grams_and_source_delta() {
        let catalog = EntityCatalog::for_kind(EntityKind::Weight);
        let record = json!({"summary": {"calendarDate": "2024-01-08", "weight": 79200.0, "delta": -0.8}});
        let weight = catalog.specs_for(Metric::WeightKg).next().unwrap();
        assert_eq!(weight.extract_number(&record, &utc8()), Some(79.2));
        let delta = catalog.source_delta.as_ref().unwrap();
        assert_eq!(delta.extract_number(&record, &utc8()), Some(-0.8));
    }

    #[test]
    fn test_weight_local_epoch_stays_on_calendar_date() {
        let catalog = EntityCatalog::for_kind(EntityKind::Weight);
        let evening = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap();
        let record = json!({"summary": {
            "calendarDate": "2024-02-29",
            "date": evening.and_utc().timestamp_millis(),
            "weight": 79.2
        }});
        assert_eq!(
            catalog.key.extract_key(&record, &utc8()),
            Some(UniqueKey::Date(evening.date()))
        );
        assert_eq!(
            catalog.timestamp.extract(&record, &utc8()),
            Some(MetricValue::DateTime(evening))
        );
        let date_only = json!({"summary": {"date": evening.and_utc().timestamp_millis()}});
        assert_eq!(
            catalog.key.extract_key(&date_only, &utc8()),
            Some(UniqueKey::Date(evening.date()))
        );
    }

    #[test]
    fn test_flat_zone_paths() {
        assert_eq!(
            flat_zone_paths("hrTimeInZone", 2),
            vec!["summary.hrTimeInZone_2", "detail.summaryDTO.hrTimeInZone_2"]
        );
    }
}
