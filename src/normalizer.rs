//! Entity normalization
//!
//! Turns one feed entry into a [`CanonicalRecord`]:
//! - assembles a combined raw record from the entry and best-effort detail calls
//! - resolves every catalog metric independently through its candidate paths
//! - derives zones and stream aggregates the provider did not report

use chrono::{FixedOffset, NaiveDateTime, NaiveTime};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::adapters::{Capability, CapabilityChain, SourceProvider};
use crate::config::ZoneSettings;
use crate::features::{active_mean, StreamStats};
use crate::retry::RetryPolicy;
use crate::schema::{flat_zone_paths, EntityCatalog, FieldPath};
use crate::types::{
    CanonicalRecord, EntityKind, Metric, MetricValue, SkipReason, SourceRecord, UniqueKey,
    ZoneBreakdown,
};
use crate::zones::{self, ZoneThresholds};

/// Why an entry produced no record, with its key when one was resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Skip {
    pub key: Option<UniqueKey>,
    pub reason: SkipReason,
}

impl Skip {
    fn new(key: Option<UniqueKey>, reason: SkipReason) -> Self {
        Self { key, reason }
    }
}

type Samples = Vec<Option<f64>>;

/// Normalizer for one entity kind
pub struct EntityNormalizer<'a> {
    kind: EntityKind,
    catalog: EntityCatalog,
    source: &'a dyn SourceProvider,
    retry: RetryPolicy,
    offset: FixedOffset,
    zones: ZoneSettings,
    activity_web_url: String,
}

impl<'a> EntityNormalizer<'a> {
    pub fn new(
        kind: EntityKind,
        source: &'a dyn SourceProvider,
        retry: RetryPolicy,
        offset: FixedOffset,
        zones: &ZoneSettings,
        activity_web_url: &str,
    ) -> Self {
        Self {
            kind,
            catalog: EntityCatalog::for_kind(kind),
            source,
            retry,
            offset,
            zones: zones.clone(),
            activity_web_url: activity_web_url.to_string(),
        }
    }

    /// Key and local timestamp of a feed entry, without any remote call.
    ///
    /// Daily aggregates are stamped at midnight of their key date, so the
    /// window check and delta lookups see the calendar day the entry belongs to.
    pub fn identify(&self, summary: &SourceRecord) -> Result<(UniqueKey, NaiveDateTime), Skip> {
        let raw = json!({ "summary": summary });
        let key = self
            .catalog
            .key
            .extract_key(&raw, &self.offset)
            .ok_or_else(|| Skip::new(None, SkipReason::MissingKey))?;
        let timestamp = match self.catalog.timestamp.extract(&raw, &self.offset) {
            Some(MetricValue::DateTime(ts)) => ts,
            _ => return Err(Skip::new(Some(key), SkipReason::BadTimestamp)),
        };
        match key.date() {
            Some(day) => Ok((key, day.and_time(NaiveTime::MIN))),
            None => Ok((key, timestamp)),
        }
    }

    /// Full normalization of an identified entry
    pub fn normalize(
        &self,
        summary: &SourceRecord,
        key: UniqueKey,
        timestamp: NaiveDateTime,
    ) -> Result<CanonicalRecord, Skip> {
        let raw = self.assemble(summary, &key);
        let mut record = CanonicalRecord::new(self.kind, key, timestamp);

        for spec in &self.catalog.metrics {
            if record.metrics.contains_key(&spec.metric) {
                continue;
            }
            let value = match spec.spec.extract(&raw, &self.offset) {
                Some(MetricValue::Text(id)) if spec.metric == Metric::ParentActivity => {
                    Some(MetricValue::Relation(UniqueKey::Id(id)))
                }
                Some(MetricValue::Number(n)) if !n.is_finite() => None,
                other => other,
            };
            if value.is_none() {
                debug!(kind = %self.kind, key = %record.key, metric = %spec.metric, "metric absent");
            }
            record.set(spec.metric, value);
        }

        match self.kind {
            EntityKind::Activity => self.derive_activity(&raw, &mut record),
            EntityKind::Sleep => {
                // HRV alone does not make a sleep day
                if raw.get("sleep").is_none() || record.metrics.is_empty() {
                    return Err(Skip::new(Some(record.key), SkipReason::NoData));
                }
            }
            EntityKind::Weight => {
                if record.number(Metric::WeightKg).is_none() {
                    return Err(Skip::new(Some(record.key), SkipReason::NoData));
                }
                if let Some(delta) = &self.catalog.source_delta {
                    record.set_number(Metric::WeightChangeKg, delta.extract_number(&raw, &self.offset));
                }
            }
        }
        Ok(record)
    }

    /// Combined raw record: the feed entry plus one key per detail call that answered
    fn assemble(&self, summary: &SourceRecord, key: &UniqueKey) -> Value {
        let id = key.to_string();
        let mut raw = Map::new();
        raw.insert("summary".into(), summary.clone());
        let details: &[(&'static str, &[Capability])] = match self.kind {
            EntityKind::Activity => &[("detail", &[Capability::ActivityDetail])],
            EntityKind::Sleep => &[
                ("sleep", &[Capability::SleepData]),
                ("hrv", &[Capability::HrvData, Capability::HrvDailySummary]),
            ],
            EntityKind::Weight => &[],
        };
        for (slot, capabilities) in details {
            let chain = CapabilityChain::new(*slot, capabilities);
            if let Some((_, payload)) = chain.first(self.source, &self.retry, &id) {
                raw.insert((*slot).to_string(), payload);
            }
        }
        Value::Object(raw)
    }

    fn derive_activity(&self, raw: &Value, record: &mut CanonicalRecord) {
        let id = record.key.to_string();
        if !record.metrics.contains_key(&Metric::ActivityName) {
            record.set(Metric::ActivityName, Some(MetricValue::Text(format!("Activity {id}"))));
        }
        if !self.activity_web_url.is_empty() {
            record.set(
                Metric::SourceUrl,
                Some(MetricValue::Url(format!("{}{id}", self.activity_web_url))),
            );
        }

        let mut streams = HashMap::new();
        let hr_zones = self.zone_breakdown(
            raw,
            &id,
            &mut streams,
            ZoneSource {
                detail_list: Some("detail.timeInHRZone"),
                flat_field: "hrTimeInZone",
                aggregate: Capability::HrTimeInZones,
                stream: Capability::HeartRateStream,
                thresholds: self.zones.heart_rate,
            },
        );
        set_zones(record, &Metric::HR_ZONES, hr_zones);
        let power_zones = self.zone_breakdown(
            raw,
            &id,
            &mut streams,
            ZoneSource {
                detail_list: None,
                flat_field: "powerTimeInZone",
                aggregate: Capability::PowerTimeInZones,
                stream: Capability::PowerStream,
                thresholds: self.zones.power,
            },
        );
        set_zones(record, &Metric::POWER_ZONES, power_zones);

        if record.number(Metric::AvgPower).is_none() || record.number(Metric::MaxPower).is_none() {
            let power = self.stream(&mut streams, Capability::PowerStream, &id);
            if record.number(Metric::AvgPower).is_none() {
                record.set_number(Metric::AvgPower, active_mean(power));
            }
            if record.number(Metric::MaxPower).is_none() {
                record.set_number(Metric::MaxPower, StreamStats::from_samples(power).map(|s| s.max));
            }
        }
        if record.number(Metric::AvgCadence).is_none() {
            let cadence = self.stream(&mut streams, Capability::CadenceStream, &id);
            record.set_number(Metric::AvgCadence, active_mean(cadence));
        }
    }

    /// Zones the provider already reported (detail list, flat summary fields),
    /// then the zone endpoint, then bucketed raw samples
    fn zone_breakdown(
        &self,
        raw: &Value,
        id: &str,
        streams: &mut HashMap<Capability, Samples>,
        source: ZoneSource,
    ) -> Option<ZoneBreakdown> {
        if let Some(zones) = source
            .detail_list
            .and_then(|path| FieldPath::parse(path).resolve(raw))
            .and_then(zones::from_provider)
        {
            return Some(zones);
        }
        if let Some(zones) = zones::from_flat(raw, |n| flat_zone_paths(source.flat_field, n)) {
            return Some(zones);
        }
        let chain = CapabilityChain::new("zone breakdown", &[source.aggregate, source.stream]);
        chain.first_with(self.source, &self.retry, id, |capability, payload| {
            if capability != source.stream {
                return zones::from_provider(&payload);
            }
            let samples = streams
                .entry(capability)
                .or_insert_with(|| zones::samples_from_value(&payload));
            let zones = zones::bucket(samples, &source.thresholds);
            (!zones.is_empty()).then_some(zones)
        })
    }

    /// Sample stream for a capability, fetched at most once per entity
    fn stream<'s>(
        &self,
        streams: &'s mut HashMap<Capability, Samples>,
        capability: Capability,
        id: &str,
    ) -> &'s [Option<f64>] {
        streams.entry(capability).or_insert_with(|| {
            CapabilityChain::new("sample stream", &[capability])
                .first(self.source, &self.retry, id)
                .map(|(_, payload)| zones::samples_from_value(&payload))
                .unwrap_or_default()
        })
    }
}

struct ZoneSource {
    /// Zone list carried in the activity detail payload
    detail_list: Option<&'static str>,
    flat_field: &'static str,
    aggregate: Capability,
    stream: Capability,
    thresholds: ZoneThresholds,
}

fn set_zones(record: &mut CanonicalRecord, metrics: &[Metric; 5], zones: Option<ZoneBreakdown>) {
    if let Some(zones) = zones {
        for (metric, seconds) in metrics.iter().zip(zones.0) {
            record.set_number(*metric, Some(seconds));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySource;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn normalizer(kind: EntityKind, source: &InMemorySource) -> EntityNormalizer<'_> {
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        EntityNormalizer::new(
            kind,
            source,
            retry,
            FixedOffset::east_opt(8 * 3600).unwrap(),
            &ZoneSettings::default(),
            "https://connect.garmin.com/modern/activity/",
        )
    }

    fn run(kind: EntityKind, source: &InMemorySource, summary: Value) -> Result<CanonicalRecord, Skip> {
        let n = normalizer(kind, source);
        let (key, ts) = n.identify(&summary)?;
        n.normalize(&summary, key, ts)
    }

    #[test]
    fn test_end_to_end_activity_conversions() {
        let source = InMemorySource::new();
        let record = run(
            EntityKind::Activity,
            &source,
            json!({
                "activityId": 123,
                "startTimeLocal": "2024-01-08 07:00:00",
                "distance": 5000.0,
                "duration": 1500.0,
                "averageSpeed": 3.33
            }),
        )
        .unwrap();
        assert_eq!(record.key, UniqueKey::Id("123".into()));
        assert_eq!(record.number(Metric::DistanceKm), Some(5.0));
        assert_eq!(record.number(Metric::DurationMin), Some(25.0));
        let pace = record.number(Metric::AvgPaceMinPerKm).unwrap();
        assert!((pace - 5.0).abs() < 0.02, "pace {pace}");
        assert_eq!(
            record.metrics.get(&Metric::ActivityName),
            Some(&MetricValue::Text("Activity 123".into()))
        );
        assert_eq!(
            record.metrics.get(&Metric::SourceUrl),
            Some(&MetricValue::Url("https://connect.garmin.com/modern/activity/123".into()))
        );
        // Nothing to derive zones or stream aggregates from
        assert!(record.number(Metric::HrZone1).is_none());
        assert!(record.number(Metric::AvgPower).is_none());
    }

    #[test]
    fn test_missing_key_and_bad_timestamp() {
        let source = InMemorySource::new();
        let n = normalizer(EntityKind::Activity, &source);
        assert_eq!(
            n.identify(&json!({"startTimeLocal": "2024-01-08 07:00:00"})).unwrap_err().reason,
            SkipReason::MissingKey
        );
        let skip = n.identify(&json!({"activityId": 9, "startTimeLocal": "yesterday"})).unwrap_err();
        assert_eq!(skip.reason, SkipReason::BadTimestamp);
        assert_eq!(skip.key, Some(UniqueKey::Id("9".into())));
    }

    #[test]
    fn test_provider_zones_win_over_stream() {
        let source = InMemorySource::new()
            .with_capability(
                Capability::HrTimeInZones,
                "7",
                json!([{"zoneNumber": 1, "secsInZone": 600}, {"zoneNumber": 3, "secsInZone": 60}]),
            )
            .with_capability(Capability::HeartRateStream, "7", json!([200, 200, 200]))
            .with_capability(Capability::PowerStream, "7", json!([100, 0, 210, null, 300]));
        let record = run(
            EntityKind::Activity,
            &source,
            json!({"activityId": 7, "startTimeLocal": "2024-01-08 07:00:00"}),
        )
        .unwrap();
        assert_eq!(record.number(Metric::HrZone1), Some(600.0));
        assert_eq!(record.number(Metric::HrZone3), Some(60.0));
        assert_eq!(record.number(Metric::HrZone5), Some(0.0));
        // Power has no aggregate, so the stream is bucketed
        assert_eq!(record.number(Metric::PowerZone1), Some(2.0));
        assert_eq!(record.number(Metric::PowerZone3), Some(1.0));
        assert_eq!(record.number(Metric::PowerZone5), Some(1.0));
        // and also feeds the power aggregates, ignoring zero padding
        assert_eq!(record.number(Metric::AvgPower), Some(203.3));
        assert_eq!(record.number(Metric::MaxPower), Some(300.0));
        // detail, hr zones, power zones, power stream (once), cadence stream
        assert_eq!(source.fetches(), 5);
    }

    #[test]
    fn test_flat_activity_detail() {
        let source = InMemorySource::new().with_capability(
            Capability::ActivityDetail,
            "11",
            json!({
                "averagePower": 205.0,
                "maxPower": 390.0,
                "aerobicTrainingEffect": 3.4,
                "anaerobicTrainingEffect": 1.2,
                "averageRunCadence": 168.0,
                "timeInHRZone": [
                    {"zoneNumber": 1, "seconds": 600},
                    {"zoneNumber": 2, "seconds": 1200},
                    {"zoneNumber": 4, "seconds": 90}
                ]
            }),
        );
        let record = run(
            EntityKind::Activity,
            &source,
            json!({"activityId": 11, "startTimeLocal": "2024-01-08 07:00:00"}),
        )
        .unwrap();
        assert_eq!(record.number(Metric::AvgPower), Some(205.0));
        assert_eq!(record.number(Metric::MaxPower), Some(390.0));
        assert_eq!(record.number(Metric::AerobicTe), Some(3.4));
        assert_eq!(record.number(Metric::AnaerobicTe), Some(1.2));
        assert_eq!(record.number(Metric::AvgCadence), Some(168.0));
        assert_eq!(record.number(Metric::HrZone1), Some(600.0));
        assert_eq!(record.number(Metric::HrZone2), Some(1200.0));
        assert_eq!(record.number(Metric::HrZone4), Some(90.0));
        assert_eq!(record.number(Metric::HrZone5), Some(0.0));
    }

    #[test]
    fn test_hr_zones_fall_back_to_stream() {
        let source = InMemorySource::new()
            .failing_capability(Capability::HrTimeInZones, "12", 500)
            .with_capability(Capability::HeartRateStream, "12", json!([100, 100, null, 190]));
        let record = run(
            EntityKind::Activity,
            &source,
            json!({"activityId": 12, "startTimeLocal": "2024-01-08 07:00:00"}),
        )
        .unwrap();
        assert_eq!(record.number(Metric::HrZone1), Some(2.0));
        assert_eq!(record.number(Metric::HrZone5), Some(1.0));
    }

    #[test]
    fn test_detail_fallback_and_parent_relation() {
        let source = InMemorySource::new()
            .with_capability(
                Capability::ActivityDetail,
                "8",
                json!({"summaryDTO": {"averagePower": 180.0, "maxPower": 420.0, "averageRunCadence": 172.0}}),
            )
            .failing_capability(Capability::HrTimeInZones, "8", 500);
        let record = run(
            EntityKind::Activity,
            &source,
            json!({
                "activityId": 8,
                "parentId": 5,
                "activityName": "Leg 2",
                "startTimeLocal": "2024-01-08 07:00:00",
                "hrTimeInZone_2": 120.0
            }),
        )
        .unwrap();
        assert_eq!(record.number(Metric::AvgPower), Some(180.0));
        assert_eq!(record.number(Metric::MaxPower), Some(420.0));
        assert_eq!(record.number(Metric::AvgCadence), Some(172.0));
        assert_eq!(record.number(Metric::HrZone2), Some(120.0));
        assert_eq!(
            record.metrics.get(&Metric::ParentActivity),
            Some(&MetricValue::Relation(UniqueKey::Id("5".into())))
        );
    }

    #[test]
    fn test_sleep_from_detail_calls() {
        let source = InMemorySource::new()
            .with_capability(
                Capability::SleepData,
                "2024-01-08",
                json!({"dailySleepDTO": {
                    "sleepTimeSeconds": 27000,
                    "deepSleepSeconds": 5400,
                    "sleepScores": {"overall": {"value": 82}},
                    "sleepStartTimestampGMT": 1704639600000i64
                }}),
            )
            .with_capability(Capability::HrvData, "2024-01-08", json!({"hrvSummary": {"lastNightAvg": 48}}));
        let record = run(EntityKind::Sleep, &source, json!({"calendarDate": "2024-01-08"})).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(record.key, UniqueKey::Date(day));
        assert_eq!(record.number(Metric::TotalSleepMin), Some(450.0));
        assert_eq!(record.number(Metric::DeepSleepMin), Some(90.0));
        assert_eq!(record.number(Metric::SleepScore), Some(82.0));
        assert_eq!(record.number(Metric::HrvMs), Some(48.0));
        // 2024-01-07T15:00Z is 23:00 local at UTC+8
        let bedtime = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap().and_hms_opt(23, 0, 0).unwrap();
        assert_eq!(
            record.metrics.get(&Metric::Bedtime),
            Some(&MetricValue::DateTime(bedtime))
        );
    }

    #[test]
    fn test_hrv_falls_back_to_daily_summary() {
        let source = InMemorySource::new()
            .with_capability(Capability::SleepData, "2024-01-08", json!({"dailySleepDTO": {"sleepTimeSeconds": 25200}}))
            .failing_capability(Capability::HrvData, "2024-01-08", 500)
            .with_capability(Capability::HrvDailySummary, "2024-01-08", json!({"hrvSummary": {"lastNightAvg": 51}}));
        let record = run(EntityKind::Sleep, &source, json!({"calendarDate": "2024-01-08"})).unwrap();
        assert_eq!(record.number(Metric::TotalSleepMin), Some(420.0));
        assert_eq!(record.number(Metric::HrvMs), Some(51.0));
    }

    #[test]
    fn test_hrv_without_sleep_is_skipped() {
        let source = InMemorySource::new()
            .with_capability(Capability::HrvData, "2024-01-08", json!({"hrvSummary": {"lastNightAvg": 48}}));
        let skip = run(EntityKind::Sleep, &source, json!({"calendarDate": "2024-01-08"})).unwrap_err();
        assert_eq!(skip.reason, SkipReason::NoData);
        assert_eq!(skip.key, Some(UniqueKey::Date(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap())));
    }

    #[test]
    fn test_sleep_without_data_is_skipped() {
        let source = InMemorySource::new();
        let skip = run(EntityKind::Sleep, &source, json!({"calendarDate": "2024-01-08"})).unwrap_err();
        assert_eq!(skip.reason, SkipReason::NoData);
    }

    #[test]
    fn test_weight_normalization() {
        let source = InMemorySource::new();
        let record = run(
            EntityKind::Weight,
            &source,
            json!({"calendarDate": "2024-01-08", "weight": 79200.0, "bodyFat": 18.8, "delta": -0.5}),
        )
        .unwrap();
        assert_eq!(record.number(Metric::WeightKg), Some(79.2));
        assert_eq!(record.number(Metric::BodyFatPct), Some(18.8));
        assert_eq!(record.number(Metric::WeightChangeKg), Some(-0.5));

        let skip = run(EntityKind::Weight, &source, json!({"calendarDate": "2024-01-08", "bmi": 24.0})).unwrap_err();
        assert_eq!(skip.reason, SkipReason::NoData);
    }
}
