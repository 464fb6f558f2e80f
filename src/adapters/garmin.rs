//! Garmin Connect source provider
//!
//! Talks to the Connect JSON API. Activities come from the paginated search
//! endpoint; sleep has no listing endpoint, so its feed is one entry per calendar
//! day counting back from today; weight entries are fetched once per run as a
//! date range and paged locally.

use chrono::{Duration as ChronoDuration, FixedOffset, NaiveDate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::time::Duration;
use tracing::debug;

use super::{Capability, FetchWindow, SourceProvider};
use crate::config::SourceSettings;
use crate::error::SyncError;
use crate::http::HttpTransport;
use crate::schema::{CandidateSpec, Coercion};
use crate::types::{EntityKind, MetricValue, SourceRecord};

const ACTIVITY_SEARCH: &str = "/activitylist-service/activities/search/activities";
const HEART_RATE_KEYS: &[&str] = &["directHeartRate"];
const POWER_KEYS: &[&str] = &["directPower"];
const CADENCE_KEYS: &[&str] = &["directRunCadence", "directBikeCadence", "directDoubleCadence"];

/// Garmin Connect API client
pub struct GarminConnectClient {
    http: HttpTransport,
    display_name: String,
    offset: FixedOffset,
    /// Weight entries for the last requested date range, most recent first
    weight_range: RefCell<Option<((NaiveDate, NaiveDate), Vec<SourceRecord>)>>,
    /// Last downloaded activity details; the three streams share one download
    details: RefCell<Option<(String, Value)>>,
}

impl GarminConnectClient {
    pub fn new(
        settings: &SourceSettings,
        token: &str,
        offset: FixedOffset,
    ) -> Result<Self, SyncError> {
        let http = HttpTransport::new(
            &settings.base_url,
            token,
            &[("NK", "NT")],
            Duration::from_secs(settings.timeout_secs),
        )?;
        Ok(Self {
            http,
            display_name: settings.display_name.clone(),
            offset,
            weight_range: RefCell::new(None),
            details: RefCell::new(None),
        })
    }

    fn activities(&self, offset: usize, limit: usize) -> Result<Vec<SourceRecord>, SyncError> {
        let page = self.http.get_json(
            ACTIVITY_SEARCH,
            &[("start", offset.to_string()), ("limit", limit.to_string())],
        )?;
        match page {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(SyncError::Unsupported(format!(
                "activity search returned {}",
                json_kind(&other)
            ))),
        }
    }

    fn weights(
        &self,
        offset: usize,
        limit: usize,
        window: &FetchWindow,
    ) -> Result<Vec<SourceRecord>, SyncError> {
        let range = (window.cutoff.date(), window.today);
        let cached = matches!(&*self.weight_range.borrow(), Some((r, _)) if *r == range);
        if !cached {
            let payload = self.http.get_json(
                "/weight-service/weight/dateRange",
                &[
                    ("startDate", range.0.to_string()),
                    ("endDate", range.1.to_string()),
                ],
            )?;
            let entries = sort_recent_first(weight_entries(payload), &self.offset);
            debug!(count = entries.len(), start = %range.0, end = %range.1, "weight range fetched");
            *self.weight_range.borrow_mut() = Some((range, entries));
        }
        let cache = self.weight_range.borrow();
        Ok(cache
            .as_ref()
            .map(|(_, entries)| entries.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn activity_details(&self, id: &str) -> Result<Value, SyncError> {
        if let Some((cached_id, details)) = &*self.details.borrow() {
            if cached_id == id {
                return Ok(details.clone());
            }
        }
        let details = self.http.get_json(
            &format!("/activity-service/activity/{id}/details"),
            &[("maxChartSize", "100000".to_string())],
        )?;
        *self.details.borrow_mut() = Some((id.to_string(), details.clone()));
        Ok(details)
    }

    fn stream(&self, id: &str, keys: &[&str]) -> Result<Value, SyncError> {
        let details = self.activity_details(id)?;
        Ok(stream_from_details(&details, keys).unwrap_or(Value::Null))
    }
}

impl SourceProvider for GarminConnectClient {
    fn list_page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
        window: &FetchWindow,
    ) -> Result<Vec<SourceRecord>, SyncError> {
        match kind {
            EntityKind::Activity => self.activities(offset, limit),
            EntityKind::Sleep => Ok(daily_feed(window.today, offset, limit)),
            EntityKind::Weight => self.weights(offset, limit, window),
        }
    }

    fn fetch(&self, capability: Capability, id: &str) -> Result<SourceRecord, SyncError> {
        let payload = match capability {
            Capability::ActivityDetail => self
                .http
                .get_json(&format!("/activity-service/activity/{id}"), &[]),
            Capability::HrTimeInZones => self
                .http
                .get_json(&format!("/activity-service/activity/{id}/hrTimeInZones"), &[]),
            Capability::PowerTimeInZones => self
                .http
                .get_json(&format!("/activity-service/activity/{id}/powerTimeInZones"), &[]),
            Capability::HeartRateStream => self.stream(id, HEART_RATE_KEYS),
            Capability::PowerStream => self.stream(id, POWER_KEYS),
            Capability::CadenceStream => self.stream(id, CADENCE_KEYS),
            Capability::SleepData => {
                if self.display_name.is_empty() {
                    return Err(SyncError::Unsupported(
                        "sleep data requires source.display_name".into(),
                    ));
                }
                self.http.get_json(
                    &format!("/wellness-service/wellness/dailySleepData/{}", self.display_name),
                    &[
                        ("date", id.to_string()),
                        ("nonSleepBufferMinutes", "60".to_string()),
                    ],
                )
            }
            Capability::HrvData => self.http.get_json(&format!("/hrv-service/hrv/{id}"), &[]),
            Capability::HrvDailySummary => self
                .http
                .get_json(&format!("/hrv-service/hrv/daily/{id}/{id}"), &[])
                .map(first_daily_hrv),
        };
        absent_when_not_found(payload)
    }
}

/// Garmin answers 404 for days and activities that simply have no such data
fn absent_when_not_found(payload: Result<Value, SyncError>) -> Result<Value, SyncError> {
    match payload {
        Err(err) if err.is_not_found() => Ok(Value::Null),
        other => other,
    }
}

/// The daily range endpoint lists `hrvSummaries`; reshape the first one like
/// the single-day payload so the same catalog paths apply.
fn first_daily_hrv(payload: Value) -> Value {
    match payload.get("hrvSummaries").and_then(|days| days.get(0)) {
        Some(summary) => json!({ "hrvSummary": summary }),
        None => Value::Null,
    }
}

/// One `{"calendarDate": ..}` entry per day, counting back from `today`
fn daily_feed(today: NaiveDate, offset: usize, limit: usize) -> Vec<SourceRecord> {
    (offset..offset + limit)
        .filter_map(|days_back| {
            let days_back = i64::try_from(days_back).ok()?;
            let date = today.checked_sub_signed(ChronoDuration::days(days_back))?;
            Some(json!({ "calendarDate": date.to_string() }))
        })
        .collect()
}

/// The range endpoint has answered with a bare list, a wrapped list
/// (`dateWeightList` or `weightList`) and a per-day `dailyWeightSummaries` shape.
fn weight_entries(payload: Value) -> Vec<SourceRecord> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for list in ["dateWeightList", "weightList"] {
                if let Some(Value::Array(items)) = map.remove(list) {
                    return items;
                }
            }
            if let Some(Value::Array(days)) = map.remove("dailyWeightSummaries") {
                return days
                    .iter()
                    .flat_map(|day| match day.get("allWeightMetrics") {
                        Some(Value::Array(metrics)) => metrics.clone(),
                        _ => day.get("latestWeight").cloned().into_iter().collect(),
                    })
                    .collect();
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn sort_recent_first(mut entries: Vec<SourceRecord>, offset: &FixedOffset) -> Vec<SourceRecord> {
    let timestamp = CandidateSpec::new(
        &["date", "calendarDate", "startTimeInSeconds"],
        Coercion::EpochLocal,
    );
    entries.sort_by_key(|entry| {
        std::cmp::Reverse(
            timestamp
                .extract(entry, offset)
                .and_then(|value| match value {
                    MetricValue::DateTime(ts) => Some(ts),
                    _ => None,
                }),
        )
    });
    entries
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityDetails {
    #[serde(default)]
    metric_descriptors: Vec<MetricDescriptor>,
    #[serde(default)]
    activity_detail_metrics: Vec<DetailSample>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetricDescriptor {
    metrics_index: usize,
    key: String,
}

#[derive(Debug, Deserialize)]
struct DetailSample {
    #[serde(default)]
    metrics: Vec<Option<f64>>,
}

/// Pull one sample column out of an activity details payload.
///
/// `keys` are descriptor keys in priority order. Returns a JSON array with
/// `null` for missing samples, or `None` when no key is described.
pub fn stream_from_details(details: &Value, keys: &[&str]) -> Option<Value> {
    let details: ActivityDetails = serde_json::from_value(details.clone()).ok()?;
    let index = keys.iter().find_map(|key| {
        details
            .metric_descriptors
            .iter()
            .find(|d| d.key == *key)
            .map(|d| d.metrics_index)
    })?;
    let samples = details
        .activity_detail_metrics
        .iter()
        .map(|sample| match sample.metrics.get(index).copied().flatten() {
            Some(v) => json!(v),
            None => Value::Null,
        })
        .collect();
    Some(Value::Array(samples))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_from_details() {
        let details = json!({
            "metricDescriptors": [
                {"metricsIndex": 0, "key": "directTimestamp"},
                {"metricsIndex": 1, "key": "directHeartRate"},
                {"metricsIndex": 2, "key": "directBikeCadence"}
            ],
            "activityDetailMetrics": [
                {"metrics": [1.0, 120.0, 80.0]},
                {"metrics": [2.0, null, 82.0]},
                {"metrics": [3.0, 150.0]}
            ]
        });
        assert_eq!(
            stream_from_details(&details, HEART_RATE_KEYS).unwrap(),
            json!([120.0, null, 150.0])
        );
        assert_eq!(
            stream_from_details(&details, CADENCE_KEYS).unwrap(),
            json!([80.0, 82.0, null])
        );
        assert!(stream_from_details(&details, POWER_KEYS).is_none());
        assert!(stream_from_details(&json!({"unexpected": true}), HEART_RATE_KEYS).is_none());
    }

    #[test]
    fn test_daily_feed_counts_back() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let page = daily_feed(today, 1, 3);
        assert_eq!(
            page,
            vec![
                json!({"calendarDate": "2024-03-01"}),
                json!({"calendarDate": "2024-02-29"}),
                json!({"calendarDate": "2024-02-28"}),
            ]
        );
    }

    #[test]
    fn test_weight_entries_shapes() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let bare = json!([{"calendarDate": "2024-01-01"}, {"calendarDate": "2024-01-08"}]);
        let sorted = sort_recent_first(weight_entries(bare), &offset);
        assert_eq!(sorted[0]["calendarDate"], "2024-01-08");

        let wrapped = json!({"dateWeightList": [{"weight": 80000.0}]});
        assert_eq!(weight_entries(wrapped).len(), 1);

        let daily = json!({"dailyWeightSummaries": [
            {"summaryDate": "2024-01-08", "allWeightMetrics": [{"weight": 79200.0}, {"weight": 79300.0}]},
            {"summaryDate": "2024-01-01", "latestWeight": {"weight": 80000.0}}
        ]});
        assert_eq!(weight_entries(daily).len(), 3);
        assert!(weight_entries(json!("nope")).is_empty());
    }

    #[test]
    fn test_missing_detail_reads_as_no_data() {
        let missing = absent_when_not_found(Err(SyncError::http("/hrv-service/hrv/2024-01-01", 404, "")));
        assert_eq!(missing.unwrap(), Value::Null);
        let denied = absent_when_not_found(Err(SyncError::http("/hrv-service/hrv/2024-01-01", 401, "")));
        assert!(denied.is_err());
    }

    #[test]
    fn test_daily_hrv_reshaped() {
        let payload = json!({"hrvSummaries": [{"calendarDate": "2024-01-08", "lastNightAvg": 51}]});
        assert_eq!(first_daily_hrv(payload)["hrvSummary"]["lastNightAvg"], 51);
        assert_eq!(first_daily_hrv(json!({"hrvSummaries": []})), Value::Null);
    }
}
