//! Notion destination store
//!
//! Maps [`PropertyValue`]s onto Notion page property objects and back. Dates are
//! written as local ISO strings carrying the configured UTC offset.

use chrono::{FixedOffset, NaiveDate};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{
    DateValue, DestinationRecord, DestinationStore, KeyFilter, PriorQuery, PropertyMap,
    PropertyValue,
};
use crate::config::DestinationSettings;
use crate::error::SyncError;
use crate::http::HttpTransport;
use crate::units;

/// Notion REST API store
pub struct NotionStore {
    http: HttpTransport,
    offset: FixedOffset,
}

impl NotionStore {
    pub fn new(
        settings: &DestinationSettings,
        token: &str,
        offset: FixedOffset,
    ) -> Result<Self, SyncError> {
        let http = HttpTransport::new(
            &settings.base_url,
            token,
            &[("Notion-Version", settings.api_version.as_str())],
            Duration::from_secs(settings.timeout_secs),
        )?;
        Ok(Self { http, offset })
    }

    fn query(&self, database_id: &str, body: Value) -> Result<Option<DestinationRecord>, SyncError> {
        let response = self
            .http
            .post_json(&format!("/databases/{database_id}/query"), &body)?;
        let first = response
            .get("results")
            .and_then(Value::as_array)
            .and_then(|results| results.first());
        Ok(first.and_then(|page| decode_page(page, &self.offset)))
    }
}

impl DestinationStore for NotionStore {
    fn query_by_key(
        &self,
        database_id: &str,
        filter: &KeyFilter,
    ) -> Result<Option<DestinationRecord>, SyncError> {
        let body = json!({
            "filter": key_filter(filter)?,
            "page_size": 1,
        });
        self.query(database_id, body)
    }

    fn latest_before(
        &self,
        database_id: &str,
        query: &PriorQuery,
    ) -> Result<Option<DestinationRecord>, SyncError> {
        let body = json!({
            "filter": {
                "and": [
                    {"property": query.date_property, "date": {"before": query.before.to_string()}},
                    {"property": query.date_property, "date": {"on_or_after": query.not_before.to_string()}},
                    {"property": query.value_property, "number": {"is_not_empty": true}},
                ]
            },
            "sorts": [{"property": query.date_property, "direction": "descending"}],
            "page_size": 1,
        });
        self.query(database_id, body)
    }

    fn create_record(&self, database_id: &str, properties: &PropertyMap) -> Result<String, SyncError> {
        let body = json!({
            "parent": {"database_id": database_id},
            "properties": encode_properties(properties, &self.offset),
        });
        let page = self.http.post_json("/pages", &body)?;
        page.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::MissingField("id in created page".into()))
    }

    fn patch_record(&self, record_id: &str, properties: &PropertyMap) -> Result<(), SyncError> {
        let body = json!({ "properties": encode_properties(properties, &self.offset) });
        self.http.patch_json(&format!("/pages/{record_id}"), &body)?;
        Ok(())
    }
}

fn key_filter(filter: &KeyFilter) -> Result<Value, SyncError> {
    let condition = match &filter.value {
        PropertyValue::Number(n) => json!({"number": {"equals": n}}),
        PropertyValue::Title(s) => json!({"title": {"equals": s}}),
        PropertyValue::Text(s) => json!({"rich_text": {"equals": s}}),
        PropertyValue::Date(d) => json!({"date": {"equals": d.date().to_string()}}),
        other => {
            return Err(SyncError::Unsupported(format!(
                "cannot filter on {other:?} key values"
            )))
        }
    };
    let mut object = Map::new();
    object.insert("property".into(), Value::String(filter.property.clone()));
    if let Value::Object(condition) = condition {
        object.extend(condition);
    }
    Ok(Value::Object(object))
}

fn rich_text(content: &str) -> Value {
    json!([{"type": "text", "text": {"content": content}}])
}

fn encode_date(date: &DateValue, offset: &FixedOffset) -> String {
    match date {
        DateValue::Day(day) => day.to_string(),
        DateValue::Instant(ts) => format!("{}{}", ts.format("%Y-%m-%dT%H:%M:%S"), offset),
    }
}

pub(crate) fn encode_property(value: &PropertyValue, offset: &FixedOffset) -> Value {
    match value {
        PropertyValue::Number(n) => json!({"number": n}),
        PropertyValue::Select(name) => json!({"select": {"name": name}}),
        PropertyValue::Date(date) => json!({"date": {"start": encode_date(date, offset)}}),
        PropertyValue::Text(s) => json!({"rich_text": rich_text(s)}),
        PropertyValue::Title(s) => json!({"title": rich_text(s)}),
        PropertyValue::Url(url) => json!({"url": url}),
        PropertyValue::Relation(ids) => {
            json!({"relation": ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>()})
        }
    }
}

pub(crate) fn encode_properties(properties: &PropertyMap, offset: &FixedOffset) -> Value {
    let map: Map<String, Value> = properties
        .iter()
        .map(|(name, value)| (name.clone(), encode_property(value, offset)))
        .collect();
    Value::Object(map)
}

fn plain_text(parts: &Value) -> Option<String> {
    let parts = parts.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| {
            part.get("plain_text")
                .or_else(|| part.pointer("/text/content"))
                .and_then(Value::as_str)
        })
        .collect();
    Some(text)
}

fn decode_date(raw: &str, offset: &FixedOffset) -> Option<DateValue> {
    if raw.len() == 10 {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(DateValue::Day);
    }
    units::parse_local_timestamp(raw, offset).map(DateValue::Instant)
}

/// Decode one Notion property object; unknown or empty properties are `None`
pub(crate) fn decode_property(property: &Value, offset: &FixedOffset) -> Option<PropertyValue> {
    let kind = property.get("type")?.as_str()?;
    let body = property.get(kind)?;
    match kind {
        "number" => body.as_f64().map(PropertyValue::Number),
        "select" => body
            .get("name")
            .and_then(Value::as_str)
            .map(|name| PropertyValue::Select(name.to_string())),
        "date" => body
            .get("start")
            .and_then(Value::as_str)
            .and_then(|start| decode_date(start, offset))
            .map(PropertyValue::Date),
        "rich_text" => plain_text(body).map(PropertyValue::Text),
        "title" => plain_text(body).map(PropertyValue::Title),
        "url" => body.as_str().map(|url| PropertyValue::Url(url.to_string())),
        "relation" => body.as_array().map(|items| {
            PropertyValue::Relation(
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect(),
            )
        }),
        other => {
            debug!(kind = other, "ignoring unsupported property type");
            None
        }
    }
}

pub(crate) fn decode_page(page: &Value, offset: &FixedOffset) -> Option<DestinationRecord> {
    let id = page.get("id")?.as_str()?.to_string();
    let properties = page
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .filter_map(|(name, property)| {
                    decode_property(property, offset).map(|value| (name.clone(), value))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(DestinationRecord { id, properties })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyKind;
    use crate::types::UniqueKey;
    use pretty_assertions::assert_eq;

    fn utc8() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_encode_properties() {
        let mut properties = PropertyMap::new();
        properties.insert("Activity ID".into(), PropertyValue::Number(123.0));
        properties.insert("Activity Name".into(), PropertyValue::Title("Morning Run".into()));
        properties.insert("Type".into(), PropertyValue::Select("running".into()));
        let start = NaiveDate::from_ymd_opt(2024, 1, 8)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap();
        properties.insert("Date".into(), PropertyValue::Date(DateValue::Instant(start)));
        properties.insert("Parent Activity".into(), PropertyValue::Relation(vec!["p1".into()]));

        let encoded = encode_properties(&properties, &utc8());
        assert_eq!(
            encoded,
            json!({
                "Activity ID": {"number": 123.0},
                "Activity Name": {"title": [{"type": "text", "text": {"content": "Morning Run"}}]},
                "Type": {"select": {"name": "running"}},
                "Date": {"date": {"start": "2024-01-08T07:00:00+08:00"}},
                "Parent Activity": {"relation": [{"id": "p1"}]},
            })
        );
    }

    #[test]
    fn test_decode_page() {
        let page = json!({
            "id": "page-1",
            "properties": {
                "Weight": {"type": "number", "number": 80.0},
                "Change": {"type": "number", "number": null},
                "Date": {"type": "date", "date": {"start": "2024-01-01", "end": null}},
                "Name": {"type": "title", "title": [{"plain_text": "Jan "}, {"plain_text": "1"}]},
                "Bedtime": {"type": "date", "date": {"start": "2024-01-01T23:10:00.000+08:00"}},
                "Formula": {"type": "formula", "formula": {"number": 1}}
            }
        });
        let record = decode_page(&page, &utc8()).unwrap();
        assert_eq!(record.id, "page-1");
        assert_eq!(record.number("Weight"), Some(80.0));
        assert!(!record.properties.contains_key("Change"));
        assert!(!record.properties.contains_key("Formula"));
        assert_eq!(
            record.date("Date"),
            Some(DateValue::Day(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
        );
        assert_eq!(
            record.properties.get("Name"),
            Some(&PropertyValue::Title("Jan 1".into()))
        );
        let bedtime = record.date("Bedtime").unwrap();
        assert_eq!(bedtime.sort_key().to_string(), "2024-01-01 23:10:00");
    }

    #[test]
    fn test_key_filter_shapes() {
        let filter = KeyFilter::new("Activity ID", KeyKind::Number, &UniqueKey::Id("42".into())).unwrap();
        assert_eq!(
            key_filter(&filter).unwrap(),
            json!({"property": "Activity ID", "number": {"equals": 42.0}})
        );
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let filter = KeyFilter::new("Date", KeyKind::Date, &UniqueKey::Date(day)).unwrap();
        assert_eq!(
            key_filter(&filter).unwrap(),
            json!({"property": "Date", "date": {"equals": "2024-01-08"}})
        );
    }
}
