//! Destination property encoding
//!
//! Projects a [`CanonicalRecord`] onto one collection's properties. Absent
//! metrics are never written, so a sync cannot blank a value someone entered by
//! hand. Relations are returned unresolved; the upsert client looks them up.

use tracing::debug;

use crate::config::CollectionSettings;
use crate::destination::{key_value, DateValue, PropertyMap, PropertyValue};
use crate::error::SyncError;
use crate::types::{CanonicalRecord, MetricValue, PropertyKind, UniqueKey};
use crate::units;

/// Encoded properties plus relations still to be resolved to record ids
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRecord {
    pub properties: PropertyMap,
    /// Property name and the key of the related entity
    pub relations: Vec<(String, UniqueKey)>,
}

/// Property encoder for one collection
pub struct PropertyEncoder<'a> {
    collection: &'a CollectionSettings,
}

impl<'a> PropertyEncoder<'a> {
    pub fn new(collection: &'a CollectionSettings) -> Self {
        Self { collection }
    }

    pub fn encode(&self, record: &CanonicalRecord) -> Result<EncodedRecord, SyncError> {
        let mut properties = PropertyMap::new();
        let mut relations = Vec::new();

        let date = if record.kind.is_daily() {
            DateValue::Day(record.date())
        } else {
            DateValue::Instant(record.timestamp)
        };
        properties.insert(
            self.collection.date_property.clone(),
            PropertyValue::Date(date),
        );
        // Inserted after the date so a shared key/date property holds the key form
        properties.insert(
            self.collection.key_property.clone(),
            key_value(self.collection.key_kind, &record.key)?,
        );

        for (metric, value) in &record.metrics {
            let Some(name) = self.collection.property_for(*metric) else {
                continue;
            };
            let encoded = match (metric.property_kind(), value) {
                (PropertyKind::Number, MetricValue::Number(n)) if metric.is_zone() => {
                    units::seconds_to_minutes(Some(*n)).map(PropertyValue::Number)
                }
                (PropertyKind::Number, MetricValue::Number(n)) => Some(PropertyValue::Number(*n)),
                (PropertyKind::Select, MetricValue::Label(s)) => Some(PropertyValue::Select(s.clone())),
                (PropertyKind::Title, MetricValue::Text(s)) => Some(PropertyValue::Title(s.clone())),
                (PropertyKind::Text, MetricValue::Text(s)) => Some(PropertyValue::Text(s.clone())),
                (PropertyKind::Url, MetricValue::Url(s)) => Some(PropertyValue::Url(s.clone())),
                (PropertyKind::Date, MetricValue::DateTime(ts)) => {
                    Some(PropertyValue::Date(DateValue::Instant(*ts)))
                }
                (PropertyKind::Relation, MetricValue::Relation(key)) => {
                    relations.push((name.to_string(), key.clone()));
                    None
                }
                (kind, value) => {
                    debug!(%metric, ?kind, ?value, "metric value does not fit its property kind");
                    None
                }
            };
            if let Some(encoded) = encoded {
                properties.insert(name.to_string(), encoded);
            }
        }

        Ok(EncodedRecord {
            properties,
            relations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityKind, Metric};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn activity() -> CanonicalRecord {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 8)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap();
        let mut record = CanonicalRecord::new(EntityKind::Activity, UniqueKey::Id("123".into()), ts);
        record.set(Metric::ActivityName, Some(MetricValue::Text("Morning Run".into())));
        record.set(Metric::ActivityType, Some(MetricValue::Label("running".into())));
        record.set_number(Metric::DistanceKm, Some(5.0));
        record.set_number(Metric::HrZone2, Some(150.0));
        record.set(
            Metric::ParentActivity,
            Some(MetricValue::Relation(UniqueKey::Id("100".into()))),
        );
        record
    }

    #[test]
    fn test_encode_activity() {
        let collection = CollectionSettings::for_kind(EntityKind::Activity, "db");
        let encoded = PropertyEncoder::new(&collection).encode(&activity()).unwrap();
        let ts = activity().timestamp;

        let mut expected = PropertyMap::new();
        expected.insert("Activity ID".into(), PropertyValue::Number(123.0));
        expected.insert("Date".into(), PropertyValue::Date(DateValue::Instant(ts)));
        expected.insert("Activity Name".into(), PropertyValue::Title("Morning Run".into()));
        expected.insert("Type".into(), PropertyValue::Select("running".into()));
        expected.insert("Distance (km)".into(), PropertyValue::Number(5.0));
        expected.insert("Z2 (min)".into(), PropertyValue::Number(2.5));
        assert_eq!(encoded.properties, expected);
        assert_eq!(
            encoded.relations,
            vec![("Parent Activity".to_string(), UniqueKey::Id("100".into()))]
        );
    }

    #[test]
    fn test_disabled_and_renamed_metrics() {
        let mut collection = CollectionSettings::for_kind(EntityKind::Activity, "db");
        collection.properties.insert(Metric::DistanceKm, String::new());
        collection.properties.insert(Metric::ActivityName, "Name".into());
        let encoded = PropertyEncoder::new(&collection).encode(&activity()).unwrap();
        assert!(!encoded.properties.contains_key("Distance (km)"));
        assert_eq!(
            encoded.properties.get("Name"),
            Some(&PropertyValue::Title("Morning Run".into()))
        );
    }

    #[test]
    fn test_daily_key_is_date() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let mut record = CanonicalRecord::new(
            EntityKind::Weight,
            UniqueKey::Date(day),
            day.and_hms_opt(6, 30, 0).unwrap(),
        );
        record.set_number(Metric::WeightKg, Some(79.2));
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "db");
        let encoded = PropertyEncoder::new(&collection).encode(&record).unwrap();
        assert_eq!(encoded.properties.len(), 2);
        assert_eq!(
            encoded.properties.get("Date"),
            Some(&PropertyValue::Date(DateValue::Day(day)))
        );
        assert_eq!(encoded.properties.get("Weight"), Some(&PropertyValue::Number(79.2)));
    }
}
