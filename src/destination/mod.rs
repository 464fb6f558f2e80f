//! Destination store adapters
//!
//! A destination is a set of collections (one per entity kind) of records with
//! typed, named properties. Records are located by a key property; the store
//! assigns record ids.

mod memory;
mod notion;

pub use memory::{InMemoryStore, StoreOp};
pub use notion::NotionStore;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::KeyKind;
use crate::error::SyncError;
use crate::types::UniqueKey;

/// Property name to value
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A calendar day or a local instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateValue {
    Day(NaiveDate),
    Instant(NaiveDateTime),
}

impl DateValue {
    pub fn date(&self) -> NaiveDate {
        match self {
            DateValue::Day(day) => *day,
            DateValue::Instant(ts) => ts.date(),
        }
    }

    /// Days sort as their midnight
    pub fn sort_key(&self) -> NaiveDateTime {
        match self {
            DateValue::Day(day) => day.and_time(chrono::NaiveTime::MIN),
            DateValue::Instant(ts) => *ts,
        }
    }
}

/// Typed destination property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PropertyValue {
    Number(f64),
    Select(String),
    Date(DateValue),
    Text(String),
    Title(String),
    Url(String),
    /// Ids of related records
    Relation(Vec<String>),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateValue> {
        match self {
            PropertyValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub id: String,
    pub properties: PropertyMap,
}

impl DestinationRecord {
    pub fn number(&self, property: &str) -> Option<f64> {
        self.properties.get(property).and_then(PropertyValue::as_number)
    }

    pub fn date(&self, property: &str) -> Option<DateValue> {
        self.properties.get(property).and_then(PropertyValue::as_date)
    }
}

/// Equality filter on a collection's key property
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub property: String,
    pub value: PropertyValue,
}

impl KeyFilter {
    pub fn new(property: &str, kind: KeyKind, key: &UniqueKey) -> Result<Self, SyncError> {
        Ok(Self {
            property: property.to_string(),
            value: key_value(kind, key)?,
        })
    }

    /// Whether a stored property value equals the filter value
    pub fn matches(&self, stored: &PropertyValue) -> bool {
        match (&self.value, stored) {
            (PropertyValue::Number(a), PropertyValue::Number(b)) => a == b,
            (PropertyValue::Date(a), PropertyValue::Date(b)) => a.date() == b.date(),
            (PropertyValue::Title(a), PropertyValue::Title(b))
            | (PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

/// Most recent record whose date falls in `[not_before, before)` and which
/// carries `value_property`
#[derive(Debug, Clone, PartialEq)]
pub struct PriorQuery {
    pub date_property: String,
    pub value_property: String,
    pub before: NaiveDate,
    pub not_before: NaiveDate,
}

impl PriorQuery {
    pub fn admits(&self, record: &DestinationRecord) -> bool {
        let in_range = record
            .date(&self.date_property)
            .map(|d| d.date() < self.before && d.date() >= self.not_before)
            .unwrap_or(false);
        in_range && record.number(&self.value_property).is_some()
    }
}

/// Key property value for a unique key
pub fn key_value(kind: KeyKind, key: &UniqueKey) -> Result<PropertyValue, SyncError> {
    match (kind, key) {
        (KeyKind::Number, UniqueKey::Id(id)) => id
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(PropertyValue::Number)
            .ok_or_else(|| SyncError::Config(format!("key {id} is not numeric"))),
        (KeyKind::Text, key) => Ok(PropertyValue::Text(key.to_string())),
        (KeyKind::Title, key) => Ok(PropertyValue::Title(key.to_string())),
        (KeyKind::Date, UniqueKey::Date(day)) => Ok(PropertyValue::Date(DateValue::Day(*day))),
        (KeyKind::Date, UniqueKey::Id(id)) => Err(SyncError::Config(format!(
            "key {id} cannot be stored in a date property"
        ))),
        (KeyKind::Number, UniqueKey::Date(day)) => Err(SyncError::Config(format!(
            "key {day} cannot be stored in a number property"
        ))),
    }
}

/// Trait for destination stores
pub trait DestinationStore {
    /// At most one record whose key property equals the filter
    fn query_by_key(
        &self,
        database_id: &str,
        filter: &KeyFilter,
    ) -> Result<Option<DestinationRecord>, SyncError>;

    /// Most recent record admitted by `query`
    fn latest_before(
        &self,
        database_id: &str,
        query: &PriorQuery,
    ) -> Result<Option<DestinationRecord>, SyncError>;

    /// Create a record, returning its store-assigned id
    fn create_record(&self, database_id: &str, properties: &PropertyMap) -> Result<String, SyncError>;

    /// Overwrite the given properties of an existing record
    fn patch_record(&self, record_id: &str, properties: &PropertyMap) -> Result<(), SyncError>;
}
