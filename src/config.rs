//! Sync configuration
//!
//! One immutable [`SyncConfig`] is built at process start (usually from a TOML
//! file) and passed by reference to every component. Nothing below the binary
//! reads the process environment.

use chrono::{Duration as ChronoDuration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;
use crate::types::{EntityKind, Metric};
use crate::zones::{ZoneThresholds, DEFAULT_HR_ZONES, DEFAULT_POWER_ZONES};

/// Complete run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub zones: ZoneSettings,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub destination: DestinationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub collections: BTreeMap<EntityKind, CollectionSettings>,
}

/// Look-back window and pagination bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pagination stops once the accumulated offset reaches this bound
    #[serde(default = "default_max_offset")]
    pub max_offset: usize,
    /// Offset of the user's local time from UTC, in hours
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// How far back the delta lookup searches for a previous record
    #[serde(default = "default_delta_lookback_days")]
    pub delta_lookback_days: u32,
}

fn default_lookback_days() -> u32 {
    30
}

fn default_page_size() -> usize {
    20
}

fn default_max_offset() -> usize {
    1000
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_delta_lookback_days() -> u32 {
    90
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            page_size: default_page_size(),
            max_offset: default_max_offset(),
            utc_offset_hours: default_utc_offset_hours(),
            delta_lookback_days: default_delta_lookback_days(),
        }
    }
}

impl WindowSettings {
    pub fn offset(&self) -> Result<FixedOffset, SyncError> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            SyncError::Config(format!("utc_offset_hours out of range: {}", self.utc_offset_hours))
        })
    }

    pub fn lookback(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.lookback_days))
    }

    pub fn delta_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(i64::from(self.delta_lookback_days))
    }
}

/// Retry and pacing policy for remote calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Fixed delay before every destination call
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_min_request_interval_ms() -> u64 {
    350
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            min_request_interval_ms: default_min_request_interval_ms(),
        }
    }
}

impl RetrySettings {
    /// No waiting at all; used by tests and dry runs
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            min_request_interval_ms: 0,
            ..Self::default()
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

/// Zone upper bounds, run-level rather than per entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSettings {
    #[serde(default = "default_hr_zones")]
    pub heart_rate: ZoneThresholds,
    #[serde(default = "default_power_zones")]
    pub power: ZoneThresholds,
}

fn default_hr_zones() -> ZoneThresholds {
    DEFAULT_HR_ZONES
}

fn default_power_zones() -> ZoneThresholds {
    DEFAULT_POWER_ZONES
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            heart_rate: DEFAULT_HR_ZONES,
            power: DEFAULT_POWER_ZONES,
        }
    }
}

/// Source provider endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    /// Public web page of an activity; the activity id is appended
    #[serde(default = "default_activity_web_url")]
    pub activity_web_url: String,
    /// Account display name, required by the daily sleep endpoint
    #[serde(default)]
    pub display_name: String,
    /// Environment variable holding the bearer token (read by the binary only)
    #[serde(default = "default_source_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_source_base_url() -> String {
    "https://connectapi.garmin.com".to_string()
}

fn default_activity_web_url() -> String {
    "https://connect.garmin.com/modern/activity/".to_string()
}

fn default_source_token_env() -> String {
    "GARMIN_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            activity_web_url: default_activity_web_url(),
            display_name: String::new(),
            token_env: default_source_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Destination store endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default = "default_destination_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_destination_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_destination_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

fn default_api_version() -> String {
    "2022-06-28".to_string()
}

fn default_destination_token_env() -> String {
    "NOTION_TOKEN".to_string()
}

impl Default for DestinationSettings {
    fn default() -> Self {
        Self {
            base_url: default_destination_base_url(),
            api_version: default_api_version(),
            token_env: default_destination_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// How the unique key is stored in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Number,
    Text,
    Title,
    Date,
}

/// One destination collection (database) per entity kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSettings {
    pub database_id: String,
    pub key_property: String,
    pub key_kind: KeyKind,
    /// Property holding the entity's date; also used by delta lookups
    #[serde(default = "default_date_property")]
    pub date_property: String,
    /// Canonical metric to destination property name overrides. An empty name
    /// disables the metric.
    #[serde(default)]
    pub properties: BTreeMap<Metric, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_date_property() -> String {
    "Date".to_string()
}

fn default_enabled() -> bool {
    true
}

impl CollectionSettings {
    /// Defaults matching the column names of the reference databases
    pub fn for_kind(kind: EntityKind, database_id: impl Into<String>) -> Self {
        let (key_property, key_kind) = match kind {
            EntityKind::Activity => ("Activity ID", KeyKind::Number),
            EntityKind::Sleep | EntityKind::Weight => ("Date", KeyKind::Date),
        };
        Self {
            database_id: database_id.into(),
            key_property: key_property.to_string(),
            key_kind,
            date_property: default_date_property(),
            properties: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Destination property for a metric, `None` when disabled
    pub fn property_for(&self, metric: Metric) -> Option<&str> {
        let name = self
            .properties
            .get(&metric)
            .map(String::as_str)
            .unwrap_or_else(|| metric.default_property());
        (!name.trim().is_empty()).then_some(name)
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = toml::from_str(content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.window.page_size == 0 {
            return Err(SyncError::Config("window.page_size must be positive".into()));
        }
        if self.window.lookback_days == 0 {
            return Err(SyncError::Config("window.lookback_days must be positive".into()));
        }
        self.window.offset()?;
        if self.retry.max_attempts == 0 {
            return Err(SyncError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(SyncError::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        self.zones.heart_rate.validate("heart_rate")?;
        self.zones.power.validate("power")?;
        for (kind, collection) in self.enabled_collections() {
            if collection.database_id.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "collections.{kind}.database_id is empty"
                )));
            }
            if collection.key_property.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "collections.{kind}.key_property is empty"
                )));
            }
            if kind.is_daily() && collection.key_kind != KeyKind::Date {
                return Err(SyncError::Config(format!(
                    "collections.{kind}.key_kind must be \"date\" for daily aggregates"
                )));
            }
        }
        Ok(())
    }

    pub fn collection(&self, kind: EntityKind) -> Result<&CollectionSettings, SyncError> {
        self.collections
            .get(&kind)
            .filter(|c| c.enabled)
            .ok_or_else(|| SyncError::Config(format!("no enabled collection for {kind}")))
    }

    pub fn enabled_collections(&self) -> impl Iterator<Item = (EntityKind, &CollectionSettings)> {
        self.collections
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(kind, c)| (*kind, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        [window]
        lookback_days = 14
        page_size = 50

        [retry]
        max_attempts = 3

        [zones]
        heart_rate = [110, 130, 150, 165, 190]

        [collections.activity]
        database_id = "act-db"
        key_property = "Activity ID"
        key_kind = "number"

        [collections.activity.properties]
        distance_km = "Distance"
        calories = ""

        [collections.weight]
        database_id = "weight-db"
        key_property = "Date"
        key_kind = "date"
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config = SyncConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.window.lookback_days, 14);
        assert_eq!(config.window.page_size, 50);
        assert_eq!(config.window.max_offset, 1000);
        assert_eq!(config.window.utc_offset_hours, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_delay_ms, 8_000);
        assert_eq!(config.zones.heart_rate.0, [110.0, 130.0, 150.0, 165.0, 190.0]);
        assert_eq!(config.zones.power, DEFAULT_POWER_ZONES);
        assert_eq!(config.destination.api_version, "2022-06-28");
        assert_eq!(config.enabled_collections().count(), 2);
    }

    #[test]
    fn test_property_overrides() {
        let config = SyncConfig::from_toml(SAMPLE).unwrap();
        let activity = config.collection(EntityKind::Activity).unwrap();
        assert_eq!(activity.property_for(Metric::DistanceKm), Some("Distance"));
        assert_eq!(activity.property_for(Metric::Calories), None);
        assert_eq!(activity.property_for(Metric::AvgHr), Some("Avg HR"));
        assert_eq!(activity.date_property, "Date");
        assert!(config.collection(EntityKind::Sleep).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SyncConfig::from_toml(SAMPLE).unwrap();
        config.window.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::from_toml(SAMPLE).unwrap();
        config.zones.power = ZoneThresholds([5.0, 4.0, 3.0, 2.0, 1.0]);
        assert!(config.validate().is_err());

        let mut config = SyncConfig::from_toml(SAMPLE).unwrap();
        config
            .collections
            .insert(EntityKind::Sleep, CollectionSettings::for_kind(EntityKind::Sleep, " "));
        assert!(config.validate().is_err());

        let mut config = SyncConfig::from_toml(SAMPLE).unwrap();
        let mut weight = CollectionSettings::for_kind(EntityKind::Weight, "w");
        weight.key_kind = KeyKind::Text;
        config.collections.insert(EntityKind::Weight, weight);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            SyncConfig::from_toml("window = 3"),
            Err(SyncError::Config(_))
        ));
    }
}
