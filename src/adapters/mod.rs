//! Source provider adapters
//!
//! A [`SourceProvider`] lists entity summaries page by page and answers optional
//! detail requests ([`Capability`]). Detail calls are best-effort: a
//! [`CapabilityChain`] tries alternatives for the same data in priority order and
//! the first non-empty answer wins.

mod garmin;
mod memory;

pub use garmin::{stream_from_details, GarminConnectClient};
pub use memory::InMemorySource;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::debug;

use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::types::{EntityKind, SourceRecord};

/// Optional per-entity detail calls a provider may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ActivityDetail,
    HrTimeInZones,
    PowerTimeInZones,
    HeartRateStream,
    PowerStream,
    CadenceStream,
    /// Keyed by calendar date
    SleepData,
    /// Keyed by calendar date
    HrvData,
    /// Keyed by calendar date
    HrvDailySummary,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ActivityDetail => "activity_detail",
            Capability::HrTimeInZones => "hr_time_in_zones",
            Capability::PowerTimeInZones => "power_time_in_zones",
            Capability::HeartRateStream => "heart_rate_stream",
            Capability::PowerStream => "power_stream",
            Capability::CadenceStream => "cadence_stream",
            Capability::SleepData => "sleep_data",
            Capability::HrvData => "hrv_data",
            Capability::HrvDailySummary => "hrv_daily_summary",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time bounds of the current run, handed to feeds that need them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    /// Local date the run is executing on
    pub today: NaiveDate,
    pub cutoff: NaiveDateTime,
}

/// Trait for source providers
pub trait SourceProvider {
    /// One page of entity summaries, most recent first
    fn list_page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
        window: &FetchWindow,
    ) -> Result<Vec<SourceRecord>, SyncError>;

    /// Optional detail data for one entity. Unsupported capabilities return
    /// [`SyncError::Unsupported`].
    fn fetch(&self, capability: Capability, id: &str) -> Result<SourceRecord, SyncError>;
}

/// Prioritized alternatives for one data need
#[derive(Debug, Clone)]
pub struct CapabilityChain {
    need: &'static str,
    capabilities: Vec<Capability>,
}

impl CapabilityChain {
    pub fn new(need: &'static str, capabilities: &[Capability]) -> Self {
        Self {
            need,
            capabilities: capabilities.to_vec(),
        }
    }

    /// First capability that answers with a non-empty payload.
    ///
    /// Transient failures are retried per `retry`; anything else falls through to
    /// the next capability.
    pub fn first(
        &self,
        provider: &dyn SourceProvider,
        retry: &RetryPolicy,
        id: &str,
    ) -> Option<(Capability, SourceRecord)> {
        self.first_with(provider, retry, id, |capability, payload| Some((capability, payload)))
    }

    /// First capability whose non-empty payload `accept` turns into a value.
    /// A payload `accept` rejects falls through like a failed call.
    pub fn first_with<T>(
        &self,
        provider: &dyn SourceProvider,
        retry: &RetryPolicy,
        id: &str,
        mut accept: impl FnMut(Capability, SourceRecord) -> Option<T>,
    ) -> Option<T> {
        for capability in &self.capabilities {
            let operation = format!("{capability} {id}");
            match retry.run(&operation, || provider.fetch(*capability, id)) {
                Ok(payload) if !is_empty_payload(&payload) => {
                    if let Some(value) = accept(*capability, payload) {
                        return Some(value);
                    }
                    debug!(need = self.need, %capability, id, "capability payload unusable");
                }
                Ok(_) => {
                    debug!(need = self.need, %capability, id, "capability returned no data");
                }
                Err(err) => {
                    debug!(need = self.need, %capability, id, error = %err, "capability failed");
                }
            }
        }
        None
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
