//! Change-since-previous-record metrics
//!
//! A delta is a function of destination state: the current value minus the
//! value of the most recent record dated strictly before the current one,
//! looking back a bounded number of days.

use chrono::{Duration as ChronoDuration, NaiveDate};
use tracing::debug;

use crate::config::CollectionSettings;
use crate::destination::{DestinationStore, PriorQuery};
use crate::error::SyncError;
use crate::retry::{RetryPolicy, Throttle};
use crate::types::{CanonicalRecord, Metric};
use crate::units::round_to;

/// Resolves delta metrics against a destination store
pub struct DeltaResolver<'a> {
    store: &'a dyn DestinationStore,
    retry: RetryPolicy,
    throttle: Throttle,
    lookback: ChronoDuration,
}

impl<'a> DeltaResolver<'a> {
    pub fn new(
        store: &'a dyn DestinationStore,
        retry: RetryPolicy,
        throttle: Throttle,
        lookback: ChronoDuration,
    ) -> Self {
        Self {
            store,
            retry,
            throttle,
            lookback,
        }
    }

    /// `current - previous` rounded to 2 decimals, or `None` when no prior
    /// record in the look-back bound carries `metric`
    pub fn resolve_delta(
        &self,
        collection: &CollectionSettings,
        metric: Metric,
        date: NaiveDate,
        current: f64,
    ) -> Result<Option<f64>, SyncError> {
        let Some(value_property) = collection.property_for(metric) else {
            return Ok(None);
        };
        let not_before = date.checked_sub_signed(self.lookback).unwrap_or(NaiveDate::MIN);
        let query = PriorQuery {
            date_property: collection.date_property.clone(),
            value_property: value_property.to_string(),
            before: date,
            not_before,
        };
        let prior = self.retry.run("latest_before", || {
            self.throttle.wait();
            self.store.latest_before(&collection.database_id, &query)
        })?;

        let previous = prior.as_ref().and_then(|record| record.number(value_property));
        debug!(
            %metric,
            %date,
            prior_id = prior.as_ref().map(|r| r.id.as_str()),
            previous,
            "delta lookup"
        );
        Ok(previous.map(|previous| round_to(current - previous, 2)))
    }

    /// Fill every delta metric of the record's kind. A value resolved from the
    /// destination replaces any source-reported change; otherwise the record is
    /// left as the normalizer produced it.
    pub fn apply(
        &self,
        collection: &CollectionSettings,
        record: &mut CanonicalRecord,
    ) -> Result<(), SyncError> {
        for (value_metric, delta_metric) in record.kind.delta_metrics() {
            let Some(current) = record.number(*value_metric) else {
                continue;
            };
            if let Some(delta) = self.resolve_delta(collection, *value_metric, record.date(), current)? {
                record.set_number(*delta_metric, Some(delta));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{DateValue, InMemoryStore, PropertyMap, PropertyValue, StoreOp};
    use crate::types::{EntityKind, UniqueKey};
    use std::time::Duration;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn weigh_in(store: &InMemoryStore, date: NaiveDate, kg: f64) {
        let mut properties = PropertyMap::new();
        properties.insert("Date".into(), PropertyValue::Date(DateValue::Day(date)));
        properties.insert("Weight".into(), PropertyValue::Number(kg));
        store.insert("weights", properties);
    }

    fn resolver(store: &InMemoryStore) -> DeltaResolver<'_> {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };
        DeltaResolver::new(store, retry, Throttle::default(), ChronoDuration::days(90))
    }

    #[test]
    fn test_delta_against_prior_record() {
        let store = InMemoryStore::new();
        weigh_in(&store, day(1, 1), 80.0);
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "weights");
        let delta = resolver(&store)
            .resolve_delta(&collection, Metric::WeightKg, day(1, 8), 79.2)
            .unwrap();
        assert_eq!(delta, Some(-0.8));
    }

    #[test]
    fn test_most_recent_prior_wins_and_same_day_ignored() {
        let store = InMemoryStore::new();
        weigh_in(&store, day(1, 1), 80.0);
        weigh_in(&store, day(1, 5), 79.5);
        weigh_in(&store, day(1, 8), 70.0);
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "weights");
        let delta = resolver(&store)
            .resolve_delta(&collection, Metric::WeightKg, day(1, 8), 79.2)
            .unwrap();
        assert_eq!(delta, Some(-0.3));
    }

    #[test]
    fn test_no_prior_within_lookback() {
        let store = InMemoryStore::new();
        weigh_in(&store, day(1, 1), 80.0);
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "weights");
        let delta = resolver(&store)
            .resolve_delta(&collection, Metric::WeightKg, day(6, 1), 79.2)
            .unwrap();
        assert_eq!(delta, None);
    }

    #[test]
    fn test_apply_keeps_source_change_without_prior() {
        let store = InMemoryStore::new();
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "weights");
        let mut record = CanonicalRecord::new(
            EntityKind::Weight,
            UniqueKey::Date(day(1, 8)),
            day(1, 8).and_hms_opt(0, 0, 0).unwrap(),
        );
        record.set_number(Metric::WeightKg, Some(79.2));
        record.set_number(Metric::WeightChangeKg, Some(-0.5));
        resolver(&store).apply(&collection, &mut record).unwrap();
        assert_eq!(record.number(Metric::WeightChangeKg), Some(-0.5));

        weigh_in(&store, day(1, 1), 80.0);
        resolver(&store).apply(&collection, &mut record).unwrap();
        assert_eq!(record.number(Metric::WeightChangeKg), Some(-0.8));
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let store = InMemoryStore::new();
        store.fail_next(StoreOp::LatestBefore, 401, 1);
        let collection = CollectionSettings::for_kind(EntityKind::Weight, "weights");
        let result = resolver(&store).resolve_delta(&collection, Metric::WeightKg, day(1, 8), 79.2);
        assert!(matches!(result, Err(SyncError::Http { status: 401, .. })));
    }
}
