//! Sync a canned activity feed into an in-memory store, twice

use serde_json::json;
use synheart_sync::adapters::{Capability, InMemorySource};
use synheart_sync::config::{CollectionSettings, RetrySettings, SyncConfig};
use synheart_sync::destination::InMemoryStore;
use synheart_sync::{EntityKind, SyncEngine};

fn main() {
    let mut config = SyncConfig {
        retry: RetrySettings::immediate(),
        ..SyncConfig::default()
    };
    config.collections.insert(
        EntityKind::Activity,
        CollectionSettings::for_kind(EntityKind::Activity, "activities"),
    );

    let source = InMemorySource::new()
        .with_entities(
            EntityKind::Activity,
            vec![
                json!({ "activityId": 123, "activityName": "Morning Run", "startTimeLocal": "2024-01-15 07:00:00", "distance": 5000.0, "duration": 1500.0, "averageSpeed": 3.33 }),
                json!({ "activityId": 122, "startTimeLocal": "2024-01-14 18:30:00", "distance": 20000.0, "duration": 2400.0, "activityType": { "typeKey": "cycling" } }),
            ],
        )
        .with_capability(Capability::PowerStream, "122", json!([180, 0, 220, null, 260, 310]));
    let store = InMemoryStore::new();

    let engine = match SyncEngine::new(&config, &source, &store) {
        Ok(engine) => engine,
        Err(e) => return eprintln!("Error: {e}"),
    };
    let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 16).and_then(|d| d.and_hms_opt(9, 0, 0));
    let Some(now) = now else { return };

    for pass in 1..=2 {
        match engine.run_at(EntityKind::Activity, now) {
            Ok(summary) => println!(
                "pass {pass}: created={} updated={} skipped={} failed={}",
                summary.created, summary.updated, summary.skipped, summary.failed
            ),
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    for record in store.records("activities") {
        match serde_json::to_string_pretty(&record.properties) {
            Ok(properties) => println!("{}\n{properties}", record.id),
            Err(e) => eprintln!("Error: {e}"),
        }
    }
}
