//! Synheart Sync - Idempotent batch sync of wearable data into a keyed destination store
//!
//! Each run walks one entity kind through a deterministic pipeline:
//! window discovery → normalization → derived metrics → delta resolution → keyed upsert.
//!
//! ## Modules
//!
//! - **Source**: [`adapters`] pages the provider feed and fetches optional details
//! - **Normalization**: [`schema`], [`normalizer`], [`zones`] and [`features`] turn
//!   inconsistent provider payloads into a closed canonical metric set
//! - **Destination**: [`destination`], [`encoder`], [`delta`] and [`upsert`] write one
//!   record per unique key
//! - **Orchestration**: [`pipeline::SyncEngine`] drives a run and reports a [`RunSummary`]

pub mod adapters;
pub mod config;
pub mod delta;
pub mod destination;
pub mod encoder;
pub mod error;
pub mod features;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod normalizer;
pub mod pipeline;
pub mod retry;
pub mod schema;
pub mod types;
pub mod units;
pub mod upsert;
pub mod zones;

pub use config::SyncConfig;
pub use error::SyncError;
pub use pipeline::SyncEngine;
pub use types::{CanonicalRecord, EntityKind, EntityOutcome, Metric, RunSummary, UniqueKey};

// Adapter exports
pub use adapters::{GarminConnectClient, InMemorySource, SourceProvider};
pub use destination::{DestinationStore, InMemoryStore, NotionStore};

/// Crate version, sent in the user agent of every remote call
pub const SYNC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for remote calls and CLI reports
pub const PRODUCER_NAME: &str = "synheart-sync";
