//! Run orchestration
//!
//! One run over one entity kind:
//! 1. cutoff = now - look-back
//! 2. WindowFetcher pages the feed back to the cutoff
//! 3. per entry, in feed order: identify, window and duplicate checks,
//!    EntityNormalizer, DeltaResolver (kinds with delta metrics), encode, upsert
//! 4. every entry ends as one outcome in the [`RunSummary`]
//!
//! Only window discovery failures abort a run; anything that goes wrong with a
//! single entity is recorded and the run continues.

use chrono::{FixedOffset, NaiveDateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::adapters::{FetchWindow, SourceProvider};
use crate::config::{CollectionSettings, SyncConfig};
use crate::delta::DeltaResolver;
use crate::destination::DestinationStore;
use crate::encoder::PropertyEncoder;
use crate::error::SyncError;
use crate::fetcher::{within_window, WindowFetcher};
use crate::normalizer::EntityNormalizer;
use crate::retry::{RetryPolicy, Throttle};
use crate::types::{EntityKind, EntityOutcome, RunSummary, SkipReason, SourceRecord, UniqueKey};
use crate::upsert::{UpsertClient, UpsertOutcome};

/// Source-to-destination sync engine
pub struct SyncEngine<'a> {
    config: &'a SyncConfig,
    source: &'a dyn SourceProvider,
    store: &'a dyn DestinationStore,
    retry: RetryPolicy,
    throttle: Throttle,
    offset: FixedOffset,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        config: &'a SyncConfig,
        source: &'a dyn SourceProvider,
        store: &'a dyn DestinationStore,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            config,
            source,
            store,
            retry: RetryPolicy::from_settings(&config.retry),
            throttle: Throttle::new(config.retry.min_request_interval()),
            offset: config.window.offset()?,
        })
    }

    /// Current local wall-clock time at the configured offset
    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    /// Run one entity kind now
    pub fn run(&self, kind: EntityKind) -> Result<RunSummary, SyncError> {
        self.run_at(kind, self.local_now())
    }

    /// Run every enabled collection now. A fatal error in one kind does not
    /// stop the others.
    pub fn run_enabled(&self) -> Vec<(EntityKind, Result<RunSummary, SyncError>)> {
        let now = self.local_now();
        self.config
            .enabled_collections()
            .map(|(kind, _)| (kind, self.run_at(kind, now)))
            .collect()
    }

    /// Run one entity kind as if the local time were `now`
    pub fn run_at(&self, kind: EntityKind, now: NaiveDateTime) -> Result<RunSummary, SyncError> {
        let collection = self.config.collection(kind)?;
        let cutoff = now
            .checked_sub_signed(self.config.window.lookback())
            .ok_or_else(|| SyncError::Config(format!("cutoff before {now} is out of range")))?;
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("sync_run", run_id = %run_id, kind = %kind);
        let _guard = span.enter();
        info!(%now, %cutoff, database_id = %collection.database_id, "run started");

        let window = FetchWindow {
            today: now.date(),
            cutoff,
        };
        let fetcher = WindowFetcher::new(self.source, self.retry, &self.config.window, self.offset);
        let summaries = fetcher.fetch(kind, &window)?;

        let mut summary = RunSummary::new(run_id, kind, cutoff);
        summary.candidates = summaries.len();

        let stages = Stages {
            kind,
            normalizer: EntityNormalizer::new(
                kind,
                self.source,
                self.retry,
                self.offset,
                &self.config.zones,
                &self.config.source.activity_web_url,
            ),
            delta: DeltaResolver::new(
                self.store,
                self.retry,
                self.throttle,
                self.config.window.delta_lookback(),
            ),
            encoder: PropertyEncoder::new(collection),
            upsert: UpsertClient::new(self.store, self.retry, self.throttle),
            collection,
        };

        let mut seen = HashSet::new();
        for entry in &summaries {
            let outcome = stages.process(entry, cutoff, &mut seen);
            log_outcome(&outcome);
            summary.record(outcome);
        }

        info!(
            candidates = summary.candidates,
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            "run finished"
        );
        Ok(summary)
    }
}

/// Per-run collaborators for one kind
struct Stages<'a> {
    kind: EntityKind,
    normalizer: EntityNormalizer<'a>,
    delta: DeltaResolver<'a>,
    encoder: PropertyEncoder<'a>,
    upsert: UpsertClient<'a>,
    collection: &'a CollectionSettings,
}

impl Stages<'_> {
    fn process(
        &self,
        entry: &SourceRecord,
        cutoff: NaiveDateTime,
        seen: &mut HashSet<UniqueKey>,
    ) -> EntityOutcome {
        let skipped = |key: Option<UniqueKey>, reason| EntityOutcome::Skipped { key, reason };

        let (key, timestamp) = match self.normalizer.identify(entry) {
            Ok(identified) => identified,
            Err(skip) => return skipped(skip.key, skip.reason),
        };
        if !within_window(self.kind, timestamp, cutoff) {
            return skipped(Some(key), SkipReason::OutsideWindow);
        }
        if !seen.insert(key.clone()) {
            return skipped(Some(key), SkipReason::DuplicateKey);
        }

        let mut record = match self.normalizer.normalize(entry, key.clone(), timestamp) {
            Ok(record) => record,
            Err(skip) => return skipped(skip.key, skip.reason),
        };
        let failed = |key: UniqueKey, err: SyncError| EntityOutcome::Failed {
            key,
            error: err.to_string(),
        };
        if !self.kind.delta_metrics().is_empty() {
            if let Err(err) = self.delta.apply(self.collection, &mut record) {
                return failed(key, err);
            }
        }
        let encoded = match self.encoder.encode(&record) {
            Ok(encoded) => encoded,
            Err(err) => return failed(key, err),
        };
        match self.upsert.upsert(self.collection, &key, encoded) {
            Ok(UpsertOutcome::Created(record_id)) => EntityOutcome::Created { key, record_id },
            Ok(UpsertOutcome::Updated(record_id)) => EntityOutcome::Updated { key, record_id },
            Err(err) => failed(key, err),
        }
    }
}

fn log_outcome(outcome: &EntityOutcome) {
    match outcome {
        EntityOutcome::Created { key, record_id } => info!(%key, record_id, "created"),
        EntityOutcome::Updated { key, record_id } => info!(%key, record_id, "updated"),
        EntityOutcome::Skipped { key, reason } => {
            debug!(key = key.as_ref().map(ToString::to_string), ?reason, "skipped")
        }
        EntityOutcome::Failed { key, error } => warn!(%key, error, "failed"),
    }
}
