//! Bounded window discovery
//!
//! Pages through a source feed (most recent first) until a page's oldest entity
//! falls before the run cutoff, a page comes back empty, or the offset passes the
//! configured safety bound. The result is a superset of the in-window entities;
//! exact cutoff filtering happens per entity in the pipeline.

use chrono::{FixedOffset, NaiveDateTime};
use serde_json::json;
use tracing::{debug, warn};

use crate::adapters::{FetchWindow, SourceProvider};
use crate::config::WindowSettings;
use crate::error::SyncError;
use crate::retry::RetryPolicy;
use crate::schema::EntityCatalog;
use crate::types::{EntityKind, MetricValue, SourceRecord};

/// Whether a timestamp is inside the run window. Daily kinds compare whole
/// calendar dates; other kinds compare local instants.
pub fn within_window(kind: EntityKind, timestamp: NaiveDateTime, cutoff: NaiveDateTime) -> bool {
    if kind.is_daily() {
        timestamp.date() >= cutoff.date()
    } else {
        timestamp >= cutoff
    }
}

/// Local timestamp of a raw feed entry
pub fn summary_timestamp(
    catalog: &EntityCatalog,
    summary: &SourceRecord,
    offset: &FixedOffset,
) -> Option<NaiveDateTime> {
    let wrapped = json!({ "summary": summary });
    match catalog.timestamp.extract(&wrapped, offset)? {
        MetricValue::DateTime(ts) => Some(ts),
        _ => None,
    }
}

/// Pages a feed back to the run cutoff
pub struct WindowFetcher<'a> {
    source: &'a dyn SourceProvider,
    retry: RetryPolicy,
    page_size: usize,
    max_offset: usize,
    offset: FixedOffset,
}

impl<'a> WindowFetcher<'a> {
    pub fn new(
        source: &'a dyn SourceProvider,
        retry: RetryPolicy,
        settings: &WindowSettings,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            retry,
            page_size: settings.page_size.max(1),
            max_offset: settings.max_offset,
            offset,
        }
    }

    /// Feed entries down to the first page that reaches past the cutoff.
    ///
    /// A failure on the first page fails the run. A failure on a later page
    /// ends pagination with what has been collected so far.
    pub fn fetch(
        &self,
        kind: EntityKind,
        window: &FetchWindow,
    ) -> Result<Vec<SourceRecord>, SyncError> {
        let catalog = EntityCatalog::for_kind(kind);
        let mut collected = Vec::new();
        let mut offset = 0usize;
        let mut pages = 0usize;

        loop {
            let operation = format!("list {kind} @{offset}");
            let page = match self.retry.run(&operation, || {
                self.source.list_page(kind, offset, self.page_size, window)
            }) {
                Ok(page) => page,
                Err(err) if pages == 0 => return Err(SyncError::WindowFetch(Box::new(err))),
                Err(err) => {
                    warn!(%kind, offset, error = %err, "page fetch failed, ending pagination");
                    break;
                }
            };
            pages += 1;

            if page.is_empty() {
                debug!(%kind, offset, "empty page");
                break;
            }
            let oldest = page
                .iter()
                .filter_map(|entry| summary_timestamp(&catalog, entry, &self.offset))
                .min();
            let len = page.len();
            collected.extend(page);

            if let Some(oldest) = oldest {
                if !within_window(kind, oldest, window.cutoff) {
                    debug!(%kind, offset, %oldest, "page reaches past cutoff");
                    break;
                }
            }
            offset += self.page_size;
            if offset >= self.max_offset {
                warn!(%kind, offset, max_offset = self.max_offset, "pagination safety bound reached");
                break;
            }
            debug!(%kind, offset, len, "page in window, continuing");
        }

        debug!(%kind, pages, entities = collected.len(), "window fetched");
        Ok(collected)
    }
}
