//! In-memory source provider
//!
//! Deterministic provider for tests and dry runs. Entities are served most
//! recent first, exactly as configured.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use super::{Capability, FetchWindow, SourceProvider};
use crate::error::SyncError;
use crate::types::{EntityKind, SourceRecord};

/// In-memory source provider
#[derive(Debug, Default)]
pub struct InMemorySource {
    entities: BTreeMap<EntityKind, Vec<SourceRecord>>,
    details: HashMap<(Capability, String), SourceRecord>,
    failing_details: HashMap<(Capability, String), u16>,
    /// Offsets whose page request fails with the given status
    failing_pages: HashMap<(EntityKind, usize), u16>,
    pages_requested: Cell<usize>,
    fetches: Cell<usize>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity summaries for a kind, in provider order (most recent first)
    pub fn with_entities(mut self, kind: EntityKind, entities: Vec<SourceRecord>) -> Self {
        self.entities.insert(kind, entities);
        self
    }

    pub fn with_capability(mut self, capability: Capability, id: &str, payload: SourceRecord) -> Self {
        self.details.insert((capability, id.to_string()), payload);
        self
    }

    pub fn failing_capability(mut self, capability: Capability, id: &str, status: u16) -> Self {
        self.failing_details.insert((capability, id.to_string()), status);
        self
    }

    pub fn failing_page(mut self, kind: EntityKind, offset: usize, status: u16) -> Self {
        self.failing_pages.insert((kind, offset), status);
        self
    }

    /// Number of `list_page` calls served so far
    pub fn pages_requested(&self) -> usize {
        self.pages_requested.get()
    }

    /// Number of `fetch` calls served so far
    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }
}

impl SourceProvider for InMemorySource {
    fn list_page(
        &self,
        kind: EntityKind,
        offset: usize,
        limit: usize,
        _window: &FetchWindow,
    ) -> Result<Vec<SourceRecord>, SyncError> {
        self.pages_requested.set(self.pages_requested.get() + 1);
        if let Some(status) = self.failing_pages.get(&(kind, offset)) {
            return Err(SyncError::http(format!("list {kind}"), *status, "injected failure"));
        }
        let all = self.entities.get(&kind).map(Vec::as_slice).unwrap_or_default();
        Ok(all.iter().skip(offset).take(limit).cloned().collect())
    }

    fn fetch(&self, capability: Capability, id: &str) -> Result<SourceRecord, SyncError> {
        self.fetches.set(self.fetches.get() + 1);
        let key = (capability, id.to_string());
        if let Some(status) = self.failing_details.get(&key) {
            return Err(SyncError::http(capability.as_str(), *status, "injected failure"));
        }
        self.details
            .get(&key)
            .cloned()
            .ok_or_else(|| SyncError::http(capability.as_str(), 404, "not found"))
    }
}
