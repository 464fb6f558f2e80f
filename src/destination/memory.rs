//! In-memory destination store

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{DestinationRecord, DestinationStore, KeyFilter, PriorQuery, PropertyMap};
use crate::error::SyncError;

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Query,
    LatestBefore,
    Create,
    Patch,
}

impl StoreOp {
    fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Query => "query",
            StoreOp::LatestBefore => "latest_before",
            StoreOp::Create => "create",
            StoreOp::Patch => "patch",
        }
    }
}

#[derive(Debug)]
struct InjectedFailure {
    op: StoreOp,
    status: u16,
    remaining: usize,
}

/// Destination store backed by process memory, with store-assigned UUID ids
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Records per database id, in creation order
    databases: RefCell<BTreeMap<String, Vec<DestinationRecord>>>,
    failures: RefCell<Vec<InjectedFailure>>,
    writes: Cell<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` with HTTP `status`
    pub fn fail_next(&self, op: StoreOp, status: u16, times: usize) {
        self.failures.borrow_mut().push(InjectedFailure {
            op,
            status,
            remaining: times,
        });
    }

    /// Seed a record without counting it as a write
    pub fn insert(&self, database_id: &str, properties: PropertyMap) -> String {
        let id = Uuid::new_v4().to_string();
        self.databases
            .borrow_mut()
            .entry(database_id.to_string())
            .or_default()
            .push(DestinationRecord {
                id: id.clone(),
                properties,
            });
        id
    }

    pub fn records(&self, database_id: &str) -> Vec<DestinationRecord> {
        self.databases
            .borrow()
            .get(database_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Successful creates plus patches
    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    fn check(&self, op: StoreOp) -> Result<(), SyncError> {
        let mut failures = self.failures.borrow_mut();
        if let Some(failure) = failures
            .iter_mut()
            .find(|f| f.op == op && f.remaining > 0)
        {
            failure.remaining -= 1;
            return Err(SyncError::http(op.as_str(), failure.status, "injected failure"));
        }
        Ok(())
    }
}

impl DestinationStore for InMemoryStore {
    fn query_by_key(
        &self,
        database_id: &str,
        filter: &KeyFilter,
    ) -> Result<Option<DestinationRecord>, SyncError> {
        self.check(StoreOp::Query)?;
        let databases = self.databases.borrow();
        Ok(databases.get(database_id).and_then(|records| {
            records
                .iter()
                .find(|r| {
                    r.properties
                        .get(&filter.property)
                        .map(|stored| filter.matches(stored))
                        .unwrap_or(false)
                })
                .cloned()
        }))
    }

    fn latest_before(
        &self,
        database_id: &str,
        query: &PriorQuery,
    ) -> Result<Option<DestinationRecord>, SyncError> {
        self.check(StoreOp::LatestBefore)?;
        let databases = self.databases.borrow();
        Ok(databases.get(database_id).and_then(|records| {
            records
                .iter()
                .filter(|r| query.admits(r))
                .max_by_key(|r| r.date(&query.date_property).map(|d| d.sort_key()))
                .cloned()
        }))
    }

    fn create_record(&self, database_id: &str, properties: &PropertyMap) -> Result<String, SyncError> {
        self.check(StoreOp::Create)?;
        let id = self.insert(database_id, properties.clone());
        self.writes.set(self.writes.get() + 1);
        Ok(id)
    }

    fn patch_record(&self, record_id: &str, properties: &PropertyMap) -> Result<(), SyncError> {
        self.check(StoreOp::Patch)?;
        let mut databases = self.databases.borrow_mut();
        let record = databases
            .values_mut()
            .flat_map(|records| records.iter_mut())
            .find(|r| r.id == record_id)
            .ok_or_else(|| SyncError::http("patch", 404, format!("no record {record_id}")))?;
        for (name, value) in properties {
            record.properties.insert(name.clone(), value.clone());
        }
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}
