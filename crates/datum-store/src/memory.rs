//! In-memory record store

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use datum_core::{ChainHash, DatumError, Identifier, Release, Result};
use datum_journal::RegistryRecord;
use parking_lot::{Mutex, RwLock};

use crate::{append_checked, apply_update, AppendOutcome, RecordStore, RecordUpdate};

type Slot = Arc<Mutex<RegistryRecord>>;

/// Process-local record store
///
/// The map lock is held only to find a record's slot; mutation happens under
/// the slot's own lock so different identifiers never contend.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<Identifier, Slot>>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a record wholesale, bypassing chain validation
    ///
    /// Used to simulate on-disk tampering in tests.
    pub fn overwrite(&self, record: RegistryRecord) {
        self.records
            .write()
            .insert(record.identifier().clone(), Arc::new(Mutex::new(record)));
    }

    fn slot(&self, identifier: &Identifier) -> Result<Slot> {
        self.records
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| DatumError::not_found(identifier.to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, identifier: &Identifier) -> Result<Option<RegistryRecord>> {
        let slot = self.records.read().get(identifier).cloned();
        Ok(slot.map(|s| s.lock().clone()))
    }

    async fn create(&self, record: RegistryRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(record.identifier()) {
            return Err(DatumError::already_exists(record.identifier()));
        }
        records.insert(record.identifier().clone(), Arc::new(Mutex::new(record)));
        Ok(())
    }

    async fn append_if_tip_matches(
        &self,
        identifier: &Identifier,
        expected_tip: Option<ChainHash>,
        release: Release,
    ) -> Result<AppendOutcome> {
        let slot = self.slot(identifier)?;
        let mut record = slot.lock();
        // Work on a copy so a rejected release leaves the record untouched
        let mut next = record.clone();
        let outcome = append_checked(&mut next, expected_tip, release)?;
        if outcome == AppendOutcome::Appended {
            *record = next;
        }
        Ok(outcome)
    }

    async fn update(&self, identifier: &Identifier, update: RecordUpdate) -> Result<RegistryRecord> {
        let slot = self.slot(identifier)?;
        let mut record = slot.lock();
        apply_update(&mut record, update);
        Ok(record.clone())
    }

    async fn identifiers(&self) -> Result<Vec<Identifier>> {
        Ok(self.records.read().keys().cloned().collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
