use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::ResultStore;
use crate::error::StoreError;
use crate::models::PredictionRecord;

/// Process-local store for development runs and tests.
///
/// A panic while a guard is held leaves the map intact (inserts are a single
/// call), so a poisoned lock is recovered rather than reported.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<Uuid, PredictionRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<PredictionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn save(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.id, record.clone());
        Ok(())
    }
}
