//! Persistence for prediction records.
//!
//! Writes are keyed by the record id and overwrite an existing document with
//! the same id, so saving the same record twice leaves one record behind.

mod firestore;
mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::PredictionRecord;

pub use firestore::FirestoreStore;
pub use memory::InMemoryStore;

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, record: &PredictionRecord) -> Result<(), StoreError>;
}
