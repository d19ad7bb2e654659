use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::ResultStore;
use crate::credentials::{CachedCredentials, CredentialProvider};
use crate::error::StoreError;
use crate::models::{iso_millis, PredictionRecord};

/// Writes records through the Firestore REST API.
///
/// Each record becomes the document `{collection}/{id}`. A `PATCH` on a
/// document path creates it or replaces its fields, which gives overwrite
/// semantics for a repeated id. The bearer token is taken from the credential
/// cache on every write, so expiring tokens are replaced as the process runs.
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    collection: String,
    credentials: CachedCredentials,
}

impl FirestoreStore {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        collection: impl Into<String>,
        provider: Box<dyn CredentialProvider>,
    ) -> Self {
        FirestoreStore {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            collection: collection.into(),
            credentials: CachedCredentials::new(provider),
        }
    }

    /// Like `new`, but resolves credentials once up front so a broken source
    /// fails before the first request.
    pub async fn connect(
        client: Client,
        base_url: impl Into<String>,
        collection: impl Into<String>,
        provider: Box<dyn CredentialProvider>,
    ) -> Result<Self, StoreError> {
        let store = Self::new(client, base_url, collection, provider);
        let credentials = store.credentials.credentials().await?;
        info!(
            "Using Firestore collection {} in project {}",
            store.collection, credentials.project_id
        );
        Ok(store)
    }

    fn document_url(&self, project_id: &str, record: &PredictionRecord) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}/{}",
            self.base_url, project_id, self.collection, record.id
        )
    }
}

/// Firestore typed-value encoding of a record.
fn document(record: &PredictionRecord) -> Value {
    json!({
        "fields": {
            "id": { "stringValue": record.id.to_string() },
            "result": { "stringValue": record.result.as_str() },
            "suggestion": { "stringValue": record.suggestion },
            "createdAt": { "timestampValue": iso_millis::format(&record.created_at) },
        }
    })
}

#[async_trait]
impl ResultStore for FirestoreStore {
    async fn save(&self, record: &PredictionRecord) -> Result<(), StoreError> {
        let credentials = self.credentials.credentials().await?;
        let url = self.document_url(&credentials.project_id, record);
        debug!("PATCH {}", url);

        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&credentials.access_token)
            .json(&document(record))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!("Firestore refused the access token, dropping it");
            self.credentials.invalidate().await;
        }

        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
