//! Credential sources for the document store.
//!
//! Credentials are resolved once at startup, so a bad source stops the process
//! before the server binds. `CachedCredentials` then hands out the same token
//! until it is close to expiry and asks its source again.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::lock::Mutex;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

use crate::error::CredentialError;

pub const PROJECT_ID_ENV: &str = "FIRESTORE_PROJECT_ID";
pub const ACCESS_TOKEN_ENV: &str = "FIRESTORE_ACCESS_TOKEN";

const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";
const SECRET_MANAGER_URL: &str = "https://secretmanager.googleapis.com/v1";

/// Tokens are refreshed this long before their reported expiry.
const REFRESH_MARGIN_SECS: i64 = 60;
/// Refresh interval for tokens whose source reports no expiry.
const UNKNOWN_EXPIRY_MAX_AGE_MINS: i64 = 45;

#[derive(Clone, PartialEq, Deserialize)]
pub struct StoreCredentials {
    pub project_id: String,
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoreCredentials {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        StoreCredentials {
            project_id: project_id.into(),
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("project_id", &self.project_id)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError>;
}

/// Fixed credentials, for tests and local emulators.
pub struct StaticCredentials(pub StoreCredentials);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        Ok(self.0.clone())
    }
}

pub struct EnvCredentials;

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        let read = |key: &'static str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(CredentialError::MissingEnv(key))
        };

        Ok(StoreCredentials::new(read(PROJECT_ID_ENV)?, read(ACCESS_TOKEN_ENV)?))
    }
}

/// JSON credentials document on disk, e.g. a mounted secret volume that is
/// rotated in place.
pub struct FileCredentials(pub PathBuf);

#[async_trait]
impl CredentialProvider for FileCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        info!("Reading store credentials from {}", self.0.display());
        let raw = std::fs::read(&self.0)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

/// Fetches the instance service account token and its expiry.
async fn metadata_token(
    client: &Client,
    metadata_url: &str,
) -> Result<(String, DateTime<Utc>), CredentialError> {
    let url = format!(
        "{}/instance/service-accounts/default/token",
        metadata_url.trim_end_matches('/')
    );
    let resp = client
        .get(&url)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(CredentialError::Status(resp.status().as_u16()));
    }

    let token: MetadataToken = resp.json().await?;
    let expires_at = Utc::now() + Duration::seconds(token.expires_in);
    Ok((token.access_token, expires_at))
}

/// Service account token and project id from the GCE metadata server.
pub struct MetadataCredentials {
    client: Client,
    metadata_url: String,
}

impl MetadataCredentials {
    pub fn new(client: Client) -> Self {
        MetadataCredentials {
            client,
            metadata_url: METADATA_URL.to_owned(),
        }
    }

    pub fn with_endpoint(mut self, metadata_url: impl Into<String>) -> Self {
        self.metadata_url = metadata_url.into();
        self
    }
}

#[async_trait]
impl CredentialProvider for MetadataCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        let url = format!("{}/project/project-id", self.metadata_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(CredentialError::Status(resp.status().as_u16()));
        }
        let project_id = resp.text().await?.trim().to_owned();

        let (token, expires_at) = metadata_token(&self.client, &self.metadata_url).await?;
        Ok(StoreCredentials::new(project_id, token).expiring_at(expires_at))
    }
}

/// Reads the store settings document from Google Secret Manager.
///
/// The request is authorized with the instance service account token. When the
/// secret names only a `project_id`, that service account token is also used
/// for the store, together with its expiry. `resource` is a secret version
/// name such as `projects/p/secrets/firestore/versions/latest`.
pub struct SecretManagerCredentials {
    client: Client,
    resource: String,
    metadata_url: String,
    secret_manager_url: String,
}

#[derive(Deserialize)]
struct AccessSecretVersion {
    payload: SecretPayload,
}

#[derive(Deserialize)]
struct SecretPayload {
    data: String,
}

#[derive(Debug, PartialEq, Deserialize)]
struct SecretDocument {
    project_id: String,
    #[serde(default)]
    access_token: Option<String>,
}

impl SecretManagerCredentials {
    pub fn new(client: Client, resource: impl Into<String>) -> Self {
        SecretManagerCredentials {
            client,
            resource: resource.into(),
            metadata_url: METADATA_URL.to_owned(),
            secret_manager_url: SECRET_MANAGER_URL.to_owned(),
        }
    }

    pub fn with_endpoints(
        mut self,
        metadata_url: impl Into<String>,
        secret_manager_url: impl Into<String>,
    ) -> Self {
        self.metadata_url = metadata_url.into();
        self.secret_manager_url = secret_manager_url.into();
        self
    }
}

fn decode_secret_payload(data: &str) -> Result<SecretDocument, CredentialError> {
    let raw = base64::decode(data.trim())?;
    Ok(serde_json::from_slice(&raw)?)
}

#[async_trait]
impl CredentialProvider for SecretManagerCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        info!("Fetching store credentials from secret {}", self.resource);

        let (token, expires_at) = metadata_token(&self.client, &self.metadata_url).await?;
        let url = format!(
            "{}/{}:access",
            self.secret_manager_url.trim_end_matches('/'),
            self.resource
        );

        let resp = self.client.get(&url).bearer_auth(&token).send().await?;
        if !resp.status().is_success() {
            return Err(CredentialError::Status(resp.status().as_u16()));
        }

        let version: AccessSecretVersion = resp.json().await?;
        let doc = decode_secret_payload(&version.payload.data)?;

        Ok(match doc.access_token {
            Some(stored) => StoreCredentials::new(doc.project_id, stored),
            None => StoreCredentials::new(doc.project_id, token).expiring_at(expires_at),
        })
    }
}

struct Cached {
    credentials: StoreCredentials,
    fetched_at: DateTime<Utc>,
}

impl Cached {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.credentials.expires_at {
            Some(expires_at) => now + Duration::seconds(REFRESH_MARGIN_SECS) < expires_at,
            None => now - self.fetched_at < Duration::minutes(UNKNOWN_EXPIRY_MAX_AGE_MINS),
        }
    }
}

/// Wraps a provider and reuses its last answer while the token is fresh.
/// Concurrent callers wait for a single refresh.
pub struct CachedCredentials {
    source: Box<dyn CredentialProvider>,
    cached: Mutex<Option<Cached>>,
}

impl CachedCredentials {
    pub fn new(source: Box<dyn CredentialProvider>) -> Self {
        CachedCredentials {
            source,
            cached: Mutex::new(None),
        }
    }

    /// Forgets the cached token, e.g. after the store rejected it.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

#[async_trait]
impl CredentialProvider for CachedCredentials {
    async fn credentials(&self) -> Result<StoreCredentials, CredentialError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(entry) = cached.as_ref().filter(|entry| entry.is_fresh(now)) {
            return Ok(entry.credentials.clone());
        }

        debug!("Refreshing store credentials");
        let credentials = self.source.credentials().await?;
        *cached = Some(Cached {
            credentials: credentials.clone(),
            fetched_at: now,
        });
        Ok(credentials)
    }
}

/// Which provider to build, as written in configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    Env,
    Metadata,
    File(PathBuf),
    SecretManager(String),
}

impl CredentialSource {
    pub fn provider(&self, client: Client) -> Box<dyn CredentialProvider> {
        match self {
            CredentialSource::Env => Box::new(EnvCredentials),
            CredentialSource::Metadata => Box::new(MetadataCredentials::new(client)),
            CredentialSource::File(path) => Box::new(FileCredentials(path.clone())),
            CredentialSource::SecretManager(resource) => {
                Box::new(SecretManagerCredentials::new(client, resource.clone()))
            }
        }
    }
}

impl FromStr for CredentialSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "env" => return Ok(CredentialSource::Env),
            "metadata" => return Ok(CredentialSource::Metadata),
            _ => {}
        }
        match s.split_once(':') {
            Some(("file", path)) if !path.is_empty() => Ok(CredentialSource::File(path.into())),
            Some(("secret-manager", resource)) if !resource.is_empty() => {
                Ok(CredentialSource::SecretManager(resource.to_owned()))
            }
            _ => Err(format!(
                "unknown credential source '{}', expected env, metadata, file:<path> or secret-manager:<resource>",
                s
            )),
        }
    }
}
