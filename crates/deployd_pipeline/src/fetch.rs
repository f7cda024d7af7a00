//! Source acquisition.
//!
//! An artifact names its source with a storage key (preferred) and/or a
//! direct URL (fallback). Resolution is an explicit ordered strategy list,
//! each strategy independently testable, rather than an implicit
//! field-by-field fallback chain.

use async_trait::async_trait;
use deployd_protocol::{ArtifactRecord, PipelineError};
use reqwest::Url;
use tracing::{debug, warn};

/// Object-storage / HTTP seam the fetch step talks to.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Fetch raw source bytes by storage key (primary location).
    async fn fetch_by_key(&self, key: &str) -> Result<Vec<u8>, PipelineError>;

    /// Fetch raw source bytes from a direct URL (fallback location).
    async fn fetch_by_url(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

/// One way to obtain an artifact's source, in trial order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStrategy {
    StorageKey(String),
    DirectUrl(String),
}

/// The ordered strategies for a record: storage key first, then URL.
pub fn resolve_strategies(record: &ArtifactRecord) -> Vec<SourceStrategy> {
    let mut strategies = Vec::new();
    if let Some(key) = &record.source_key {
        strategies.push(SourceStrategy::StorageKey(key.clone()));
    }
    if let Some(url) = &record.source_url {
        strategies.push(SourceStrategy::DirectUrl(url.clone()));
    }
    strategies
}

/// Try each strategy in order; the last failure wins the error message.
pub async fn acquire_source(
    store: &dyn SourceStore,
    record: &ArtifactRecord,
) -> Result<String, PipelineError> {
    let strategies = resolve_strategies(record);
    if strategies.is_empty() {
        return Err(PipelineError::Fetch(format!(
            "artifact '{}' has no storage key and no source URL",
            record.artifact_id
        )));
    }

    let mut last_err = None;
    for strategy in &strategies {
        let result = match strategy {
            SourceStrategy::StorageKey(key) => store.fetch_by_key(key).await,
            SourceStrategy::DirectUrl(url) => store.fetch_by_url(url).await,
        };
        match result {
            Ok(bytes) => {
                debug!(
                    artifact_id = %record.artifact_id,
                    strategy = ?strategy,
                    bytes = bytes.len(),
                    "source acquired"
                );
                return String::from_utf8(bytes).map_err(|e| {
                    PipelineError::Fetch(format!(
                        "source for '{}' is not valid UTF-8: {}",
                        record.artifact_id, e
                    ))
                });
            }
            Err(err) => {
                warn!(artifact_id = %record.artifact_id, strategy = ?strategy, %err, "source strategy failed");
                last_err = Some(err);
            }
        }
    }

    // strategies is non-empty, so at least one failure was recorded
    Err(last_err.unwrap_or_else(|| {
        PipelineError::Fetch(format!("no source strategy succeeded for '{}'", record.artifact_id))
    }))
}

/// HTTP-backed store: keys resolve under a storage base URL, fallback URLs
/// are fetched as-is.
#[derive(Debug, Clone)]
pub struct HttpSourceStore {
    client: reqwest::Client,
    storage_base: Url,
}

impl HttpSourceStore {
    pub fn new(storage_base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            storage_base,
        }
    }

    async fn get(&self, url: Url) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| PipelineError::Fetch(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Fetch(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::Fetch(format!("reading body of {url} failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SourceStore for HttpSourceStore {
    async fn fetch_by_key(&self, key: &str) -> Result<Vec<u8>, PipelineError> {
        let url = self
            .storage_base
            .join(key)
            .map_err(|e| PipelineError::Fetch(format!("invalid storage key '{key}': {e}")))?;
        self.get(url).await
    }

    async fn fetch_by_url(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let url = Url::parse(url)
            .map_err(|e| PipelineError::Fetch(format!("invalid source URL '{url}': {e}")))?;
        self.get(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record_with_source, StaticSourceStore};

    #[test]
    fn strategies_prefer_storage_key() {
        let record = record_with_source("c1", Some("sources/c1.sol"), Some("https://x/c1.sol"));
        assert_eq!(
            resolve_strategies(&record),
            vec![
                SourceStrategy::StorageKey("sources/c1.sol".to_string()),
                SourceStrategy::DirectUrl("https://x/c1.sol".to_string()),
            ]
        );

        let key_only = record_with_source("c2", Some("sources/c2.sol"), None);
        assert_eq!(resolve_strategies(&key_only).len(), 1);

        let bare = record_with_source("c3", None, None);
        assert!(resolve_strategies(&bare).is_empty());
    }

    #[tokio::test]
    async fn no_locator_is_a_fetch_error() {
        let store = StaticSourceStore::default();
        let record = record_with_source("c1", None, None);

        let err = acquire_source(&store, &record).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn key_is_tried_before_url() {
        let store = StaticSourceStore::default();
        store.insert_key("sources/c1.sol", "contract FromKey {}");
        store.insert_url("https://x/c1.sol", "contract FromUrl {}");

        let record = record_with_source("c1", Some("sources/c1.sol"), Some("https://x/c1.sol"));
        let source = acquire_source(&store, &record).await.unwrap();
        assert_eq!(source, "contract FromKey {}");
    }

    #[tokio::test]
    async fn url_fallback_covers_a_missing_key() {
        let store = StaticSourceStore::default();
        store.insert_url("https://x/c1.sol", "contract FromUrl {}");

        let record = record_with_source("c1", Some("sources/missing.sol"), Some("https://x/c1.sol"));
        let source = acquire_source(&store, &record).await.unwrap();
        assert_eq!(source, "contract FromUrl {}");
    }

    #[tokio::test]
    async fn all_strategies_failing_surfaces_the_last_error() {
        let store = StaticSourceStore::default();
        let record = record_with_source("c1", Some("gone"), Some("https://x/also-gone.sol"));

        let err = acquire_source(&store, &record).await.unwrap_err();
        assert!(err.to_string().contains("also-gone"), "got {err}");
    }
}
