//! In-memory artifact store.
//!
//! URIs:
//! - sources seeded by the host: any string passed to [`InMemoryArtifactStore::insert`]
//! - temporaries: `tmp://{scope}/{prefix}{n}`
//! - persisted artifacts: `store://media/images/{n}`

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{ArtifactError, ArtifactMetadata, ArtifactStore};

#[derive(Debug, Clone)]
struct Temporary {
    scope: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Persisted {
    bytes: Vec<u8>,
    metadata: ArtifactMetadata,
}

#[derive(Debug, Default)]
struct ArtifactState {
    sources: BTreeMap<String, Vec<u8>>,
    temporaries: BTreeMap<String, Temporary>,
    artifacts: BTreeMap<String, Persisted>,
    next_seq: u64,

    /// Maximum bytes across temporaries and artifacts.
    quota: Option<usize>,

    /// Errors returned by the next writes, in order.
    injected: VecDeque<ArtifactError>,
}

impl ArtifactState {
    fn used_bytes(&self) -> usize {
        self.temporaries.values().map(|t| t.bytes.len()).sum::<usize>()
            + self.artifacts.values().map(|a| a.bytes.len()).sum::<usize>()
    }

    fn check_write(&mut self, len: usize) -> Result<u64, ArtifactError> {
        if let Some(err) = self.injected.pop_front() {
            return Err(err);
        }
        if self.quota.is_some_and(|quota| self.used_bytes() + len > quota) {
            return Err(ArtifactError::QuotaExceeded);
        }
        self.next_seq += 1;
        Ok(self.next_seq)
    }
}

/// [`ArtifactStore`] kept in memory, with quota and failure injection for
/// exercising the error paths.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    state: Mutex<ArtifactState>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            state: Mutex::new(ArtifactState {
                quota: Some(quota),
                ..ArtifactState::default()
            }),
        }
    }

    /// Seed a source artifact readable under `uri`.
    pub async fn insert(&self, uri: impl Into<String>, bytes: Vec<u8>) {
        self.state.lock().await.sources.insert(uri.into(), bytes);
    }

    /// Make the next write fail with `err`. Queued errors are consumed in order.
    pub async fn fail_next_write(&self, err: ArtifactError) {
        self.state.lock().await.injected.push_back(err);
    }

    pub async fn metadata(&self, uri: &str) -> Option<ArtifactMetadata> {
        let state = self.state.lock().await;
        state.artifacts.get(uri).map(|a| a.metadata.clone())
    }

    pub async fn temporary_uris(&self, scope: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .temporaries
            .iter()
            .filter(|(_, t)| t.scope == scope)
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    pub async fn artifact_count(&self) -> usize {
        self.state.lock().await.artifacts.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, ArtifactError> {
        let state = self.state.lock().await;
        state
            .sources
            .get(uri)
            .or_else(|| state.temporaries.get(uri).map(|t| &t.bytes))
            .or_else(|| state.artifacts.get(uri).map(|a| &a.bytes))
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(uri.to_string()))
    }

    async fn write_temporary(
        &self,
        scope: &str,
        prefix: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ArtifactError> {
        let mut state = self.state.lock().await;
        let seq = state.check_write(bytes.len())?;
        let uri = format!("tmp://{scope}/{prefix}{seq}");
        state.temporaries.insert(
            uri.clone(),
            Temporary {
                scope: scope.to_string(),
                bytes,
            },
        );
        debug!(%uri, "temporary written");
        Ok(uri)
    }

    async fn write_artifact(
        &self,
        bytes: Vec<u8>,
        metadata: ArtifactMetadata,
    ) -> Result<String, ArtifactError> {
        let mut state = self.state.lock().await;
        let seq = state.check_write(bytes.len())?;
        let uri = format!("store://media/images/{seq}");
        state
            .artifacts
            .insert(uri.clone(), Persisted { bytes, metadata });
        debug!(%uri, "artifact written");
        Ok(uri)
    }

    async fn delete_temporary_artifacts(&self, scope: &str) -> Result<usize, ArtifactError> {
        let mut state = self.state.lock().await;
        let before = state.temporaries.len();
        state.temporaries.retain(|_, t| t.scope != scope);
        Ok(before - state.temporaries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn temporaries_are_scoped() {
        let store = InMemoryArtifactStore::new();
        let a = store.write_temporary("blur", "out-", vec![1]).await.unwrap();
        store.write_temporary("other", "out-", vec![2]).await.unwrap();

        assert!(a.starts_with("tmp://blur/out-"));
        assert_eq!(store.read(&a).await.unwrap(), vec![1]);
        assert_eq!(store.delete_temporary_artifacts("blur").await.unwrap(), 1);
        assert!(matches!(store.read(&a).await, Err(ArtifactError::NotFound(_))));
        assert_eq!(store.temporary_uris("other").await.len(), 1);
    }

    #[tokio::test]
    async fn artifacts_keep_metadata() {
        let store = InMemoryArtifactStore::new();
        let metadata = ArtifactMetadata {
            display_name: "Blurred Image".into(),
            mime_type: "image/jpeg".into(),
            ..ArtifactMetadata::default()
        };
        let uri = store.write_artifact(vec![9, 9], metadata.clone()).await.unwrap();

        assert!(uri.starts_with("store://"));
        assert_eq!(store.metadata(&uri).await, Some(metadata));
        assert_eq!(store.read(&uri).await.unwrap(), vec![9, 9]);
    }

    #[tokio::test]
    async fn quota_and_injected_failures() {
        let store = InMemoryArtifactStore::with_quota(4);
        store
            .fail_next_write(ArtifactError::Unavailable("disk busy".into()))
            .await;

        let err = store.write_artifact(vec![0; 2], ArtifactMetadata::default()).await;
        assert!(matches!(err, Err(ArtifactError::Unavailable(_))));

        store.write_artifact(vec![0; 3], ArtifactMetadata::default()).await.unwrap();
        let err = store.write_artifact(vec![0; 2], ArtifactMetadata::default()).await;
        assert_eq!(err, Err(ArtifactError::QuotaExceeded));
    }
}
