//! Client-side response cache.
//!
//! One slot per backend resource. A slot is filled on first read and only
//! ever cleared, never merged: mutations invalidate the slots they affect
//! and the next read refetches. A forced reload (session expiry) empties
//! every slot.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{ApiClient, ApiError};
use crate::models::{DocumentListResponse, ReadinessResponse, SystemInfoResponse, UsageResponse};

struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Returns the cached value or fills the slot with `fetch`. Concurrent
    /// readers of an empty slot share a single fetch.
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut guard = self.value.lock().await;
        if let Some(ref v) = *guard {
            return Ok(v.clone());
        }
        let fresh = fetch().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    async fn peek(&self) -> Option<T> {
        self.value.lock().await.clone()
    }

    async fn clear(&self) {
        *self.value.lock().await = None;
    }
}

pub struct DataCache {
    client: Arc<ApiClient>,
    seen_generation: AtomicU64,
    documents: Slot<DocumentListResponse>,
    info: Slot<SystemInfoResponse>,
    usage: Slot<UsageResponse>,
    readiness: Slot<ReadinessResponse>,
}

impl DataCache {
    pub fn new(client: Arc<ApiClient>) -> Self {
        let seen = client.session().reload_generation();
        Self {
            client,
            seen_generation: AtomicU64::new(seen),
            documents: Slot::new(),
            info: Slot::new(),
            usage: Slot::new(),
            readiness: Slot::new(),
        }
    }

    /// Drops everything if the session was force-reloaded since the last
    /// read.
    async fn sync_generation(&self) {
        let current = self.client.session().reload_generation();
        let previous = self.seen_generation.swap(current, Ordering::SeqCst);
        if previous != current {
            debug!(previous, current, "session reloaded; clearing cache");
            self.invalidate_all().await;
        }
    }

    pub async fn documents(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DocumentListResponse, ApiError> {
        self.sync_generation().await;
        self.documents
            .get_or_fetch(|| self.client.list_documents(cancel))
            .await
    }

    pub async fn system_info(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SystemInfoResponse, ApiError> {
        self.sync_generation().await;
        self.info
            .get_or_fetch(|| self.client.system_info(cancel))
            .await
    }

    pub async fn usage(&self, cancel: &CancellationToken) -> Result<UsageResponse, ApiError> {
        self.sync_generation().await;
        self.usage.get_or_fetch(|| self.client.usage(cancel)).await
    }

    pub async fn readiness(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReadinessResponse, ApiError> {
        self.sync_generation().await;
        self.readiness
            .get_or_fetch(|| self.client.readiness(cancel))
            .await
    }

    /// Last fetched document list, without touching the network.
    pub async fn cached_documents(&self) -> Option<DocumentListResponse> {
        self.documents.peek().await
    }

    pub async fn cached_usage(&self) -> Option<UsageResponse> {
        self.usage.peek().await
    }

    pub async fn invalidate_documents(&self) {
        self.documents.clear().await;
    }

    pub async fn invalidate_info(&self) {
        self.info.clear().await;
    }

    pub async fn invalidate_usage(&self) {
        self.usage.clear().await;
    }

    pub async fn invalidate_readiness(&self) {
        self.readiness.clear().await;
    }

    /// Document set changed (upload or delete): the list and the stored
    /// count in the usage figures are stale.
    pub async fn on_documents_changed(&self) {
        self.documents.clear().await;
        self.usage.clear().await;
    }

    /// A question was answered or refused: today's spend moved.
    pub async fn on_query(&self) {
        self.usage.clear().await;
    }

    pub async fn invalidate_all(&self) {
        self.documents.clear().await;
        self.info.clear().await;
        self.usage.clear().await;
        self.readiness.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_slot_fetches_once_until_cleared() {
        let slot: Slot<u32> = Slot::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(7)
        };

        assert_eq!(slot.get_or_fetch(fetch).await.unwrap(), 7);
        assert_eq!(slot.get_or_fetch(fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        slot.clear().await;
        assert!(slot.peek().await.is_none());
        assert_eq!(slot.get_or_fetch(fetch).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slot_failure_leaves_slot_empty() {
        let slot: Slot<u32> = Slot::new();
        let err = slot
            .get_or_fetch(|| async { Err(ApiError::Network("down".into())) })
            .await;
        assert!(err.is_err());
        assert!(slot.peek().await.is_none());
    }
}
