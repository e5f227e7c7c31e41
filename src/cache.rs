use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use hashbrown::HashMap;
use moka::sync::Cache;
use tracing_futures::Instrument;

use crate::error::{CdnError, CdnResult};
use crate::processor::{TranscodeRequest, Transcoder};
use crate::storage::{ContentStore, VariantStore};
use crate::variant::VariantKey;

/// A derivation every caller for the same key awaits.
type Derivation = Shared<BoxFuture<'static, CdnResult<Bytes>>>;

/// Serves variants, deriving and persisting them on first request.
///
/// Lookups go memory -> variant store -> derivation. A derivation runs
/// at most once per key at a time within this process: the first caller
/// to miss spawns it and every concurrent caller for the same key awaits
/// that same outcome, success or failure. Failures are never cached.
///
/// Derivations run as their own task, so a caller giving up on a request
/// only stops waiting, the derivation still completes for everyone else.
#[derive(Clone)]
pub struct VariantCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    originals: Arc<dyn ContentStore>,
    variants: Arc<dyn VariantStore>,
    transcoder: Arc<dyn Transcoder>,
    hot: Option<Cache<VariantKey, Bytes>>,
    in_flight: Mutex<HashMap<VariantKey, Derivation>>,
}

impl VariantCache {
    /// Creates a new cache, `cache_size` bounds the in-memory layer in
    /// bytes and `0` disables it.
    pub fn new(
        originals: Arc<dyn ContentStore>,
        variants: Arc<dyn VariantStore>,
        transcoder: Arc<dyn Transcoder>,
        cache_size: u64,
    ) -> Self {
        let hot = if cache_size == 0 {
            None
        } else {
            let cache = Cache::builder()
                .weigher(|_key: &VariantKey, value: &Bytes| {
                    u32::try_from(value.len()).unwrap_or(u32::MAX)
                })
                .max_capacity(cache_size)
                .build();
            Some(cache)
        };

        Self {
            inner: Arc::new(CacheInner {
                originals,
                variants,
                transcoder,
                hot,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn get_or_create(&self, key: &VariantKey) -> CdnResult<Bytes> {
        if let Some(data) = self.inner.cached(key) {
            return Ok(data);
        }

        if let Some(data) = self.inner.variants.fetch(key).await? {
            self.inner.remember(key, &data);
            return Ok(data);
        }

        self.join_inflight(key).await
    }

    /// Returns the running derivation for `key`, starting one if there
    /// is none.
    fn join_inflight(&self, key: &VariantKey) -> Derivation {
        let mut table = self.inner.lock_table();
        if let Some(existing) = table.get(key) {
            debug!("Joining in-flight derivation of {}", key);
            return existing.clone();
        }

        let inner = self.inner.clone();
        let owned = key.clone();
        let span = info_span!("derive_variant", key = %owned);
        let handle = tokio::spawn(
            async move {
                // Dropped once the outcome exists, including on panic, which
                // frees the key for the next caller before anyone is woken.
                let _guard = FlightGuard {
                    inner: inner.clone(),
                    key: owned.clone(),
                };
                inner.derive(&owned).await
            }
            .instrument(span),
        );

        let derivation = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(CdnError::Transcode(format!("derivation task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        table.insert(key.clone(), derivation.clone());
        derivation
    }

    #[cfg(test)]
    pub(crate) fn in_flight_len(&self) -> usize {
        self.inner.lock_table().len()
    }
}

impl CacheInner {
    fn lock_table(&self) -> MutexGuard<'_, HashMap<VariantKey, Derivation>> {
        // The table is consistent after every single statement, a panicking
        // holder cannot leave it half updated.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, key: &VariantKey) -> Option<Bytes> {
        self.hot.as_ref()?.get(key)
    }

    fn remember(&self, key: &VariantKey, data: &Bytes) {
        if let Some(hot) = self.hot.as_ref() {
            hot.insert(key.clone(), data.clone());
        }
    }

    async fn derive(&self, key: &VariantKey) -> CdnResult<Bytes> {
        let start = Instant::now();
        match self.derive_inner(key).await {
            Ok(data) => {
                info!(
                    "Derived variant {} ({} bytes) in {:?}",
                    key,
                    data.len(),
                    start.elapsed(),
                );
                Ok(data)
            },
            Err(e) => {
                warn!("Failed to derive variant {}: {}", key, e);
                Err(e)
            },
        }
    }

    async fn derive_inner(&self, key: &VariantKey) -> CdnResult<Bytes> {
        // A previous leader may have persisted it between our miss and
        // taking the lead.
        if let Some(data) = self.variants.fetch(key).await? {
            self.remember(key, &data);
            return Ok(data);
        }

        let original = self.originals.get(key.image_id()).await?;
        let data = self
            .transcoder
            .transcode(original, TranscodeRequest::from(key))
            .await?;

        if data.is_empty() {
            return Err(CdnError::Transcode("transcoder produced no output".into()));
        }

        self.variants.store(key, data.clone()).await?;
        self.remember(key, &data);

        Ok(data)
    }
}

struct FlightGuard {
    inner: Arc<CacheInner>,
    key: VariantKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.lock_table().remove(&self.key);
    }
}
