use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 64KB.
///
/// ND2 metadata chunks and TIFF IFDs are small and clustered, so a few
/// blocks cover the whole metadata region of a typical file.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (4MB with default blocks).
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Block cache for metadata parsing.
///
/// Wraps a shared reader and serves reads from fixed-size cached blocks.
/// Container parsers issue many small reads at scattered offsets (chunk
/// headers, CLX items, IFD entries); the cache turns these into a handful of
/// block reads. Pixel reads should go to [`inner`](BlockCache::inner)
/// directly so that streamed planes never evict metadata blocks.
///
/// - LRU eviction at capacity
/// - Single-flight: concurrent misses on one block share a single fetch
/// - Reads may span several blocks
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    blocks: RwLock<LruCache<u64, Bytes>>,
    pending: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Cache over a shared reader with default block size and capacity.
    pub fn new(inner: Arc<R>) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY)
    }

    /// Cache with a custom block size (bytes) and capacity (blocks).
    pub fn with_capacity(inner: Arc<R>, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            block_size: block_size.max(1),
            blocks: RwLock::new(LruCache::new(capacity)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The uncached reader underneath.
    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    /// Number of blocks currently cached.
    pub async fn cached_blocks(&self) -> usize {
        self.blocks.read().await.len()
    }

    /// Drop every cached block.
    pub async fn clear(&self) {
        self.blocks.write().await.clear();
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.blocks.read().await.peek(&index) {
                return Ok(data.clone());
            }

            // Either wait on the fetch already in progress or start one
            let notify = {
                let mut pending = self.pending.lock().await;
                match pending.get(&index) {
                    Some(notify) => {
                        let notify = notify.clone();
                        // Register interest before releasing the lock
                        let waiter = notify.notified();
                        tokio::pin!(waiter);
                        waiter.as_mut().enable();
                        drop(pending);
                        waiter.await;
                        continue;
                    }
                    None => {
                        let notify = Arc::new(Notify::new());
                        pending.insert(index, notify.clone());
                        notify
                    }
                }
            };

            let result = self.fetch(index).await;

            {
                let mut blocks = self.blocks.write().await;
                let mut pending = self.pending.lock().await;
                if let Ok(data) = &result {
                    blocks.put(index, data.clone());
                }
                pending.remove(&index);
            }
            notify.notify_waiters();

            return result;
        }
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let start = index * self.block_size as u64;
        let size = self.inner.size();
        let len = size.saturating_sub(start).min(self.block_size as u64) as usize;
        if len == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset: start,
                requested: self.block_size as u64,
                size,
            });
        }
        self.inner.read_exact_at(start, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        if offset.checked_add(len as u64).map_or(true, |end| end > size) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;

        if first == last {
            let block = self.block(first).await?;
            let start = (offset - first * block_size) as usize;
            return Ok(block.slice(start..start + len));
        }

        let mut out = BytesMut::with_capacity(len);
        for index in first..=last {
            let block = self.block(index).await?;
            let block_start = index * block_size;
            let from = offset.saturating_sub(block_start) as usize;
            let to = ((offset + len as u64) - block_start).min(block.len() as u64) as usize;
            out.extend_from_slice(&block[from..to]);
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    async fn close(&self) {
        self.clear().await;
        self.inner.close().await;
    }
}
