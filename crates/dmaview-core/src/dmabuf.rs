//! In-process DMA-BUF heap.
//!
//! Stands in for the kernel's dma-heap when no hardware decoder is present:
//! buffers are allocated once, filled by the producer, and then only read.
//! Every buffer is reachable by its [`BufferHandle`] for as long as some
//! [`DmaBuf`] reference to it is alive, the same way an fd stays importable
//! while the decoder holds the sample.

use crate::frame::BufferHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared pool of buffers, cheap to clone across threads.
#[derive(Clone, Default)]
pub struct DmaBufPool {
    inner: Arc<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    next_handle: AtomicI32,
    live: Mutex<HashMap<BufferHandle, Weak<DmaBufMemory>>>,
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Reference-counted handle to one buffer's memory.
#[derive(Clone)]
pub struct DmaBuf {
    memory: Arc<DmaBufMemory>,
}

struct DmaBufMemory {
    handle: BufferHandle,
    bytes: Box<[u8]>,
    pool: Weak<PoolInner>,
}

impl DmaBufPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `len` zeroed bytes, let `fill` write them, then publish the
    /// buffer under a fresh handle.
    pub fn allocate_with(&self, len: usize, fill: impl FnOnce(&mut [u8])) -> DmaBuf {
        let mut bytes = vec![0u8; len].into_boxed_slice();
        fill(&mut bytes);

        // fd 0-2 are stdio; keep handles in the same range a real fd would use.
        let handle = BufferHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed) + 3);
        let memory = Arc::new(DmaBufMemory {
            handle,
            bytes,
            pool: Arc::downgrade(&self.inner),
        });
        self.inner
            .live
            .lock()
            .insert(handle, Arc::downgrade(&memory));
        self.inner.allocated.fetch_add(1, Ordering::Relaxed);
        DmaBuf { memory }
    }

    /// Look up a live buffer by handle.
    pub fn resolve(&self, handle: BufferHandle) -> Option<DmaBuf> {
        let live = self.inner.live.lock();
        live.get(&handle)
            .and_then(Weak::upgrade)
            .map(|memory| DmaBuf { memory })
    }

    /// Number of buffers currently alive.
    pub fn live_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DmaBufPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBufPool")
            .field("live", &self.live_count())
            .field("allocated", &self.allocated())
            .field("released", &self.released())
            .finish()
    }
}

impl DmaBuf {
    #[inline]
    pub fn handle(&self) -> BufferHandle {
        self.memory.handle
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memory.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memory.bytes.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.memory.bytes
    }
}

impl fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaBuf")
            .field("handle", &self.memory.handle)
            .field("len", &self.memory.bytes.len())
            .finish()
    }
}

impl Drop for DmaBufMemory {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut live = pool.live.lock();
            // Only remove our own entry; the weak may already be gone.
            if live
                .get(&self.handle)
                .is_some_and(|w| w.strong_count() == 0)
            {
                live.remove(&self.handle);
            }
            pool.released.fetch_add(1, Ordering::Relaxed);
        }
    }
}
