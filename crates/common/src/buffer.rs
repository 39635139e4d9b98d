//! Pooled byte buffers with counted release.
//!
//! A message is packed once into a [`PackedBuffer`] and then split into a
//! fixed number of [`BufferLease`]s with [`PackedBuffer::delay`], one per send
//! that may consume it. Dropping a lease is its release. The backing storage
//! goes back to the [`BufferPool`] when the last lease is dropped, and only then.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Recycles packing buffers and counts how many were handed out and returned.
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_idle,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        }
    }

    /// Take an empty buffer from the pool.
    pub fn get(self: &Arc<Self>) -> PackedBuffer {
        let data = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .unwrap_or_default();
        self.gets.fetch_add(1, Ordering::Relaxed);
        PackedBuffer {
            data: Some(data),
            pool: Arc::clone(self),
        }
    }

    fn put(&self, mut data: Vec<u8>) {
        data.clear();
        self.puts.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.max_idle {
                free.push(data);
            }
        }
    }

    /// Buffers handed out so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Buffers returned so far.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::Acquire)
    }

    /// Buffers currently held by packers or leases.
    pub fn outstanding(&self) -> usize {
        self.gets().saturating_sub(self.puts())
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// An exclusively owned buffer being written.
///
/// Dropped without [`delay`](Self::delay), it goes straight back to the pool.
pub struct PackedBuffer {
    data: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl PackedBuffer {
    pub fn writer(&mut self) -> &mut Vec<u8> {
        self.data.get_or_insert_with(Vec::new)
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the buffer and split it into exactly `n` leases.
    ///
    /// With `n == 0` the storage is returned to the pool immediately.
    pub fn delay(mut self, n: usize) -> Vec<BufferLease> {
        let data = self.data.take().unwrap_or_default();
        if n == 0 {
            self.pool.put(data);
            return Vec::new();
        }

        let shared = Arc::new(Shared {
            data,
            pending: AtomicUsize::new(n),
            pool: Arc::clone(&self.pool),
        });

        (0..n)
            .map(|_| BufferLease {
                shared: Some(Arc::clone(&shared)),
            })
            .collect()
    }
}

impl Drop for PackedBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.put(data);
        }
    }
}

struct Shared {
    data: Vec<u8>,
    pending: AtomicUsize,
    pool: Arc<BufferPool>,
}

/// One send's claim on a shared packed buffer.
pub struct BufferLease {
    shared: Option<Arc<Shared>>,
}

impl BufferLease {
    pub fn bytes(&self) -> &[u8] {
        self.shared
            .as_ref()
            .map(|s| s.data.as_slice())
            .unwrap_or(&[])
    }

    /// Leases of the same buffer not yet released, this one included.
    pub fn pending(&self) -> usize {
        self.shared
            .as_ref()
            .map(|s| s.pending.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Release explicitly; equivalent to dropping.
    pub fn release(self) {}
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        shared.pending.fetch_sub(1, Ordering::AcqRel);
        // Only the holder of the last reference gets the storage back.
        if let Some(shared) = Arc::into_inner(shared) {
            debug_assert_eq!(shared.pending.load(Ordering::Acquire), 0);
            shared.pool.put(shared.data);
        }
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("len", &self.bytes().len())
            .field("pending", &self.pending())
            .finish()
    }
}
