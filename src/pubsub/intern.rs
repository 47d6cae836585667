//! Refcounted canonical string pool.
//!
//! Channel names are interned so the subscription registry can key its hash
//! tables on identity: two [`Interned`] handles compare equal exactly when
//! they point at the same allocation, and hashing an [`Interned`] hashes
//! its address rather than its contents. Reference counting rides on `Arc`;
//! [`StringPool::release`] unlinks a pool entry once the caller's handle
//! was the last one outstanding.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use twox_hash::XxHash64;

/// Arbitrary "large enough" prime.
const POOL_BUCKETS: usize = 2063;

/// A canonical, refcounted string identity.
///
/// Equality and hashing are by pointer, not content: for any live handle
/// obtained from [`StringPool::get`], another `get` with equal contents
/// returns a handle to the same allocation.
#[derive(Debug, Clone)]
pub struct Interned(Arc<str>);

impl Interned {
    /// View the canonical string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for Interned {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Interned {}

impl Hash for Interned {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.addr());
    }
}

impl std::fmt::Display for Interned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bucketed pool of canonical strings.
///
/// Not thread-safe; the pool lives on the fanout task.
pub struct StringPool {
    buckets: Vec<Vec<Arc<str>>>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); POOL_BUCKETS],
        }
    }

    fn bucket_of(text: &str) -> usize {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(text.as_bytes());
        (hasher.finish() % POOL_BUCKETS as u64) as usize
    }

    /// Get the canonical handle for `text`, interning it if absent.
    pub fn get(&mut self, text: &str) -> Interned {
        let bucket = &mut self.buckets[Self::bucket_of(text)];
        if let Some(existing) = bucket.iter().find(|entry| entry.as_ref() == text) {
            return Interned(existing.clone());
        }
        let entry: Arc<str> = Arc::from(text);
        bucket.push(entry.clone());
        Interned(entry)
    }

    /// Look up the canonical handle for `text` without interning it.
    pub fn lookup(&self, text: &str) -> Option<Interned> {
        self.buckets[Self::bucket_of(text)]
            .iter()
            .find(|entry| entry.as_ref() == text)
            .map(|entry| Interned(entry.clone()))
    }

    /// Release a handle, unlinking the pool entry if it was the last one.
    pub fn release(&mut self, handle: Interned) {
        let bucket = &mut self.buckets[Self::bucket_of(handle.as_str())];
        if let Some(pos) = bucket
            .iter()
            .position(|entry| Arc::ptr_eq(entry, &handle.0))
        {
            drop(handle);
            // Only the pool's own reference left: free the entry.
            if Arc::strong_count(&bucket[pos]) == 1 {
                bucket.swap_remove(pos);
            }
        }
    }

    /// Number of interned strings, for diagnostics and tests.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
