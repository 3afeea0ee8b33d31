//! In-memory LRU of decoded thumbnails
//!
//! Bounded by item count. Owned by the coordinator, so it is a plain
//! `&mut self` structure with no locking.

use crate::key::CacheKey;
use crate::Thumbnail;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;

pub struct MemoryLru {
    entries: LruCache<CacheKey, Thumbnail>,
    total_bytes: usize,
}

impl MemoryLru {
    /// Create a cache holding at most `max_items` thumbnails (minimum 1).
    pub fn new(max_items: usize) -> Self {
        let capacity = NonZeroUsize::new(max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            total_bytes: 0,
        }
    }

    /// Look up a thumbnail, marking it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<Thumbnail> {
        let hit = self.entries.get(key).cloned();
        log::debug!("memory {} {}", if hit.is_some() { "HIT" } else { "MISS" }, key);
        hit
    }

    /// Membership test that leaves recency untouched.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Insert or replace, evicting the least recently used entry on overflow.
    pub fn put(&mut self, key: CacheKey, thumbnail: Thumbnail) {
        self.total_bytes += thumbnail.byte_size();
        if let Some((evicted_key, evicted)) = self.entries.push(key, thumbnail) {
            // push() hands back either the replaced value or the LRU victim
            self.total_bytes = self.total_bytes.saturating_sub(evicted.byte_size());
            log::debug!("memory EVICT {}", evicted_key);
        }
    }

    /// Cached keys, most recently used first. Does not touch recency.
    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Decoded pixel bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}

impl fmt::Debug for MemoryLru {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLru")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity())
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{make_key, ThumbnailSize};
    use image::RgbImage;
    use std::path::Path;

    fn key(name: &str) -> CacheKey {
        make_key(Path::new(name), ThumbnailSize::new(10, 10))
    }

    fn thumb(width: u32) -> Thumbnail {
        Thumbnail::new(RgbImage::new(width, 1))
    }

    #[test]
    fn test_basic_operations() {
        let mut cache = MemoryLru::new(4);

        cache.put(key("a"), thumb(2));
        assert_eq!(cache.get(&key("a")).map(|t| t.width()), Some(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 6);

        assert!(cache.get(&key("b")).is_none());
    }

    #[test]
    fn test_bound_keeps_most_recent() {
        let mut cache = MemoryLru::new(3);
        for i in 0..10 {
            cache.put(key(&format!("k{}", i)), thumb(1));
        }

        assert_eq!(cache.len(), 3);
        for i in 0..7 {
            assert!(!cache.contains(&key(&format!("k{}", i))));
        }
        for i in 7..10 {
            assert!(cache.contains(&key(&format!("k{}", i))));
        }
        assert_eq!(cache.total_bytes(), 9);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = MemoryLru::new(3);
        cache.put(key("k1"), thumb(1));
        cache.put(key("k2"), thumb(1));
        cache.put(key("k3"), thumb(1));

        // k1 becomes most recently used, so k2 is the next victim
        cache.get(&key("k1"));
        cache.put(key("k4"), thumb(1));

        assert!(cache.contains(&key("k1")));
        assert!(!cache.contains(&key("k2")));
        assert!(cache.contains(&key("k3")));
        assert!(cache.contains(&key("k4")));
    }

    #[test]
    fn test_replace_existing_key() {
        let mut cache = MemoryLru::new(2);
        cache.put(key("k1"), thumb(2));
        cache.put(key("k1"), thumb(5));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 15);
        assert_eq!(cache.get(&key("k1")).map(|t| t.width()), Some(5));
    }

    #[test]
    fn test_keys_are_most_recent_first() {
        let mut cache = MemoryLru::new(3);
        cache.put(key("k1"), thumb(1));
        cache.put(key("k2"), thumb(1));
        cache.get(&key("k1"));

        let keys: Vec<CacheKey> = cache.keys().cloned().collect();
        assert_eq!(keys, vec![key("k1"), key("k2")]);
        // Listing keys leaves the order alone
        assert_eq!(cache.keys().next(), Some(&key("k1")));
    }

    #[test]
    fn test_clear_and_zero_capacity() {
        let mut cache = MemoryLru::new(0);
        assert_eq!(cache.capacity(), 1);

        cache.put(key("k1"), thumb(1));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }
}
