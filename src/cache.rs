use std::time::Duration;

use crate::error::Result;

/// Contract for the optional read-through cache a queue may carry. The
/// store never touches it; only the queue's retrieve path does. A cache
/// that loses entries is always safe: the store remains the source of
/// truth.
pub trait Cache: Send + Sync {
    /// Stores a value under a key with a time-to-live.
    fn add(&self, value: &[u8], ttl: Duration, key: &str) -> Result<()>;

    /// Evicts a key. Evicting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Returns the cached value, or None on a miss.
    fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Number of entries currently held.
    fn count(&self) -> usize;

    /// Number of lookups answered from the cache.
    fn success(&self) -> usize;
}
