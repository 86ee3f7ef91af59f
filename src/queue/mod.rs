//! A durable FIFO queue over the store. Values are stored under
//! monotonically increasing numeric keys formatted in a fixed radix;
//! records found on disk at startup are replayed in key order before
//! fresh pushes are served.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::Cache;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::store::Store;

/// A persistent FIFO queue. Every operation holds the queue-wide mutex;
/// the store underneath does its own synchronization.
pub struct Queue {
    store: Arc<Store>,
    radix: u32,
    refresh_scan: u64,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Highest issued write key.
    max: u64,
    /// Highest issued read key.
    current: u64,
    count_disk: u64,
    count_read: u64,
    count_deleted: u64,
    /// Keys found on disk at startup, consumed front-first before fresh
    /// pushes.
    replay: VecDeque<u64>,
    cache: Option<Box<dyn Cache>>,
    ttl: Duration,
}

impl Queue {
    /// Opens a queue with default configuration.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with_config(QueueConfig::new(dir))
    }

    /// Opens the store, derives the write high-water mark from the last
    /// key the replay saw, and builds the replay list from every key
    /// still on disk, in ascending order. The radix must be in 2..=36
    /// and must never change for an existing directory.
    pub fn open_with_config(config: QueueConfig) -> Result<Self> {
        let radix = config.radix;
        let store = Store::open_with_config(config.store)?;

        let max = store
            .last_seen_key()?
            .and_then(|key| u64::from_str_radix(&key, radix).ok())
            .unwrap_or(0);

        let mut remaining: Vec<u64> = store
            .list_all()?
            .iter()
            .filter_map(|key| u64::from_str_radix(key, radix).ok())
            .collect();
        remaining.sort_unstable();
        let replay: VecDeque<u64> = remaining.into();

        Ok(Self {
            store,
            radix,
            refresh_scan: config.refresh_scan,
            inner: Mutex::new(Inner {
                max,
                current: max,
                count_disk: replay.len() as u64,
                count_read: 0,
                count_deleted: 0,
                replay,
                cache: None,
                ttl: Duration::ZERO,
            }),
        })
    }

    /// Appends a value under the next write key.
    pub fn push(&self, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock()?;

        inner.count_disk += 1;
        inner.max += 1;
        let key = format_key(inner.max, self.radix);

        if let Some(cache) = &inner.cache {
            cache.add(value, inner.ttl, &key)?;
        }

        self.store.put(&key, value)
    }

    /// Removes and returns the oldest value, with its key and whether the
    /// queue is now empty. Replayed records drain before fresh pushes.
    pub fn pop(&self) -> Result<(Vec<u8>, String, bool)> {
        let mut inner = self.inner.lock()?;

        let (value, key) = if let Some(&head) = inner.replay.front() {
            let key = format_key(head, self.radix);
            let value = self.retrieve(&inner, &key)?;
            inner.replay.pop_front();
            (value, key)
        } else {
            if inner.current >= inner.max {
                return Err(Error::QueueEmpty);
            }
            inner.current += 1;
            let key = format_key(inner.current, self.radix);
            let value = self.retrieve(&inner, &key)?;
            (value, key)
        };

        inner.count_disk = inner.count_disk.saturating_sub(1);
        inner.count_read += 1;

        let empty = inner.replay.is_empty() && inner.current == inner.max;
        Ok((value, key, empty))
    }

    /// Deletes a queued record by key, evicting it from the cache if one
    /// is attached. Fails with InvalidRecord if the key is not stored.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock()?;

        if let Some(cache) = &inner.cache {
            let _ = cache.delete(key);
        }

        if !self.store.exists(key)? {
            return Err(Error::InvalidRecord);
        }
        inner.count_deleted += 1;
        self.store.delete(key)
    }

    /// Attaches a read-through cache and optionally pre-warms it with the
    /// first precache replayed records, pacing the loads one second
    /// apart.
    pub async fn attach_cache(
        &self,
        cache: Box<dyn Cache>,
        ttl: Duration,
        precache: u64,
    ) -> Result<()> {
        let warmup: Vec<u64> = {
            let mut inner = self.inner.lock()?;
            inner.cache = Some(cache);
            inner.ttl = ttl;
            inner
                .replay
                .iter()
                .take(precache as usize)
                .copied()
                .collect()
        };

        for (i, id) in warmup.iter().enumerate() {
            let key = format_key(*id, self.radix);
            let value = self.store.get(&key)?;
            {
                let inner = self.inner.lock()?;
                if let Some(cache) = &inner.cache {
                    cache.add(&value, inner.ttl, &key)?;
                }
            }
            if i + 1 < warmup.len() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        Ok(())
    }

    /// Read path: cache first, a speculative refresh on a miss, the store
    /// as the final fallback.
    fn retrieve(&self, inner: &Inner, key: &str) -> Result<Vec<u8>> {
        let Some(cache) = &inner.cache else {
            return self.store.get(key);
        };

        if let Some(value) = cache.retrieve(key)? {
            return Ok(value);
        }
        self.refresh(inner, key);
        if let Some(value) = cache.retrieve(key)? {
            return Ok(value);
        }
        self.store.get(key)
    }

    /// Speculatively loads a contiguous run of successor keys into the
    /// cache, skipping holes. Bounded by the refresh_scan config.
    fn refresh(&self, inner: &Inner, from: &str) {
        let Ok(start) = u64::from_str_radix(from, self.radix) else {
            return;
        };
        let Some(cache) = &inner.cache else {
            return;
        };

        for i in 0..self.refresh_scan {
            let Some(id) = start.checked_add(i) else {
                break;
            };
            let key = format_key(id, self.radix);
            let Ok(value) = self.store.get(&key) else {
                continue;
            };
            let _ = cache.add(&value, inner.ttl, &key);
        }
    }

    /// Read/write cursor summary, plus the replay backlog while one
    /// remains.
    pub fn status(&self) -> Result<String> {
        let inner = self.inner.lock()?;
        let current = format_key(inner.current, self.radix);
        let max = format_key(inner.max, self.radix);
        Ok(match inner.replay.front() {
            Some(head) => format!(
                "c: {current}; m: {max} (old records: {} - {})",
                inner.replay.len(),
                format_key(*head, self.radix)
            ),
            None => format!("c: {current}; m: {max}"),
        })
    }

    /// Records on disk and net records read.
    pub fn length(&self) -> Result<String> {
        let inner = self.inner.lock()?;
        Ok(format!(
            "disk: {}; mem: {}",
            inner.count_disk,
            inner.count_read.saturating_sub(inner.count_deleted)
        ))
    }

    /// Cache size and hit count, if a cache is attached.
    pub fn cache_status(&self) -> Result<String> {
        let inner = self.inner.lock()?;
        Ok(match &inner.cache {
            Some(cache) => format!("sz: {}; s: {}", cache.count(), cache.success()),
            None => "no cache".to_string(),
        })
    }

    /// Number of cache entries, or None without a cache.
    pub fn cache_count(&self) -> Result<Option<usize>> {
        let inner = self.inner.lock()?;
        Ok(inner.cache.as_ref().map(|cache| cache.count()))
    }

    /// Reconfigures the store's rotation threshold.
    pub fn set_max_size(&self, bytes: u64) -> Result<()> {
        self.store.set_max_size(bytes)
    }

    /// Shuts down the store's background tasks and closes its handles.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

/// Formats a key in the queue's radix, lowercase. Radix must be 2..=36.
fn format_key(mut n: u64, radix: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        let digit = (n % radix as u64) as u32;
        digits.push(char::from_digit(digit, radix).unwrap_or('0'));
        n /= radix as u64;
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::MemoryCache;
    use crate::config::{SchedulerConfig, StoreConfig};

    fn test_config(dir: &std::path::Path) -> QueueConfig {
        QueueConfig::default().store(
            StoreConfig::new(dir).compressor(None).scheduler(
                SchedulerConfig::default()
                    .flush_interval(Duration::from_millis(20))
                    .rotate_interval(Duration::from_millis(20))
                    .gc_interval(Duration::from_millis(20)),
            ),
        )
    }

    #[test]
    fn test_format_key() {
        assert_eq!(format_key(0, 16), "0");
        assert_eq!(format_key(1, 16), "1");
        assert_eq!(format_key(255, 16), "ff");
        assert_eq!(format_key(4096, 16), "1000");
        assert_eq!(format_key(10, 10), "10");
    }

    #[tokio::test]
    async fn test_push_pop_fifo() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::open_with_config(test_config(dir.path()))?;

        queue.push(b"first")?;
        queue.push(b"second")?;
        queue.push(b"third")?;

        let (value, key, empty) = queue.pop()?;
        assert_eq!((value.as_slice(), key.as_str(), empty), (&b"first"[..], "1", false));
        let (value, key, empty) = queue.pop()?;
        assert_eq!((value.as_slice(), key.as_str(), empty), (&b"second"[..], "2", false));
        let (value, key, empty) = queue.pop()?;
        assert_eq!((value.as_slice(), key.as_str(), empty), (&b"third"[..], "3", true));

        assert_eq!(queue.pop(), Err(Error::QueueEmpty));
        queue.close().await
    }

    #[tokio::test]
    async fn test_pop_empty_queue() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::open_with_config(test_config(dir.path()))?;

        assert_eq!(queue.pop(), Err(Error::QueueEmpty));
        queue.close().await
    }

    // Scenario: push two, reopen, drain through the replay list.
    #[tokio::test]
    async fn test_reopen_replays_in_key_order() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = Queue::open_with_config(test_config(dir.path()))?;
            queue.push(b"x")?;
            queue.push(b"y")?;
            queue.close().await?;
        }

        let queue = Queue::open_with_config(test_config(dir.path()))?;
        let (value, key, empty) = queue.pop()?;
        assert_eq!((value.as_slice(), key.as_str(), empty), (&b"x"[..], "1", false));
        let (value, key, empty) = queue.pop()?;
        assert_eq!((value.as_slice(), key.as_str(), empty), (&b"y"[..], "2", true));

        queue.close().await
    }

    #[tokio::test]
    async fn test_replay_then_fresh_pushes_stay_ordered() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = Queue::open_with_config(test_config(dir.path()))?;
            queue.push(b"a")?;
            queue.push(b"b")?;
            queue.close().await?;
        }

        let queue = Queue::open_with_config(test_config(dir.path()))?;
        queue.push(b"c")?;

        let mut drained = Vec::new();
        loop {
            let (value, _, empty) = queue.pop()?;
            drained.push(value);
            if empty {
                break;
            }
        }
        assert_eq!(drained, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        queue.close().await
    }

    #[tokio::test]
    async fn test_keys_are_base16_past_nine() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::open_with_config(test_config(dir.path()))?;

        for i in 0..16 {
            queue.push(format!("v{i}").as_bytes())?;
        }
        let mut last_key = String::new();
        for _ in 0..16 {
            let (_, key, _) = queue.pop()?;
            last_key = key;
        }
        assert_eq!(last_key, "10"); // 16 in base 16

        queue.close().await
    }

    #[tokio::test]
    async fn test_delete_known_and_unknown() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::open_with_config(test_config(dir.path()))?;

        queue.push(b"payload")?;
        queue.delete("1")?;
        assert_eq!(queue.delete("1"), Err(Error::InvalidRecord));
        assert_eq!(queue.delete("missing"), Err(Error::InvalidRecord));

        queue.close().await
    }

    #[tokio::test]
    async fn test_status_and_length() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = Queue::open_with_config(test_config(dir.path()))?;
            queue.push(b"a")?;
            queue.push(b"b")?;
            queue.close().await?;
        }

        let queue = Queue::open_with_config(test_config(dir.path()))?;
        assert_eq!(queue.status()?, "c: 2; m: 2 (old records: 2 - 1)");
        assert_eq!(queue.length()?, "disk: 2; mem: 0");

        queue.pop()?;
        queue.pop()?;
        assert_eq!(queue.status()?, "c: 2; m: 2");
        assert_eq!(queue.length()?, "disk: 0; mem: 2");

        queue.close().await
    }

    #[tokio::test]
    async fn test_push_populates_attached_cache() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = Queue::open_with_config(test_config(dir.path()))?;

        assert_eq!(queue.cache_status()?, "no cache");
        queue
            .attach_cache(Box::new(MemoryCache::new()), Duration::from_secs(60), 0)
            .await?;

        queue.push(b"cached")?;
        assert_eq!(queue.cache_count()?, Some(1));

        let (value, _, _) = queue.pop()?;
        assert_eq!(value, b"cached");
        // The pop was served from the cache.
        assert!(queue.cache_status()?.starts_with("sz: 1; s: 1"));

        queue.close().await
    }

    #[tokio::test]
    async fn test_cache_miss_triggers_refresh() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = Queue::open_with_config(test_config(dir.path()))?;
            for i in 0..5 {
                queue.push(format!("v{i}").as_bytes())?;
            }
            queue.close().await?;
        }

        let queue = Queue::open_with_config(test_config(dir.path()).refresh_scan(10))?;
        // Attached after the pushes, so the cache starts cold.
        queue
            .attach_cache(Box::new(MemoryCache::new()), Duration::from_secs(60), 0)
            .await?;

        let (value, key, _) = queue.pop()?;
        assert_eq!(value, b"v0");
        assert_eq!(key, "1");
        // The refresh pulled the whole contiguous run in.
        assert_eq!(queue.cache_count()?, Some(5));

        queue.close().await
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_cache_prewarms_replay_head() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let queue = Queue::open_with_config(test_config(dir.path()))?;
            queue.push(b"one")?;
            queue.push(b"two")?;
            queue.push(b"three")?;
            queue.close().await?;
        }

        let queue = Queue::open_with_config(test_config(dir.path()))?;
        queue
            .attach_cache(Box::new(MemoryCache::new()), Duration::from_secs(60), 2)
            .await?;
        assert_eq!(queue.cache_count()?, Some(2));

        queue.close().await
    }
}
