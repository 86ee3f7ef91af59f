use std::fs;
use std::sync::{Arc, Mutex};

use crate::config::StoreConfig;
use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::flock::DirLock;
use crate::record;
use crate::scheduler::Scheduler;

use super::state::{Location, State};
use super::tasks::{CleanerTask, FlushTask, GarbageTask, RotateTask};
use super::{gc, recovery, BACKUP_DIR};

const LOCK_FILE: &str = "caskdb.lock";

/// An embedded log-structured key-value store. Records append to decimal-
/// named segment files; an in-memory index maps each key to its most
/// recent record. Background tasks flush the active segment, rotate it
/// past the size limit, and move fully-dead segments to the backup
/// subdirectory.
///
/// All mutation is serialized by one store-level lock; the store is meant
/// to be shared across threads of a single process behind an Arc.
pub struct Store {
    pub(crate) config: StoreConfig,
    pub(crate) state: Mutex<State>,
    scheduler: Scheduler,
    _lock: DirLock,
}

impl Store {
    /// Opens the store with default configuration.
    pub fn open(dir: &str) -> Result<Arc<Self>> {
        Self::open_with_config(StoreConfig::new(dir))
    }

    /// Opens the store: creates the directory tree, locks it, replays
    /// every segment into the index, reallocates low-share segments, and
    /// launches the background tasks. Must be called from within a tokio
    /// runtime.
    pub fn open_with_config(config: StoreConfig) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.dir)?;
        fs::create_dir_all(config.dir.join(BACKUP_DIR))?;

        let lock = DirLock::acquire(config.dir.join(LOCK_FILE))?;

        let mut state = State::new(config.max_segment_size);
        recovery::replay(&config, &mut state)?;

        let store = Arc::new(Self {
            config,
            state: Mutex::new(state),
            scheduler: Scheduler::new(),
            _lock: lock,
        });

        if let Err(e) = store.reallocate() {
            // Leave no half-initialized handles behind.
            store.state.lock()?.pool.clear();
            return Err(e);
        }

        store.scheduler.register(Arc::new(FlushTask::new(store.clone())));
        store.scheduler.register(Arc::new(RotateTask::new(store.clone())));
        store.scheduler.register(Arc::new(GarbageTask::new(store.clone())));
        if let Some(retention) = store.config.backup_retention {
            store
                .scheduler
                .register(Arc::new(CleanerTask::new(store.clone(), retention)));
        }

        Ok(store)
    }

    /// Inserts or overwrites a key. An empty value deletes the key: the
    /// marker is appended to the segment currently holding it. A non-empty
    /// write over a key living in a non-active segment retires the old
    /// record with a delete marker first; both writes happen under one
    /// critical section.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey);
        }

        let mut state = self.state.lock()?;

        let existing = state.index.get(key).copied();
        if value.is_empty() && existing.is_none() {
            return Err(Error::KeyNotFound);
        }

        if !value.is_empty() {
            if let Some(location) = existing {
                if location.segment != state.active {
                    self.write_record(&mut state, key, &[])?;
                }
            }
        }
        self.write_record(&mut state, key, value)
    }

    /// Appends one record and updates the index and live counters. Called
    /// with the store lock held.
    fn write_record(&self, state: &mut State, key: &str, value: &[u8]) -> Result<()> {
        let encoded = record::encode(key, value)?;

        if !value.is_empty() {
            let active = state.active;
            let offset = state.offset;
            state.handle(&self.config.dir, active)?.append(&encoded)?;
            state.offset += encoded.len() as u64;

            if let Some(prev) = state
                .index
                .insert(key.to_string(), Location { segment: active, offset })
            {
                *state.live.entry(prev.segment).or_insert(0) -= 1;
            }
            *state.live.entry(active).or_insert(0) += 1;
        } else {
            let location = state.index.get(key).copied().ok_or(Error::KeyNotFound)?;
            state.handle(&self.config.dir, location.segment)?.append(&encoded)?;
            if location.segment == state.active {
                state.offset += encoded.len() as u64;
            }

            *state.live.entry(location.segment).or_insert(0) -= 1;
            state.index.remove(key);
        }

        Ok(())
    }

    /// Returns the value of a key's most recent record, verified against
    /// the stored checksum.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock()?;

        let location = *state.index.get(key).ok_or(Error::KeyNotFound)?;
        let record = state
            .handle(&self.config.dir, location.segment)?
            .read_record(location.offset)?
            .ok_or_else(|| {
                errcorrupt!(
                    "indexed record missing at {}:{}",
                    location.segment,
                    location.offset
                )
            })?;
        Ok(record.value)
    }

    /// Removes a key by appending a delete marker.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.put(key, &[])
    }

    /// Keys starting with the prefix. An empty prefix lists everything.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock()?;
        Ok(state
            .index
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// All keys in the index.
    pub fn list_all(&self) -> Result<Vec<String>> {
        self.list("")
    }

    /// Number of keys starting with the prefix.
    pub fn count(&self, prefix: &str) -> Result<u64> {
        let state = self.state.lock()?;
        Ok(state.index.keys().filter(|key| key.starts_with(prefix)).count() as u64)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock()?.index.contains_key(key))
    }

    /// Reconfigures the rotation threshold; takes effect at the next
    /// rotation tick.
    pub fn set_max_size(&self, bytes: u64) -> Result<()> {
        self.state.lock()?.max_size = bytes;
        Ok(())
    }

    /// Fsyncs the active segment. Puts are durable only after this or the
    /// next flush tick.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        let active = state.active;
        state.handle(&self.config.dir, active)?.sync()
    }

    /// Key of the last record seen during startup replay, if any.
    pub fn last_seen_key(&self) -> Result<Option<String>> {
        Ok(self.state.lock()?.last_seen_key.clone())
    }

    /// Keys still queued for reallocation. Empty after open() returns;
    /// exposed for inspection.
    pub fn pending_reallocations(&self) -> Result<Vec<String>> {
        Ok(self.state.lock()?.reallocate.clone())
    }

    /// Shuts down the background tasks and closes every segment handle.
    pub async fn close(&self) -> Result<()> {
        self.scheduler.shutdown().await?;
        self.state.lock()?.pool.clear();
        Ok(())
    }

    /// Opens the next segment and makes it active once the current one
    /// outgrows the limit.
    pub(crate) fn check_rotate(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.offset > state.max_size {
            self.rotate(&mut state)?;
        }
        Ok(())
    }

    fn rotate(&self, state: &mut State) -> Result<()> {
        let next = state.active + 1;
        state.handle(&self.config.dir, next)?;
        state.active = next;
        state.offset = 0;
        tracing::debug!(segment = next, "rotated active segment");
        Ok(())
    }

    /// Rewrites the keys queued by the startup scan into the active
    /// segment, leaving their old segments for the garbage collector. If
    /// any queued key still lives in the active segment, a fresh segment
    /// is opened first so the old one can drain.
    fn reallocate(&self) -> Result<()> {
        let keys = {
            let mut state = self.state.lock()?;
            std::mem::take(&mut state.reallocate)
        };
        if keys.is_empty() {
            return gc::run(self);
        }

        {
            let mut state = self.state.lock()?;
            let active = state.active;
            let in_active = keys
                .iter()
                .any(|key| state.index.get(key).map(|l| l.segment) == Some(active));
            if in_active {
                self.rotate(&mut state)?;
            }
        }

        let mut moved = 0usize;
        for key in keys {
            let stale = {
                let state = self.state.lock()?;
                state
                    .index
                    .get(&key)
                    .map(|location| location.segment != state.active)
                    .unwrap_or(false)
            };
            if !stale {
                continue;
            }

            // A record that no longer decodes is left where it is; the
            // index entry still resolves it.
            let Ok(value) = self.get(&key) else {
                continue;
            };
            self.put(&key, &value)?;
            moved += 1;
            self.check_rotate()?;
        }

        tracing::info!(moved, "startup reallocation complete");
        gc::run(self)
    }
}
