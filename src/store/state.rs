use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::segment::Segment;

/// Location of a key's most recent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub segment: u64,
    pub offset: u64,
}

/// Everything the store mutates, owned by one struct behind the
/// store-level lock: the key index, the per-segment live counters, the
/// open-handle pool, and the active segment's identity and write offset.
pub struct State {
    /// Id of the segment new records are appended to. Always present in
    /// the pool.
    pub active: u64,
    /// Write offset of the active segment; equals its logical length.
    pub offset: u64,
    /// Rotation threshold. Mutable at runtime via Store::set_max_size.
    pub max_size: u64,
    /// Open segment handles by id. Handles open lazily on first use and
    /// close when garbage collection reclaims the segment.
    pub pool: HashMap<u64, Segment>,
    /// Key to the location of its most recent record. A deleted key has
    /// no entry.
    pub index: HashMap<String, Location>,
    /// Per-segment count of records the index currently points into.
    pub live: HashMap<u64, i64>,
    /// Key of the last record seen during startup replay, delete markers
    /// included. The queue derives its high-water mark from this.
    pub last_seen_key: Option<String>,
    /// Keys from low-share segments, queued for reallocation at startup.
    pub reallocate: Vec<String>,
}

impl State {
    pub fn new(max_size: u64) -> Self {
        Self {
            active: 1,
            offset: 0,
            max_size,
            pool: HashMap::new(),
            index: HashMap::new(),
            live: HashMap::new(),
            last_seen_key: None,
            reallocate: Vec::new(),
        }
    }

    /// Returns the pooled handle for a segment, opening it if needed.
    pub fn handle(&mut self, dir: &Path, id: u64) -> Result<&Segment> {
        match self.pool.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(Segment::open(dir, id)?)),
        }
    }

    /// Total live records across segments; equals the index size whenever
    /// the store is quiescent.
    pub fn live_total(&self) -> i64 {
        self.live.values().sum()
    }
}
