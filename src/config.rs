use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the segment files (default: "Data").
    pub dir: PathBuf,

    /// Active segment size that triggers rotation (default: 100 MB).
    pub max_segment_size: u64,

    /// Minimum share of live records a segment must hold to escape
    /// reallocation at startup (default: 0.10).
    pub min_active_share: f64,

    /// Program invoked on segments moved to the backup directory
    /// (default: "gzip"). None disables compression.
    pub compressor: Option<String>,

    /// If set, backup files older than this are deleted by the cleaner
    /// task (default: unset, cleaner disabled).
    pub backup_retention: Option<Duration>,

    /// Background task cadence.
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to fsync the active segment (default: 5s).
    pub flush_interval: Duration,

    /// How often to check the active segment against the size limit
    /// (default: 1s).
    pub rotate_interval: Duration,

    /// How often to look for fully-dead segments (default: 1s).
    pub gc_interval: Duration,

    /// How often the backup cleaner wakes up (default: 24h).
    pub cleaner_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("Data"),
            max_segment_size: 100_000_000,
            min_active_share: 0.10,
            compressor: Some("gzip".to_string()),
            backup_retention: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            rotate_interval: Duration::from_secs(1),
            gc_interval: Duration::from_secs(1),
            cleaner_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl StoreConfig {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the rotation threshold in bytes.
    pub fn max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = bytes;
        self
    }

    /// Set the minimum live-record share below which a segment's keys are
    /// reallocated at startup.
    pub fn min_active_share(mut self, share: f64) -> Self {
        self.min_active_share = share;
        self
    }

    /// Set the compressor program run on reclaimed segments, or None to
    /// leave backups uncompressed.
    pub fn compressor(mut self, program: Option<String>) -> Self {
        self.compressor = program;
        self
    }

    /// Enable the backup cleaner with the given retention.
    pub fn backup_retention(mut self, retention: Option<Duration>) -> Self {
        self.backup_retention = retention;
        self
    }

    /// Configure background task cadence.
    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }
}

impl SchedulerConfig {
    /// Set the fsync cadence.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the rotation check cadence.
    pub fn rotate_interval(mut self, interval: Duration) -> Self {
        self.rotate_interval = interval;
        self
    }

    /// Set the garbage collection cadence.
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the backup cleaner cadence.
    pub fn cleaner_interval(mut self, interval: Duration) -> Self {
        self.cleaner_interval = interval;
        self
    }
}

/// Configuration for the queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Store configuration.
    pub store: StoreConfig,

    /// Radix of the on-disk key format. Changing this breaks backward
    /// compatibility with existing data directories (default: 16).
    pub radix: u32,

    /// Upper bound on the speculative forward scan a cache miss triggers
    /// (default: 200 000 keys).
    pub refresh_scan: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            radix: 16,
            refresh_scan: 200_000,
        }
    }
}

impl QueueConfig {
    /// Create a new config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(dir),
            ..Default::default()
        }
    }

    /// Replace the store configuration.
    pub fn store(mut self, config: StoreConfig) -> Self {
        self.store = config;
        self
    }

    /// Set the refresh scan bound.
    pub fn refresh_scan(mut self, keys: u64) -> Self {
        self.refresh_scan = keys;
        self
    }
}
