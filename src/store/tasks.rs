use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::scheduler::BackgroundTask;

use super::gc;
use super::store::Store;

/// Fsyncs the active segment on the flush cadence.
pub struct FlushTask {
    store: Arc<Store>,
}

impl FlushTask {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for FlushTask {
    fn name(&self) -> &'static str {
        "flush"
    }

    fn interval(&self) -> Duration {
        self.store.config.scheduler.flush_interval
    }

    async fn execute(&self) -> Result<()> {
        self.store.sync()
    }
}

/// Opens the next segment once the active one outgrows the size limit.
pub struct RotateTask {
    store: Arc<Store>,
}

impl RotateTask {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for RotateTask {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn interval(&self) -> Duration {
        self.store.config.scheduler.rotate_interval
    }

    async fn execute(&self) -> Result<()> {
        self.store.check_rotate()
    }
}

/// Moves segments with no live records into the backup subdirectory.
pub struct GarbageTask {
    store: Arc<Store>,
}

impl GarbageTask {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for GarbageTask {
    fn name(&self) -> &'static str {
        "garbage"
    }

    fn interval(&self) -> Duration {
        self.store.config.scheduler.gc_interval
    }

    async fn execute(&self) -> Result<()> {
        gc::run(&self.store)
    }
}

/// Deletes expired backup files. Registered only when a retention is
/// configured; purely janitorial.
pub struct CleanerTask {
    store: Arc<Store>,
    retention: Duration,
}

impl CleanerTask {
    pub fn new(store: Arc<Store>, retention: Duration) -> Self {
        Self { store, retention }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CleanerTask {
    fn name(&self) -> &'static str {
        "backup-cleaner"
    }

    fn interval(&self) -> Duration {
        self.store.config.scheduler.cleaner_interval
    }

    async fn execute(&self) -> Result<()> {
        gc::clean_backups(&self.store.config.dir, self.retention)
    }
}
