use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::Result;

/// A periodic background task. Tick failures are logged and the next tick
/// retries; only shutdown stops the loop.
#[async_trait::async_trait]
pub trait BackgroundTask: Send + Sync {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// Cadence between ticks.
    fn interval(&self) -> Duration;

    /// Execute one tick.
    async fn execute(&self) -> Result<()>;
}

/// Runs registered background tasks on their intervals until shut down.
pub struct Scheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Registers a task and starts its timer loop.
    pub fn register<T: BackgroundTask + 'static>(&self, task: Arc<T>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(task.interval());
            // The first interval tick fires immediately; skip it so a task
            // never runs before open() has returned.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = task.execute().await {
                            tracing::error!(task = task.name(), error = %e, "background tick failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(task = task.name(), "task shutting down");
                        break;
                    }
                }
            }
        });

        self.handles.lock().unwrap().push(handle);
    }

    /// Signals every task to stop and waits for all of them.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).ok();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.await?;
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTask {
        interval: Duration,
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl BackgroundTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn execute(&self) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_task_ticks() -> Result<()> {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            ticks: ticks.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);

        scheduler.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_stops_ticking() -> Result<()> {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler.register(Arc::new(CountingTask {
            interval: Duration::from_millis(10),
            ticks: ticks.clone(),
        }));

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown().await?;

        let at_shutdown = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_shutdown);

        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_without_tasks() -> Result<()> {
        Scheduler::new().shutdown().await
    }
}
