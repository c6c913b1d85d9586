//! Maintenance task runner.
//!
//! Registry sweeps and command expiry run as periodic tasks, one tokio
//! task per registration, stopped through the same `CancellationToken`
//! fan-out the listener and queue consumers use.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A periodic gateway upkeep task.
#[async_trait::async_trait]
pub trait MaintenanceTask: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &'static str;

    /// Interval between runs.
    fn period(&self) -> Duration;

    /// One run. An Err is logged and the task keeps its schedule.
    async fn run(&self) -> Result<(), String>;
}

/// Drives registered maintenance tasks until cancelled.
pub struct MaintenanceRunner {
    tasks: Vec<Arc<dyn MaintenanceTask>>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl MaintenanceRunner {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn register<T: MaintenanceTask + 'static>(&mut self, task: T) {
        self.tasks.push(Arc::new(task));
    }

    /// Spawns one loop per registered task.
    pub fn start(&mut self) {
        info!(tasks = self.tasks.len(), "starting maintenance runner");
        for task in &self.tasks {
            let task = Arc::clone(task);
            let cancel = self.cancel.clone();
            self.handles.push(tokio::spawn(async move {
                drive(task, cancel).await;
            }));
        }
    }

    /// Signals every task loop to stop; returns immediately.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Waits for the task loops to finish, bounded by `timeout`.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        let drain = async {
            for handle in self.handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "maintenance task panicked");
                }
            }
        };
        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("maintenance tasks stopped"),
            Err(_) => warn!(
                timeout_secs = timeout.as_secs(),
                "maintenance shutdown timed out"
            ),
        }
    }
}

impl Default for MaintenanceRunner {
    fn default() -> Self {
        Self::new()
    }
}

async fn drive(task: Arc<dyn MaintenanceTask>, cancel: CancellationToken) {
    let name = task.name();
    let period = task.period();
    let mut ticker = tokio::time::interval(period);
    // the interval's immediate first tick would run the task at startup
    ticker.tick().await;
    info!(task = name, period_secs = period.as_secs(), "maintenance task scheduled");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(task = name, "maintenance task stopping");
                break;
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                match task.run().await {
                    Ok(()) => info!(
                        task = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "maintenance task completed"
                    ),
                    Err(err) => error!(
                        task = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "maintenance task failed"
                    ),
                }
            }
        }
    }
}
