//! Offline sweep maintenance task.
//!
//! A device whose session stops sending frames without a clean close (half
//! open TCP, dead cellular link) would stay `online` forever; this sweep
//! flips it offline once its cached `last_seen` goes stale.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::runner::MaintenanceTask;
use crate::registry::DeviceRegistry;

const SWEEP_PERIOD_SECS: u64 = 60;
const IDLE_THRESHOLD_SECS: i64 = 300;

/// Marks devices offline when they have not been seen for the idle
/// threshold.
pub struct OfflineSweepTask {
    registry: Arc<DeviceRegistry>,
}

impl OfflineSweepTask {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl MaintenanceTask for OfflineSweepTask {
    fn name(&self) -> &'static str {
        "offline_sweep"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(SWEEP_PERIOD_SECS)
    }

    async fn run(&self) -> Result<(), String> {
        let swept = self
            .registry
            .sweep_offline(chrono::Duration::seconds(IDLE_THRESHOLD_SECS))
            .await;
        if swept > 0 {
            info!(swept, "marked idle devices offline");
        }
        Ok(())
    }
}
