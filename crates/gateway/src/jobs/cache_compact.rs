//! Status-cache compaction maintenance task.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::runner::MaintenanceTask;
use crate::registry::DeviceRegistry;

const COMPACT_PERIOD_SECS: u64 = 600;
const MAX_IDLE_SECS: i64 = 3600;

/// Drops cached device status rows that have seen no activity for an hour.
pub struct CacheCompactionTask {
    registry: Arc<DeviceRegistry>,
}

impl CacheCompactionTask {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl MaintenanceTask for CacheCompactionTask {
    fn name(&self) -> &'static str {
        "cache_compaction"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(COMPACT_PERIOD_SECS)
    }

    async fn run(&self) -> Result<(), String> {
        let dropped = self
            .registry
            .compact_cache(chrono::Duration::seconds(MAX_IDLE_SECS));
        if dropped > 0 {
            info!(dropped, "compacted device status cache");
        }
        Ok(())
    }
}
