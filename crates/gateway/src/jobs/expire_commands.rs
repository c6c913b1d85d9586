//! Stale-command expiry maintenance task.
//!
//! Commands can be stranded without a terminal outcome in two ways: a
//! `pending` row whose delivery was lost before any consumer settled it,
//! and a `sent` row whose device never replied. After the expiry window
//! both are failed so clients polling the row see a terminal outcome.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::runner::MaintenanceTask;
use crate::store::GatewayStore;

const EXPIRY_PERIOD_SECS: u64 = 600;

/// Fails commands stuck without a terminal outcome beyond the window.
pub struct ExpireCommandsTask {
    store: Arc<dyn GatewayStore>,
    older_than_mins: i64,
}

impl ExpireCommandsTask {
    pub fn new(store: Arc<dyn GatewayStore>, older_than_mins: i64) -> Self {
        Self {
            store,
            older_than_mins,
        }
    }
}

#[async_trait::async_trait]
impl MaintenanceTask for ExpireCommandsTask {
    fn name(&self) -> &'static str {
        "expire_commands"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(EXPIRY_PERIOD_SECS)
    }

    async fn run(&self) -> Result<(), String> {
        let expired = self
            .store
            .expire_stale_commands(self.older_than_mins)
            .await
            .map_err(|e| format!("Failed to expire stale commands: {}", e))?;
        if expired > 0 {
            info!(
                expired,
                older_than_mins = self.older_than_mins,
                "expired stale commands"
            );
        }
        Ok(())
    }
}
