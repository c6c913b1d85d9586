//! Periodic maintenance tasks.

mod cache_compact;
mod expire_commands;
mod offline_sweep;
mod runner;

pub use cache_compact::CacheCompactionTask;
pub use expire_commands::ExpireCommandsTask;
pub use offline_sweep::OfflineSweepTask;
pub use runner::{MaintenanceRunner, MaintenanceTask};
