//! Gateway error types.

use thiserror::Error;

use crate::bus::BusError;

/// Errors that abort gateway startup or a top-level component.
///
/// Session- and delivery-local failures never surface here; they are
/// handled (logged, retried, or turned into command outcomes) where they
/// occur.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid listen address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
