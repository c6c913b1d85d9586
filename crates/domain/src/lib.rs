//! Domain layer for the tracker gateway.
//!
//! This crate contains:
//! - Domain models (Device, Location, Alert, Command)
//! - Message-bus envelope types
//! - Domain-level validation

pub mod models;
