//! Shared utilities for FunchoVPN components.
//!
//! This crate provides the common plumbing used by the provisioning
//! engine and the control CLI: configuration loading and validation,
//! and structured logging bootstrap.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigManager, Protocol};
