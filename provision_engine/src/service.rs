//! Lifecycle control of the tunnel daemon via the service manager.
//!
//! Thin command issuance; there is no state here beyond the unit name.
//! Liveness queries never fail the caller, they degrade to `false`.

use crate::runner::{CommandError, CommandRunner};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Exact stdout the service manager prints for a running unit.
const ACTIVE_TOKEN: &str = "active";

/// Errors surfaced by service control operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service manager command failed
    #[error("service manager command failed: {0}")]
    Control(#[from] CommandError),
}

/// Result alias for service control operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Issues start/stop/restart/liveness commands for one service unit.
pub struct ServiceSupervisor {
    runner: Arc<dyn CommandRunner>,
    unit: String,
}

impl ServiceSupervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, unit: impl Into<String>) -> Self {
        Self {
            runner,
            unit: unit.into(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Start the tunnel daemon.
    pub async fn start(&self) -> ServiceResult<()> {
        self.control("start").await
    }

    /// Stop the tunnel daemon.
    pub async fn stop(&self) -> ServiceResult<()> {
        self.control("stop").await
    }

    /// Restart the tunnel daemon.
    pub async fn restart(&self) -> ServiceResult<()> {
        self.control("restart").await
    }

    /// Whether the unit is currently active.
    ///
    /// Any outcome other than the exact `active` token, including the
    /// query command itself failing, is `false`. This must always
    /// produce a boolean, never an error.
    pub async fn is_active(&self) -> bool {
        match self
            .runner
            .run("systemctl", &["is-active", &self.unit], None)
            .await
        {
            Ok(stdout) => stdout == ACTIVE_TOKEN,
            Err(err) => {
                debug!(unit = %self.unit, "liveness query failed: {err}");
                false
            }
        }
    }

    async fn control(&self, verb: &str) -> ServiceResult<()> {
        info!(unit = %self.unit, verb, "issuing service command");
        self.runner
            .run("systemctl", &[verb, &self.unit], None)
            .await?;
        Ok(())
    }
}
