//! Control command dispatch into the coordinator

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::domain::{ControlCommand, Issuer};
use crate::error::Result;

/// Anything that can act on a decoded control command.
///
/// Implemented by the coordinator; the watcher only depends on this seam.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, command: &ControlCommand, issuer: &Issuer) -> Result<()>;
}
