//! Rollback of a partially completed start-up.
//!
//! Each resource acquired during start-up registers a compensating action.
//! On failure or interrupt the stack is unwound newest-first; a failing
//! action is logged and the rest still run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tm_bus::{ClientRequest, MessageBus};
use tracing::{debug, info, warn};

use crate::server::DaemonHandle;
use crate::ssh::SshTemplate;

/// Undoes one acquired resource.
#[async_trait]
pub trait Compensation: Send + Sync {
    async fn compensate(&self) -> anyhow::Result<()>;
}

pub struct CleanupAction {
    pub description: String,
    action: Box<dyn Compensation>,
}

impl std::fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupAction")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct Cleanup {
    actions: Vec<CleanupAction>,
}

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Compensation + 'static, description: impl Into<String>) {
        let description = description.into();
        debug!(%description, "cleanup registered");
        self.actions.push(CleanupAction {
            description,
            action: Box::new(action),
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Descriptions in registration order.
    #[cfg(test)]
    pub(crate) fn descriptions(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.description.as_str()).collect()
    }

    /// Run every action, newest first. Consumes the stack.
    pub async fn unwind(&mut self) {
        while let Some(entry) = self.actions.pop() {
            info!("cleanup: {}", entry.description);
            if let Err(e) = entry.action.compensate().await {
                warn!(action = %entry.description, "cleanup action failed: {e:#}");
            }
        }
    }
}

// ─── Compensations ───────────────────────────────────────────────────────

/// Remove a configuration blob from the bus.
pub struct DeleteBlob {
    pub bus: Arc<dyn MessageBus>,
    pub key: String,
}

#[async_trait]
impl Compensation for DeleteBlob {
    async fn compensate(&self) -> anyhow::Result<()> {
        self.bus
            .delete_blob(&self.key)
            .await
            .with_context(|| format!("deleting key {}", self.key))
    }
}

/// Ask the data sink to terminate the tool group, without waiting for an
/// answer.
pub struct TerminateGroup {
    pub bus: Arc<dyn MessageBus>,
    pub channel: String,
    pub group: String,
}

#[async_trait]
impl Compensation for TerminateGroup {
    async fn compensate(&self) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&ClientRequest::terminate(&self.group))?;
        let listeners = self
            .bus
            .publish(&self.channel, &payload)
            .await
            .context("publishing terminate request")?;
        debug!(listeners, "publish('terminate')");
        Ok(())
    }
}

/// Stop a daemon we started, by pid file.
pub struct StopDaemon(pub DaemonHandle);

#[async_trait]
impl Compensation for StopDaemon {
    async fn compensate(&self) -> anyhow::Result<()> {
        self.0.shutdown().await
    }
}

/// Kill ssh sessions still outstanding.
pub struct AbortSessions(pub SshTemplate);

#[async_trait]
impl Compensation for AbortSessions {
    async fn compensate(&self) -> anyhow::Result<()> {
        self.0.abort().await;
        Ok(())
    }
}

pub struct RemoveDir(pub PathBuf);

#[async_trait]
impl Compensation for RemoveDir {
    async fn compensate(&self) -> anyhow::Result<()> {
        tokio::fs::remove_dir_all(&self.0)
            .await
            .with_context(|| format!("removing {}", self.0.display()))
    }
}
