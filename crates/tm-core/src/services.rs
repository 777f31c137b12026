use std::sync::Arc;

use async_trait::async_trait;
use tm_bus::{MessageBus, RedisBus};

use crate::hosts::LocalHosts;
use crate::process::{ProcessRunner, ProcessTable, SystemProcesses, TokioRunner};

/// Opens the bus once the coordination server is known.
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> tm_bus::Result<Arc<dyn MessageBus>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl BusConnector for RedisConnector {
    async fn connect(&self, host: &str, port: u16) -> tm_bus::Result<Arc<dyn MessageBus>> {
        Ok(Arc::new(RedisBus::connect(host, port).await?))
    }
}

/// Everything the start-up sequence touches outside its own memory.
#[derive(Clone)]
pub struct Services {
    pub runner: Arc<dyn ProcessRunner>,
    pub processes: Arc<dyn ProcessTable>,
    pub connector: Arc<dyn BusConnector>,
    pub locality: LocalHosts,
}

impl Services {
    /// Real processes, real Redis, this machine's names and interfaces.
    pub fn system(hostname: &str, full_hostname: &str) -> Self {
        Self {
            runner: Arc::new(TokioRunner),
            processes: Arc::new(SystemProcesses),
            connector: Arc::new(RedisConnector),
            locality: LocalHosts::discover(hostname, full_hostname),
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("locality", &self.locality)
            .finish_non_exhaustive()
    }
}
