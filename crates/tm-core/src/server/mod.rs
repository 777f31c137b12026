//! Local daemons started when orchestrating: the Redis server and the Tool
//! Data Sink.

mod data_sink;
mod redis;

pub use data_sink::{start_data_sink, DataSinkLaunch};
pub use redis::{bind_plan, render_config, start_redis, BindPlan, RedisLaunch};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::Signal;
use thiserror::Error;
use tm_bus::{BusError, MessageBus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ReturnCode;
use crate::process::ProcessTable;

/// How long a daemon gets to exit after SIGTERM before SIGKILL.
const TERM_WAIT: Duration = Duration::from_secs(5);
const PID_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{host} does not map to an IP address")]
    NoIp {
        host: String,
        source: std::io::Error,
    },

    #[error("failed to create redis server configuration: {0}")]
    Config(std::io::Error),

    #[error("failed to create {name}, daemonized: {source}")]
    Spawn {
        name: &'static str,
        code: ReturnCode,
        source: std::io::Error,
    },

    #[error("failed to create {name}, daemonized; return code: {status}")]
    Exit {
        name: &'static str,
        code: ReturnCode,
        status: i32,
    },

    #[error("failed to verify Tool Data Sink logging sink working: {0}")]
    LoggingProbe(BusError),

    #[error("the Tool Data Sink failed to start within {0:?}")]
    StartupTimeout(Duration),

    #[error("daemonization didn't create {}", .0.display())]
    MissingPidFile(PathBuf),
}

impl ServerError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            ServerError::NoIp { .. } => ReturnCode::NoIp,
            ServerError::Config(_) => ReturnCode::ExcRedisConfig,
            ServerError::Spawn { code, .. } | ServerError::Exit { code, .. } => *code,
            ServerError::LoggingProbe(_) => ReturnCode::TdsLogPubFailed,
            ServerError::StartupTimeout(_) => ReturnCode::TdsStartupTimeout,
            ServerError::MissingPidFile(_) => ReturnCode::TdsWaitFailure,
        }
    }
}

/// Publish `message` on `channel` every `interval` until somebody is
/// listening, or fail after `timeout`.
///
/// Returns the number of listeners seen.
pub async fn wait_for_subscriber(
    bus: &dyn MessageBus,
    channel: &str,
    message: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<usize, ServerError> {
    let deadline = Instant::now() + timeout;
    loop {
        let listeners = bus
            .publish(channel, message)
            .await
            .map_err(ServerError::LoggingProbe)?;
        if listeners > 0 {
            debug!(channel, listeners, "logging channel up");
            return Ok(listeners);
        }
        if Instant::now() >= deadline {
            return Err(ServerError::StartupTimeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

// ─── DaemonHandle ────────────────────────────────────────────────────────

/// A self-daemonized server, tracked through the pid file it writes.
#[derive(Clone)]
pub struct DaemonHandle {
    pub name: &'static str,
    pub pid_file: PathBuf,
    processes: Arc<dyn ProcessTable>,
    /// Time the daemon gets to exit on its own before being signalled.
    drain: Option<Duration>,
}

impl std::fmt::Debug for DaemonHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("name", &self.name)
            .field("pid_file", &self.pid_file)
            .field("drain", &self.drain)
            .finish()
    }
}

impl DaemonHandle {
    pub fn new(
        name: &'static str,
        pid_file: PathBuf,
        processes: Arc<dyn ProcessTable>,
        drain: Option<Duration>,
    ) -> Self {
        Self {
            name,
            pid_file,
            processes,
            drain,
        }
    }

    pub fn pid(&self) -> anyhow::Result<u32> {
        let raw = std::fs::read_to_string(&self.pid_file)
            .with_context(|| format!("reading {}", self.pid_file.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("bad pid in {}: '{}'", self.pid_file.display(), raw.trim()))
    }

    /// Poll until `pid` is gone or `limit` passes. True if still running.
    async fn wait_for_exit(&self, pid: u32, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.processes.is_running(pid) {
            if Instant::now() >= deadline {
                return true;
            }
            tokio::time::sleep(PID_POLL).await;
        }
        false
    }

    /// Stop the daemon: let it drain if configured, then SIGTERM, then
    /// SIGKILL.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let pid = self.pid()?;
        if let Some(drain) = self.drain {
            if !self.wait_for_exit(pid, drain).await {
                info!(pid, "{} exited", self.name);
                return Ok(());
            }
        }
        if !self.processes.is_running(pid) {
            return Ok(());
        }
        info!(pid, "stopping {}", self.name);
        self.processes
            .signal(pid, Signal::SIGTERM)
            .with_context(|| format!("SIGTERM to {} ({pid})", self.name))?;
        if self.wait_for_exit(pid, TERM_WAIT).await {
            warn!(pid, "{} ignored SIGTERM, killing", self.name);
            self.processes
                .signal(pid, Signal::SIGKILL)
                .with_context(|| format!("SIGKILL to {} ({pid})", self.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use tm_bus::MemoryBus;

    /// Process table where pids die when told to, and optionally on their own.
    #[derive(Default)]
    pub(crate) struct FakeTable {
        pub alive: Mutex<Vec<u32>>,
        pub signals: Mutex<Vec<(u32, Signal)>>,
        pub ignore_term: bool,
    }

    impl ProcessTable for FakeTable {
        fn is_running(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }

        fn signal(&self, pid: u32, sig: Signal) -> std::io::Result<()> {
            self.signals.lock().unwrap().push((pid, sig));
            if sig == Signal::SIGKILL || !self.ignore_term {
                self.alive.lock().unwrap().retain(|p| *p != pid);
            }
            Ok(())
        }
    }

    fn handle(dir: &tempfile::TempDir, table: Arc<FakeTable>, drain: Option<Duration>) -> DaemonHandle {
        let pid_file = dir.path().join("redis.pid");
        std::fs::write(&pid_file, "4242\n").unwrap();
        DaemonHandle::new("redis server", pid_file, table, drain)
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_wait_times_out() {
        let bus = MemoryBus::new();
        let err = wait_for_subscriber(
            &bus,
            "tool-meister-chan-to-logging",
            "probe",
            Duration::from_secs(60),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::TdsStartupTimeout);
        assert!(bus.published("tool-meister-chan-to-logging").len() > 500);
    }

    /// Bus whose connection is gone.
    struct LostBus;

    #[async_trait::async_trait]
    impl MessageBus for LostBus {
        async fn publish(&self, channel: &str, _payload: &str) -> tm_bus::Result<usize> {
            Err(BusError::SubscriptionClosed(channel.to_string()))
        }
        async fn set_blob(&self, key: &str, _value: &str) -> tm_bus::Result<()> {
            Err(BusError::SubscriptionClosed(key.to_string()))
        }
        async fn get_blob(&self, key: &str) -> tm_bus::Result<Option<String>> {
            Err(BusError::SubscriptionClosed(key.to_string()))
        }
        async fn delete_blob(&self, key: &str) -> tm_bus::Result<()> {
            Err(BusError::SubscriptionClosed(key.to_string()))
        }
        async fn subscribe(&self, channel: &str) -> tm_bus::Result<tm_bus::Subscription> {
            Err(BusError::SubscriptionClosed(channel.to_string()))
        }
    }

    #[tokio::test]
    async fn subscriber_wait_fails_when_publish_fails() {
        let err = wait_for_subscriber(
            &LostBus,
            "tool-meister-chan-to-logging",
            "hello",
            Duration::from_secs(60),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::LoggingProbe(_)));
        assert_eq!(err.return_code(), ReturnCode::TdsLogPubFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_wait_returns_on_first_listener() {
        let bus = MemoryBus::new();
        let _sub = bus.subscribe("tool-meister-chan-to-logging").await.unwrap();
        let n = wait_for_subscriber(
            &bus,
            "tool-meister-chan-to-logging",
            "probe",
            Duration::from_secs(60),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(bus.published("tool-meister-chan-to-logging").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_escalates_to_kill() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = Arc::new(FakeTable {
            alive: Mutex::new(vec![4242]),
            ignore_term: true,
            ..Default::default()
        });
        handle(&dir, table.clone(), Some(Duration::from_secs(60)))
            .shutdown()
            .await
            .unwrap();
        assert_eq!(
            *table.signals.lock().unwrap(),
            vec![(4242, Signal::SIGTERM), (4242, Signal::SIGKILL)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_of_exited_daemon_sends_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let table = Arc::new(FakeTable::default());
        handle(&dir, table.clone(), None).shutdown().await.unwrap();
        assert!(table.signals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_pid_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let h = DaemonHandle::new(
            "data sink",
            dir.path().join("pbench-tool-data-sink.pid"),
            Arc::new(FakeTable::default()),
            None,
        );
        assert!(h.shutdown().await.is_err());
    }
}
