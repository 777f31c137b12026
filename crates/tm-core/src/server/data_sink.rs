use std::path::PathBuf;
use std::time::Duration;

use tm_bus::{Channel, ChannelSuffix, MessageBus};
use tracing::info;

use super::{wait_for_subscriber, DaemonHandle, ServerError};
use crate::error::ReturnCode;
use crate::paths;
use crate::process::CommandSpec;
use crate::services::Services;

const NAME: &str = "pbench data sink";
const PROBE_MESSAGE: &str = "pbench-tool-meister-start - verify logging channel up";

/// What the data sink needs to find its parameters.
#[derive(Debug, Clone)]
pub struct DataSinkLaunch {
    pub install_dir: PathBuf,
    pub tm_dir: PathBuf,
    pub redis_host: String,
    pub redis_port: u16,
    pub param_key: String,
    pub instance_uuid: String,
    pub log_level: String,
    pub channel_prefix: String,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl DataSinkLaunch {
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(paths::data_sink_bin(&self.install_dir))
            .args([
                self.redis_host.clone(),
                self.redis_port.to_string(),
                self.param_key.clone(),
                self.instance_uuid.clone(),
                "yes".to_string(),
                self.log_level.clone(),
            ])
            .cwd(&self.tm_dir)
    }
}

/// Start the data sink and wait until it is really up.
///
/// The spawned process daemonizes and exits 0 once the daemon has taken
/// over. The daemon is up when it listens on the logging channel and has
/// written its pid file into the working directory.
pub async fn start_data_sink(
    launch: &DataSinkLaunch,
    bus: &dyn MessageBus,
    services: &Services,
) -> Result<DaemonHandle, ServerError> {
    let spawn_err = |source| ServerError::Spawn {
        name: NAME,
        code: ReturnCode::TdsForkFailed,
        source,
    };
    let spec = launch.command();
    info!("starting tool data sink: {}", spec.display());
    let done = services
        .runner
        .spawn(&spec)
        .map_err(spawn_err)?
        .wait()
        .await
        .map_err(spawn_err)?;
    if !done.success() {
        return Err(ServerError::Exit {
            name: NAME,
            code: ReturnCode::TdsWaitFailure,
            status: done.status(),
        });
    }

    let logging = Channel::new(&launch.channel_prefix, ChannelSuffix::ToLogging).name();
    wait_for_subscriber(
        bus,
        &logging,
        PROBE_MESSAGE,
        launch.startup_timeout,
        launch.poll_interval,
    )
    .await?;

    let pid_file = launch.tm_dir.join(paths::DATA_SINK_PID_FILE);
    if !pid_file.exists() {
        return Err(ServerError::MissingPidFile(pid_file));
    }
    Ok(DaemonHandle::new(
        NAME,
        pid_file,
        services.processes.clone(),
        Some(launch.shutdown_grace),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::LocalHosts;
    use crate::process::{Completion, ProcessRunner, Running};
    use crate::server::tests::FakeTable;
    use crate::services::RedisConnector;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tm_bus::MemoryBus;

    struct Exit(i32);

    #[async_trait]
    impl Running for Exit {
        fn id(&self) -> Option<u32> {
            Some(100)
        }
        async fn wait(self: Box<Self>) -> std::io::Result<Completion> {
            Ok(Completion::exited(self.0))
        }
        async fn kill(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Pretends to be the data sink: writes the pid file on spawn.
    struct FakeSink {
        status: i32,
        write_pid: bool,
    }

    impl ProcessRunner for FakeSink {
        fn spawn(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn Running>> {
            if self.write_pid {
                let dir = spec.cwd.clone().unwrap();
                std::fs::write(dir.join(paths::DATA_SINK_PID_FILE), "777").unwrap();
            }
            Ok(Box::new(Exit(self.status)))
        }
    }

    fn services(runner: FakeSink) -> Services {
        Services {
            runner: Arc::new(runner),
            processes: Arc::new(FakeTable::default()),
            connector: Arc::new(RedisConnector),
            locality: LocalHosts::default(),
        }
    }

    fn launch(tm_dir: PathBuf) -> DataSinkLaunch {
        DataSinkLaunch {
            install_dir: PathBuf::from("/opt/pbench-agent"),
            tm_dir,
            redis_host: "localhost".into(),
            redis_port: 17001,
            param_key: "tds-default".into(),
            instance_uuid: "u-1".into(),
            log_level: "info".into(),
            channel_prefix: "tool-meister-chan".into(),
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(60),
        }
    }

    #[test]
    fn command_line() {
        let spec = launch(PathBuf::from("/run/tm")).command();
        assert_eq!(
            spec.display(),
            "/opt/pbench-agent/tool-meister/pbench-tool-data-sink localhost 17001 tds-default u-1 yes info"
        );
        assert_eq!(spec.cwd.as_deref(), Some(std::path::Path::new("/run/tm")));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_when_listening_with_pid_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = MemoryBus::new();
        let _logging = bus.subscribe("tool-meister-chan-to-logging").await.unwrap();
        let svc = services(FakeSink {
            status: 0,
            write_pid: true,
        });
        let handle = start_data_sink(&launch(dir.path().into()), &bus, &svc)
            .await
            .unwrap();
        assert_eq!(handle.pid().unwrap(), 777);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_modes_map_to_codes() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = MemoryBus::new();

        let svc = services(FakeSink {
            status: 1,
            write_pid: false,
        });
        let err = start_data_sink(&launch(dir.path().into()), &bus, &svc)
            .await
            .unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::TdsWaitFailure);

        let svc = services(FakeSink {
            status: 0,
            write_pid: false,
        });
        let err = start_data_sink(&launch(dir.path().into()), &bus, &svc)
            .await
            .unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::TdsStartupTimeout);

        let _logging = bus.subscribe("tool-meister-chan-to-logging").await.unwrap();
        let err = start_data_sink(&launch(dir.path().into()), &bus, &svc)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::MissingPidFile(_)));
    }
}
