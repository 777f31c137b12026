//! Fan-out of tool meister creation across the hosts of a tool group.
//!
//! Every host gets its launch issued before any launch is joined, so start-up
//! takes as long as the slowest host and every failing host is reported.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::error::ReturnCode;
use crate::hosts::LocalHosts;
use crate::paths;
use crate::process::{CommandSpec, ProcessRunner, Running};
use crate::ssh::{SshTemplate, PARAM_KEY_PLACEHOLDER};
use crate::tool_group::ToolGroup;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("failures encountered creating Tool Meisters ({failures} of {total})")]
    Failures { failures: usize, total: usize },

    #[error("number of created Tool Meisters, {successes}, does not match the expected number of Tool Meisters, {total}")]
    Missing { successes: usize, total: usize },

    #[error("internal error: tool meister successes ({successes}) and failures ({failures}) don't add up to {total}")]
    Miscount {
        successes: usize,
        failures: usize,
        total: usize,
    },
}

impl LaunchError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            LaunchError::Failures { .. } => ReturnCode::TmFailures,
            LaunchError::Missing { .. } | LaunchError::Miscount { .. } => ReturnCode::TmMissing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Never started; counted as a failure without a join.
    Failed,
    /// Local child, joined by waiting on it.
    Forked,
    /// Remote ssh session, joined through the template.
    Spawned,
}

struct LaunchRecord {
    host: String,
    disposition: Disposition,
    child: Option<Box<dyn Running>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchSummary {
    pub successes: usize,
    pub failures: usize,
    pub total: usize,
}

/// How to start a tool meister; shared by every host of the group.
#[derive(Debug, Clone)]
pub struct AgentLaunch {
    pub install_dir: PathBuf,
    /// Redis host as seen from remote hosts.
    pub redis_host: String,
    /// Redis host as seen from this host.
    pub redis_local_host: String,
    pub redis_port: u16,
    pub instance_uuid: String,
    /// `_PBENCH_TOOL_MEISTER_LOG_LEVEL`, passed through when set.
    pub log_level: Option<String>,
}

impl AgentLaunch {
    fn args(&self, redis_host: &str, param_key: &str) -> Vec<String> {
        let mut args = vec![
            redis_host.to_string(),
            self.redis_port.to_string(),
            param_key.to_string(),
            self.instance_uuid.clone(),
            "yes".to_string(),
        ];
        if let Some(level) = &self.log_level {
            args.push(level.clone());
        }
        args
    }

    pub fn local_command(&self, param_key: &str) -> CommandSpec {
        CommandSpec::new(paths::tool_meister_bin(&self.install_dir))
            .args(self.args(&self.redis_local_host, param_key))
    }

    /// Remote command line with the parameter key left as a placeholder.
    pub fn remote_command(&self) -> String {
        let mut cmd = paths::tool_meister_bin(&self.install_dir).display().to_string();
        for a in self.args(&self.redis_host, PARAM_KEY_PLACEHOLDER) {
            cmd.push(' ');
            cmd.push_str(&a);
        }
        cmd
    }

    /// Start a tool meister on every host of `group` and join them all.
    pub async fn launch_all(
        &self,
        group: &ToolGroup,
        locality: &LocalHosts,
        runner: &Arc<dyn ProcessRunner>,
        ssh: &SshTemplate,
    ) -> Result<LaunchSummary, LaunchError> {
        let mut records = Vec::with_capacity(group.hosts.len());
        for host in group.hostnames() {
            let key = paths::tm_param_key(&group.name, host);
            let record = if locality.is_local(host).await {
                debug!(host, "starting localhost tool meister");
                match runner.spawn(&self.local_command(&key)) {
                    Ok(child) => LaunchRecord {
                        host: host.to_string(),
                        disposition: Disposition::Forked,
                        child: Some(child),
                    },
                    Err(e) => {
                        error!(host = %host, error = %e, "failed to create localhost tool meister, daemonized");
                        failed(host)
                    }
                }
            } else {
                debug!(host, "starting remote tool meister");
                match ssh.start(host, Some(&key)) {
                    Ok(()) => LaunchRecord {
                        host: host.to_string(),
                        disposition: Disposition::Spawned,
                        child: None,
                    },
                    Err(e) => {
                        error!(host = %host, error = %e, "failed to create a tool meister instance");
                        failed(host)
                    }
                }
            };
            records.push(record);
        }
        join_all(records, ssh).await
    }
}

fn failed(host: &str) -> LaunchRecord {
    LaunchRecord {
        host: host.to_string(),
        disposition: Disposition::Failed,
        child: None,
    }
}

async fn join_all(records: Vec<LaunchRecord>, ssh: &SshTemplate) -> Result<LaunchSummary, LaunchError> {
    let total = records.len();
    let mut successes = 0;
    let mut failures = 0;

    for record in records {
        let host = record.host;
        let joined = match (record.disposition, record.child) {
            (Disposition::Failed, _) => {
                failures += 1;
                continue;
            }
            (Disposition::Forked, Some(child)) => {
                let pid = child.id();
                child.wait().await.map(|done| (done, pid))
            }
            (Disposition::Forked, None) => Err(std::io::Error::other("no child recorded")),
            (Disposition::Spawned, _) => ssh.wait(&host).await.map(|done| (done, None)),
        };
        match joined {
            Ok((done, _)) if done.success() => successes += 1,
            Ok((done, pid)) => {
                failures += 1;
                if record.disposition == Disposition::Forked {
                    error!(
                        host = %host,
                        "failed to start tool meister on local host '{host}' (pid {}), exit status: {}",
                        pid.unwrap_or_default(),
                        done.status()
                    );
                } else {
                    error!(
                        host = %host,
                        stderr = %done.stderr.trim(),
                        "failed to start tool meister on remote host '{host}', exit status: {}",
                        done.status()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                error!(host = %host, error = %e, "failed to create a tool meister instance");
            }
        }
    }

    info!(successes, failures, total, "tool meister launches joined");
    tally(successes, failures, total)
}

fn tally(successes: usize, failures: usize, total: usize) -> Result<LaunchSummary, LaunchError> {
    if successes + failures != total {
        return Err(LaunchError::Miscount {
            successes,
            failures,
            total,
        });
    }
    if failures > 0 {
        return Err(LaunchError::Failures { failures, total });
    }
    if successes != total {
        return Err(LaunchError::Missing { successes, total });
    }
    Ok(LaunchSummary {
        successes,
        failures,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Completion;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io;
    use std::net::IpAddr;
    use std::path::Path;
    use std::sync::Mutex;

    struct Exit(i32);

    #[async_trait]
    impl Running for Exit {
        fn id(&self) -> Option<u32> {
            Some(4000)
        }
        async fn wait(self: Box<Self>) -> io::Result<Completion> {
            Ok(Completion::exited(self.0))
        }
        async fn kill(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Outcome per host, keyed by the host name found in the command line.
    /// `None` makes the spawn itself fail.
    struct Scripted {
        outcomes: HashMap<String, Option<i32>>,
        spawned: Mutex<Vec<CommandSpec>>,
    }

    impl Scripted {
        fn new(outcomes: &[(&str, Option<i32>)]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: outcomes.iter().map(|(h, o)| (h.to_string(), *o)).collect(),
                spawned: Mutex::new(Vec::new()),
            })
        }
    }

    impl ProcessRunner for Scripted {
        fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn Running>> {
            self.spawned.lock().unwrap().push(spec.clone());
            let line = spec.display();
            let outcome = self
                .outcomes
                .iter()
                .find(|(h, _)| line.contains(&format!("-{h} ")) || spec.args.contains(h))
                .map(|(_, o)| *o)
                .unwrap_or(Some(0));
            match outcome {
                Some(code) => Ok(Box::new(Exit(code))),
                None => Err(io::Error::new(io::ErrorKind::NotFound, "no such binary")),
            }
        }
    }

    fn group(hosts: &[&str]) -> (tempfile::TempDir, ToolGroup) {
        let dir = tempfile::TempDir::new().unwrap();
        for h in hosts {
            let hd = dir.path().join("tools-v1-default").join(h);
            std::fs::create_dir_all(&hd).unwrap();
            std::fs::write(hd.join("iostat"), "").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("tools-v1-default")).unwrap();
        let g = ToolGroup::load(dir.path(), "default").unwrap();
        (dir, g)
    }

    fn launch() -> AgentLaunch {
        AgentLaunch {
            install_dir: PathBuf::from("/opt/pbench-agent"),
            redis_host: "203.0.113.5".into(),
            redis_local_host: "localhost".into(),
            redis_port: 17001,
            instance_uuid: "u-1".into(),
            log_level: None,
        }
    }

    fn locality() -> LocalHosts {
        LocalHosts::new(["ctl.example.com"], Vec::<IpAddr>::new())
    }

    async fn run(hosts: &[&str], outcomes: &[(&str, Option<i32>)]) -> (Result<LaunchSummary, LaunchError>, Arc<Scripted>) {
        let (_dir, g) = group(hosts);
        let scripted = Scripted::new(outcomes);
        let runner: Arc<dyn ProcessRunner> = scripted.clone();
        let a = launch();
        let ssh = SshTemplate::new(runner.clone(), "ssh", "", a.remote_command());
        let res = a.launch_all(&g, &locality(), &runner, &ssh).await;
        (res, scripted)
    }

    #[test]
    fn command_lines() {
        let a = AgentLaunch {
            log_level: Some("debug".into()),
            ..launch()
        };
        assert_eq!(
            a.local_command("tm-default-ctl").display(),
            "/opt/pbench-agent/tool-meister/pbench-tool-meister localhost 17001 tm-default-ctl u-1 yes debug"
        );
        assert_eq!(
            launch().remote_command(),
            "/opt/pbench-agent/tool-meister/pbench-tool-meister 203.0.113.5 17001 {tm_param_key} u-1 yes"
        );
        assert_eq!(Path::new(&a.install_dir), Path::new("/opt/pbench-agent"));
    }

    #[tokio::test]
    async fn all_hosts_succeed() {
        let (res, scripted) = run(&["ctl.example.com", "203.0.113.9"], &[]).await;
        assert_eq!(
            res.unwrap(),
            LaunchSummary {
                successes: 2,
                failures: 0,
                total: 2
            }
        );
        let spawned = scripted.spawned.lock().unwrap();
        assert_eq!(spawned.len(), 2);
        let remote = spawned.iter().find(|s| s.program == Path::new("ssh")).unwrap();
        assert_eq!(remote.args[0], "203.0.113.9");
        assert!(remote.args[1].contains("tm-default-203.0.113.9"));
        let local = spawned.iter().find(|s| s.program != Path::new("ssh")).unwrap();
        assert!(local.args.contains(&"tm-default-ctl.example.com".to_string()));
    }

    #[tokio::test]
    async fn failures_are_counted_across_every_mix() {
        let hosts = ["ctl.example.com", "203.0.113.9", "203.0.113.10"];
        let cases: Vec<Vec<(&str, Option<i32>)>> = vec![
            vec![("203.0.113.9", Some(1))],
            vec![("ctl.example.com", None)],
            vec![("ctl.example.com", Some(2)), ("203.0.113.10", None)],
            vec![
                ("ctl.example.com", Some(1)),
                ("203.0.113.9", Some(255)),
                ("203.0.113.10", Some(1)),
            ],
        ];
        for outcomes in cases {
            let expected_failures = outcomes.iter().filter(|(_, o)| *o != Some(0)).count();
            let (res, scripted) = run(&hosts, &outcomes).await;
            assert_eq!(
                res.unwrap_err(),
                LaunchError::Failures {
                    failures: expected_failures,
                    total: 3
                },
                "{outcomes:?}"
            );
            // Every host was attempted even though some failed.
            assert_eq!(scripted.spawned.lock().unwrap().len(), 3);
        }
    }

    struct Killed;

    #[async_trait]
    impl Running for Killed {
        fn id(&self) -> Option<u32> {
            Some(4001)
        }
        async fn wait(self: Box<Self>) -> io::Result<Completion> {
            Ok(Completion {
                code: None,
                stdout: String::new(),
                stderr: "Killed".into(),
            })
        }
        async fn kill(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct KillsEverything;

    impl ProcessRunner for KillsEverything {
        fn spawn(&self, _spec: &CommandSpec) -> io::Result<Box<dyn Running>> {
            Ok(Box::new(Killed))
        }
    }

    #[tokio::test]
    async fn signalled_tool_meisters_are_failures() {
        let (_dir, g) = group(&["ctl.example.com", "203.0.113.9"]);
        let runner: Arc<dyn ProcessRunner> = Arc::new(KillsEverything);
        let a = launch();
        let ssh = SshTemplate::new(runner.clone(), "ssh", "", a.remote_command());
        let err = a.launch_all(&g, &locality(), &runner, &ssh).await.unwrap_err();
        assert_eq!(err, LaunchError::Failures { failures: 2, total: 2 });
        assert_eq!(err.return_code(), ReturnCode::TmFailures);
    }

    #[test]
    fn tally_rejects_counts_that_do_not_add_up() {
        let err = tally(1, 0, 2).unwrap_err();
        assert_eq!(
            err,
            LaunchError::Miscount {
                successes: 1,
                failures: 0,
                total: 2
            }
        );
        assert_eq!(err.return_code(), ReturnCode::TmMissing);
        assert!(matches!(tally(2, 1, 2), Err(LaunchError::Miscount { .. })));
        assert_eq!(
            tally(2, 0, 2).unwrap(),
            LaunchSummary {
                successes: 2,
                failures: 0,
                total: 2
            }
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            LaunchError::Failures { failures: 1, total: 2 }.return_code(),
            ReturnCode::TmFailures
        );
        assert_eq!(
            LaunchError::Missing { successes: 1, total: 2 }.return_code(),
            ReturnCode::TmMissing
        );
    }
}
