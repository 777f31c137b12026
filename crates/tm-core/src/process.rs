//! Spawning and supervising child processes.
//!
//! The start-up sequence never forks. Servers and local agents are started
//! as ordinary children that daemonize themselves: the child we spawn exits
//! once the daemon has taken over, and the daemon is afterwards tracked by
//! the pid it writes to disk. Remote agents are ssh children that exit when
//! the remote side has done the same.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

// ─── CommandSpec ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Collect stdout/stderr. Left off for daemonizing children, whose
    /// daemon would otherwise hold our pipes open.
    pub capture: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// `program arg1 arg2 ...`, for logs.
    pub fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

/// How a child finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Completion {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for diagnostics; signals are reported as -1.
    pub fn status(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

// ─── Traits ──────────────────────────────────────────────────────────────

/// A spawned child that has not been joined yet.
#[async_trait]
pub trait Running: Send {
    fn id(&self) -> Option<u32>;

    async fn wait(self: Box<Self>) -> io::Result<Completion>;

    async fn kill(&mut self) -> io::Result<()>;
}

/// Starts children. Spawning never blocks on the child.
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn Running>>;
}

/// Looks up and signals processes we did not spawn ourselves (daemons).
pub trait ProcessTable: Send + Sync {
    fn is_running(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, sig: Signal) -> io::Result<()>;
}

// ─── TokioRunner ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn Running>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null()).kill_on_drop(spec.capture);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        if spec.capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        Ok(Box::new(TokioProcess {
            child,
            stdout,
            stderr,
        }))
    }
}

type Drain = (Arc<Mutex<String>>, JoinHandle<()>);

/// Read a pipe into a buffer in the background until EOF.
fn drain<R>(mut pipe: R) -> Drain
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buf = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&buf);
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        while let Ok(n) = pipe.read(&mut chunk).await {
            if n == 0 {
                break;
            }
            if let Ok(mut b) = sink.lock() {
                b.push_str(&String::from_utf8_lossy(&chunk[..n]));
            }
        }
    });
    (buf, handle)
}

/// Give readers a moment to hit EOF after the child exits; a grandchild
/// holding the pipe must not stall the join.
async fn collect(drain: Option<Drain>) -> String {
    let Some((buf, handle)) = drain else {
        return String::new();
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    buf.lock().map(|b| b.clone()).unwrap_or_default()
}

struct TokioProcess {
    child: Child,
    stdout: Option<Drain>,
    stderr: Option<Drain>,
}

#[async_trait]
impl Running for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(mut self: Box<Self>) -> io::Result<Completion> {
        let status = self.child.wait().await?;
        Ok(Completion {
            code: status.code(),
            stdout: collect(self.stdout.take()).await,
            stderr: collect(self.stderr.take()).await,
        })
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

// ─── SystemProcesses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn is_running(&self, pid: u32) -> bool {
        let Ok(pid) = i32::try_from(pid) else {
            return false;
        };
        // Signal 0 only checks that the pid exists.
        !matches!(signal::kill(Pid::from_raw(pid), None), Err(nix::errno::Errno::ESRCH))
    }

    fn signal(&self, pid: u32, sig: Signal) -> io::Result<()> {
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        signal::kill(Pid::from_raw(pid), sig).map_err(io::Error::from)
    }
}
