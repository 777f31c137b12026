use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::process::{CommandSpec, Completion, ProcessRunner, Running};

/// Placeholder in a remote command replaced per host by [`SshTemplate::start`].
pub const PARAM_KEY_PLACEHOLDER: &str = "{tm_param_key}";

/// Runs one command line on many hosts over ssh, concurrently.
///
/// `start` only submits; `wait` joins one host. Sessions not yet joined can
/// be killed with `abort`, which makes the template usable as a rollback
/// action while a fan-out is still in flight.
#[derive(Clone)]
pub struct SshTemplate {
    runner: Arc<dyn ProcessRunner>,
    ssh: PathBuf,
    opts: Vec<String>,
    command: String,
    sessions: Arc<Mutex<HashMap<String, Box<dyn Running>>>>,
}

impl std::fmt::Debug for SshTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTemplate")
            .field("ssh", &self.ssh)
            .field("opts", &self.opts)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl SshTemplate {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        ssh: impl Into<PathBuf>,
        ssh_opts: &str,
        command: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            ssh: ssh.into(),
            opts: split_opts(ssh_opts),
            command: command.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The ssh invocation for `host`.
    pub fn command_for(&self, host: &str, param_key: Option<&str>) -> CommandSpec {
        let remote = match param_key {
            Some(key) => self.command.replace(PARAM_KEY_PLACEHOLDER, key),
            None => self.command.clone(),
        };
        CommandSpec::new(&self.ssh)
            .args(self.opts.iter().cloned())
            .arg(host)
            .arg(remote)
            .capture()
    }

    pub fn start(&self, host: &str, param_key: Option<&str>) -> io::Result<()> {
        let spec = self.command_for(host, param_key);
        debug!(host, cmd = %spec.display(), "ssh start");
        let session = self.runner.spawn(&spec)?;
        self.lock().insert(host.to_string(), session);
        Ok(())
    }

    /// Join the session started for `host`.
    pub async fn wait(&self, host: &str) -> io::Result<Completion> {
        let session = self.lock().remove(host).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no ssh session started for {host}"),
            )
        })?;
        session.wait().await
    }

    /// Kill every session that has not been joined.
    pub async fn abort(&self) {
        let sessions: Vec<_> = self.lock().drain().collect();
        for (host, mut session) in sessions {
            if let Err(e) = session.kill().await {
                warn!(host = %host, error = %e, "failed to stop ssh session");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Box<dyn Running>>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Split `ssh_opts` into words, honoring single and double quotes and
/// backslash escapes the way a POSIX shell would.
pub fn split_opts(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut cur = String::new();
    let mut in_word = false;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    cur.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(n) = chars.next() {
                                cur.push(n);
                            }
                        }
                        _ => cur.push(q),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(n) = chars.next() {
                    cur.push(n);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut cur));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                cur.push(c);
            }
        }
    }
    if in_word {
        words.push(cur);
    }
    words
}
