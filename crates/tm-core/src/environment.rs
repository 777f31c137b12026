//! The environment `pbench-tool-meister-start` runs in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::error;

use crate::endpoint::validate_hostname;
use crate::error::{Result, ReturnCode, StartError};
use crate::params::OptionalMetadata;
use crate::paths;

pub const ENV_INSTALL_DIR: &str = "pbench_install_dir";
pub const ENV_BENCHMARK_RUN_DIR: &str = "benchmark_run_dir";
pub const ENV_HOSTNAME: &str = "_pbench_hostname";
pub const ENV_FULL_HOSTNAME: &str = "_pbench_full_hostname";
pub const ENV_PBENCH_RUN: &str = "pbench_run";
pub const ENV_SSH_OPTS: &str = "ssh_opts";
pub const ENV_TM_LOG_LEVEL: &str = "_PBENCH_TOOL_MEISTER_LOG_LEVEL";
pub const ENV_TDS_LOG_LEVEL: &str = "_PBENCH_TOOL_DATA_SINK_LOG_LEVEL";
pub const ENV_START_LOG_LEVEL: &str = "_PBENCH_TOOL_MEISTER_START_LOG_LEVEL";

/// Validated environment.
#[derive(Debug, Clone, PartialEq)]
pub struct StartEnv {
    pub install_dir: PathBuf,
    pub benchmark_run_dir: PathBuf,
    pub hostname: String,
    pub full_hostname: String,
    pub ssh_opts: String,
    pub optional_md: OptionalMetadata,
    pub tm_log_level: Option<String>,
    pub tds_log_level: String,
}

fn var<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(String::as_str)
}

/// `${pbench_run}`, where tool groups are registered.
pub fn pbench_run(vars: &HashMap<String, String>) -> PathBuf {
    var(vars, ENV_PBENCH_RUN)
        .filter(|v| !v.is_empty())
        .unwrap_or(paths::DEFAULT_PBENCH_RUN)
        .into()
}

impl StartEnv {
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let required = |name: &str| {
            var(vars, name).map(str::to_string).ok_or_else(|| {
                StartError::new(
                    ReturnCode::MissingReqEnvs,
                    format!("failed to fetch required environment variable, '{name}'"),
                )
            })
        };
        let install_dir = required(ENV_INSTALL_DIR)?;
        let run_dir = required(ENV_BENCHMARK_RUN_DIR)?;
        let hostname = required(ENV_HOSTNAME)?;
        let full_hostname = required(ENV_FULL_HOSTNAME)?;

        let install_dir = resolve_dir(
            &install_dir,
            ReturnCode::MissingInstallDir,
            ReturnCode::ExcInstallDir,
            "installation directory",
        )?;

        if hostname.is_empty() || full_hostname.is_empty() {
            return Err(StartError::new(
                ReturnCode::MissingHostnameEnvs,
                format!(
                    "{ENV_HOSTNAME} ('{hostname}') and {ENV_FULL_HOSTNAME} ('{full_hostname}') \
                     environment variables are required to represent the respective hostname \
                     strings ('hostname -s' and 'hostname -f')"
                ),
            ));
        }
        if !validate_hostname(&full_hostname) {
            return Err(StartError::new(
                ReturnCode::BadFullHostname,
                format!("Invalid {ENV_FULL_HOSTNAME}, '{full_hostname}'"),
            ));
        }
        if !validate_hostname(&hostname) {
            return Err(StartError::new(
                ReturnCode::BadHostname,
                format!("Invalid {ENV_HOSTNAME}, '{hostname}'"),
            ));
        }

        let benchmark_run_dir = resolve_dir(
            &run_dir,
            ReturnCode::MissingBenchRunDir,
            ReturnCode::ExcBenchRunDir,
            "benchmark_run_dir directory",
        )?;

        let ssh_opts = var(vars, ENV_SSH_OPTS).unwrap_or_default().to_string();
        let optional = |name: &str| var(vars, name).unwrap_or_default().to_string();
        Ok(Self {
            install_dir,
            benchmark_run_dir,
            hostname,
            full_hostname,
            optional_md: OptionalMetadata {
                config: optional("config"),
                date: optional("date"),
                script: optional("benchmark"),
                ssh_opts: ssh_opts.clone(),
            },
            ssh_opts,
            tm_log_level: var(vars, ENV_TM_LOG_LEVEL)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            tds_log_level: var(vars, ENV_TDS_LOG_LEVEL)
                .filter(|v| !v.is_empty())
                .unwrap_or("info")
                .to_string(),
        })
    }
}

fn resolve_dir(raw: &str, missing: ReturnCode, other: ReturnCode, what: &str) -> Result<PathBuf> {
    match Path::new(raw).canonicalize() {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StartError::new(
            missing,
            format!("{what}, '{raw}', does not exist"),
        )),
        Err(e) => Err(StartError::new(
            other,
            format!("unexpected error resolving {what}, '{raw}'"),
        )
        .with_cause(e)),
    }
}

/// Create `<run dir>/tm` and record a fresh instance id in `tm/.uuid`.
pub fn prepare_tm_dir(benchmark_run_dir: &Path) -> Result<(PathBuf, String)> {
    let tm_dir = paths::tm_dir(benchmark_run_dir);
    std::fs::create_dir(&tm_dir).map_err(|e| {
        StartError::new(
            ReturnCode::ExcCreateTmDir,
            format!(
                "failed to create the local tool meister directory, '{}'",
                tm_dir.display()
            ),
        )
        .with_cause(e)
    })?;
    let instance_uuid = uuid::Uuid::new_v4().to_string();
    let uuid_file = tm_dir.join(paths::UUID_FILE);
    std::fs::write(&uuid_file, &instance_uuid).map_err(|e| {
        error!("failed to create a UUID in '{}': {e}", uuid_file.display());
        StartError::new(
            ReturnCode::ExcCreateUuid,
            format!("failed to create a UUID in '{}'", uuid_file.display()),
        )
        .with_cause(e)
    })?;
    Ok((tm_dir, instance_uuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(dir: &TempDir) -> HashMap<String, String> {
        let inst = dir.path().join("inst");
        let run = dir.path().join("run");
        std::fs::create_dir_all(&inst).unwrap();
        std::fs::create_dir_all(&run).unwrap();
        HashMap::from([
            (ENV_INSTALL_DIR.into(), inst.display().to_string()),
            (ENV_BENCHMARK_RUN_DIR.into(), run.display().to_string()),
            (ENV_HOSTNAME.into(), "ctl".into()),
            (ENV_FULL_HOSTNAME.into(), "ctl.example.com".into()),
        ])
    }

    #[test]
    fn valid_environment() {
        let dir = TempDir::new().unwrap();
        let mut v = vars(&dir);
        v.insert("benchmark".into(), "fio".into());
        v.insert(ENV_SSH_OPTS.into(), "-q".into());
        let env = StartEnv::from_vars(&v).unwrap();
        assert_eq!(env.full_hostname, "ctl.example.com");
        assert_eq!(env.optional_md.script, "fio");
        assert_eq!(env.optional_md.ssh_opts, "-q");
        assert_eq!(env.tds_log_level, "info");
        assert!(env.tm_log_level.is_none());
    }

    #[test]
    fn failures_map_to_codes() {
        let dir = TempDir::new().unwrap();
        // (variable, replacement or None to unset, expected code)
        let cases = [
            (ENV_BENCHMARK_RUN_DIR, None, ReturnCode::MissingReqEnvs),
            (ENV_INSTALL_DIR, Some("/nonexistent/pbench"), ReturnCode::MissingInstallDir),
            (ENV_HOSTNAME, Some(""), ReturnCode::MissingHostnameEnvs),
            (ENV_FULL_HOSTNAME, Some("bad_name.example.com"), ReturnCode::BadFullHostname),
            (ENV_HOSTNAME, Some("-ctl"), ReturnCode::BadHostname),
            (ENV_BENCHMARK_RUN_DIR, Some("/nonexistent/run"), ReturnCode::MissingBenchRunDir),
        ];
        for (name, value, code) in cases {
            let mut v = vars(&dir);
            match value {
                Some(value) => v.insert(name.to_string(), value.to_string()),
                None => v.remove(name),
            };
            assert_eq!(StartEnv::from_vars(&v).unwrap_err().code, code, "{name}");
        }
    }

    #[test]
    fn pbench_run_default() {
        assert_eq!(pbench_run(&HashMap::new()), Path::new("/var/lib/pbench-agent"));
        let v = HashMap::from([(ENV_PBENCH_RUN.to_string(), "/tmp/pr".to_string())]);
        assert_eq!(pbench_run(&v), Path::new("/tmp/pr"));
    }

    #[test]
    fn tm_dir_and_uuid() {
        let dir = TempDir::new().unwrap();
        let (tm, id) = prepare_tm_dir(dir.path()).unwrap();
        assert_eq!(tm, dir.path().join("tm"));
        assert_eq!(std::fs::read_to_string(tm.join(".uuid")).unwrap(), id);
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let err = prepare_tm_dir(dir.path()).unwrap_err();
        assert_eq!(err.code, ReturnCode::ExcCreateTmDir);
    }
}
