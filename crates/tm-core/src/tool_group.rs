//! Registered tool groups.
//!
//! A tool group lives in `${pbench_run}/tools-v1-<group>/`. Each
//! sub-directory is a host; each regular file in a host directory is a tool
//! registered on that host, its content being the tool's options. A host's
//! `__label__` file carries its label, and the group's `__trigger__` file an
//! optional trigger specification. A `<tool>.__noinstall__` file marks the
//! tool as one the host's tool meister must not install.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::ReturnCode;
use crate::io::copy_dir;
use crate::paths;

#[derive(Debug, Error)]
pub enum ToolGroupError {
    #[error("invalid tool group name '{0}'")]
    BadName(String),

    #[error("bad tool group, '{name}': directory {} does not exist", .path.display())]
    NotFound { name: String, path: PathBuf },

    #[error("failed to read tool group '{name}': {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
}

impl ToolGroupError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            ToolGroupError::BadName(_) | ToolGroupError::NotFound { .. } => {
                ReturnCode::BadToolGroup
            }
            ToolGroupError::Io { .. } => ReturnCode::ToolGroupExc,
        }
    }
}

/// One host of a tool group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostEntry {
    /// Tool name to option string.
    pub tools: BTreeMap<String, String>,
    /// Tools registered with installation disabled.
    pub noinstall: BTreeSet<String>,
    pub label: String,
    /// Address this host sees the controller connect from, when probed.
    pub origin_host: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolGroup {
    pub name: String,
    pub path: PathBuf,
    pub trigger: Option<String>,
    pub hosts: BTreeMap<String, HostEntry>,
}

impl ToolGroup {
    pub fn load(pbench_run: &Path, name: &str) -> Result<Self, ToolGroupError> {
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(ToolGroupError::BadName(name.to_string()));
        }
        let path = paths::tool_group_dir(pbench_run, name);
        if !path.is_dir() {
            return Err(ToolGroupError::NotFound {
                name: name.to_string(),
                path,
            });
        }
        let io_err = |source| ToolGroupError::Io {
            name: name.to_string(),
            source,
        };

        let trigger = read_trimmed(&path.join(paths::TRIGGER_FILE)).map_err(io_err)?;

        let mut hosts = BTreeMap::new();
        for entry in std::fs::read_dir(&path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_dir() {
                continue;
            }
            let host = entry.file_name().to_string_lossy().into_owned();
            hosts.insert(host, load_host(&entry.path()).map_err(io_err)?);
        }

        Ok(Self {
            name: name.to_string(),
            path,
            trigger,
            hosts,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn set_origin(&mut self, host: &str, origin: &str) {
        if let Some(entry) = self.hosts.get_mut(host) {
            entry.origin_host = Some(origin.to_string());
        }
    }

    /// Copy the group's registration into the run directory, so the inputs of
    /// the run are recorded alongside its results.
    pub fn archive(&self, benchmark_run_dir: &Path) -> Result<PathBuf, ToolGroupError> {
        let dst = benchmark_run_dir.join(paths::tool_group_dir_name(&self.name));
        copy_dir(&self.path, &dst).map_err(|source| ToolGroupError::Io {
            name: self.name.clone(),
            source,
        })?;
        Ok(dst)
    }
}

fn load_host(dir: &Path) -> std::io::Result<HostEntry> {
    let mut host = HostEntry::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == paths::LABEL_FILE {
            host.label = read_trimmed(&entry.path())?.unwrap_or_default();
        } else if let Some(tool) = name.strip_suffix(paths::NOINSTALL_SUFFIX) {
            host.noinstall.insert(tool.trim_end_matches('.').to_string());
        } else {
            let opts = std::fs::read_to_string(entry.path())?;
            host.tools.insert(name, opts.trim_end().to_string());
        }
    }
    Ok(host)
}

fn read_trimmed(path: &Path) -> std::io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
