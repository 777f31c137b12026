use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory and file names
// ---------------------------------------------------------------------------

/// Prefix of tool group directories under `${pbench_run}`.
pub const TOOL_GROUP_DIR_PREFIX: &str = "tools-v1";
pub const TRIGGER_FILE: &str = "__trigger__";
pub const LABEL_FILE: &str = "__label__";
/// Suffix of marker files telling a tool meister not to check the install.
pub const NOINSTALL_SUFFIX: &str = "__noinstall__";

/// Working directory for orchestrated servers, under the run directory.
pub const TM_DIR: &str = "tm";
pub const UUID_FILE: &str = ".uuid";
pub const REDIS_CONF_FILE: &str = "redis.conf";
pub const REDIS_PID_FILE: &str = "redis.pid";
pub const REDIS_LOG_FILE: &str = "redis.log";
pub const DATA_SINK_PID_FILE: &str = "pbench-tool-data-sink.pid";

pub const TOOL_META_FILE: &str = "tool-scripts/meta.json";
pub const TOOL_MEISTER_BIN_DIR: &str = "tool-meister";
pub const DATA_SINK_BIN: &str = "pbench-tool-data-sink";
pub const TOOL_MEISTER_BIN: &str = "pbench-tool-meister";

pub const DEFAULT_PBENCH_RUN: &str = "/var/lib/pbench-agent";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn tool_group_dir_name(group: &str) -> String {
    format!("{TOOL_GROUP_DIR_PREFIX}-{group}")
}

pub fn tool_group_dir(pbench_run: &Path, group: &str) -> PathBuf {
    pbench_run.join(tool_group_dir_name(group))
}

pub fn tm_dir(benchmark_run_dir: &Path) -> PathBuf {
    benchmark_run_dir.join(TM_DIR)
}

/// Where `init` asks the tool meisters to put persistent tool output.
pub fn tools_output_dir(benchmark_run_dir: &Path, group: &str) -> PathBuf {
    benchmark_run_dir.join(format!("tools-{group}"))
}

pub fn sysinfo_dir(benchmark_run_dir: &Path) -> PathBuf {
    benchmark_run_dir.join("sysinfo").join("beg")
}

pub fn tool_meister_bin(install_dir: &Path) -> PathBuf {
    install_dir.join(TOOL_MEISTER_BIN_DIR).join(TOOL_MEISTER_BIN)
}

pub fn data_sink_bin(install_dir: &Path) -> PathBuf {
    install_dir.join(TOOL_MEISTER_BIN_DIR).join(DATA_SINK_BIN)
}

pub fn tool_meta_file(install_dir: &Path) -> PathBuf {
    install_dir.join(TOOL_META_FILE)
}

/// Bus key holding one tool meister's start-up parameters.
pub fn tm_param_key(group: &str, host: &str) -> String {
    format!("tm-{group}-{host}")
}

/// Bus key holding the data sink's start-up parameters.
pub fn tds_param_key(group: &str) -> String {
    format!("tds-{group}")
}
