use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tm_core::environment::{ENV_FULL_HOSTNAME, ENV_HOSTNAME, ENV_START_LOG_LEVEL};
use tm_core::{ReturnCode, Services, Settings, StartRequest};
use tracing::{debug, error};

#[derive(Parser)]
#[command(
    name = "pbench-tool-meister-start",
    about = "Start the Tool Meister sub-system for a registered tool group",
    version
)]
struct Cli {
    /// Tool group whose tools are started on every registered host
    tool_group: String,

    /// System information to collect: none, default, all, or a comma list
    #[arg(long)]
    sysinfo: Option<String>,

    /// "create" to start Redis, the data sink and the tool meisters here;
    /// "existing" when they are already running
    #[arg(long, env = "PBENCH_ORCHESTRATE", default_value = "create")]
    orchestrate: String,

    /// Redis server as [bindhost][:port][;[host][:port]]
    #[arg(long, env = "PBENCH_REDIS_SERVER")]
    redis_server: Option<String>,

    /// Tool data sink as [bindhost][:port][;[host][:port]]
    #[arg(long, env = "PBENCH_TOOL_DATA_SINK")]
    tool_data_sink: Option<String>,

    /// YAML file overriding the built-in settings
    #[arg(long, env = "PBENCH_TM_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match std::env::var(ENV_START_LOG_LEVEL).as_deref() {
        Ok("debug") => tracing::Level::DEBUG,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match start(cli).await {
        Ok(code) => ExitCode::from(code.code() as u8),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn start(cli: Cli) -> anyhow::Result<ReturnCode> {
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let vars: HashMap<String, String> = std::env::vars().collect();
    let services = Services::system(
        vars.get(ENV_HOSTNAME).map(String::as_str).unwrap_or_default(),
        vars.get(ENV_FULL_HOSTNAME).map(String::as_str).unwrap_or_default(),
    );
    let req = StartRequest {
        tool_group: cli.tool_group,
        sysinfo: cli.sysinfo,
        orchestrate: cli.orchestrate,
        redis_server: cli.redis_server,
        tool_data_sink: cli.tool_data_sink,
        settings,
    };

    let outcome = tm_core::run(&req, &vars, &services).await;
    debug!(code = %outcome.code, "{}", outcome.message);
    Ok(outcome.code)
}
