//! The start-up sequence of the Tool Meister sub-system.
//!
//! ```text
//!  1  load tool group            (empty group: done)
//!  2  validate inputs, endpoints
//!  2a ssh probe of remotes       create only
//!  3  start Redis                create only
//!  4  connect, subscribe to-client
//!  5  archive group, push blobs
//!  6  start data sink            create only
//!  7  launch tool meisters       create only
//!  8  wait for "startup" reply
//!  9  check operational report
//! 10  sysinfo (best effort), init
//! ```
//!
//! Every resource acquired on the way registers a compensating action; any
//! failure, or an interrupt, unwinds them newest-first.

mod probe;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tm_bus::{Channel, ChannelSuffix, Client, MessageBus};
use tracing::{debug, error, info, warn};

use crate::cleanup::{AbortSessions, Cleanup, DeleteBlob, RemoveDir, StopDaemon, TerminateGroup};
use crate::endpoint::{EndpointSpec, ServerRole};
use crate::environment::{self, prepare_tm_dir, StartEnv};
use crate::error::{Cause, Outcome, Result, ReturnCode, StartError};
use crate::launcher::AgentLaunch;
use crate::params::{AgentParams, DataSinkParams};
use crate::paths;
use crate::report::OperationalReport;
use crate::server::{start_data_sink, start_redis, DataSinkLaunch};
use crate::services::Services;
use crate::settings::Settings;
use crate::ssh::SshTemplate;
use crate::sysinfo::verify_sysinfo;
use crate::tool_group::ToolGroup;
use crate::tool_metadata::ToolMetadata;

pub use probe::{discover_origins, PROBE_COMMAND};

/// Whether this command starts the servers and agents itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orchestrate {
    Create,
    /// Redis, the data sink and the tool meisters are run by someone else.
    Existing,
}

impl FromStr for Orchestrate {
    type Err = StartError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Orchestrate::Create),
            "existing" => Ok(Orchestrate::Existing),
            other => Err(StartError::new(
                ReturnCode::InvalidOrchestrate,
                format!("invalid --orchestrate directive, '{other}', expected one of create, existing"),
            )),
        }
    }
}

/// Caller-supplied inputs of one start-up.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub tool_group: String,
    pub sysinfo: Option<String>,
    /// Validated at run time so a bad value yields its own exit code.
    pub orchestrate: String,
    pub redis_server: Option<String>,
    pub tool_data_sink: Option<String>,
    pub settings: Settings,
}

impl StartRequest {
    pub fn new(tool_group: impl Into<String>) -> Self {
        Self {
            tool_group: tool_group.into(),
            sysinfo: None,
            orchestrate: "create".to_string(),
            redis_server: None,
            tool_data_sink: None,
            settings: Settings::default(),
        }
    }
}

/// Run the start-up sequence, unwinding on failure or Ctrl-C.
pub async fn run(req: &StartRequest, vars: &HashMap<String, String>, services: &Services) -> Outcome {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("unable to listen for interrupts: {e}");
            std::future::pending::<()>().await;
        }
    };
    run_with_interrupt(req, vars, services, interrupt).await
}

/// [`run`] with the interrupt source supplied by the caller.
pub async fn run_with_interrupt<F>(
    req: &StartRequest,
    vars: &HashMap<String, String>,
    services: &Services,
    interrupt: F,
) -> Outcome
where
    F: Future<Output = ()>,
{
    let mut recovery = Cleanup::new();
    let result = {
        let steps = start(req, vars, services, &mut recovery);
        tokio::pin!(steps, interrupt);
        tokio::select! {
            r = &mut steps => r,
            () = &mut interrupt => Err(StartError::interrupted()),
        }
    };
    match result {
        Ok(()) => Outcome::success(),
        Err(e) => {
            log_failure(&e);
            recovery.unwind().await;
            e.into()
        }
    }
}

fn log_failure(e: &StartError) {
    let cause = e
        .cause
        .as_ref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default();
    match e.code {
        ReturnCode::InitFailed => error!("error {}{cause}", e.message),
        ReturnCode::KeyboardInterrupt => warn!("{}", e.message),
        _ => warn!("{}{cause}", e.message),
    }
}

/// Create-mode state: where the local daemons live and how to reach remotes.
struct LocalRun {
    ssh: PathBuf,
    tm_dir: PathBuf,
}

async fn start(
    req: &StartRequest,
    vars: &HashMap<String, String>,
    services: &Services,
    recovery: &mut Cleanup,
) -> Result<()> {
    let settings = &req.settings;

    // 1. Tool group.
    let mut group = ToolGroup::load(&environment::pbench_run(vars), &req.tool_group)
        .map_err(|e| StartError::new(e.return_code(), e.to_string()))?;
    if group.is_empty() {
        info!(group = %group.name, "tool group has no hosts, nothing to start");
        return Ok(());
    }

    // 2. Inputs.
    let sysinfo = verify_sysinfo(req.sysinfo.as_deref()).map_err(|bad| {
        StartError::new(
            ReturnCode::BadSysinfo,
            format!("invalid sysinfo option(s), '{}'", bad.join(",")),
        )
    })?;
    let orchestrate: Orchestrate = req.orchestrate.parse()?;
    let mut redis_spec = req.redis_server.clone().filter(|s| !s.is_empty());
    let mut tds_spec = req.tool_data_sink.clone().filter(|s| !s.is_empty());
    if orchestrate == Orchestrate::Existing && (redis_spec.is_none() || tds_spec.is_none()) {
        return Err(StartError::new(
            ReturnCode::MissingParams,
            "both --redis-server and --tool-data-sink must be specified if --orchestrate=existing is used",
        ));
    }

    let env = StartEnv::from_vars(vars)?;
    let (local, instance_uuid) = match orchestrate {
        Orchestrate::Create => {
            let (tm_dir, instance_uuid) = prepare_tm_dir(&env.benchmark_run_dir)?;
            let ssh = which::which(&settings.ssh_bin).map_err(|e| {
                StartError::new(ReturnCode::MissingSshCmd, "required ssh command not in our PATH")
                    .with_cause(e)
            })?;
            (Some(LocalRun { ssh, tm_dir }), instance_uuid)
        }
        Orchestrate::Existing => (None, uuid::Uuid::new_v4().to_string()),
    };
    debug!(%instance_uuid, ?orchestrate, "instance");

    // 2a. Reachability of remotes, and the address they see us at.
    if let Some(local) = &local {
        let probe = SshTemplate::new(
            services.runner.clone(),
            local.ssh.clone(),
            &env.ssh_opts,
            PROBE_COMMAND,
        );
        recovery.register(AbortSessions(probe.clone()), "stop TM clients");
        if let Some(origin) = discover_origins(&mut group, &services.locality, &probe).await? {
            debug!(%origin, "connection host");
            redis_spec.get_or_insert_with(|| origin.clone());
            tds_spec.get_or_insert(origin);
        }
    }

    let redis_ep = EndpointSpec::parse_with_port(
        redis_spec.as_deref(),
        &env.full_hostname,
        ServerRole::Redis,
        settings.redis_port,
    )
    .map_err(|e| StartError::new(e.return_code(), e.to_string()))?;
    let tds_ep = EndpointSpec::parse_with_port(
        tds_spec.as_deref(),
        &env.full_hostname,
        ServerRole::DataSink,
        settings.data_sink_port,
    )
    .map_err(|e| StartError::new(e.return_code(), e.to_string()))?;
    let metadata = ToolMetadata::load(&env.install_dir).map_err(|e| {
        StartError::new(ReturnCode::BadToolMetadata, "failed to load tool metadata").with_cause(e)
    })?;

    // 3. Redis.
    let mut redis_local_host = redis_ep.host.clone();
    if let Some(local) = &local {
        debug!("starting redis server");
        let launch = start_redis(&redis_ep, &local.tm_dir, &settings.redis_server_bin, services)
            .await
            .map_err(|e| {
                StartError::new(e.return_code(), "Failed to start a local Redis server").with_cause(e)
            })?;
        redis_local_host = launch.local_host;
        recovery.register(StopDaemon(launch.daemon), "stop Redis");
    }

    // 4. Bus.
    debug!(redis = %redis_ep, "connecting to the redis server");
    let bus = services
        .connector
        .connect(redis_ep.bare_host(), redis_ep.port)
        .await
        .map_err(|e| redis_unreachable(&redis_ep, e))?;
    let to_client = bus
        .subscribe(&Channel::new(&settings.channel_prefix, ChannelSuffix::ToClient).name())
        .await
        .map_err(|e| redis_unreachable(&redis_ep, e))?;

    // 5. Configuration.
    debug!("push tool group data and metadata");
    group.archive(&env.benchmark_run_dir).map_err(|e| {
        StartError::new(
            ReturnCode::ToolGroupExc,
            format!("failed to archive tool group '{}'", group.name),
        )
        .with_cause(e)
    })?;
    let run_dir = env.benchmark_run_dir.display().to_string();
    let tool_metadata = metadata.full_data();
    let mut tools = BTreeMap::new();
    for (host, entry) in &group.hosts {
        if !entry.noinstall.is_empty() {
            debug!(host = %host, tools = ?entry.noinstall, "tools registered without install");
        }
        let params = AgentParams {
            benchmark_run_dir: run_dir.clone(),
            channel_prefix: settings.channel_prefix.clone(),
            controller: env.full_hostname.clone(),
            hostname: host.clone(),
            instance_uuid: instance_uuid.clone(),
            label: entry.label.clone(),
            tds_hostname: entry
                .origin_host
                .clone()
                .unwrap_or_else(|| tds_ep.host.clone()),
            tds_port: tds_ep.port,
            tool_group: group.name.clone(),
            tool_metadata: tool_metadata.clone(),
            tools: entry.tools.clone(),
        };
        let key = paths::tm_param_key(&group.name, host);
        set_json(bus.as_ref(), &key, &params).await.map_err(|e| {
            StartError::new(
                ReturnCode::RedisTmKeyFailed,
                "failed to create tool meister parameter key in redis server",
            )
            .with_cause(e)
        })?;
        recovery.register(
            DeleteBlob {
                bus: bus.clone(),
                key,
            },
            format!("delete {host} Redis key"),
        );
        tools.insert(host.clone(), entry.tools.clone());
    }

    let tds_key = paths::tds_param_key(&group.name);
    let params = DataSinkParams {
        benchmark_run_dir: run_dir,
        bind_hostname: tds_ep.bind_host.clone(),
        channel_prefix: settings.channel_prefix.clone(),
        instance_uuid: instance_uuid.clone(),
        optional_md: env.optional_md.clone(),
        port: tds_ep.bind_port,
        tool_group: group.name.clone(),
        tool_metadata,
        tool_trigger: group.trigger.clone(),
        tools,
    };
    set_json(bus.as_ref(), &tds_key, &params).await.map_err(|e| {
        StartError::new(
            ReturnCode::RedisTdsKeyFailed,
            "failed to create tool data sink parameter key in redis server",
        )
        .with_cause(e)
    })?;
    recovery.register(
        DeleteBlob {
            bus: bus.clone(),
            key: tds_key.clone(),
        },
        "delete TDS key",
    );

    // 6. Data sink.
    if let Some(local) = &local {
        debug!("starting tool data sink");
        let launch = DataSinkLaunch {
            install_dir: env.install_dir.clone(),
            tm_dir: local.tm_dir.clone(),
            redis_host: redis_local_host.clone(),
            redis_port: redis_ep.port,
            param_key: tds_key,
            instance_uuid: instance_uuid.clone(),
            log_level: env.tds_log_level.clone(),
            channel_prefix: settings.channel_prefix.clone(),
            startup_timeout: settings.startup_timeout(),
            poll_interval: settings.poll_interval(),
            shutdown_grace: settings.shutdown_grace(),
        };
        let daemon = start_data_sink(&launch, bus.as_ref(), services)
            .await
            .map_err(|e| {
                StartError::new(e.return_code(), "failed to start local tool data sink").with_cause(e)
            })?;
        recovery.register(StopDaemon(daemon), "stop TDS");
    }
    // Tool meisters started by someone else still obey a terminate.
    recovery.register(
        TerminateGroup {
            bus: bus.clone(),
            channel: Channel::new(&settings.channel_prefix, ChannelSuffix::FromClient).name(),
            group: group.name.clone(),
        },
        "terminate tool group",
    );

    // 7. Tool meisters.
    if let Some(local) = &local {
        let agents = AgentLaunch {
            install_dir: env.install_dir.clone(),
            redis_host: redis_ep.host.clone(),
            redis_local_host,
            redis_port: redis_ep.port,
            instance_uuid: instance_uuid.clone(),
            log_level: env.tm_log_level.clone(),
        };
        let ssh = SshTemplate::new(
            services.runner.clone(),
            local.ssh.clone(),
            &env.ssh_opts,
            agents.remote_command(),
        );
        let summary = agents
            .launch_all(&group, &services.locality, &services.runner, &ssh)
            .await
            .map_err(|e| {
                StartError::new(
                    e.return_code(),
                    format!("Failed to start all remote clients in {}", group.name),
                )
                .with_cause(e)
            })?;
        debug!(?summary, "tool meisters launched");
    }

    // 8. Everybody up.
    debug!("waiting for the tool data sink to report start-up");
    let mut client = Client::new(bus.clone(), &settings.channel_prefix, to_client);
    let startup = client.wait_for_startup().await.map_err(|e| {
        StartError::new(
            ReturnCode::TdsWaitFailure,
            "TDS didn't confirm init sequence completion",
        )
        .with_cause(e)
    })?;
    if !startup.is_success() {
        return Err(StartError::new(
            ReturnCode::TdsWaitFailure,
            "TDS didn't confirm init sequence completion",
        ));
    }

    // 9. Tool install checks.
    let report = load_report(bus.as_ref(), &settings.tm_data_key).await?;
    if report.log_failures() {
        return Err(StartError::new(
            ReturnCode::ToolInstallFailures,
            "Tool installation check failures encountered",
        ));
    }

    // 10. Follow-up client actions.
    if !sysinfo.is_empty() {
        let dir = paths::sysinfo_dir(&env.benchmark_run_dir);
        match std::fs::create_dir_all(&dir) {
            Err(e) => error!(
                "Unable to create sysinfo-dump directory base path: {}: {e}",
                dir.display()
            ),
            Ok(()) => {
                info!("Collecting system information");
                let dir = dir.display().to_string();
                match client
                    .request(&group.name, Some(&dir), "sysinfo", Value::String(sysinfo))
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!("system information collection reported failure"),
                    Err(e) => warn!("system information collection failed: {e}"),
                }
            }
        }
    }

    let tool_dir = paths::tools_output_dir(&env.benchmark_run_dir, &group.name);
    std::fs::create_dir_all(&tool_dir).map_err(|e| {
        error!("failed to create tool output directory, '{}': {e}", tool_dir.display());
        StartError::new(
            ReturnCode::ExcToolGroupDir,
            format!("Unable to create tool dir {}", tool_dir.display()),
        )
        .with_cause(e)
    })?;
    recovery.register(RemoveDir(tool_dir.clone()), "delete tool directory");
    debug!("initialize persistent tools");
    let dir = tool_dir.display().to_string();
    match client.request(&group.name, Some(&dir), "init", Value::Null).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(StartError::new(
            ReturnCode::InitFailed,
            "Persistent tool initialization failed",
        )),
        Err(e) => Err(StartError::new(
            ReturnCode::InitFailed,
            "Persistent tool initialization failed",
        )
        .with_cause(e)),
    }
}

fn redis_unreachable(ep: &EndpointSpec, e: tm_bus::BusError) -> StartError {
    StartError::new(
        ReturnCode::RedisChanFailed,
        format!("Unable to connect to redis server, {ep}"),
    )
    .with_cause(e)
}

async fn set_json<T: Serialize>(
    bus: &dyn MessageBus,
    key: &str,
    value: &T,
) -> std::result::Result<(), Cause> {
    let payload = serde_json::to_string(value)?;
    bus.set_blob(key, &payload).await?;
    Ok(())
}

async fn load_report(bus: &dyn MessageBus, key: &str) -> Result<OperationalReport> {
    let invalid = |cause: Cause| {
        error!("Error loading operational Tool Meister data, '{cause}'");
        StartError::new(
            ReturnCode::InvalidTmData,
            "Failed to load reported Tool Meister operational data",
        )
        .with_cause(cause)
    };
    let raw = bus
        .get_blob(key)
        .await
        .map_err(|e| invalid(e.into()))?
        .ok_or_else(|| invalid(format!("no value at key '{key}'").into()))?;
    OperationalReport::parse(&raw).map_err(|e| invalid(e.into()))
}
