use std::net::IpAddr;
use std::path::Path;

use tracing::{debug, info};

use super::{DaemonHandle, ServerError};
use crate::endpoint::EndpointSpec;
use crate::error::ReturnCode;
use crate::hosts::resolve;
use crate::io::atomic_write;
use crate::paths;
use crate::process::CommandSpec;
use crate::services::Services;

const NAME: &str = "redis server";

/// Addresses the server binds to, and the host local clients should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPlan {
    pub bind_hosts: Vec<String>,
    pub local_host: String,
}

/// Decide the bind list.
///
/// `localhost` is added as a second bind name only when that is safe: Redis
/// refuses two names for the same address, and a wildcard bind already
/// covers loopback (local clients then use `127.0.0.1`). When bind and
/// connect hosts differ the caller's choice is used as is.
pub fn bind_plan(ep: &EndpointSpec, bind_ip: IpAddr, localhost_ip: Option<IpAddr>) -> BindPlan {
    let bind_host = ep.bare_bind_host().to_string();
    let mut plan = BindPlan {
        bind_hosts: vec![bind_host.clone()],
        local_host: ep.host.clone(),
    };
    if ep.host != ep.bind_host {
        return plan;
    }
    if bind_ip.is_unspecified() {
        plan.local_host = "127.0.0.1".to_string();
    } else if let Some(lo) = localhost_ip {
        if lo != bind_ip && bind_host != "localhost" {
            plan.bind_hosts.push("localhost".to_string());
            plan.local_host = "localhost".to_string();
        }
    }
    plan
}

pub fn render_config(bind_hosts: &[String], tm_dir: &Path, port: u16) -> String {
    let dir = tm_dir.display();
    format!(
        "bind {binds}\n\
         daemonize yes\n\
         dir {dir}\n\
         save \"\"\n\
         appendonly no\n\
         dbfilename pbench-redis.rdb\n\
         logfile {dir}/{log}\n\
         loglevel notice\n\
         pidfile {dir}/{pid}\n\
         port {port}\n",
        binds = bind_hosts.join(" "),
        log = paths::REDIS_LOG_FILE,
        pid = paths::REDIS_PID_FILE,
    )
}

#[derive(Debug, Clone)]
pub struct RedisLaunch {
    /// Host the orchestrator and local daemons use to reach the server.
    pub local_host: String,
    pub daemon: DaemonHandle,
}

/// Write `tm/redis.conf` and run `redis-server` on it; the server
/// daemonizes and the command returns once it has.
pub async fn start_redis(
    ep: &EndpointSpec,
    tm_dir: &Path,
    redis_server_bin: &str,
    services: &Services,
) -> Result<RedisLaunch, ServerError> {
    let bind_ip = resolve(ep.bare_bind_host())
        .await
        .map_err(|source| ServerError::NoIp {
            host: ep.bind_host.clone(),
            source,
        })?;
    resolve(ep.bare_host())
        .await
        .map_err(|source| ServerError::NoIp {
            host: ep.host.clone(),
            source,
        })?;
    let localhost_ip = resolve("localhost").await.ok();

    let plan = bind_plan(ep, bind_ip, localhost_ip);
    debug!(?plan, "redis bind plan");

    let conf = tm_dir.join(paths::REDIS_CONF_FILE);
    atomic_write(&conf, render_config(&plan.bind_hosts, tm_dir, ep.bind_port).as_bytes())
        .map_err(ServerError::Config)?;

    let spawn_err = |source| ServerError::Spawn {
        name: NAME,
        code: ReturnCode::ExcSpawnRedis,
        source,
    };
    let program = which::which(redis_server_bin).map_err(|e| {
        spawn_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{redis_server_bin}: {e}"),
        ))
    })?;
    let spec = CommandSpec::new(program)
        .arg(conf.display().to_string())
        .cwd(tm_dir);
    info!("starting redis server: {}", spec.display());
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
            code: ReturnCode::RedisFailed,
            status: done.status(),
        });
    }

    Ok(RedisLaunch {
        local_host: plan.local_host,
        daemon: DaemonHandle::new(
            NAME,
            tm_dir.join(paths::REDIS_PID_FILE),
            services.processes.clone(),
            None,
        ),
    })
}
