use tracing::{debug, warn};

use crate::endpoint::bracket_ipv6;
use crate::error::{Result, ReturnCode, StartError};
use crate::hosts::LocalHosts;
use crate::ssh::SshTemplate;
use crate::tool_group::ToolGroup;

/// Remote command whose output names the address the remote sees us at.
pub const PROBE_COMMAND: &str = "echo ${SSH_CONNECTION}";

/// Check every remote host is reachable over ssh and learn, from each, the
/// address it sees the controller connecting from.
///
/// Each remote's origin is recorded on its tool group entry. Returns the
/// origin to use as the default server host: the first one reported,
/// bracketed when IPv6. `None` when there are no remote hosts.
pub async fn discover_origins(
    group: &mut ToolGroup,
    locality: &LocalHosts,
    template: &SshTemplate,
) -> Result<Option<String>> {
    let mut remotes = Vec::new();
    for host in group.hostnames() {
        if !locality.is_local(host).await {
            remotes.push(host.to_string());
        }
    }

    for host in &remotes {
        template.start(host, None).map_err(|e| {
            StartError::new(
                ReturnCode::RemoteNotReachable,
                format!("Host {host} could not be probed"),
            )
            .with_cause(e)
        })?;
    }

    let mut origins: Vec<String> = Vec::new();
    for host in &remotes {
        let connection = template.wait(host).await.map_err(|e| {
            StartError::new(
                ReturnCode::RemoteNotReachable,
                format!("Host {host} could not be probed"),
            )
            .with_cause(e)
        })?;
        debug!(host = %host, ?connection, "host reports connection");
        // SSH_CONNECTION is "origin_addr origin_port local_addr local_port".
        let origin = match connection.stdout.split_whitespace().next() {
            Some(origin) if connection.success() => origin.to_string(),
            _ => {
                return Err(StartError::new(
                    ReturnCode::RemoteNotReachable,
                    format!(
                        "Host {host} reports exit status {}, stdout '{}', stderr '{}'",
                        connection.status(),
                        connection.stdout.trim(),
                        connection.stderr.trim()
                    ),
                ));
            }
        };
        group.set_origin(host, &origin);
        if !origins.contains(&origin) {
            origins.push(origin);
        }
    }

    if !remotes.is_empty() && origins.len() != 1 {
        warn!(
            "Remote hosts don't agree on a single controller origin IP, which may indicate a problem: origin(s) {}",
            origins.join(",")
        );
    }
    Ok(origins.first().map(|o| bracket_ipv6(o)))
}
