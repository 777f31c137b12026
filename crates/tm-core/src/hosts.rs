use std::collections::BTreeSet;
use std::io;
use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use tracing::debug;

/// Decides whether a tool group host is this machine.
///
/// A host is local when it is one of our own names, or when it is (or
/// resolves to) an address assigned to one of our interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalHosts {
    names: BTreeSet<String>,
    addrs: BTreeSet<IpAddr>,
}

impl LocalHosts {
    pub fn new<N, A>(names: N, addrs: A) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        A: IntoIterator<Item = IpAddr>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Our own names plus every address on every local interface.
    pub fn discover(hostname: &str, full_hostname: &str) -> Self {
        let names = ["localhost", hostname, full_hostname]
            .into_iter()
            .filter(|n| !n.is_empty());
        Self::new(names, interface_addrs())
    }

    pub async fn is_local(&self, host: &str) -> bool {
        if self.names.contains(host) {
            return true;
        }
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return ip.is_loopback() || self.addrs.contains(&ip);
        }
        match tokio::net::lookup_host((bare, 0)).await {
            Ok(mut addrs) => addrs.any(|a| a.ip().is_loopback() || self.addrs.contains(&a.ip())),
            Err(e) => {
                debug!(host, error = %e, "host does not resolve, treating as remote");
                false
            }
        }
    }
}

fn interface_addrs() -> Vec<IpAddr> {
    let Ok(ifaddrs) = nix::ifaddrs::getifaddrs() else {
        return Vec::new();
    };
    ifaddrs
        .filter_map(|ifa| ifa.address)
        .filter_map(|addr| {
            if let Some(v4) = addr.as_sockaddr_in() {
                Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()))
            } else {
                addr.as_sockaddr_in6()
                    .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
            }
        })
        .collect()
}

/// Resolve `host` to one address, preferring IPv4.
pub async fn resolve(host: &str) -> io::Result<IpAddr> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((bare, 0))
        .await?
        .map(|a| a.ip())
        .collect();
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host} does not map to an IP address"),
            )
        })
}
