//! Bind/connect endpoint specifications.
//!
//! A server endpoint is given as `[[bindhost][:bindport]][;[host][:port]]`.
//! The half before the semicolon is where the server binds, the half after
//! it is where clients connect. Without a semicolon the single `host:port`
//! pair serves both roles. Omitted hosts fall back to a caller supplied
//! default, omitted ports to the well-known port of the server role.
//!
//! Parsing is purely syntactic; names are only resolved when a server is
//! actually started.

use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::error::ReturnCode;

pub const DEFAULT_REDIS_PORT: u16 = 17001;
pub const DEFAULT_DATA_SINK_PORT: u16 = 8080;

// ---------------------------------------------------------------------------
// ServerRole
// ---------------------------------------------------------------------------

/// Which server an endpoint describes; selects the default port and the
/// exit codes reported for malformed specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Redis,
    DataSink,
}

impl ServerRole {
    pub fn default_port(self) -> u16 {
        match self {
            ServerRole::Redis => DEFAULT_REDIS_PORT,
            ServerRole::DataSink => DEFAULT_DATA_SINK_PORT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ServerRole::Redis => "Redis server",
            ServerRole::DataSink => "Tool Data Sink",
        }
    }

    fn bad_port_code(self) -> ReturnCode {
        match self {
            ServerRole::Redis => ReturnCode::BadRedisPort,
            ServerRole::DataSink => ReturnCode::BadWsgiPort,
        }
    }

    fn bad_host_code(self) -> ReturnCode {
        match self {
            ServerRole::Redis => ReturnCode::BadRedisHost,
            ServerRole::DataSink => ReturnCode::BadWsgiHost,
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// EndpointError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("{role} port '{value}' is not a number between 1 and 65535")]
    BadPort { role: ServerRole, value: String },

    #[error("{role} host '{value}' is not a valid host name or address")]
    BadHost { role: ServerRole, value: String },
}

impl EndpointError {
    pub fn return_code(&self) -> ReturnCode {
        match self {
            EndpointError::BadPort { role, .. } => role.bad_port_code(),
            EndpointError::BadHost { role, .. } => role.bad_host_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// EndpointSpec
// ---------------------------------------------------------------------------

/// A fully resolved endpoint: every field is populated.
///
/// IPv6 literals are kept in brackets (`[::1]`) so the host can be pasted
/// straight into a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub role: ServerRole,
    pub bind_host: String,
    pub bind_port: u16,
    pub host: String,
    pub port: u16,
}

impl EndpointSpec {
    pub fn parse(
        spec: Option<&str>,
        default_host: &str,
        role: ServerRole,
    ) -> Result<Self, EndpointError> {
        Self::parse_with_port(spec, default_host, role, role.default_port())
    }

    /// Like [`EndpointSpec::parse`] with an explicit fallback port.
    pub fn parse_with_port(
        spec: Option<&str>,
        default_host: &str,
        role: ServerRole,
        default_port: u16,
    ) -> Result<Self, EndpointError> {
        let spec = spec.map(str::trim).unwrap_or("");
        let (bind_half, conn_half) = match spec.split_once(';') {
            Some((bind, conn)) => (bind, conn),
            None => (spec, spec),
        };
        let (bind_host, bind_port) = parse_half(bind_half, default_host, default_port, role)?;
        let (host, port) = parse_half(conn_half, default_host, default_port, role)?;
        Ok(Self {
            role,
            bind_host,
            bind_port,
            host,
            port,
        })
    }

    /// Whether the caller asked for different bind and connect addresses.
    #[cfg(test)]
    pub(crate) fn is_split(&self) -> bool {
        self.bind_host != self.host || self.bind_port != self.port
    }

    /// Host without IPv6 brackets, suitable for resolvers and socket APIs.
    pub fn bare_host(&self) -> &str {
        strip_brackets(&self.host)
    }

    pub fn bare_bind_host(&self) -> &str {
        strip_brackets(&self.bind_host)
    }
}

impl fmt::Display for EndpointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{};{}:{}",
            self.bind_host, self.bind_port, self.host, self.port
        )
    }
}

fn parse_half(
    half: &str,
    default_host: &str,
    default_port: u16,
    role: ServerRole,
) -> Result<(String, u16), EndpointError> {
    let half = half.trim();
    let (host, port) = split_host_port(half);

    let host = match host {
        "" => default_host.to_string(),
        h => {
            if !is_valid_host(h) {
                return Err(EndpointError::BadHost {
                    role,
                    value: h.to_string(),
                });
            }
            bracket_ipv6(h)
        }
    };
    let port = match port {
        None | Some("") => default_port,
        Some(p) => parse_port(p).ok_or_else(|| EndpointError::BadPort {
            role,
            value: p.to_string(),
        })?,
    };
    Ok((host, port))
}

/// Split `host:port`, `[v6]:port`, `:port`, `host` or a bare IPv6 literal.
fn split_host_port(s: &str) -> (&str, Option<&str>) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &s[..end + 2];
            let tail = &rest[end + 1..];
            return (host, tail.strip_prefix(':'));
        }
        return (s, None);
    }
    match s.matches(':').count() {
        0 => (s, None),
        1 => match s.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (s, None),
        },
        // More than one colon without brackets: an IPv6 literal, no port.
        _ => (s, None),
    }
}

fn parse_port(p: &str) -> Option<u16> {
    match p.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

fn strip_brackets(h: &str) -> &str {
    h.strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .unwrap_or(h)
}

/// Wrap an IPv6 literal in brackets; anything else is returned unchanged.
pub fn bracket_ipv6(host: &str) -> String {
    match strip_brackets(host).parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
        _ => host.to_string(),
    }
}

fn is_valid_host(h: &str) -> bool {
    strip_brackets(h).parse::<IpAddr>().is_ok() || validate_hostname(h)
}

static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();

/// RFC 1123 host name check: dot separated labels of letters, digits and
/// inner hyphens, each at most 63 characters, 253 characters in total.
pub fn validate_hostname(name: &str) -> bool {
    let re = HOSTNAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9\-]{0,61}[A-Za-z0-9])?)*\.?$")
            .expect("hostname pattern compiles")
    });
    !name.is_empty() && name.len() <= 253 && re.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "controller.example.com";

    fn redis(spec: Option<&str>) -> Result<EndpointSpec, EndpointError> {
        EndpointSpec::parse(spec, HOST, ServerRole::Redis)
    }

    #[test]
    fn absent_spec_uses_defaults() {
        let ep = redis(None).unwrap();
        assert_eq!(ep.bind_host, HOST);
        assert_eq!(ep.host, HOST);
        assert_eq!(ep.bind_port, 17001);
        assert_eq!(ep.port, 17001);
        assert!(!ep.is_split());

        let tds = EndpointSpec::parse(Some(""), HOST, ServerRole::DataSink).unwrap();
        assert_eq!(tds.port, 8080);

        let custom =
            EndpointSpec::parse_with_port(Some("h1"), HOST, ServerRole::Redis, 18001).unwrap();
        assert_eq!(custom.port, 18001);
    }

    #[test]
    fn bare_pair_serves_both_roles() {
        let ep = redis(Some("10.1.2.3:6379")).unwrap();
        assert_eq!((ep.bind_host.as_str(), ep.bind_port), ("10.1.2.3", 6379));
        assert_eq!((ep.host.as_str(), ep.port), ("10.1.2.3", 6379));
    }

    #[test]
    fn two_halves_are_lossless() {
        let ep = redis(Some("0.0.0.0:7000;redis.example.com:7001")).unwrap();
        assert_eq!(ep.bind_host, "0.0.0.0");
        assert_eq!(ep.bind_port, 7000);
        assert_eq!(ep.host, "redis.example.com");
        assert_eq!(ep.port, 7001);
        assert!(ep.is_split());
    }

    #[test]
    fn omitted_fields_default_per_half() {
        let ep = redis(Some(":7000;h2")).unwrap();
        assert_eq!(ep.bind_host, HOST);
        assert_eq!(ep.bind_port, 7000);
        assert_eq!(ep.host, "h2");
        assert_eq!(ep.port, 17001);

        let ep = redis(Some("h1;")).unwrap();
        assert_eq!(ep.bind_host, "h1");
        assert_eq!(ep.host, HOST);
    }

    #[test]
    fn ipv6_literals() {
        let ep = redis(Some("[fe80::1]:7000")).unwrap();
        assert_eq!(ep.host, "[fe80::1]");
        assert_eq!(ep.port, 7000);
        assert_eq!(ep.bare_host(), "fe80::1");

        let ep = redis(Some("2001:db8::5")).unwrap();
        assert_eq!(ep.host, "[2001:db8::5]");
        assert_eq!(ep.port, 17001);
    }

    #[test]
    fn bad_ports_map_to_role_codes() {
        for bad in ["h:0", "h:65536", "h:http", "h:-1"] {
            let err = redis(Some(bad)).unwrap_err();
            assert_eq!(err.return_code(), ReturnCode::BadRedisPort, "{bad}");
        }
        let err = EndpointSpec::parse(Some("h:x"), HOST, ServerRole::DataSink).unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::BadWsgiPort);
    }

    #[test]
    fn bad_hosts_map_to_role_codes() {
        let err = redis(Some("bad_host!:7000")).unwrap_err();
        assert!(matches!(err, EndpointError::BadHost { .. }));
        assert_eq!(err.return_code(), ReturnCode::BadRedisHost);

        let err = EndpointSpec::parse(Some("ok;-nope"), HOST, ServerRole::DataSink).unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::BadWsgiHost);
    }

    #[test]
    fn hostname_validation() {
        assert!(validate_hostname("localhost"));
        assert!(validate_hostname("h1.example.com"));
        assert!(validate_hostname("a-b.c"));
        assert!(!validate_hostname(""));
        assert!(!validate_hostname("-lead.example.com"));
        assert!(!validate_hostname("trail-.example.com"));
        assert!(!validate_hostname("under_score"));
        assert!(!validate_hostname(&"a".repeat(64)));
    }
}
