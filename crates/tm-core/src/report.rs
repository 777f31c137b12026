use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::error;

/// What one tool meister reported after checking its tools.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HostReport {
    /// Anything truthy means at least one install check failed.
    #[serde(default)]
    pub failed_tools: Value,
    /// Tool name to `[exit code, output]` of its install check.
    #[serde(default)]
    pub installs: BTreeMap<String, (i32, String)>,
}

impl HostReport {
    pub fn has_failures(&self) -> bool {
        match &self.failed_tools {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => n.as_f64() != Some(0.0),
        }
    }
}

/// The operational report the data sink stores once every tool meister
/// has checked in, keyed by host.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct OperationalReport(pub BTreeMap<String, HostReport>);

impl OperationalReport {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Hosts with failed install checks.
    pub fn failures(&self) -> BTreeMap<&str, &HostReport> {
        self.0
            .iter()
            .filter(|(_, r)| r.has_failures())
            .map(|(h, r)| (h.as_str(), r))
            .collect()
    }

    /// Log every failing tool of every failing host. Returns true if any.
    pub fn log_failures(&self) -> bool {
        let failures = self.failures();
        if failures.is_empty() {
            return false;
        }
        error!("Tool installation checks failed");
        for (host, report) in failures {
            for (tool, (code, output)) in &report.installs {
                if *code != 0 {
                    error!(host = %host, "{host}: {tool} return code: {code}, output: '{output}'");
                }
            }
        }
        true
    }
}
