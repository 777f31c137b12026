//! Start-up parameter blobs pushed into the bus for the data sink and
//! each tool meister. Fields are declared in sorted order so the encoded
//! JSON is stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters for the tool meister on one host, stored at `tm-<group>-<host>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    pub benchmark_run_dir: String,
    pub channel_prefix: String,
    pub controller: String,
    pub hostname: String,
    pub instance_uuid: String,
    pub label: String,
    pub tds_hostname: String,
    pub tds_port: u16,
    pub tool_group: String,
    pub tool_metadata: Value,
    pub tools: BTreeMap<String, String>,
}

/// Descriptive metadata about the benchmark, recorded by the data sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionalMetadata {
    pub config: String,
    pub date: String,
    pub script: String,
    pub ssh_opts: String,
}

/// Parameters for the data sink, stored at `tds-<group>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSinkParams {
    pub benchmark_run_dir: String,
    pub bind_hostname: String,
    pub channel_prefix: String,
    pub instance_uuid: String,
    pub optional_md: OptionalMetadata,
    pub port: u16,
    pub tool_group: String,
    pub tool_metadata: Value,
    pub tool_trigger: Option<String>,
    /// Host to its registered tools.
    pub tools: BTreeMap<String, BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_blob_field_names() {
        let p = AgentParams {
            benchmark_run_dir: "/run/fio".into(),
            channel_prefix: "tool-meister-chan".into(),
            controller: "ctl.example.com".into(),
            hostname: "h1".into(),
            instance_uuid: "u-1".into(),
            label: "".into(),
            tds_hostname: "203.0.113.5".into(),
            tds_port: 8080,
            tool_group: "default".into(),
            tool_metadata: serde_json::json!({"persistent": {}, "transient": {}}),
            tools: BTreeMap::from([("iostat".to_string(), "--interval=3".to_string())]),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["tds_hostname"], "203.0.113.5");
        assert_eq!(v["tds_port"], 8080);
        assert_eq!(v["tools"]["iostat"], "--interval=3");

        let keys: Vec<_> = v.as_object().unwrap().keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn data_sink_blob_carries_optional_md() {
        let p = DataSinkParams {
            benchmark_run_dir: "/run/fio".into(),
            bind_hostname: "0.0.0.0".into(),
            channel_prefix: "tool-meister-chan".into(),
            instance_uuid: "u-1".into(),
            optional_md: OptionalMetadata {
                script: "fio".into(),
                ..Default::default()
            },
            port: 8080,
            tool_group: "default".into(),
            tool_metadata: Value::Null,
            tool_trigger: None,
            tools: BTreeMap::new(),
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["optional_md"]["script"], "fio");
        assert_eq!(v["tool_trigger"], Value::Null);
        assert_eq!(v["bind_hostname"], "0.0.0.0");
    }
}
