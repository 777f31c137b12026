use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ToolMetadataError {
    #[error("failed to read tool metadata {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid tool metadata {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// What the installation knows about each tool, from
/// `tool-scripts/meta.json`. Passed verbatim to the data sink and agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub persistent: Map<String, Value>,
    pub transient: Map<String, Value>,
}

impl ToolMetadata {
    pub fn load(install_dir: &Path) -> Result<Self, ToolMetadataError> {
        let path = paths::tool_meta_file(install_dir);
        let data = std::fs::read_to_string(&path).map_err(|source| ToolMetadataError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ToolMetadataError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_known(&self, tool: &str) -> bool {
        self.persistent.contains_key(tool) || self.transient.contains_key(tool)
    }

    /// The full payload embedded in every configuration blob.
    pub fn full_data(&self) -> Value {
        serde_json::json!({
            "persistent": self.persistent,
            "transient": self.transient,
        })
    }
}
