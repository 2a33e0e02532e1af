use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ImrError, ImrResult};

/// Tunables for an [`crate::ImrContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImrConfig {
    /// Capacity of the shared instance scratch, in instances.
    pub max_instances: usize,
    /// How many instancing contexts may be open at once.
    pub max_instancing_depth: usize,
    pub white_texture_name: String,
}

impl Default for ImrConfig {
    fn default() -> Self {
        Self {
            max_instances: 100_000,
            max_instancing_depth: 8,
            white_texture_name: "__white_texture__".to_string(),
        }
    }
}

impl ImrConfig {
    pub fn from_json_str(json: &str) -> ImrResult<Self> {
        let config: ImrConfig =
            serde_json::from_str(json).map_err(|e| ImrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImrResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ImrError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> ImrResult<()> {
        if self.max_instances == 0 {
            return Err(ImrError::Config("max_instances must be positive".into()));
        }
        if self.max_instancing_depth == 0 {
            return Err(ImrError::Config(
                "max_instancing_depth must be positive".into(),
            ));
        }
        Ok(())
    }
}
