use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths;
use crate::stage::{StageDescriptor, StageTable};

/// Root structure of pipeline.json / pipeline.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default = "default_stages")]
    pub stages: Vec<StageDescriptor>,

    /// Exit with the rightmost failing stage's status instead of 0.
    #[serde(default)]
    pub pipefail: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            pipefail: false,
        }
    }
}

impl PipelineConfig {
    /// Validated, immutable stage table.
    pub fn stage_table(&self) -> Result<StageTable> {
        StageTable::new(self.stages.clone())
    }
}

/// `ls -l /` | `sort -r` | `cat -n`
fn default_stages() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new("ls", ["-l", "/"]),
        StageDescriptor::new("sort", ["-r"]),
        StageDescriptor::new("cat", ["-n"]),
    ]
}

// =============================================================================
// Loading functions
// =============================================================================

/// Resolve the pipeline configuration.
///
/// An explicit path must exist and parse. Without one, the default
/// pipeline.json is used when present, otherwise the built-in table.
pub fn load(explicit: Option<&str>) -> Result<PipelineConfig> {
    if let Some(raw) = explicit {
        let path = paths::expand(raw)?;
        if !path.exists() {
            return Err(Error::config_not_found(path.display().to_string()));
        }
        return load_from_file(&path);
    }

    match paths::pipeline_json() {
        Ok(path) if path.exists() => load_from_file(&path),
        _ => Ok(PipelineConfig::default()),
    }
}

/// Parse a config file; `.toml` files as TOML, anything else as JSON.
pub fn load_from_file(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let config: PipelineConfig = if is_toml {
        toml::from_str(&content)
            .map_err(|e| Error::config_invalid_toml(path.display().to_string(), e))?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?
    };

    // Surface table problems at load time, not at launch.
    config.stage_table()?;
    Ok(config)
}
