use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base pipevisor config directory (~/.config/pipevisor/)
pub fn pipevisor() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home).join(".config").join("pipevisor"))
}

/// Default pipeline.json stage table path
pub fn pipeline_json() -> Result<PathBuf> {
    Ok(pipevisor()?.join("pipeline.json"))
}

/// Expand a user-supplied path (`~` and `$VARS`).
pub fn expand(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).map_err(|e| {
        Error::config_invalid_value("config", Some(path.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}
