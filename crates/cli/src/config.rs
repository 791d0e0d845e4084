//! Engine configuration file loading.

use std::path::Path;

use formulary_eval::EngineConfig;

/// Read an [`EngineConfig`] from a TOML file, or the defaults when no file
/// is given.
pub(crate) fn load(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading config '{}': {}", path.display(), e))?;
    toml::from_str(&text).map_err(|e| format!("invalid config '{}': {}", path.display(), e))
}
