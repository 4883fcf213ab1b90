//! Configuration for loading a Harmony encoding
//!
//! A configuration names the encoding, where its vocabulary lives, and the
//! rendering and parsing defaults callers should use with it. Files are YAML
//! or JSON and may reference environment variables as `${VAR}`.

mod env;
mod error;
mod schema;

pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::HarmonyConfig;

use std::fs;
use std::path::Path;

/// Reads, interpolates and validates a YAML config.
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<HarmonyConfig> {
    let path = path.as_ref();
    let content = read(path)?;

    let interpolated = env::interpolate_env_vars(&content)?;

    let config: HarmonyConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Syntax {
            path: path.to_path_buf(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

/// Reads, interpolates and validates a JSON config.
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<HarmonyConfig> {
    let path = path.as_ref();
    let content = read(path)?;

    let interpolated = env::interpolate_env_vars(&content)?;

    let config: HarmonyConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::Syntax {
            path: path.to_path_buf(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}
