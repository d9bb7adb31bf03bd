//! Configuration file handling for strata.
//!
//! Looks for `.config/strata.toml` in the current directory or any parent
//! directory. Every section is optional.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use strata::{EngineConfig, GeneratorOptions, IntrospectorConfig};

const CONFIG_FILE: &str = ".config/strata.toml";

/// The contents of `.config/strata.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database_url: Option<String>,
    pub engine: EngineConfig,
    pub introspector: IntrospectorConfig,
    pub generator: GeneratorOptions,
}

/// A loaded configuration, with relative paths resolved against the project
/// root (the directory holding `.config/`).
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    /// The file it came from, if one was found
    pub path: Option<Utf8PathBuf>,
}

/// Load configuration, searching up from the working directory.
///
/// No file at all is not an error: the defaults apply, relative to the
/// working directory.
pub fn load() -> Result<Loaded, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::Io(format!("working directory {} is not UTF-8", p.display())))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<Loaded, ConfigError> {
    let Some(path) = find_config_file(start) else {
        let mut config = Config::default();
        resolve_paths(&mut config, start);
        return Ok(Loaded { config, path: None });
    };

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let root = path
        .parent()
        .and_then(Utf8Path::parent)
        .unwrap_or(start)
        .to_owned();
    resolve_paths(&mut config, &root);
    config.introspector.tracking_table = config.engine.tracking_table.clone();

    tracing::debug!(%path, "loaded configuration");
    Ok(Loaded {
        config,
        path: Some(path),
    })
}

fn resolve_paths(config: &mut Config, root: &Utf8Path) {
    if config.engine.migrations_dir.is_relative() {
        config.engine.migrations_dir = root.join(&config.engine.migrations_dir);
    }
    if config.introspector.output_dir.is_relative() {
        config.introspector.output_dir = root.join(&config.introspector.output_dir);
    }
}

/// Find `.config/strata.toml` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut current = start.to_owned();
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read .config/strata.toml: {0}")]
    Io(String),
    #[error("failed to parse .config/strata.toml: {0}")]
    Parse(String),
}
