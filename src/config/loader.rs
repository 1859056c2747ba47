//! Configuration loading from disk.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::config::validation::{validate_config, ValidationError};

/// Why a configuration could not be loaded.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not valid TOML for the schema.
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The config parsed but fails semantic checks.
    Invalid(Vec<ValidationError>),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read config {}: {}", path.display(), source)
            }
            ConfigError::Malformed { path, source } => {
                write!(f, "cannot parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(errors) => {
                write!(f, "invalid config")?;
                for err in errors {
                    write!(f, "\n  - {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Malformed { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Resolve and load the configuration: an explicit path argument wins,
/// then the SWITCHYARD_CONFIG environment variable, then built-in
/// defaults.
pub fn load(arg: Option<&str>) -> Result<Config, ConfigError> {
    let path = arg
        .map(str::to_string)
        .or_else(|| std::env::var("SWITCHYARD_CONFIG").ok());

    match path {
        Some(p) => from_file(Path::new(&p)),
        None => check(Config::default()),
    }
}

/// Load and validate a TOML config file.
pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&text).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    check(config)
}

fn check(config: Config) -> Result<Config, ConfigError> {
    validate_config(&config).map_err(ConfigError::Invalid)?;
    Ok(config)
}
