//! Engine configuration.
//!
//! Mirrors the control knobs an embedding application historically set on
//! the engine: the token module to load (consumed by whoever constructs
//! the provider), an optional preset PIN and the force-login flag.

use std::path::{Path, PathBuf};
use std::{fmt, fs, io};

use secrecy::SecretString;
use serde::Deserialize;

//------------ EngineConfig --------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Path of the token module the embedder should load.
    pub module: Option<PathBuf>,

    /// A preset PIN; installed as forced when the engine is built.
    pub pin: Option<SecretString>,

    /// Always attempt a login, even when the token claims none is needed.
    #[serde(default)]
    pub force_login: bool,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err))?;
        toml::from_str(&text).map_err(ConfigError::Toml)
    }
}

//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String, io::Error),
    Toml(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => {
                write!(f, "cannot read config file {}: {}", path, err)
            }
            ConfigError::Toml(err) => write!(f, "invalid config file: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

//------------ Tests ---------------------------------------------------------
