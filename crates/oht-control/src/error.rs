//! 控制面错误类型

use oht_state::StateError;
use oht_tools::ConfigError;
use oht_transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// 控制面装配/运行错误
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Supervisor task failed: {0}")]
    Task(String),
}
