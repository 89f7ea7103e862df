use std::path::PathBuf;

use hls_sync_engine::{ConfigError, SyncError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Cannot read config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Cannot render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging initialization failed: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),
}
