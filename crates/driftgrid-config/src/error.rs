//! Configuration errors.

use driftgrid_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Every validation problem found, joined into one message so the
    /// operator sees all of them at once.
    #[error("{0}")]
    Validation(String),

    #[error("unknown provider kind '{0}'")]
    UnknownProvider(String),

    #[error("unknown hook kind '{0}'")]
    UnknownHook(String),

    #[error("unknown service configurator '{0}'")]
    UnknownConfigurator(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Batch accumulated validation messages into one error.
    pub fn validation(errors: Vec<String>) -> Self {
        ConfigError::Validation(errors.join(",\n"))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
