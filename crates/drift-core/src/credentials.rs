//! Named login credentials for reaching nodes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Login material referenced by name from node definitions and
/// provider configuration. The private key is stored as a file name
/// relative to the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(skip)]
    pub name: String,
    pub login: String,
    pub private_key: String,
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Credentials {
    pub fn new(
        name: impl Into<String>,
        login: impl Into<String>,
        private_key: impl Into<String>,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            login: login.into(),
            private_key: private_key.into(),
            config_dir: config_dir.into(),
        }
    }

    /// Absolute path to the private key file.
    pub fn private_key_path(&self) -> PathBuf {
        self.config_dir.join(&self.private_key)
    }

    /// Attach the name and configuration directory a parsed entry was
    /// loaded under.
    pub fn anchored(mut self, name: &str, config_dir: &Path) -> Self {
        self.name = name.to_string();
        self.config_dir = config_dir.to_path_buf();
        self
    }
}

/// credential name → credentials.
pub type CredentialsMap = BTreeMap<String, Credentials>;
