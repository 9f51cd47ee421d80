//! driftgrid-config — YAML documents into environment definitions.
//!
//! The loader turns the three deployment documents into runnable
//! `EnvironmentDefinition`s, resolving provider, hook, and configurator
//! discriminators through a builder registry. Validation is batch-first:
//! every problem across every template is reported in one error.

mod error;
mod loader;
mod registry;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    ConfigDir, LoadedEnvironment, list_environment_templates, load_config_dir, load_credentials,
    load_environments, load_services,
};
pub use registry::Registry;
