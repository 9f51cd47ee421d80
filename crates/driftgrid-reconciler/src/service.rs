//! Service definitions and configurators.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drift_core::Connectivity;
use driftgrid_provider::{ProviderResult, RunningNode};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

/// Cross-node settings injected into configuration runs: for each
/// service the ordered host list, plus a `<service>_port` entry with
/// the comma-joined port list per node.
pub type EnvSettings = BTreeMap<String, Vec<String>>;

/// One declared service: how it is reached and how it gets installed.
pub struct ServiceDefinition {
    pub name: String,
    pub connectivity: Vec<Connectivity>,
    /// Raw service-specific settings from the config document.
    pub settings: Mapping,
    pub configurator: Arc<dyn ServiceConfigurator>,
}

impl ServiceDefinition {
    pub fn apply_on(
        &self,
        node: &dyn RunningNode,
        settings: &EnvSettings,
    ) -> ProviderResult<()> {
        info!(service = %self.name, node = %node.id(), "configuring service");
        self.configurator.configure(node, self, settings)
    }
}

/// Installs a service onto a node. Implementations are referenced by
/// name from the service config and versioned independently of the
/// reconciler.
pub trait ServiceConfigurator: Send + Sync {
    /// Static validation of one service block. Appends messages; the
    /// error list is authoritative.
    fn validate(
        &self,
        service: &str,
        block: &Mapping,
        config_root: &Path,
        errors: &mut Vec<String>,
    );

    fn configure(
        &self,
        node: &dyn RunningNode,
        service: &ServiceDefinition,
        settings: &EnvSettings,
    ) -> ProviderResult<()>;
}

/// Remote directory service artifacts are staged into.
const REMOTE_ROOT: &str = "/var/tmp/driftgrid";

/// Uploads the service's artifact directory and runs its install
/// script with the environment settings exported as `SVC_*` variables.
pub struct ScriptConfigurator {
    config_root: PathBuf,
}

impl ScriptConfigurator {
    pub fn new(config_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
        }
    }

    fn artifact_dir(&self, service: &str) -> PathBuf {
        self.config_root.join("services").join(service)
    }

    fn exports(service: &ServiceDefinition, settings: &EnvSettings) -> String {
        let mut exports = String::new();
        for (key, values) in settings {
            exports.push_str(&format!("SVC_{key}='{}' ", values.join(",")));
        }
        // Static per-service settings are exported alongside the
        // cross-node ones.
        for (key, value) in &service.settings {
            if let (Value::String(key), Some(value)) = (key, scalar_to_string(value)) {
                exports.push_str(&format!("SVC_{key}='{value}' "));
            }
        }
        exports
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl ServiceConfigurator for ScriptConfigurator {
    fn validate(
        &self,
        service: &str,
        _block: &Mapping,
        config_root: &Path,
        errors: &mut Vec<String>,
    ) {
        let script = config_root
            .join("services")
            .join(service)
            .join("install.sh");
        if !script.exists() {
            errors.push(format!(
                "Service '{service}' has no install script at '{}'",
                script.display()
            ));
        }
    }

    fn configure(
        &self,
        node: &dyn RunningNode,
        service: &ServiceDefinition,
        settings: &EnvSettings,
    ) -> ProviderResult<()> {
        let remote = format!("{REMOTE_ROOT}/{}", service.name);
        node.run_command(&format!("mkdir -p {remote}"), false)?;

        let dir = self.artifact_dir(&service.name);
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            debug!(service = %service.name, file = %file_name, "uploading artifact");
            node.upload_file(&path, &format!("{remote}/{file_name}"))?;
        }

        let exports = Self::exports(service, settings);
        node.run_command(&format!("cd {remote} && {exports}sh ./install.sh"), false)?;
        Ok(())
    }
}

/// Configurator for test and local runs: records the settings on the
/// node instead of installing anything.
pub struct FakeConfigurator;

impl ServiceConfigurator for FakeConfigurator {
    fn validate(&self, _: &str, _: &Mapping, _: &Path, _: &mut Vec<String>) {}

    fn configure(
        &self,
        node: &dyn RunningNode,
        service: &ServiceDefinition,
        settings: &EnvSettings,
    ) -> ProviderResult<()> {
        node.wait_for_ready(&mut || {}, std::time::Duration::ZERO)?;
        node.run_command(&format!("configured {}", service.name), true)?;

        let local = std::env::temp_dir().join(format!(
            "settings-{}-{}.yml",
            service.name,
            node.id()
        ));
        fs::write(&local, serde_yaml::to_string(settings)?)?;
        let result = node.upload_file(&local, ".");
        let _ = fs::remove_file(&local);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_join_values_with_commas() {
        let service = ServiceDefinition {
            name: "my_app".to_string(),
            connectivity: vec![],
            settings: serde_yaml::from_str("version: 3").unwrap(),
            configurator: Arc::new(FakeConfigurator),
        };
        let settings = EnvSettings::from([
            ("apache".to_string(), vec!["h1".to_string(), "h2".to_string()]),
            ("apache_port".to_string(), vec!["80,443".to_string()]),
        ]);

        let exports = ScriptConfigurator::exports(&service, &settings);
        assert!(exports.contains("SVC_apache='h1,h2' "));
        assert!(exports.contains("SVC_apache_port='80,443' "));
        assert!(exports.contains("SVC_version='3' "));
    }

    #[test]
    fn validate_reports_missing_install_script() {
        let dir = tempfile::tempdir().unwrap();
        let configurator = ScriptConfigurator::new(dir.path());

        let mut errors = Vec::new();
        configurator.validate("my_app", &Mapping::new(), dir.path(), &mut errors);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Service 'my_app' has no install script"));

        let service_dir = dir.path().join("services/my_app");
        fs::create_dir_all(&service_dir).unwrap();
        fs::write(service_dir.join("install.sh"), "#!/bin/sh\n").unwrap();
        let mut errors = Vec::new();
        configurator.validate("my_app", &Mapping::new(), dir.path(), &mut errors);
        assert!(errors.is_empty());
    }
}
