//! YAML document loading.
//!
//! Three documents describe a deployment: environment templates
//! (`environments.yml`), services (`services.yml`), and named
//! credentials (`credentials.yml`). Loading is two-phase: every
//! validation problem across every template and node definition is
//! collected first and batched into one error, so the operator sees
//! all of them at once; construction only happens on a clean document.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use drift_core::{Credentials, CredentialsMap, NodeDefinition};
use driftgrid_noop::{NoopNodeProvider, PlanHandle};
use driftgrid_provider::NodeProvider;
use driftgrid_reconciler::{EnvironmentDefinition, ServiceDefinition};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::registry::{str_key, Registry};

/// An environment definition plus, for dry runs, the handle to the
/// decorator's recorded plan.
pub struct LoadedEnvironment {
    pub definition: EnvironmentDefinition,
    pub plan: Option<PlanHandle>,
}

pub fn load_credentials(yaml: &str, config_dir: &Path) -> ConfigResult<CredentialsMap> {
    let raw: BTreeMap<String, Credentials> = serde_yaml::from_str(yaml)?;
    Ok(raw
        .into_iter()
        .map(|(name, creds)| {
            let creds = creds.anchored(&name, config_dir);
            (name, creds)
        })
        .collect())
}

pub fn load_services(
    yaml: &str,
    config_root: &Path,
    registry: &Registry,
) -> ConfigResult<BTreeMap<String, Arc<ServiceDefinition>>> {
    let doc: Mapping = serde_yaml::from_str(yaml)?;
    let mut errors = Vec::new();
    let mut services = BTreeMap::new();

    for (key, value) in &doc {
        let Some(name) = key.as_str() else {
            continue;
        };
        let Some(block) = value.as_mapping() else {
            errors.push(format!("Service '{name}' is not a mapping"));
            continue;
        };

        let kind = str_key(block, "service_configurator").unwrap_or("script");
        let configurator = match registry.configurator(kind) {
            Ok(configurator) => configurator,
            Err(_) => {
                errors.push(format!(
                    "Service configurator '{kind}' is invalid for service '{name}'"
                ));
                continue;
            }
        };
        configurator.validate(name, block, config_root, &mut errors);

        let connectivity = match block.get("connectivity") {
            Some(value) => match serde_yaml::from_value(value.clone()) {
                Ok(connectivity) => connectivity,
                Err(err) => {
                    errors.push(format!(
                        "Connectivity for service '{name}' is invalid: {err}"
                    ));
                    continue;
                }
            },
            None => Vec::new(),
        };
        let settings = block
            .get("settings")
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();

        services.insert(
            name.to_string(),
            Arc::new(ServiceDefinition {
                name: name.to_string(),
                connectivity,
                settings,
                configurator,
            }),
        );
    }

    if !errors.is_empty() {
        return Err(ConfigError::validation(errors));
    }
    Ok(services)
}

pub fn list_environment_templates(yaml: &str) -> ConfigResult<Vec<String>> {
    let doc: Mapping = serde_yaml::from_str(yaml)?;
    Ok(doc
        .keys()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

struct PreparedTemplate {
    template: String,
    provider: Box<dyn NodeProvider>,
    block: Mapping,
}

/// Build an `EnvironmentDefinition` per environment template. With
/// `noop` set, every provider is wrapped in the dry-run decorator and
/// the plan handle is returned alongside.
pub fn load_environments(
    yaml: &str,
    services: &BTreeMap<String, Arc<ServiceDefinition>>,
    env_name: &str,
    credentials: &CredentialsMap,
    noop: bool,
    registry: &Registry,
) -> ConfigResult<BTreeMap<String, LoadedEnvironment>> {
    let doc: Mapping = serde_yaml::from_str(yaml)?;
    let mut errors = Vec::new();
    let mut prepared = Vec::new();

    for (key, value) in &doc {
        let Some(template) = key.as_str() else {
            continue;
        };
        let Some(block) = value.as_mapping() else {
            errors.push(format!(
                "Environment template '{template}' is not a mapping"
            ));
            continue;
        };

        let provider_block = block
            .get("provider")
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default();
        let Some(kind) = str_key(&provider_block, "kind") else {
            errors.push(format!(
                "Provider kind is missing in '{template}' environment template"
            ));
            continue;
        };
        if !registry.has_provider(kind) {
            errors.push(format!(
                "Provider kind '{kind}' is invalid in '{template}' environment template"
            ));
            continue;
        }
        let provider = match registry.build_provider(kind, &provider_block) {
            Ok(provider) => provider,
            Err(err) => {
                errors.push(err.to_string());
                continue;
            }
        };
        provider.validate(env_name, &Value::Mapping(block.clone()), &mut errors, credentials);

        match block.get("nodes").and_then(Value::as_sequence) {
            Some(nodes) if !nodes.is_empty() => {
                for (i, node) in nodes.iter().enumerate() {
                    match node.as_mapping() {
                        Some(mapping) => NodeDefinition::validate_block(
                            mapping,
                            i + 1,
                            env_name,
                            credentials,
                            &mut errors,
                        ),
                        None => errors.push(format!(
                            "Node definition number {} is not a mapping in '{template}' environment template",
                            i + 1
                        )),
                    }
                }
            }
            _ => errors.push(format!(
                "Key 'nodes' must name at least one node definition in '{template}' environment template"
            )),
        }

        validate_hooks(block, template, registry, &mut errors);

        prepared.push(PreparedTemplate {
            template: template.to_string(),
            provider,
            block: block.clone(),
        });
    }

    if !errors.is_empty() {
        return Err(ConfigError::validation(errors));
    }

    let mut environments = BTreeMap::new();
    for PreparedTemplate {
        template,
        provider,
        block,
    } in prepared
    {
        let mut definitions = Vec::new();
        if let Some(nodes) = block.get("nodes").and_then(Value::as_sequence) {
            for node in nodes {
                definitions.push(NodeDefinition::from_value(node.clone(), credentials)?);
            }
        }

        let (provider, plan) = if noop {
            let decorator = NoopNodeProvider::new(provider);
            let plan = decorator.plan();
            (Box::new(decorator) as Box<dyn NodeProvider>, Some(plan))
        } else {
            (provider, None)
        };

        debug!(%template, nodes = definitions.len(), "loaded environment template");
        let mut definition = EnvironmentDefinition::new(env_name, &template, provider)
            .with_definitions(definitions)
            .with_services(services.clone())
            .with_credentials(credentials.clone());

        if let Some(hooks) = block.get("hooks").and_then(Value::as_mapping) {
            for (service, entries) in hooks {
                let (Some(service), Some(entries)) = (service.as_str(), entries.as_sequence())
                else {
                    continue;
                };
                for entry in entries {
                    let Some(mapping) = entry.as_mapping() else {
                        continue;
                    };
                    if let Some(kind) = str_key(mapping, "kind") {
                        definition =
                            definition.with_hook(service, registry.build_hook(kind, mapping)?);
                    }
                }
            }
        }

        environments.insert(template, LoadedEnvironment { definition, plan });
    }
    Ok(environments)
}

fn validate_hooks(
    block: &Mapping,
    template: &str,
    registry: &Registry,
    errors: &mut Vec<String>,
) {
    let Some(hooks) = block.get("hooks").and_then(Value::as_mapping) else {
        return;
    };
    for (service, entries) in hooks {
        let service = service.as_str().unwrap_or_default();
        let Some(entries) = entries.as_sequence() else {
            errors.push(format!(
                "Hooks for service '{service}' must be a list in '{template}' environment template"
            ));
            continue;
        };
        for entry in entries {
            let kind = entry.as_mapping().and_then(|m| str_key(m, "kind"));
            match kind {
                Some(kind) if registry.has_hook(kind) => {}
                Some(kind) => errors.push(format!(
                    "Hook kind '{kind}' is invalid for service '{service}' in '{template}' environment template"
                )),
                None => errors.push(format!(
                    "Hook kind is missing for service '{service}' in '{template}' environment template"
                )),
            }
        }
    }
}

/// The standard configuration directory layout.
pub struct ConfigDir {
    pub environments: BTreeMap<String, LoadedEnvironment>,
    pub services: BTreeMap<String, Arc<ServiceDefinition>>,
    pub credentials: CredentialsMap,
}

/// Load `environments.yml`, `services.yml`, and `credentials.yml` from
/// one directory.
pub fn load_config_dir(
    dir: &Path,
    env_name: &str,
    noop: bool,
    registry: &Registry,
) -> ConfigResult<ConfigDir> {
    let credentials = match fs::read_to_string(dir.join("credentials.yml")) {
        Ok(yaml) => load_credentials(&yaml, dir)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => CredentialsMap::new(),
        Err(err) => return Err(err.into()),
    };
    let services = load_services(&fs::read_to_string(dir.join("services.yml"))?, dir, registry)?;
    let environments = load_environments(
        &fs::read_to_string(dir.join("environments.yml"))?,
        &services,
        env_name,
        &credentials,
        noop,
        registry,
    )?;
    Ok(ConfigDir {
        environments,
        services,
        credentials,
    })
}
