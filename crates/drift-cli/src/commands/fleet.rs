use std::fs;
use std::path::Path;

use anyhow::Context;
use driftgrid_config::{Registry, list_environment_templates, load_config_dir};
use driftgrid_provider::{SimpleTextDescriber, TableDescriber};
use driftgrid_reconciler::EnvironmentDefinition;

pub fn list_templates(config_dir: &Path) -> anyhow::Result<()> {
    let yaml = fs::read_to_string(config_dir.join("environments.yml"))?;
    for template in list_environment_templates(&yaml)? {
        println!("{template}");
    }
    Ok(())
}

pub fn list_nodes(
    config_dir: &Path,
    env: &str,
    template: &str,
    registry: &Registry,
) -> anyhow::Result<()> {
    let definition = load_template(config_dir, env, template, registry)?;
    let nodes = definition.list_nodes()?;
    if nodes.is_empty() {
        println!("No nodes running for '{template}' in environment '{env}'");
        return Ok(());
    }
    for node in nodes {
        let state = node.state()?;
        let services: Vec<String> = node.get_services()?.keys().cloned().collect();
        println!("{}  {}  [{}]", node.id(), state, services.join(","));
    }
    Ok(())
}

pub fn describe(
    config_dir: &Path,
    env: &str,
    template: &str,
    table: bool,
    registry: &Registry,
) -> anyhow::Result<()> {
    let definition = load_template(config_dir, env, template, registry)?;
    let description = definition.provider().definition_translator().translate(
        definition.name(),
        definition.node_definitions(),
        &definition.service_connectivity(),
    );
    let text = if table {
        TableDescriber.describe(&description)
    } else {
        SimpleTextDescriber.describe(&description)
    };
    print!("{text}");
    Ok(())
}

fn load_template(
    config_dir: &Path,
    env: &str,
    template: &str,
    registry: &Registry,
) -> anyhow::Result<EnvironmentDefinition> {
    let mut config = load_config_dir(config_dir, env, false, registry)?;
    let loaded = config
        .environments
        .remove(template)
        .with_context(|| format!("unknown environment template '{template}'"))?;
    Ok(loaded.definition)
}
