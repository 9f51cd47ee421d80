use std::path::Path;

use anyhow::Context;
use driftgrid_config::{Registry, load_config_dir};

pub fn launch(
    config_dir: &Path,
    env: &str,
    template: &str,
    noop: bool,
    registry: &Registry,
) -> anyhow::Result<()> {
    let mut config = load_config_dir(config_dir, env, noop, registry)?;
    let loaded = config
        .environments
        .remove(template)
        .with_context(|| format!("unknown environment template '{template}'"))?;

    let report = loaded.definition.launch()?;

    if let Some(plan) = &loaded.plan {
        println!("Plan for '{template}' (no changes made):");
        if plan.actions_recorded() == 0 {
            println!("  nothing to do");
        } else {
            print!("{}", plan.render());
        }
        return Ok(());
    }

    println!("Environment '{env}' converged from template '{template}'");
    if !report.provisioned.is_empty() {
        println!("  provisioned: {}", report.provisioned.join(", "));
    }
    if !report.terminated.is_empty() {
        println!("  terminated: {}", report.terminated.join(", "));
    }
    if report.provisioned.is_empty() && report.terminated.is_empty() {
        println!("  no drift");
    }
    Ok(())
}
