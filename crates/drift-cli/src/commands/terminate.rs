use std::path::Path;

use anyhow::Context;
use driftgrid_config::{Registry, load_config_dir};

pub fn terminate(
    config_dir: &Path,
    env: &str,
    template: &str,
    registry: &Registry,
) -> anyhow::Result<()> {
    let mut config = load_config_dir(config_dir, env, false, registry)?;
    let loaded = config
        .environments
        .remove(template)
        .with_context(|| format!("unknown environment template '{template}'"))?;

    let terminated = loaded.definition.terminate_all()?;
    if terminated.is_empty() {
        println!("No nodes running for '{template}' in environment '{env}'");
    } else {
        for id in &terminated {
            println!("terminated {id}");
        }
    }
    Ok(())
}
