//! Display-only environment descriptions.
//!
//! Providers translate a static environment definition (or a live
//! listing) into this neutral shape; the CLI picks a describer to
//! render it. The reconciliation core never consults these types.

use std::collections::BTreeMap;

use drift_core::{Connectivity, NodeDefinition};

/// A described environment: nodes grouped by backend location (cloud
/// region, container host, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescription {
    pub name: String,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: String,
    pub dns_name: String,
    pub services: Vec<String>,
    /// Backend-specific attributes worth surfacing (image, size, zone...).
    pub details: BTreeMap<String, String>,
}

/// Renders a static environment definition for display. Each backend
/// supplies its own translator via `NodeProvider::definition_translator`.
pub trait DefinitionTranslator {
    fn translate(
        &self,
        env_name: &str,
        definitions: &[NodeDefinition],
        service_connectivity: &BTreeMap<String, Vec<Connectivity>>,
    ) -> EnvironmentDescription;
}

/// Indented plain-text rendering.
pub struct SimpleTextDescriber;

impl SimpleTextDescriber {
    pub fn describe(&self, environment: &EnvironmentDescription) -> String {
        let mut out = format!("{}\n", environment.name);
        for location in &environment.locations {
            out.push_str(&format!("  {}\n", location.name));
            for node in &location.nodes {
                out.push_str(&format!("    DNS: {} Services:", node.dns_name));
                for service in &node.services {
                    out.push(' ');
                    out.push_str(service);
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Column-aligned rendering for terminal output.
pub struct TableDescriber;

impl TableDescriber {
    pub fn describe(&self, environment: &EnvironmentDescription) -> String {
        let mut rows = vec![[
            "Location".to_string(),
            "DNS".to_string(),
            "Services".to_string(),
            "ID".to_string(),
        ]];

        for location in &environment.locations {
            for node in &location.nodes {
                rows.push([
                    location.name.clone(),
                    node.dns_name.clone(),
                    node.services.join(","),
                    node.id.clone(),
                ]);
            }
        }

        let mut widths = [0usize; 4];
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        let mut out = format!("\nEnvironment: {}\n", environment.name);
        for (n, row) in rows.iter().enumerate() {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
                .collect();
            out.push_str(&line.join("  "));
            out.push('\n');
            if n == 0 {
                out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 6));
                out.push('\n');
            }
        }
        out
    }
}
