//! Shell-level operations against the container host.
//!
//! Everything the backend knows about the host is obtained by running
//! lxc tooling over the transport session. Tag files and the host-wide
//! port-assignment file live under `/var/lib/driftgrid`.

use std::collections::BTreeMap;
use std::sync::Arc;

use drift_core::{NodeState, NodeTags};
use driftgrid_provider::{ProviderError, ProviderResult, Transport};

pub const TAG_DIR: &str = "/var/lib/driftgrid/tags";
pub const PORTS_FILE: &str = "/var/lib/driftgrid/port_assignments.yml";

/// First host port handed out for container port forwarding.
pub const FIRST_FORWARDED_PORT: u16 = 50000;

/// exposed host port → "container:container_port".
pub type PortAssignments = BTreeMap<u16, String>;

#[derive(Clone)]
pub struct HostShell {
    transport: Arc<dyn Transport>,
}

impl HostShell {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn containers(&self) -> ProviderResult<Vec<String>> {
        let output = self.transport.run_command("lxc-ls -1")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn container_state(&self, name: &str) -> ProviderResult<NodeState> {
        let output = self.transport.run_command(&format!("lxc-info -sn {name}"))?;
        if !output.success {
            return Err(ProviderError::Lookup(name.to_string()));
        }
        let state = output
            .stdout
            .split(':')
            .nth(1)
            .map(str::trim)
            .unwrap_or_default();
        match state {
            "RUNNING" => Ok(NodeState::Running),
            "STOPPED" => Ok(NodeState::Stopped),
            "STARTING" => Ok(NodeState::Pending),
            other => Err(ProviderError::Backend(format!(
                "unrecognized container state '{other}' for {name}"
            ))),
        }
    }

    pub fn container_ip(&self, name: &str) -> ProviderResult<String> {
        let output = self.transport.run_command(&format!("lxc-info -in {name}"))?;
        output
            .stdout
            .lines()
            .find_map(|line| line.strip_prefix("IP:"))
            .map(|ip| ip.trim().to_string())
            .ok_or_else(|| {
                ProviderError::Backend(format!("container {name} has no IP address yet"))
            })
    }

    pub fn create_container(&self, template: &str, name: &str) -> ProviderResult<()> {
        self.transport
            .run_commands(&[
                format!("lxc-create -t {template} -n {name}"),
                format!("lxc-start -dn {name}"),
            ])
    }

    pub fn destroy_container(&self, name: &str) -> ProviderResult<()> {
        self.transport.run_commands(&[
            format!("lxc-stop -n {name}"),
            format!("lxc-destroy -n {name}"),
            format!("rm -f {TAG_DIR}/{name}.yml"),
        ])
    }

    /// Run a command inside the container.
    pub fn attach(&self, name: &str, command: &str) -> ProviderResult<driftgrid_provider::CommandOutput> {
        self.transport
            .run_command(&format!("lxc-attach -n {name} -- sh -c '{command}'"))
    }

    pub fn ping(&self, ip: &str) -> bool {
        matches!(
            self.transport.run_command(&format!("ping -c 1 -W 1 {ip}")),
            Ok(output) if output.success
        )
    }

    pub fn read_tags(&self, name: &str) -> ProviderResult<NodeTags> {
        let output = self
            .transport
            .run_command(&format!("cat {TAG_DIR}/{name}.yml"))?;
        if !output.success {
            return Err(ProviderError::Lookup(name.to_string()));
        }
        Ok(serde_yaml::from_str(&output.stdout)?)
    }

    pub fn write_tags(&self, name: &str, tags: &NodeTags) -> ProviderResult<()> {
        let yaml = serde_yaml::to_string(tags)?;
        self.transport.run_command(&format!(
            "mkdir -p {TAG_DIR} && cat > {TAG_DIR}/{name}.yml <<'EOF'\n{yaml}EOF"
        ))?;
        Ok(())
    }

    pub fn port_assignments(&self) -> ProviderResult<PortAssignments> {
        let output = self.transport.run_command(&format!("cat {PORTS_FILE}"))?;
        if !output.success || output.stdout.trim().is_empty() {
            return Ok(PortAssignments::new());
        }
        Ok(serde_yaml::from_str(&output.stdout)?)
    }

    pub fn write_port_assignments(&self, assignments: &PortAssignments) -> ProviderResult<()> {
        let yaml = serde_yaml::to_string(assignments)?;
        self.transport.run_command(&format!(
            "mkdir -p /var/lib/driftgrid && cat > {PORTS_FILE} <<'EOF'\n{yaml}EOF"
        ))?;
        Ok(())
    }

    /// DNAT a host port to a container port for external, bridge, and
    /// local host traffic.
    pub fn forward_port(&self, ip: &str, host_port: u16, container_port: u16) -> ProviderResult<()> {
        let target = format!("{ip}:{container_port}");
        self.transport.run_commands(&[
            format!(
                "iptables -t nat -A PREROUTING -i eth0 -p tcp --dport {host_port} -j DNAT --to {target}"
            ),
            format!(
                "iptables -t nat -A PREROUTING -i lxcbr0 -p tcp --dport {host_port} -j DNAT --to {target}"
            ),
            format!(
                "iptables -t nat -A OUTPUT -p tcp -o lo --dport {host_port} -j DNAT --to {target}"
            ),
        ])
    }
}
