//! driftgrid-host — the container-host backend.
//!
//! Manages lxc containers on a single host reached over a transport
//! session. Environment membership and installed services live in a
//! YAML tag file per container; service ports are forwarded from a
//! reserved host port range with DNAT rules so services are reachable
//! on the host's address.

mod provider;
mod shell;

pub use provider::{HostNode, HostNodeProvider, HostTiming, TEMPLATE_TAG};
pub use shell::{FIRST_FORWARDED_PORT, HostShell, PortAssignments};
