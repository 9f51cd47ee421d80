//! driftgrid-cloud — the cloud backend.
//!
//! Provisions instances through the `CloudApi` seam, keeps environment
//! membership and installed services in instance tags, and converges
//! per-service security groups from declarative connectivity specs.
//! `SimulatedCloud` is the in-memory API used by tests and local runs;
//! production SDK bindings live at the embedding edge.

pub mod api;
pub mod elb;
pub mod provider;
pub mod security;
pub mod sim;

pub use api::{
    CloudApi, HealthCheck, IngressSource, InstanceRecord, Listener, LoadBalancerRecord,
    LoadBalancerSpec, RunInstanceRequest,
};
pub use elb::LoadBalancerHook;
pub use provider::{CloudNode, CloudNodeProvider, CloudTiming, ReadinessProbe, TcpProbe};
pub use security::SecurityGroups;
pub use sim::SimulatedCloud;
