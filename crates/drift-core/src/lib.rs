//! drift-core — shared domain types for the driftgrid fleet manager.
//!
//! These are the leaf value types every other crate speaks: network
//! addresses with per-service port bindings, durable node tags,
//! connectivity specifications, credentials, and the declarative
//! `NodeDefinition` variants consumed by the reconciler.

pub mod address;
pub mod connectivity;
pub mod credentials;
pub mod definition;
pub mod state;
pub mod tags;

pub use address::Address;
pub use connectivity::{Connectivity, PortSpec, Protocol, WORLD};
pub use credentials::{Credentials, CredentialsMap};
pub use definition::{
    CloudNodeDefinition, FileNodeDefinition, HostNodeDefinition, NodeDefinition,
};
pub use state::NodeState;
pub use tags::{
    ENV_DEF_NAME_TAG, ENV_NAME_TAG, NodeTags, SERVICES_TAG, ServiceMap, ServicePorts,
    parse_services, serialize_services,
};
