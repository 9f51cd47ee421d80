//! driftgrid-provider — the backend abstraction layer.
//!
//! Defines the capability interfaces the reconciliation core drives:
//! `NodeProvider` (list/start/shutdown/validate) and `RunningNode`
//! (remote commands, readiness, tag mutation), plus the transport seam
//! for remote execution, composable node predicates, lifecycle hooks,
//! and the display-only environment-description types.
//!
//! The interfaces are defined independently of any concrete backend so
//! a decorator (the dry-run provider) can wrap any of them
//! transparently.

pub mod describe;
pub mod error;
pub mod hook;
pub mod node;
pub mod predicate;
pub mod provider;
pub mod transport;

pub use describe::{
    DefinitionTranslator, EnvironmentDescription, Location, NodeSummary, SimpleTextDescriber,
    TableDescriber,
};
pub use error::{ProviderError, ProviderResult};
pub use hook::ServiceLifecycleHook;
pub use node::RunningNode;
pub use predicate::NodePredicate;
pub use provider::NodeProvider;
pub use transport::{CommandOutput, Transport, TransportFactory};
