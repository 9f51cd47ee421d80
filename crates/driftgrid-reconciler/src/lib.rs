//! driftgrid-reconciler — the convergence core.
//!
//! Diffs declared node definitions against observed backend state and
//! closes the gap: provision, block for readiness, terminate stale
//! nodes, tag, configure services, fire lifecycle hooks. Idempotent
//! when nothing drifts; a second pass takes no actions.

mod environment;
mod error;
mod service;

pub use environment::{Delta, EnvironmentDefinition, LaunchReport, SharedNode};
pub use error::{ReconcileError, ReconcileResult};
pub use service::{
    EnvSettings, FakeConfigurator, ScriptConfigurator, ServiceConfigurator, ServiceDefinition,
};
