//! driftgrid-noop — the dry-run decorator.
//!
//! `NoopNodeProvider` wraps any backend behind the same capability
//! interface: reads pass through, every mutating call is recorded in an
//! ordered action log and answered synthetically. The rendered log is
//! the plan an operator reviews before a real convergence.

mod actions;
mod provider;

pub use actions::{Action, ActionLog};
pub use provider::{NoopNodeProvider, PlanHandle};
