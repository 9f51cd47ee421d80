//! Reconciliation errors.

use driftgrid_provider::ProviderError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Termination failures collected across the whole stale-node list.
    /// One bad node must not leave its siblings running.
    #[error("failed to terminate nodes: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
