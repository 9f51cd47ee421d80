//! Provider error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by node providers and running nodes.
///
/// Validation problems never appear here: validators accumulate
/// human-readable strings into an error list instead. These are the
/// operational failures raised immediately and not retried by the core.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Readiness polling timed out. Fatal to the launch that triggered it.
    #[error("node {node} did not become ready within {timeout:?}")]
    NotReady { node: String, timeout: Duration },

    /// A remote command returned failure and `warn_only` was not set.
    #[error("command '{command}' failed on node {node}: {output}")]
    Command {
        node: String,
        command: String,
        output: String,
    },

    /// An operation was issued against an identity the backend cannot
    /// resolve.
    #[error("no node with id '{0}' found")]
    Lookup(String),

    /// Backend I/O failure (API call, remote session).
    #[error("backend error: {0}")]
    Backend(String),

    #[error("tag serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
