//! driftgrid-file — a file-backed fake backend.
//!
//! All node state lives in one YAML document with a top-level `nodes`
//! mapping keyed by identity. Useful for local development and as the
//! concrete backend the reconciler's tests converge against: starts
//! are instant, readiness is immediate, and every mutation is visible
//! in the store file.

mod provider;
mod store;

pub use provider::{FileBackedProvider, FileNode};
pub use store::{FileStore, NodeRecord};
