mod fleet;
mod launch;
mod terminate;

pub use fleet::{describe, list_nodes, list_templates};
pub use launch::launch;
pub use terminate::terminate;
