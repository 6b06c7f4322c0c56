//! CLI command implementations.

mod run_cmd;
mod watch_cmd;

pub use run_cmd::*;
pub use watch_cmd::*;
