//! Callscope core library: analysis engine for hierarchical function-call
//! profiles, plus the run store and CLI commands built on it.

mod callgraph;
mod cmd;
mod compare;
mod config;
mod dimension;
mod error;
mod metric;
mod profile;
mod relatives;
mod searcher;
mod selftime;
mod sortfilter;
mod tree;

pub use callgraph::*;
pub use cmd::*;
pub use compare::*;
pub use config::*;
pub use dimension::*;
pub use error::*;
pub use metric::*;
pub use profile::*;
pub use relatives::*;
pub use searcher::*;
pub use selftime::*;
pub use sortfilter::*;
pub use tree::*;
