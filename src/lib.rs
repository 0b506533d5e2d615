//! An incremental build engine.
//!
//! Callers describe artifacts and how they depend on each other as a
//! `Graph`; a `Work` decides which of them are out of date, runs the
//! actions that rebuild them, and records what each build saw so the next
//! run can skip whatever hasn't changed.

pub mod builder;
pub mod context;
pub mod db;
pub mod decide;
mod densemap;
pub mod error;
pub mod fs;
pub mod graph;
pub mod info;
pub mod process;
pub mod progress;
pub mod scan;
pub mod sig;
pub mod task;
pub mod trace;
pub mod walk;
pub mod work;

#[cfg(test)]
mod testutil;

pub use builder::{Action, Actions, Builder, Env, Invocation};
pub use context::{Context, Options};
pub use error::{BuildError, Error};
pub use graph::{Graph, NodeId, NodeKind, NodeState};
pub use work::{Summary, Work};
