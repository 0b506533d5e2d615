//! Per-run configuration and the collaborators a run needs.

use crate::db::Store;
use crate::fs::FileSystem;
use crate::sig::{Calculator, SigMode};
use crate::trace::Trace;
use std::time::Duration;

/// Options that affect a run.
#[derive(Clone, Debug)]
pub struct Options {
    /// Maximum number of actions in flight.
    pub parallelism: usize,

    /// Stop after this many failures; 0 means never stop.
    pub keep_going: usize,

    pub sig_mode: SigMode,

    /// See `Calculator::max_drift`.
    pub max_drift: Duration,

    /// Log why each stale node is rebuilt.
    pub explain: bool,

    /// Reuse implicit dependencies from the previous run instead of
    /// scanning, when the node's explicit inputs are unchanged.
    pub implicit_cache: bool,
    /// Rescan even when `implicit_cache` would reuse.
    pub implicit_deps_changed: bool,
    /// Reuse cached implicit dependencies even if explicit inputs changed.
    pub implicit_deps_unchanged: bool,

    /// Visit siblings in a random order, to shake out missing dependencies.
    pub random: bool,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for Options {
    fn default() -> Self {
        Options {
            parallelism: default_parallelism(),
            keep_going: 1,
            sig_mode: SigMode::default(),
            max_drift: Duration::ZERO,
            explain: false,
            implicit_cache: false,
            implicit_deps_changed: false,
            implicit_deps_unchanged: false,
            random: false,
        }
    }
}

/// Everything shared by one run: created once, passed by reference.
pub struct Context<'a> {
    pub fs: &'a dyn FileSystem,
    pub store: &'a dyn Store,
    pub calc: Calculator,
    pub options: Options,
    pub trace: Trace,
}

impl<'a> Context<'a> {
    pub fn new(fs: &'a dyn FileSystem, store: &'a dyn Store, options: Options) -> Self {
        let calc = Calculator {
            mode: options.sig_mode.clone(),
            max_drift: options.max_drift,
            normalizer: None,
        };
        Context {
            fs,
            store,
            calc,
            options,
            trace: Trace::disabled(),
        }
    }
}
