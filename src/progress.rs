//! Build progress reporting, for the purpose of display to the user.

use crate::graph::NodeState;
use crate::task::{TaskResult, Termination};
use std::io::Write;

/// Trait for build progress notifications.
pub trait Progress {
    /// Called when a node's action starts, with its description.
    fn task_started(&mut self, node: &str, message: &str);

    /// Called when a node's action completes.
    fn task_finished(&mut self, node: &str, message: &str, result: &TaskResult);

    /// Called when a node reaches a terminal state, whether or not an
    /// action ran.
    fn node_finished(&mut self, _node: &str, _state: NodeState) {}

    /// Called when the walker finds a dependency cycle.  `path` runs from
    /// the root to the node whose child closes the loop.
    fn cycle(&mut self, node: &str, path: &[&str]) {
        let mut msg = format!("dependency cycle: {}", path.join(" -> "));
        msg.push_str(" -> ");
        msg.push_str(node);
        self.log(&msg);
    }

    /// Log a line of output.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for a "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print action descriptions as they start.
    verbose: bool,

    /// The last node printed, used to avoid printing it twice when we have
    /// two updates for the same node in a row.
    last_started: Option<String>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn task_started(&mut self, node: &str, message: &str) {
        if self.verbose {
            self.log(message);
            self.last_started = Some(node.to_owned());
        }
    }

    fn task_finished(&mut self, node: &str, message: &str, result: &TaskResult) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started.as_deref() == Some(node) {
                    // Output is empty, or we just printed the command, don't print it again.
                } else {
                    self.log(message)
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", message)),
            Termination::Failure(_) => self.log(&format!("failed: {}", message)),
        };
        if !result.output.is_empty() {
            // Nothing useful to do if stdout is gone.
            let _ = std::io::stdout().write_all(&result.output);
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Discards everything.
#[derive(Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn task_started(&mut self, _node: &str, _message: &str) {}
    fn task_finished(&mut self, _node: &str, _message: &str, _result: &TaskResult) {}
    fn cycle(&mut self, _node: &str, _path: &[&str]) {}
    fn log(&mut self, _msg: &str) {}
}
